// tests/process_supervisor.rs

#![cfg(unix)]

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostrun::errors::HostrunError;
use hostrun::process::{
    CommandLine, ProcessLauncher, ProcessSupervisor, SessionState, process_exists,
    resolve_executable,
};
use hostrun::stream::{StreamKind, StreamMultiplexer};
use hostrun_test_utils::builders::write_script;
use hostrun_test_utils::fakes::CollectingSink;
use hostrun_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn natural_exit_reports_code_and_terminates() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "exit.sh", "exit 7");

    let session = ProcessSupervisor::new().launch(&CommandLine::new("exit", &script), dir.path())?;
    let exit = with_timeout(session.wait()).await;

    assert_eq!(exit.code, 7);
    assert!(!exit.killed);
    assert!(!exit.success());
    assert_eq!(session.state(), SessionState::Terminated);
    Ok(())
}

#[tokio::test]
async fn env_overlay_and_work_dir_reach_the_child() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let work = tempfile::tempdir()?;
    let script = write_script(dir.path(), "env.sh", "echo \"$HOSTRUN_TEST_VALUE\"\npwd");

    let env = BTreeMap::from([("HOSTRUN_TEST_VALUE".to_string(), "overlay".to_string())]);
    let command = CommandLine::new("env", &script).env(&env);

    let mut session = ProcessSupervisor::new().launch(&command, work.path())?;
    let sink = CollectingSink::new();
    let attachment = StreamMultiplexer::drain_only(Arc::new(sink.clone()))
        .attach_session(&mut session)
        .ok_or("streams already taken")?;

    with_timeout(session.wait()).await;
    with_timeout(attachment.finish()).await;

    let lines = sink.lines_of(StreamKind::Stdout);
    assert_eq!(lines[0], "overlay");
    let canonical_work = work.path().canonicalize()?;
    assert_eq!(std::path::Path::new(&lines[1]).canonicalize()?, canonical_work);
    Ok(())
}

#[tokio::test]
async fn streams_can_only_be_taken_once() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "noop.sh", "exit 0");

    let mut session = ProcessSupervisor::new().launch(&CommandLine::new("noop", &script), dir.path())?;
    assert!(session.take_streams().is_some());
    assert!(session.take_streams().is_none());
    with_timeout(session.wait()).await;
    Ok(())
}

#[tokio::test]
async fn kill_terminates_the_whole_tree() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    // The grandchild reports its pid, then everything sleeps.
    let script = write_script(dir.path(), "tree.sh", "sleep 30 &\necho \"child=$!\"\nwait");

    let mut session = ProcessSupervisor::new().launch(&CommandLine::new("tree", &script), dir.path())?;
    let (stdout, _stderr) = session.take_streams().ok_or("streams already taken")?;

    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stdout));
    let first = with_timeout(lines.next_line()).await?.ok_or("no output")?;
    let grandchild: u32 = first.trim_start_matches("child=").parse()?;
    assert!(process_exists(grandchild));

    let started = Instant::now();
    session.kill();
    let exit = with_timeout(session.wait()).await;

    assert!(exit.killed);
    assert_eq!(exit.code, 137);
    assert!(started.elapsed() < Duration::from_secs(5));

    // Signal delivery is asynchronous; give the grandchild a moment to die.
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_exists(grandchild) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_exists(grandchild), "grandchild {grandchild} survived");
    Ok(())
}

#[tokio::test]
async fn kill_is_idempotent_and_concurrent_waiters_agree() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "sleep.sh", "sleep 30");

    let session = Arc::new(
        ProcessSupervisor::new().launch(&CommandLine::new("sleep", &script), dir.path())?,
    );

    let waiter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.wait().await })
    };

    session.kill();
    session.kill();

    let a = with_timeout(session.wait()).await;
    let b = with_timeout(waiter).await?;
    assert_eq!(a, b);
    assert!(a.killed);

    // Killing a finished session is a no-op.
    session.kill();
    assert_eq!(session.try_exit(), Some(a));
    Ok(())
}

#[tokio::test]
async fn missing_executable_is_a_launch_error() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let command = CommandLine::new("ghost", dir.path().join("no-such-host"));

    match ProcessSupervisor::new().launch(&command, dir.path()) {
        Err(HostrunError::Launch(msg)) => assert!(msg.contains("does not exist")),
        other => panic!("expected Launch error, got {other:?}"),
    }
}

#[test]
fn non_executable_file_is_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plain.txt");
    std::fs::write(&path, "not a program")?;

    match resolve_executable(&path) {
        Err(HostrunError::Launch(msg)) => assert!(msg.contains("not executable")),
        other => panic!("expected Launch error, got {other:?}"),
    }

    match resolve_executable(dir.path()) {
        Err(HostrunError::Launch(msg)) => assert!(msg.contains("not a file")),
        other => panic!("expected Launch error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn bare_names_resolve_through_path() -> TestResult {
    let sh = resolve_executable(std::path::Path::new("sh"))?;
    assert!(sh.is_absolute());

    assert!(matches!(
        resolve_executable(std::path::Path::new("hostrun-surely-not-installed")),
        Err(HostrunError::Launch(_))
    ));
    Ok(())
}
