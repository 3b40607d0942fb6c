// tests/coordinator_run.rs

#![cfg(unix)]

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostrun::cancel::{CancelSignal, stop_channel};
use hostrun::coordinator::{
    Collaborators, DebugPort, RunCoordinator, RunEvent, RunOutcome, RunPhase, RunSpec,
};
use hostrun::errors::HostrunError;
use hostrun::process::process_exists;
use hostrun::settings::EmptySettingsStore;
use hostrun::stream::{LineSignal, Sink, StreamKind};
use hostrun::types::HostProfile;
use hostrun_test_utils::builders::{
    ArtifactBuilder, ArtifactFixture, PLAIN_HOST_JSON, generic_spec, write_script,
};
use hostrun_test_utils::fakes::{CollectingSink, RecordingAttacher, SpyLauncher};
use hostrun_test_utils::{init_tracing, with_timeout};
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    spy: SpyLauncher,
    sink: CollectingSink,
    attacher: RecordingAttacher,
}

impl Harness {
    fn new() -> Self {
        Self::with_attacher(RecordingAttacher::new())
    }

    fn with_attacher(attacher: RecordingAttacher) -> Self {
        Self {
            spy: SpyLauncher::new(),
            sink: CollectingSink::new(),
            attacher,
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators::new(Arc::new(EmptySettingsStore))
            .with_launcher(Arc::new(self.spy.clone()))
            .with_sink(Arc::new(self.sink.clone()))
            .with_attacher(Arc::new(self.attacher.clone()))
    }

    fn coordinator(&self, spec: RunSpec) -> (RunCoordinator, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RunCoordinator::new(spec, self.collaborators()).with_events(tx), rx)
    }

    fn staging_root(&self) -> Option<std::path::PathBuf> {
        self.spy.work_dirs().into_iter().next()
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn phases(events: &[RunEvent]) -> Vec<RunPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::PhaseChanged(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn spec_with_signals(
    fixture: &ArtifactFixture,
    script: &Path,
    ready: &[&str],
    failure: &[&str],
) -> Result<RunSpec, Box<dyn Error>> {
    let mut spec = generic_spec(fixture, script);
    spec.readiness = LineSignal::new(ready)?;
    spec.failure = LineSignal::new(failure)?;
    Ok(spec)
}

#[tokio::test]
async fn repeated_readiness_attaches_debugger_once() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(
        &fixture.bin_dir(),
        "host.sh",
        "echo 'Job host started'\necho 'Job host started'\nsleep 0.5\nexit 0",
    );

    let mut spec = spec_with_signals(&fixture, &script, &["(?i)job host started"], &[])?;
    spec.debug.enabled = true;
    spec.debug.port = DebugPort::Fixed(5999);

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.ready);
    assert_eq!(result.debug_port, Some(5999));
    assert_eq!(harness.attacher.ports(), vec![5999]);

    let events = drain(&mut rx);
    let ready_events = events.iter().filter(|e| matches!(e, RunEvent::Ready { .. })).count();
    assert_eq!(ready_events, 1);
    assert!(events.contains(&RunEvent::DebugAttached { port: 5999 }));

    assert_eq!(
        phases(&events),
        vec![
            RunPhase::Preparing,
            RunPhase::InstallingDependencies,
            RunPhase::Launching,
            RunPhase::Running,
            RunPhase::Ready,
            RunPhase::Terminated,
        ]
    );

    // Both readiness lines still reached the sink.
    assert_eq!(harness.sink.lines_of(StreamKind::Stdout).len(), 2);
    Ok(())
}

#[tokio::test]
async fn readiness_without_debug_does_not_attach() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "echo ready\nsleep 0.3");
    let spec = spec_with_signals(&fixture, &script, &["ready"], &[])?;

    let harness = Harness::new();
    let (coordinator, _rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert!(result.ready);
    assert_eq!(result.debug_port, None);
    assert_eq!(harness.attacher.attach_count(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_attach_is_a_warning_not_an_error() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "echo ready\nsleep 0.5");
    let mut spec = spec_with_signals(&fixture, &script, &["ready"], &[])?;
    spec.debug.enabled = true;
    spec.debug.port = DebugPort::Fixed(6001);

    let harness = Harness::with_attacher(RecordingAttacher::failing("connection refused"));
    let (coordinator, mut rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::DebugAttachWarning { port: 6001, message } if message.contains("connection refused")
    )));
    Ok(())
}

#[tokio::test]
async fn failure_pattern_line_is_reported_on_runtime_failure() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(
        &fixture.bin_dir(),
        "host.sh",
        "echo 'Port 5005 is unavailable' >&2\necho 'shutting down' >&2\nexit 1",
    );
    let spec = spec_with_signals(&fixture, &script, &["never-ready"], &[r"Port \d+ is unavailable"])?;

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::RuntimeFailure);
    assert_eq!(result.exit_code, Some(1));
    assert!(!result.ready);
    assert_eq!(result.last_error_line.as_deref(), Some("Port 5005 is unavailable"));

    let events = drain(&mut rx);
    assert!(events.contains(&RunEvent::FailureLine("Port 5005 is unavailable".to_string())));

    match result.into_result() {
        Err(HostrunError::RuntimeFailure { exit_code, last_error_line }) => {
            assert_eq!(exit_code, 1);
            assert_eq!(last_error_line.as_deref(), Some("Port 5005 is unavailable"));
        }
        other => panic!("expected RuntimeFailure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn runtime_failure_falls_back_to_last_stderr_line() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "echo 'first' >&2\necho 'boom' >&2\nexit 2");
    let spec = generic_spec(&fixture, &script);

    let harness = Harness::new();
    let (coordinator, _rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::RuntimeFailure);
    assert_eq!(result.last_error_line.as_deref(), Some("boom"));
    Ok(())
}

#[tokio::test]
async fn cancel_while_running_kills_host_and_removes_staging() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "echo started\nsleep 30");
    let spec = spec_with_signals(&fixture, &script, &["started"], &[])?;

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let (stop, cancel) = stop_channel();

    let run = tokio::spawn(coordinator.run(cancel));

    let mut seen = Vec::new();
    while let Some(event) = with_timeout(rx.recv()).await {
        let is_ready = matches!(event, RunEvent::Ready { .. });
        seen.push(event);
        if is_ready {
            stop.stop();
            break;
        }
    }

    let result = with_timeout(run).await??;
    seen.extend(drain(&mut rx));

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    // SIGKILL'd host: 137, still reported as a cancel.
    assert_eq!(result.exit_code, Some(137));
    assert!(result.into_result().is_ok());

    let staging = harness.staging_root().ok_or("host never launched")?;
    assert!(!staging.exists(), "staging dir {staging:?} was not removed");

    let phases = phases(&seen);
    assert!(phases.contains(&RunPhase::Cancelling));
    assert_eq!(phases.last(), Some(&RunPhase::Terminated));
    Ok(())
}

#[tokio::test]
async fn cancel_before_start_spawns_nothing() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "exit 0");
    let spec = generic_spec(&fixture, &script);

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let (stop, cancel) = stop_channel();
    stop.stop();

    let result = with_timeout(coordinator.run(cancel)).await?;

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert_eq!(result.exit_code, None);
    assert_eq!(harness.spy.launch_count(), 0);
    assert_eq!(
        phases(&drain(&mut rx)),
        vec![RunPhase::Preparing, RunPhase::Cancelling, RunPhase::Terminated]
    );
    Ok(())
}

#[tokio::test]
async fn preparation_failure_spawns_nothing() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().with_host_json("{ broken").build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "exit 0");
    let spec = generic_spec(&fixture, &script);

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await;

    assert!(matches!(result, Err(HostrunError::Preparation(_))));
    assert_eq!(harness.spy.launch_count(), 0);
    assert_eq!(phases(&drain(&mut rx)).last(), Some(&RunPhase::Terminated));
    Ok(())
}

#[tokio::test]
async fn launch_failure_still_removes_staging() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let spec = generic_spec(&fixture, &fixture.dir.path().join("missing-host"));

    let harness = Harness::new();
    let (coordinator, _rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await;

    assert!(matches!(result, Err(HostrunError::Launch(_))));
    let staging = harness.staging_root().ok_or("launch was never attempted")?;
    assert!(!staging.exists());
    Ok(())
}

#[tokio::test]
async fn missing_storage_setting_is_published() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new()
        .with_function("worker", &["timerTrigger"])
        .build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "exit 0");

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(generic_spec(&fixture, &script));
    with_timeout(coordinator.run(CancelSignal::never())).await?;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::MissingSetting(m) if m.is_blocking()
    )));
    Ok(())
}

/// Function-profile host stand-in: reports its version, installs succeed,
/// `host start` becomes ready and exits cleanly.
const FUNC_SCRIPT: &str = r#"
if [ "$1" = "-v" ]; then
  echo "${FUNC_VERSION:-4.0.5455}"
  exit 0
fi
if [ "$1" = "extensions" ]; then
  echo "installed $*"
  exit ${INSTALL_EXIT:-0}
fi
echo "args: $*"
echo "Job host started"
sleep 0.5
exit 0
"#;

/// `java -version` stand-in; the version goes to stderr like the real one.
const JAVA_SCRIPT: &str = r#"echo "openjdk version \"${JAVA_VERSION:-17.0.2}\" 2022-01-18" >&2"#;

fn function_spec(fixture: &ArtifactFixture) -> Result<RunSpec, Box<dyn Error>> {
    let func = write_script(&fixture.bin_dir(), "func", FUNC_SCRIPT);
    let java = write_script(&fixture.bin_dir(), "java", JAVA_SCRIPT);

    let mut spec = RunSpec::for_profile(HostProfile::Function, &func, fixture.artifacts())?;
    let check = spec.preflight.as_mut().ok_or("function profile has no version check")?;
    check.java = Some(java);
    Ok(spec)
}

#[tokio::test]
async fn function_profile_installs_then_starts_with_debug_agent() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new()
        .with_host_json(PLAIN_HOST_JSON)
        .with_function("worker", &["queueTrigger"])
        .build();
    let mut spec = function_spec(&fixture)?;
    spec.debug.enabled = true;
    spec.debug.port = DebugPort::Fixed(5123);

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert!(result.ready);
    assert_eq!(harness.spy.labels(), vec!["extension-install", "host"]);

    let calls = harness.spy.calls();
    assert_eq!(calls[0].args, vec!["extensions", "install", "--java"]);
    assert_eq!(
        calls[1].args,
        vec![
            "host",
            "start",
            "--language-worker",
            "--",
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=5123",
        ]
    );

    let events = drain(&mut rx);
    assert!(events.contains(&RunEvent::DependenciesInstalled));
    assert_eq!(harness.attacher.ports(), vec![5123]);
    Ok(())
}

#[tokio::test]
async fn failed_install_stops_before_launch() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new()
        .with_host_json(PLAIN_HOST_JSON)
        .with_function("worker", &["queueTrigger"])
        .build();
    let mut spec = function_spec(&fixture)?;
    spec.env.insert("INSTALL_EXIT".to_string(), "4".to_string());

    let harness = Harness::new();
    let (coordinator, _rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await;

    match result {
        Err(HostrunError::DependencyInstall { exit_code }) => assert_eq!(exit_code, 4),
        other => panic!("expected DependencyInstall error, got {other:?}"),
    }
    assert_eq!(harness.spy.labels(), vec!["extension-install"]);
    Ok(())
}

#[tokio::test]
async fn outdated_host_for_java_runtime_is_refused_before_launch() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new()
        .with_bundle()
        .with_function("hello", &["httpTrigger"])
        .build();
    let mut spec = function_spec(&fixture)?;
    spec.env.insert("FUNC_VERSION".to_string(), "3.0.2534".to_string());
    spec.env.insert("JAVA_VERSION".to_string(), "11.0.12".to_string());

    let harness = Harness::new();
    let (coordinator, mut rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await;

    match result {
        Err(HostrunError::Launch(msg)) => {
            assert!(msg.contains("3.0.2534"), "unexpected message: {msg}");
            assert!(msg.contains("3.0.2630"), "unexpected message: {msg}");
        }
        other => panic!("expected Launch error, got {other:?}"),
    }
    assert_eq!(harness.spy.launch_count(), 0);
    assert_eq!(phases(&drain(&mut rx)).last(), Some(&RunPhase::Terminated));
    Ok(())
}

#[tokio::test]
async fn unreadable_host_version_only_warns() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new()
        .with_bundle()
        .with_function("hello", &["httpTrigger"])
        .build();
    let mut spec = function_spec(&fixture)?;
    spec.env.insert("FUNC_VERSION".to_string(), "unknown".to_string());

    let harness = Harness::new();
    let (coordinator, _rx) = harness.coordinator(spec);
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(harness.spy.labels(), vec!["host"]);
    Ok(())
}

/// Sink that stalls on every stdout line, so the stdout reader is still busy
/// when a fast host has already exited and closed stderr.
#[derive(Debug, Clone)]
struct SlowStdoutSink {
    inner: CollectingSink,
    delay: Duration,
}

impl Sink for SlowStdoutSink {
    fn line(&self, stream: StreamKind, line: &str) {
        if stream == StreamKind::Stdout {
            std::thread::sleep(self.delay);
        }
        self.inner.line(stream, line);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readiness_from_a_host_that_exits_at_once_is_kept() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(&fixture.bin_dir(), "host.sh", "echo 'Job host started'\nexit 0");
    let spec = spec_with_signals(&fixture, &script, &["(?i)job host started"], &[])?;

    let sink = SlowStdoutSink {
        inner: CollectingSink::new(),
        delay: Duration::from_millis(800),
    };
    let collab = Collaborators::new(Arc::new(EmptySettingsStore)).with_sink(Arc::new(sink.clone()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coordinator = RunCoordinator::new(spec, collab).with_events(tx);

    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert!(result.ready);

    let events = drain(&mut rx);
    let ready_events = events.iter().filter(|e| matches!(e, RunEvent::Ready { .. })).count();
    assert_eq!(ready_events, 1);
    assert!(phases(&events).contains(&RunPhase::Ready));
    assert_eq!(sink.inner.lines_of(StreamKind::Stdout), vec!["Job host started"]);
    Ok(())
}

#[tokio::test]
async fn descendants_are_reaped_after_the_host_exits_on_its_own() -> TestResult {
    init_tracing();

    let fixture = ArtifactBuilder::new().build();
    let script = write_script(
        &fixture.bin_dir(),
        "host.sh",
        "sleep 30 &\necho \"child=$!\"\nexit 3",
    );

    let harness = Harness::new();
    let (coordinator, _rx) = harness.coordinator(generic_spec(&fixture, &script));
    let result = with_timeout(coordinator.run(CancelSignal::never())).await?;

    assert_eq!(result.outcome, RunOutcome::RuntimeFailure);
    assert_eq!(result.exit_code, Some(3));

    let stdout = harness.sink.lines_of(StreamKind::Stdout);
    let child: u32 = stdout
        .iter()
        .find_map(|l| l.strip_prefix("child="))
        .ok_or("no child pid printed")?
        .parse()?;

    // Signal delivery is asynchronous; give the orphan a moment to die.
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_exists(child) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_exists(child), "leftover child {child} survived cleanup");

    let staging = harness.staging_root().ok_or("host never launched")?;
    assert!(!staging.exists());
    Ok(())
}
