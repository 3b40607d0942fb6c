// src/lib.rs

pub mod cancel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod install;
pub mod logging;
pub mod process;
pub mod settings;
pub mod staging;
pub mod stream;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::{StopHandle, stop_channel};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::RunFile;
use crate::coordinator::{
    Collaborators, CommandAttacher, DebugAttacher, LogAttacher, RunCoordinator, RunEvent,
    RunOutcome, RunSpec,
};
use crate::settings::{EmptySettingsStore, FileSettingsStore, SettingsStore};
use crate::stream::StdioSink;

/// Process exit code used when the run was stopped by Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - run file loading
/// - the settings store, console sink and debugger attacher
/// - Ctrl-C and `--ready-timeout` handling
/// - the coordinator
pub async fn run(args: CliArgs) -> Result<i32> {
    let run_file = load_and_validate(&args.config)?;

    let mut spec = run_file.to_run_spec()?;
    if args.debug {
        spec.debug.enabled = true;
    }

    if args.dry_run {
        print_dry_run(&run_file, &spec);
        return Ok(0);
    }

    let store: Arc<dyn SettingsStore> = match &run_file.secrets {
        Some(secrets) => Arc::new(FileSettingsStore::new(&secrets.path)),
        None => Arc::new(EmptySettingsStore),
    };

    let attacher: Arc<dyn DebugAttacher> = match run_file.debug.attach_command.as_deref() {
        Some([program, rest @ ..]) => Arc::new(CommandAttacher::new(program, rest.to_vec())),
        _ => Arc::new(LogAttacher),
    };

    let collab = Collaborators::new(store)
        .with_sink(Arc::new(StdioSink))
        .with_attacher(attacher);

    let (stop, cancel) = stop_channel();

    // Ctrl-C → cancel the run.
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping");
            stop.stop();
        });
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel::<RunEvent>();
    let watcher = tokio::spawn(watch_events(events_rx, args.ready_timeout, stop));

    let result = RunCoordinator::new(spec, collab)
        .with_events(events_tx)
        .run(cancel)
        .await;

    // The event channel closes once the coordinator is gone.
    let timed_out = watcher.await.unwrap_or(false);

    let result = result?.into_result()?;
    if timed_out {
        let limit = args.ready_timeout.unwrap_or_default();
        return Err(anyhow!("host was not ready within {limit:?}"));
    }

    match result.outcome {
        RunOutcome::Cancelled => Ok(EXIT_CANCELLED),
        RunOutcome::Succeeded | RunOutcome::RuntimeFailure => Ok(0),
    }
}

/// Report run events and enforce the optional ready timeout.
///
/// Returns whether the timeout fired.
async fn watch_events(
    mut rx: mpsc::UnboundedReceiver<RunEvent>,
    ready_timeout: Option<Duration>,
    stop: StopHandle,
) -> bool {
    let deadline = ready_timeout.map(|t| Instant::now() + t);
    let mut armed = deadline.is_some();
    let mut timed_out = false;

    loop {
        let wake_at = deadline.filter(|_| armed);
        let timer = async move {
            match wake_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if matches!(event, RunEvent::Ready { .. }) {
                        armed = false;
                    }
                    report_event(&event);
                }
                None => break,
            },
            _ = timer => {
                warn!(timeout = ?ready_timeout, "host not ready in time; stopping");
                armed = false;
                timed_out = true;
                stop.stop();
            }
        }
    }

    timed_out
}

fn report_event(event: &RunEvent) {
    match event {
        RunEvent::MissingSetting(missing) if missing.is_blocking() => {
            let required_by: Vec<&str> = missing.required_by.iter().map(|c| c.as_str()).collect();
            warn!(
                key = %missing.key,
                ?required_by,
                "required setting is missing; these functions will not start"
            );
        }
        RunEvent::Ready { debug_port: Some(port), .. } => {
            info!(port, "host is ready for debugging");
        }
        RunEvent::Ready { .. } => info!("host is ready"),
        RunEvent::DebugAttachWarning { port, message } => {
            warn!(port, %message, "could not attach debugger");
        }
        other => debug!(event = ?other, "run event"),
    }
}

/// Print the resolved run without touching the filesystem or spawning.
fn print_dry_run(run_file: &RunFile, spec: &RunSpec) {
    println!("hostrun dry-run");
    println!("  profile = {}", spec.profile);
    println!("  executable = {}", spec.executable.display());
    if !spec.args.is_empty() {
        println!("  args = {:?}", spec.args);
    }
    if !spec.env.is_empty() {
        println!("  env = {:?}", spec.env.keys().collect::<Vec<_>>());
    }
    println!();

    println!("artifact:");
    println!("  root = {}", spec.artifacts.root.display());
    if let Some(p) = &spec.artifacts.host_config {
        println!("  host_config = {}", p.display());
    }
    if let Some(p) = &spec.artifacts.local_settings {
        println!("  local_settings = {}", p.display());
    }
    if !spec.declared.capabilities.is_empty() {
        println!("  capabilities = {:?}", spec.declared.capabilities);
    }

    // Values may be secrets; only names are shown.
    println!(
        "settings: {:?}",
        spec.declared.settings.keys().collect::<Vec<_>>()
    );
    if let Some(secrets) = &run_file.secrets {
        println!("  secrets = {} [{}]", secrets.path.display(), secrets.key);
    }

    match spec.install_command() {
        Some(cmd) => println!("install: {} {:?}", cmd.program.display(), cmd.args),
        None => println!("install: disabled"),
    }

    match &spec.preflight {
        Some(check) => println!(
            "preflight: {} {:?} (java: {})",
            spec.executable.display(),
            check.version_args,
            check
                .java
                .as_ref()
                .map_or_else(|| "auto".to_string(), |p| p.display().to_string())
        ),
        None => println!("preflight: disabled"),
    }

    if spec.debug.enabled {
        println!("debug: {:?}", spec.debug.port);
        println!("  agent_args = {:?}", spec.debug.agent_args);
    } else {
        println!("debug: disabled");
    }

    debug!("dry-run complete (no execution)");
}
