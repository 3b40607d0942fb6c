// tests/host_command.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use hostrun::coordinator::{DebugConfig, DebugPort, InstallSpec, RunSpec, find_free_port};
use hostrun::settings::EmptySettingsStore;
use hostrun::staging::{DeclaredConfig, PreparedStaging, StagingDirectoryPreparer};
use hostrun::types::HostProfile;
use hostrun_test_utils::builders::{ArtifactBuilder, ArtifactFixture};

type TestResult = Result<(), Box<dyn Error>>;

fn spec(profile: HostProfile, fixture: &ArtifactFixture, settings: &[(&str, &str)]) -> Result<RunSpec, Box<dyn Error>> {
    let mut spec = RunSpec::for_profile(profile, "/opt/host/bin/run", fixture.artifacts())?;
    spec.declared = DeclaredConfig {
        settings: settings
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Default::default()
    };
    Ok(spec)
}

fn stage(spec: &RunSpec) -> Result<PreparedStaging, Box<dyn Error>> {
    let preparer = StagingDirectoryPreparer::new(Arc::new(EmptySettingsStore));
    Ok(preparer.prepare(&spec.artifacts, &spec.declared)?)
}

#[test]
fn function_host_gets_debug_agent_only_with_a_port() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let mut spec = spec(HostProfile::Function, &fixture, &[("FUNCTIONS_WORKER_RUNTIME", "java")])?;
    spec.env.insert("JAVA_HOME".to_string(), "/opt/jdk".to_string());
    let prepared = stage(&spec)?;

    let plain = spec.host_command(&prepared.manifest, None);
    assert_eq!(plain.label, "host");
    assert_eq!(plain.program, PathBuf::from("/opt/host/bin/run"));
    assert_eq!(plain.args, vec!["host", "start"]);
    // Function hosts read settings from the staged file, not the environment.
    assert_eq!(plain.env, BTreeMap::from([("JAVA_HOME".to_string(), "/opt/jdk".to_string())]));

    let debug = spec.host_command(&prepared.manifest, Some(5010));
    assert_eq!(
        debug.args,
        vec![
            "host",
            "start",
            "--language-worker",
            "--",
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=5010",
        ]
    );
    Ok(())
}

#[test]
fn container_settings_are_forwarded_at_the_token() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let mut spec = spec(HostProfile::Container, &fixture, &[("B_KEY", "two"), ("A_KEY", "one")])?;
    spec.args = ["run", "--rm", "{settings_env}", "my-image"].map(String::from).to_vec();
    let prepared = stage(&spec)?;

    let command = spec.host_command(&prepared.manifest, None);
    assert_eq!(
        command.args,
        vec!["run", "--rm", "-e", "A_KEY", "-e", "B_KEY", "my-image"]
    );
    assert_eq!(command.env.get("A_KEY").map(String::as_str), Some("one"));
    assert_eq!(command.env.get("B_KEY").map(String::as_str), Some("two"));
    Ok(())
}

#[test]
fn container_settings_go_after_the_subcommand_without_a_token() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let mut spec = spec(HostProfile::Container, &fixture, &[("KEY", "value")])?;
    spec.args = ["run", "my-image"].map(String::from).to_vec();
    let prepared = stage(&spec)?;

    let command = spec.host_command(&prepared.manifest, None);
    assert_eq!(command.args, vec!["run", "-e", "KEY", "my-image"]);
    Ok(())
}

#[test]
fn token_without_settings_disappears() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let mut spec = spec(HostProfile::Container, &fixture, &[])?;
    spec.args = ["run", "{settings_env}", "my-image"].map(String::from).to_vec();
    let prepared = stage(&spec)?;

    assert_eq!(spec.host_command(&prepared.manifest, None).args, vec!["run", "my-image"]);
    Ok(())
}

#[test]
fn staging_token_and_env_precedence_for_generic_hosts() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let mut spec = spec(HostProfile::Generic, &fixture, &[("PORT", "8080"), ("MODE", "dev")])?;
    spec.args = vec!["--root={staging}".to_string(), "--verbose".to_string()];
    spec.env.insert("MODE".to_string(), "override".to_string());
    let prepared = stage(&spec)?;

    let command = spec.host_command(&prepared.manifest, None);
    let root = prepared.manifest.root().display().to_string();
    assert_eq!(command.args, vec![format!("--root={root}"), "--verbose".to_string()]);
    assert_eq!(command.env.get("PORT").map(String::as_str), Some("8080"));
    assert_eq!(command.env.get("MODE").map(String::as_str), Some("override"));
    Ok(())
}

#[test]
fn install_command_defaults_to_the_host_executable() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let mut spec = spec(HostProfile::Function, &fixture, &[])?;

    let install = spec.install_command().ok_or("install step missing")?;
    assert_eq!(install.label, "extension-install");
    assert_eq!(install.program, PathBuf::from("/opt/host/bin/run"));
    assert_eq!(install.args, vec!["extensions", "install", "--java"]);

    spec.install.tool = Some(PathBuf::from("/usr/local/bin/installer"));
    let install = spec.install_command().ok_or("install step missing")?;
    assert_eq!(install.program, PathBuf::from("/usr/local/bin/installer"));

    spec.install = InstallSpec::disabled();
    assert!(spec.install_command().is_none());

    let generic = RunSpec::for_profile(HostProfile::Generic, "server", fixture.artifacts())?;
    assert!(generic.install_command().is_none());
    Ok(())
}

#[test]
fn auto_port_skips_ports_in_use() -> TestResult {
    let taken = TcpListener::bind(("127.0.0.1", 0))?;
    let port = taken.local_addr()?.port();

    let found = find_free_port(port).ok_or("no free port")?;
    assert!(found > port);

    let auto = DebugConfig {
        enabled: true,
        port: DebugPort::Auto { start: port },
        agent_args: Vec::new(),
    };
    assert!(auto.resolve_port()? > port);

    let fixed = DebugConfig {
        port: DebugPort::Fixed(port),
        ..auto
    };
    // A fixed port is used as configured; the host reports a conflict itself.
    assert_eq!(fixed.resolve_port()?, port);
    Ok(())
}

#[test]
fn agent_args_substitute_every_port_token() {
    let config = DebugConfig {
        enabled: true,
        port: DebugPort::Fixed(9229),
        agent_args: vec!["--inspect=127.0.0.1:{port}".to_string(), "--port={port}".to_string()],
    };
    assert_eq!(
        config.agent_args_for(9229),
        vec!["--inspect=127.0.0.1:9229", "--port=9229"]
    );
}

#[test]
fn container_readiness_needs_a_server_start_line() -> TestResult {
    let fixture = ArtifactBuilder::new().build();
    let spec = RunSpec::for_profile(HostProfile::Container, "docker", fixture.artifacts())?;

    for line in [
        "Server started",
        "Started Application in 3.2 seconds (process running for 3.9)",
        "Now listening on: http://[::]:8080",
    ] {
        assert!(spec.readiness.matches(line), "should be ready on {line:?}");
    }
    for line in [
        "Health check started",
        "Container 4f2a started",
        "Started pulling image layers",
        "listening on socket",
    ] {
        assert!(!spec.readiness.matches(line), "should not be ready on {line:?}");
    }
    Ok(())
}
