#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use hostrun::coordinator::RunSpec;
use hostrun::staging::ProjectArtifacts;
use hostrun::types::HostProfile;

/// Host configuration referencing the standard extension bundle.
pub const BUNDLE_HOST_JSON: &str = r#"{
  "version": "2.0",
  "extensionBundle": {
    "id": "Microsoft.Azure.Functions.ExtensionBundle",
    "version": "[2.*, 3.0.0)"
  }
}"#;

/// Host configuration without an extension bundle.
pub const PLAIN_HOST_JSON: &str = r#"{ "version": "2.0" }"#;

/// A build artifact laid out on disk, plus the temp dir that owns it.
pub struct ArtifactFixture {
    pub dir: TempDir,
    pub root: PathBuf,
}

impl ArtifactFixture {
    pub fn artifacts(&self) -> ProjectArtifacts {
        ProjectArtifacts::new(&self.root)
    }

    /// Directory next to the artifact for scripts and other helpers.
    pub fn bin_dir(&self) -> PathBuf {
        let bin = self.dir.path().join("bin");
        fs::create_dir_all(&bin).expect("create bin dir");
        bin
    }
}

/// Builder for a function-app style artifact directory.
///
/// ```ignore
/// let fixture = ArtifactBuilder::new()
///     .with_function("hello", &["httpTrigger", "http"])
///     .with_host_json(PLAIN_HOST_JSON)
///     .build();
/// ```
pub struct ArtifactBuilder {
    dir: TempDir,
    root: PathBuf,
}

impl ArtifactBuilder {
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("hostrun-fixture-")
            .tempdir()
            .expect("create fixture dir");
        let root = dir.path().join("app");
        fs::create_dir_all(&root).expect("create artifact root");
        Self { dir, root }
    }

    /// `<root>/<name>/function.json` with one binding per type.
    pub fn with_function(self, name: &str, binding_types: &[&str]) -> Self {
        let bindings: Vec<_> = binding_types
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                json!({
                    "type": ty,
                    "direction": if i == 0 { "in" } else { "out" },
                    "name": format!("b{i}"),
                })
            })
            .collect();
        let body = json!({
            "scriptFile": "../app.jar",
            "entryPoint": format!("com.example.{name}.run"),
            "bindings": bindings,
        });
        self.with_file(
            &format!("{name}/function.json"),
            &serde_json::to_string_pretty(&body).expect("encode function.json"),
        )
    }

    pub fn with_host_json(self, contents: &str) -> Self {
        self.with_file("host.json", contents)
    }

    pub fn with_bundle(self) -> Self {
        self.with_host_json(BUNDLE_HOST_JSON)
    }

    pub fn with_local_settings(self, values: &[(&str, &str)]) -> Self {
        let values: serde_json::Map<_, _> = values
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        let body = json!({ "IsEncrypted": false, "Values": values });
        self.with_file(
            "local.settings.json",
            &serde_json::to_string_pretty(&body).expect("encode local settings"),
        )
    }

    pub fn with_file(self, rel: &str, contents: &str) -> Self {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write fixture file");
        self
    }

    pub fn build(self) -> ArtifactFixture {
        ArtifactFixture {
            dir: self.dir,
            root: self.root,
        }
    }
}

impl Default for ArtifactBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an executable `/bin/sh` script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod script");
    }

    path
}

/// A generic-profile spec running `script` against the fixture.
///
/// Generic hosts have no install step and no default signals, so tests set
/// exactly the patterns they need.
pub fn generic_spec(fixture: &ArtifactFixture, script: &Path) -> RunSpec {
    RunSpec::for_profile(HostProfile::Generic, script, fixture.artifacts())
        .expect("generic profile defaults compile")
}
