//! Shared test infrastructure for CLI integration tests.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A temporary workspace driven through the `relabel` binary.
pub struct CliWorkspace {
    dir: TempDir,
}

impl CliWorkspace {
    /// Create a temp dir and run `relabel init` in it with `extra` arguments.
    pub fn init(extra: &[&str]) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Self { dir };
        let mut args = vec!["init"];
        args.extend_from_slice(extra);
        workspace.run_ok(&args);
        workspace
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Run `relabel <args> --workspace <root>`.
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(binary())
            .args(args)
            .arg("--workspace")
            .arg(self.root())
            .env_remove("RUST_LOG")
            .output()
            .expect("spawn relabel")
    }

    /// Run and require success, returning stdout.
    pub fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "relabel {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).expect("utf-8 stdout")
    }

    /// Run with `--json` and parse stdout.
    pub fn run_json(&self, args: &[&str]) -> Value {
        let mut args = args.to_vec();
        args.push("--json");
        let stdout = self.run_ok(&args);
        serde_json::from_str(&stdout).expect("json stdout")
    }

    pub fn flagged_dir(&self) -> PathBuf {
        self.root().join("flagged")
    }
}

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_relabel"))
}
