//! Integration tests for garrison
//!
//! Each test runs the built binary against its own temporary XDG tree, with the
//! fetch tool swapped for `true`/`false` and the server binary for a shell script.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated home with all four XDG roots underneath.
struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// A garrison Command scoped to this sandbox.
    fn garrison(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("garrison");
        cmd.env("HOME", self.root.path())
            .env("XDG_DATA_HOME", self.path("data"))
            .env("XDG_CACHE_HOME", self.path("cache"))
            .env("XDG_STATE_HOME", self.path("state"))
            .env("XDG_CONFIG_HOME", self.path("config"))
            .env("GARRISON_STEAMCMD_BIN", "true")
            .env_remove("GARRISON_CONTAINER_RUNTIME")
            .env_remove("GARRISON_CONTAINER_ENGINE")
            .env_remove("RUST_LOG");
        cmd
    }

    fn pid_file(&self) -> PathBuf {
        self.path("data/garrison/arma-reforger.pid")
    }

    fn install_dir(&self) -> PathBuf {
        self.path("data/garrison/arma-reforger")
    }

    fn state_json(&self) -> String {
        fs::read_to_string(self.path("config/garrison/state.json")).unwrap()
    }

    fn write_config(&self, content: &str) -> PathBuf {
        let path = self.path("garrison.toml");
        fs::write(&path, content).unwrap();
        path
    }
}

#[cfg(unix)]
fn write_fake_server(dir: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).unwrap();
    let bin = dir.join("ArmaReforgerServer");
    fs::write(&bin, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_verbs() {
        Sandbox::new()
            .garrison()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("install"))
            .stdout(predicate::str::contains("status"));
    }

    #[test]
    fn test_version() {
        Sandbox::new().garrison().arg("--version").assert().success();
    }

    #[test]
    fn test_list_shows_builtin_server() {
        Sandbox::new()
            .garrison()
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("arma-reforger"))
            .stdout(predicate::str::contains("1874900"))
            .stdout(predicate::str::contains("not installed"));
    }

    #[test]
    fn test_unknown_server_is_an_error() {
        Sandbox::new()
            .garrison()
            .args(["status", "--server", "minecraft"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown server 'minecraft'"));
    }

    #[test]
    fn test_lifecycle_verbs_require_server() {
        let sb = Sandbox::new();
        sb.garrison()
            .arg("start")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--server is required"))
            .stderr(predicate::str::contains("Available: arma-reforger"));
        assert!(!sb.pid_file().exists());
    }

    #[test]
    fn test_unknown_isolation_is_an_error() {
        Sandbox::new()
            .garrison()
            .args(["status", "--isolation", "bogus", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown isolation mode 'bogus'"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        Sandbox::new()
            .garrison()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("showing defaults"))
            .stdout(predicate::str::contains("server_image = \"debian:bookworm-slim\""));
    }

    #[test]
    fn test_config_show_masks_password() {
        let sb = Sandbox::new();
        let path = sb.write_config("[fetch]\nusername = \"op\"\npassword = \"hunter2\"\n");
        sb.garrison()
            .args(["config", "show", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("username = \"op\""))
            .stdout(predicate::str::contains("hunter2").not());
    }

    #[test]
    fn test_malformed_config_names_path() {
        let sb = Sandbox::new();
        let path = sb.write_config("[fetch\nretries = ");
        sb.garrison()
            .args(["list", "--config"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("garrison.toml"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let sb = Sandbox::new();
        let path = sb.write_config("[fetch]\nretries = 0\n");
        sb.garrison()
            .args(["config", "validate", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("fetch.retries is 0"));
    }
}

// =============================================================================
// Direct (isolation none) Tests
// =============================================================================

mod direct {
    use super::*;

    #[test]
    fn test_status_without_pid_file_is_stopped() {
        Sandbox::new()
            .garrison()
            .args(["status", "--server", "arma-reforger"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stopped"));
    }

    #[test]
    fn test_stop_without_pid_file_fails() {
        Sandbox::new()
            .garrison()
            .args(["stop", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not running"));
    }

    #[test]
    fn test_start_refuses_existing_pid_file() {
        let sb = Sandbox::new();
        fs::create_dir_all(sb.pid_file().parent().unwrap()).unwrap();
        fs::write(sb.pid_file(), "2147483646").unwrap();

        sb.garrison()
            .args(["start", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already running"));
        assert_eq!(fs::read_to_string(sb.pid_file()).unwrap(), "2147483646");
    }

    #[test]
    fn test_start_without_binary_fails() {
        let sb = Sandbox::new();
        sb.garrison()
            .args(["start", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ArmaReforgerServer"));
        assert!(!sb.pid_file().exists());
    }

    #[test]
    fn test_install_records_isolation_mode() {
        let sb = Sandbox::new();
        sb.garrison()
            .args(["install", "--server", "arma-reforger"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Installed"));

        let state = sb.state_json();
        assert!(state.contains("\"arma-reforger\""));
        assert!(state.contains("\"isolation\": \"none\""));
        assert!(sb.install_dir().is_dir());

        sb.garrison()
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("not installed").not());
    }

    #[test]
    fn test_failed_install_records_nothing() {
        let sb = Sandbox::new();
        let path = sb.write_config("[fetch]\nretries = 2\nbackoff_ms = 1\n");
        sb.garrison()
            .env("GARRISON_STEAMCMD_BIN", "false")
            .args(["install", "--server", "arma-reforger"])
            .arg("--config")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("2 attempt"));
        assert!(!sb.path("config/garrison/state.json").exists());
    }

    #[test]
    fn test_missing_fetch_binary_fails() {
        let sb = Sandbox::new();
        sb.garrison()
            .env("GARRISON_STEAMCMD_BIN", "/nonexistent/steamcmd")
            .args(["install", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("/nonexistent/steamcmd"));
    }

    #[test]
    fn test_mode_switch_requires_delete() {
        let sb = Sandbox::new();
        sb.garrison().args(["install", "--server", "arma-reforger"]).assert().success();

        sb.garrison()
            .args(["status", "--isolation", "container", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("delete it before switching"));

        sb.garrison().args(["delete", "--server", "arma-reforger"]).assert().success();
        assert!(!sb.install_dir().exists());
        assert!(!sb.state_json().contains("arma-reforger"));
    }

    #[cfg(unix)]
    #[test]
    fn test_start_status_stop_lifecycle() {
        let sb = Sandbox::new();
        write_fake_server(&sb.install_dir(), "echo \"args: $@\"\nexec sleep 30");

        sb.garrison()
            .args(["start", "--port", "2302", "--server", "arma-reforger"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Started"));
        assert!(sb.pid_file().exists());

        sb.garrison()
            .args(["status", "--server", "arma-reforger"])
            .assert()
            .success()
            .stdout(predicate::str::contains("running (pid="));

        sb.garrison().args(["stop", "--server", "arma-reforger"]).assert().success();
        assert!(!sb.pid_file().exists());

        sb.garrison()
            .args(["status", "--server", "arma-reforger"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stopped"));

        let log = fs::read_to_string(sb.path("state/garrison/arma-reforger/server.log")).unwrap();
        assert!(log.contains("-port=2302"));
    }

    #[cfg(unix)]
    #[test]
    fn test_server_that_exits_immediately_is_reported() {
        let sb = Sandbox::new();
        write_fake_server(&sb.install_dir(), "echo boom; exit 3");

        sb.garrison()
            .args(["start", "--server", "arma-reforger"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("exited right after launch"));
        assert!(!sb.pid_file().exists());
    }
}
