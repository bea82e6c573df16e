//! `systemd --user` unit rendering.
//!
//! Everything here is pure string building; [`ServiceUnit::write`] is the only
//! filesystem access.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::errors::BackendError;

/// Hardening applied to both the long-running unit and the transient fetch unit.
pub const SANDBOX_DIRECTIVES: [(&str, &str); 4] = [
    ("NoNewPrivileges", "yes"),
    ("PrivateTmp", "yes"),
    ("ProtectSystem", "strict"),
    ("ProtectHome", "read-only"),
];

/// Shell used to run `ExecStartPre` commands.
pub const PRE_SHELL: &str = "/usr/bin/bash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub working_dir: PathBuf,
    /// Shell command lines, run in order before the server starts.
    pub exec_start_pre: Vec<String>,
    /// Server argv; the first element is the executable.
    pub exec_start: Vec<String>,
    /// stdout and stderr are appended here.
    pub log_file: PathBuf,
    pub read_write_paths: Vec<PathBuf>,
}

impl ServiceUnit {
    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description={}", self.description);
        let _ = writeln!(out, "After=network-online.target");
        let _ = writeln!(out, "Wants=network-online.target");
        out.push('\n');

        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "Type=simple");
        let _ = writeln!(
            out,
            "WorkingDirectory={}",
            systemd_word(&self.working_dir.to_string_lossy())
        );
        for cmd in &self.exec_start_pre {
            let _ = writeln!(out, "ExecStartPre={}", bash_wrapped(cmd));
        }
        let _ = writeln!(out, "ExecStart={}", exec_line(&self.exec_start));
        let _ = writeln!(out, "Restart=on-failure");
        let _ = writeln!(out, "TimeoutStartSec=0");
        let log = escape_specifiers(&self.log_file.to_string_lossy());
        let _ = writeln!(out, "StandardOutput=append:{}", log);
        let _ = writeln!(out, "StandardError=append:{}", log);
        for (key, value) in SANDBOX_DIRECTIVES {
            let _ = writeln!(out, "{}={}", key, value);
        }
        for path in &self.read_write_paths {
            let _ = writeln!(out, "ReadWritePaths={}", systemd_word(&path.to_string_lossy()));
        }
        out.push('\n');

        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy=default.target");
        out
    }

    /// Write the rendered unit to `path`, replacing any previous content.
    pub fn write(&self, path: &Path) -> Result<(), BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BackendError::io("failed to create", parent, e))?;
        }
        std::fs::write(path, self.render()).map_err(|e| BackendError::io("failed to write", path, e))
    }
}

/// `-p Key=Value` properties for `systemd-run` matching the unit sandbox.
pub fn sandbox_properties(read_write_paths: &[&Path]) -> Vec<String> {
    let mut props = Vec::with_capacity(SANDBOX_DIRECTIVES.len() * 2 + 2);
    for (key, value) in SANDBOX_DIRECTIVES {
        props.push("-p".to_string());
        props.push(format!("{}={}", key, value));
    }
    let paths: Vec<String> = read_write_paths
        .iter()
        .map(|p| systemd_word(&p.to_string_lossy()))
        .collect();
    props.push("-p".to_string());
    props.push(format!("ReadWritePaths={}", paths.join(" ")));
    props
}

/// POSIX single-quoted word.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | '=' | ':' | ','))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// `/usr/bin/bash -lc '<cmd>'` with single quotes escaped for the shell and
/// specifiers escaped for systemd.
pub fn bash_wrapped(cmd: &str) -> String {
    let quoted = format!("'{}'", cmd.replace('\'', r"'\''"));
    format!("{} -lc {}", PRE_SHELL, escape_specifiers(&quoted))
}

fn exec_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| systemd_word(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `%` and `$` are expanded by systemd in command lines.
fn escape_specifiers(s: &str) -> String {
    s.replace('%', "%%").replace('$', "$$")
}

/// One word of a systemd command line, double-quoted when it has to be.
fn systemd_word(word: &str) -> String {
    let escaped = escape_specifiers(word);
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if needs_quotes {
        format!(
            "\"{}\"",
            escaped.replace('\\', r"\\").replace('"', "\\\"")
        )
    } else {
        escaped
    }
}
