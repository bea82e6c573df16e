//! Output sink that mirrors fetch-tool lines to `tracing` and a log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};

use super::client::OutputSink;

#[derive(Debug)]
pub struct LineTee {
    path: PathBuf,
    file: Mutex<File>,
}

impl LineTee {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log `line` and append `<rfc3339> <line>` to the file.
    pub fn write_line(&self, line: &str) {
        tracing::info!(target: "garrison::fetch", "{}", line);
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        if let Ok(mut file) = self.file.lock()
            && let Err(e) = writeln!(file, "{} {}", stamp, line)
        {
            tracing::debug!(path = %self.path.display(), error = %e, "tee write failed");
        }
    }

    pub fn into_sink(self: Arc<Self>) -> OutputSink {
        Arc::new(move |line: &str| self.write_line(line))
    }
}
