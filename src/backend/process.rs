//! PID-file process lifecycle for directly launched servers.
//!
//! The PID file is the ownership marker: it is created with create-new
//! semantics after a successful spawn and nothing overwrites an existing one.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::ServerStatus;
use crate::errors::ProcessError;

/// A spawned server process as recorded in the PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub install_dir: PathBuf,
}

/// Handle returned by [`ProcessManager::start`]; keeps the child for early-exit checks.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    child: Child,
}

impl SpawnedProcess {
    /// Exit status if the process has already terminated.
    pub fn exited(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessManager {
    pid_file: PathBuf,
    log_file: PathBuf,
}

/// Sends signal 0 to check that the process exists.
pub fn is_alive(pid: u32) -> bool {
    i32::try_from(pid)
        .map(|raw| kill(Pid::from_raw(raw), None).is_ok())
        .unwrap_or(false)
}

/// SIGKILL `pid`; delivery failures mean the process is already gone.
pub fn force_kill(pid: u32) {
    if let Ok(raw) = i32::try_from(pid)
        && let Err(errno) = kill(Pid::from_raw(raw), Signal::SIGKILL)
    {
        tracing::debug!(pid, %errno, "SIGKILL not delivered");
    }
}

impl ProcessManager {
    pub fn new(pid_file: impl Into<PathBuf>, log_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            log_file: log_file.into(),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Launch `executable` in its own session with output appended to the log file.
    pub fn start(
        &self,
        executable: &Path,
        args: &[String],
        install_dir: &Path,
    ) -> Result<SpawnedProcess, ProcessError> {
        if self.pid_file.exists() {
            return Err(ProcessError::AlreadyRunning {
                path: self.pid_file.clone(),
            });
        }

        let log_err = |source| ProcessError::LogOpen {
            path: self.log_file.clone(),
            source,
        };
        if let Some(parent) = self.log_file.parent() {
            std::fs::create_dir_all(parent).map_err(log_err)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut cmd = Command::new(executable);
        cmd.args(args)
            .current_dir(install_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        // SAFETY: pre_exec runs after fork() and before exec(). setsid() is
        // async-signal-safe and the closure captures nothing.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            executable: executable.to_path_buf(),
            source,
        })?;
        let pid = child.id();

        if let Err(source) = self.write_pid(pid) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::PidWrite {
                path: self.pid_file.clone(),
                source,
            });
        }

        tracing::info!(pid, executable = %executable.display(), log = %self.log_file.display(), "server process started");
        Ok(SpawnedProcess {
            handle: ProcessHandle {
                pid,
                install_dir: install_dir.to_path_buf(),
            },
            child,
        })
    }

    fn write_pid(&self, pid: u32) -> std::io::Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.pid_file)?;
        write!(file, "{}", pid)
    }

    /// Pid recorded in the PID file; `None` when there is no file.
    pub fn read_pid(&self) -> Result<Option<u32>, ProcessError> {
        let content = match std::fs::read_to_string(&self.pid_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ProcessError::PidRead {
                    path: self.pid_file.clone(),
                    source,
                });
            }
        };
        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 && i32::try_from(pid).is_ok() => Ok(Some(pid)),
            _ => Err(ProcessError::InvalidPidFile {
                path: self.pid_file.clone(),
                content: content.trim().to_string(),
            }),
        }
    }

    /// Send SIGTERM (SIGKILL if that cannot be delivered) and remove the PID file.
    ///
    /// Returns the signalled pid.
    pub fn stop(&self) -> Result<u32, ProcessError> {
        let pid = match self.read_pid() {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                return Err(ProcessError::NotRunning {
                    path: self.pid_file.clone(),
                });
            }
            Err(e) => {
                self.remove_pid_file();
                return Err(e);
            }
        };

        let target = Pid::from_raw(pid as i32);
        if let Err(errno) = kill(target, Signal::SIGTERM) {
            tracing::debug!(pid, %errno, "SIGTERM failed, sending SIGKILL");
            if let Err(errno) = kill(target, Signal::SIGKILL) {
                tracing::debug!(pid, %errno, "SIGKILL failed; process is likely gone");
            }
        }
        self.remove_pid_file();
        Ok(pid)
    }

    fn remove_pid_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.pid_file)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.pid_file.display(), error = %e, "failed to remove pid file");
        }
    }

    /// `stopped` without a PID file or when the recorded pid is gone;
    /// a stale file is left in place.
    pub fn status(&self) -> Result<ServerStatus, ProcessError> {
        match self.read_pid()? {
            None => Ok(ServerStatus::Stopped),
            Some(pid) if is_alive(pid) => Ok(ServerStatus::Running {
                pid: Some(pid),
                detail: None,
            }),
            Some(_) => Ok(ServerStatus::Stopped),
        }
    }
}
