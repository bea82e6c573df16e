//! SteamCMD fetch engine.
//!
//! | Module    | Purpose                                             |
//! |-----------|-----------------------------------------------------|
//! | `client`  | Retrying client: install/update, login check, runscript |
//! | `outcome` | Success/error classification of output lines        |
//! | `lines`   | Partial-line buffer for streamed output             |
//! | `runner`  | Local, wrapped (`systemd-run`, `docker run`) runners |
//! | `script`  | Argument lists and runscript content                |
//! | `tee`     | Output sink mirroring lines to tracing and a file   |

pub mod client;
pub mod lines;
pub mod outcome;
pub mod runner;
pub mod script;
pub mod tee;

pub use client::{FetchClient, FetchConfig, FetchJobSpec, OutputSink};
pub use outcome::{Outcome, classify_line};
pub use runner::{FetchRunner, LocalRunner, RunOutput, StreamingRunner, WrappedRunner};
pub use script::Credentials;
pub use tee::LineTee;

use std::path::Path;
use std::sync::Arc;

/// Attach a [`LineTee`] on `log_path` to `config`.
///
/// When the log file cannot be opened the config is returned unchanged.
pub fn with_log_tee(config: FetchConfig, log_path: &Path) -> FetchConfig {
    match LineTee::open(log_path) {
        Ok(tee) => config.with_output("[steamcmd] ", Arc::new(tee).into_sink()),
        Err(e) => {
            tracing::warn!(path = %log_path.display(), error = %e, "cannot open fetch log, output not mirrored");
            config
        }
    }
}
