//! Line-level classification of SteamCMD output.
//!
//! SteamCMD has no machine-readable result, so each attempt is judged from the
//! text it prints. The markers are matched case-insensitively as substrings;
//! success markers are checked before error markers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

const SUCCESS_MARKERS: &[&str] = &[
    "success",
    "download complete",
    "update complete",
    "steam api... ok",
    "steam api...ok",
];

const ERROR_MARKERS: &[&str] = &["error", "failed", "invalid", "timeout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Unknown,
}

pub fn classify_line(line: &str) -> Outcome {
    let lower = line.to_lowercase();
    if SUCCESS_MARKERS.iter().any(|m| lower.contains(m)) {
        Outcome::Success
    } else if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
        Outcome::Error
    } else {
        Outcome::Unknown
    }
}

/// Accumulates classifications for one attempt.
///
/// Shared by the stdout and stderr readers, hence interior mutability.
#[derive(Debug, Default)]
pub struct OutcomeTally {
    success: AtomicBool,
    error: AtomicBool,
    first_error: Mutex<Option<String>>,
}

impl OutcomeTally {
    pub fn record(&self, line: &str) -> Outcome {
        let outcome = classify_line(line);
        match outcome {
            Outcome::Success => self.success.store(true, Ordering::Relaxed),
            Outcome::Error => {
                self.error.store(true, Ordering::Relaxed);
                if let Ok(mut first) = self.first_error.lock()
                    && first.is_none()
                {
                    *first = Some(line.trim().to_string());
                }
            }
            Outcome::Unknown => {}
        }
        outcome
    }

    pub fn saw_success(&self) -> bool {
        self.success.load(Ordering::Relaxed)
    }

    pub fn saw_error(&self) -> bool {
        self.error.load(Ordering::Relaxed)
    }

    /// `None` when the attempt counts as a success, otherwise why it failed.
    ///
    /// An attempt succeeds when no error line was seen and either a success
    /// line was seen or the tool exited 0.
    pub fn failure_reason(&self, exit_code: Option<i32>) -> Option<String> {
        if self.saw_error() {
            let line = self
                .first_error
                .lock()
                .ok()
                .and_then(|first| first.clone())
                .unwrap_or_default();
            return Some(format!("error reported: {}", line));
        }
        if self.saw_success() || exit_code == Some(0) {
            return None;
        }
        Some(match exit_code {
            Some(code) => format!("no success marker and exit code {}", code),
            None => "no success marker and the tool was killed by a signal".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_markers_are_case_insensitive() {
        assert_eq!(
            classify_line("Success! App '1874900' fully installed."),
            Outcome::Success
        );
        assert_eq!(classify_line("DOWNLOAD COMPLETE"), Outcome::Success);
        assert_eq!(classify_line("Update Complete"), Outcome::Success);
        assert_eq!(classify_line("Loading Steam API...OK"), Outcome::Success);
        assert_eq!(classify_line("Loading Steam API... OK"), Outcome::Success);
    }

    #[test]
    fn error_markers_are_case_insensitive() {
        assert_eq!(
            classify_line("ERROR! Failed to install app '1874900' (No subscription)"),
            Outcome::Error
        );
        assert_eq!(classify_line("Login Failure: Invalid Password"), Outcome::Error);
        assert_eq!(classify_line("Connection TIMEOUT"), Outcome::Error);
    }

    #[test]
    fn plain_lines_are_unknown() {
        assert_eq!(classify_line("Redirecting stderr to 'logs/stderr.txt'"), Outcome::Unknown);
        assert_eq!(classify_line(""), Outcome::Unknown);
    }

    #[test]
    fn success_wins_over_error_on_the_same_line() {
        assert_eq!(
            classify_line("Success after error recovery"),
            Outcome::Success
        );
    }

    #[test]
    fn any_error_line_fails_the_attempt_even_with_success() {
        let tally = OutcomeTally::default();
        tally.record("Success! App fully installed.");
        tally.record("ERROR! Timeout downloading item");
        assert!(tally.saw_success());
        let reason = tally.failure_reason(Some(0)).unwrap();
        assert!(reason.contains("Timeout downloading item"));
    }

    #[test]
    fn success_line_accepts_non_zero_exit() {
        let tally = OutcomeTally::default();
        tally.record("Update complete");
        assert_eq!(tally.failure_reason(Some(7)), None);
    }

    #[test]
    fn clean_exit_without_markers_is_success() {
        let tally = OutcomeTally::default();
        tally.record("Steam Console Client (c) Valve Corporation");
        assert_eq!(tally.failure_reason(Some(0)), None);
    }

    #[test]
    fn non_zero_exit_without_markers_fails() {
        let tally = OutcomeTally::default();
        tally.record("Loading...");
        let reason = tally.failure_reason(Some(8)).unwrap();
        assert!(reason.contains("exit code 8"));
        assert!(tally.failure_reason(None).is_some());
    }

    #[test]
    fn first_error_line_is_kept() {
        let tally = OutcomeTally::default();
        tally.record("error one");
        tally.record("error two");
        assert!(tally.failure_reason(None).unwrap().contains("error one"));
    }
}
