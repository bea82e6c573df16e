//! Arma Reforger dedicated server.

use super::{GameDefinition, LaunchPaths, StartOptions};
use crate::types::ServerKey;

pub const APP_ID: u32 = 1874900;
pub const BINARY: &str = "ArmaReforgerServer";

#[derive(Debug, Clone)]
pub struct ArmaReforger {
    key: ServerKey,
}

impl ArmaReforger {
    pub fn new() -> Self {
        Self {
            key: ServerKey::builtin("arma-reforger"),
        }
    }
}

impl Default for ArmaReforger {
    fn default() -> Self {
        Self::new()
    }
}

impl GameDefinition for ArmaReforger {
    fn key(&self) -> &ServerKey {
        &self.key
    }

    fn display_name(&self) -> &str {
        "Arma Reforger"
    }

    fn app_id(&self) -> u32 {
        APP_ID
    }

    fn binary_name(&self) -> &str {
        BINARY
    }

    fn launch_args(&self, paths: &LaunchPaths, opts: &StartOptions) -> Vec<String> {
        let mut args = vec![
            format!("-config={}", paths.config.display()),
            format!("-profile={}", paths.profile.display()),
            format!("-port={}", opts.port),
            format!("-queryPort={}", opts.query_port),
            format!("-steamQueryPort={}", opts.query_port),
            format!("-serverBrowserPort={}", opts.browser_port),
        ];
        args.extend(opts.extra.iter().cloned());
        args
    }

    fn udp_ports(&self, opts: &StartOptions) -> Vec<u16> {
        let mut ports = vec![opts.port, opts.query_port, opts.browser_port];
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}
