//! CLI command implementations.
//!
//! | Module   | Commands handled                                       |
//! |----------|--------------------------------------------------------|
//! | `server` | `Install`, `Update`, `Start`, `Stop`, `Status`, `Delete` |
//! | `list`   | `List`                                                 |
//! | `config` | `Config`                                               |

pub mod config;
pub mod list;
pub mod server;

pub use config::cmd_config;
pub use list::cmd_list;
pub use server::{cmd_delete, cmd_install, cmd_start, cmd_status, cmd_stop, cmd_update};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use garrison::config::GarrisonToml;
use garrison::context::OpContext;
use garrison::dispatch::Dispatcher;
use garrison::paths::{BaseDirs, DirsSource};
use garrison::registry::Registry;
use garrison::state::StateStore;

use super::Cli;

/// Everything a command needs, resolved once per invocation.
pub struct Env {
    pub config: GarrisonToml,
    pub config_path: PathBuf,
    pub dirs: BaseDirs,
    pub registry: Registry,
    pub ctx: OpContext,
}

impl Env {
    pub fn load(cli: &Cli) -> Result<Self> {
        let dirs = BaseDirs::from_env()?;
        let config_path = cli.config.clone().unwrap_or_else(|| dirs.config_file());
        let config = GarrisonToml::load_layered(&config_path, |name| std::env::var(name).ok())?;
        for warning in config.validate() {
            tracing::warn!("{}", warning);
        }

        let mut ctx = OpContext::new();
        if let Some(secs) = cli.timeout {
            ctx = ctx.with_timeout(Duration::from_secs(secs));
        }
        let token = ctx.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                token.cancel();
            }
        });

        Ok(Self {
            config,
            config_path,
            dirs,
            registry: Registry::with_builtin(),
            ctx,
        })
    }

    pub fn state(&self) -> StateStore {
        StateStore::new(self.dirs.state_file())
    }

    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::standard(
            &self.registry,
            self.state(),
            DirsSource::Fixed(self.dirs.clone()),
            &self.config,
        )
    }
}
