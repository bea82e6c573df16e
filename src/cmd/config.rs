//! Configuration view and validation commands: `garrison config`.

use anyhow::Result;

use super::Env;
use crate::ConfigCommands;

pub fn cmd_config(env: &Env, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if env.config_path.exists() {
                println!("Config file: {}", env.config_path.display());
            } else {
                println!(
                    "No garrison.toml at {}; showing defaults",
                    env.config_path.display()
                );
            }
            println!("State file:  {}", env.dirs.state_file().display());
            println!("Fetch cache: {}", env.dirs.fetch_cache().display());
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", env.config.to_display_toml());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = env.config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
