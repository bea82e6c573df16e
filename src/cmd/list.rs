//! `garrison list`: known servers and their recorded isolation modes.

use anyhow::Result;
use console::style;

use super::Env;

pub fn cmd_list(env: &Env) -> Result<()> {
    let state = env.state().load()?;

    println!();
    println!("{:<20} {:<20} {:<10} Isolation", "Server", "Name", "App ID");
    println!("{:<20} {:<20} {:<10} ---------", "------", "----", "------");
    for game in env.registry.iter() {
        let recorded = match state.get(game.key().as_str()) {
            Some(entry) => style(entry.isolation.to_string()).green(),
            None => style("not installed".to_string()).dim(),
        };
        println!(
            "{:<20} {:<20} {:<10} {}",
            game.key().as_str(),
            game.display_name(),
            game.app_id(),
            recorded
        );
    }
    println!();
    Ok(())
}
