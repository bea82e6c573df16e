//! Server lifecycle commands: install, update, start, stop, status, delete.

use anyhow::Result;
use console::style;

use garrison::dispatch::{Resolved, ServerRequest};
use garrison::errors::ConfigError;
use garrison::games::StartOptions;
use garrison::registry::Registry;
use garrison::types::IsolationMode;

use super::Env;
use crate::{LaunchArgs, Target};

fn request(registry: &Registry, target: &Target) -> Result<ServerRequest> {
    let key = target.server.clone().ok_or_else(|| ConfigError::MissingServer {
        available: registry.keys(),
    })?;
    let isolation = target
        .isolation
        .as_deref()
        .map(str::parse::<IsolationMode>)
        .transpose()?;
    Ok(ServerRequest::new(key)
        .isolation(isolation)
        .install_dir(target.install_dir.clone()))
}

fn start_options(launch: &LaunchArgs) -> StartOptions {
    let opts = StartOptions {
        config: launch.server_config.clone(),
        profile: launch.profile.clone(),
        port: launch.port,
        query_port: launch.query_port,
        browser_port: launch.browser_port,
        extra: Vec::new(),
    };
    match &launch.extra {
        Some(extra) => opts.with_extra(extra),
        None => opts,
    }
}

fn done(verb: &str, r: &Resolved) {
    println!(
        "{} {} {} ({}, isolation {})",
        style("✓").green().bold(),
        verb,
        style(r.game.display_name()).bold(),
        r.game.key(),
        r.mode
    );
}

pub async fn cmd_install(env: &Env, target: &Target) -> Result<()> {
    let req = request(&env.registry, target)?;
    let r = env.dispatcher().install(&env.ctx, &req).await?;
    done("Installed", &r);
    println!("  {}", style(r.install_dir.display()).dim());
    Ok(())
}

pub async fn cmd_update(env: &Env, target: &Target) -> Result<()> {
    let req = request(&env.registry, target)?;
    let r = env.dispatcher().update(&env.ctx, &req).await?;
    done("Updated", &r);
    Ok(())
}

pub async fn cmd_start(env: &Env, target: &Target, launch: &LaunchArgs) -> Result<()> {
    let req = request(&env.registry, target)?;
    let opts = start_options(launch);
    let r = env.dispatcher().start(&env.ctx, &req, &opts).await?;
    done("Started", &r);
    Ok(())
}

pub async fn cmd_stop(env: &Env, target: &Target) -> Result<()> {
    let req = request(&env.registry, target)?;
    let r = env.dispatcher().stop(&env.ctx, &req).await?;
    done("Stopped", &r);
    Ok(())
}

pub async fn cmd_status(env: &Env, target: &Target) -> Result<()> {
    let req = request(&env.registry, target)?;
    let (r, status) = env.dispatcher().status(&env.ctx, &req).await?;
    let shown = if status.is_running() {
        style(status.to_string()).green()
    } else {
        style(status.to_string()).yellow()
    };
    println!("{} [{}]: {}", r.game.key(), r.mode, shown);
    Ok(())
}

pub async fn cmd_delete(env: &Env, target: &Target) -> Result<()> {
    let req = request(&env.registry, target)?;
    let r = env.dispatcher().delete(&env.ctx, &req).await?;
    done("Deleted", &r);
    Ok(())
}
