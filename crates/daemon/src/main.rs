// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wm-supervisor daemon (wmd): the long-running process that claims tasks,
//! drives agent sessions through `wm_engine::WorkerManager`, and relays
//! push-channel commands (`spec.md` §2, §6).

mod config;
mod dispatch;
mod engine_stub;
mod env;
mod lockfile;
mod logging;

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wm_adapters::{BuilddServerClient, PushChannelClient, ReqwestServerClient, StaticWorkspaceResolver, WsPushChannelClient};
use wm_core::SystemClock;
use wm_engine::WorkerManager;
use wm_storage::{Outbox, WorkerStore};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("wmd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("wmd {}", env!("CARGO_PKG_VERSION"));
                println!("Agent-worker supervisor daemon. Claims tasks, drives sessions, relays push commands.");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: wmd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = DaemonConfig::load()?;
    logging::rotate_log_if_needed(&config.log_path);
    let _log_guard = logging::setup(&config.log_path)?;

    let _lock = match lockfile::LockFile::acquire(&config.lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("wmd is already running (lock held at {})", config.lock_path.display());
            return Err(e.into());
        }
    };

    info!("starting wm-supervisor daemon");

    let store = WorkerStore::new(config.state_dir.join("workers"));
    let outbox = Outbox::load(config.state_dir.join("outbox.json"));
    let server: Arc<dyn BuilddServerClient> =
        Arc::new(ReqwestServerClient::new(config.server_base_url.clone(), config.server_api_key.clone()));
    let resolver = Arc::new(StaticWorkspaceResolver::new(config.workspaces.clone()));
    let engine = Arc::new(engine_stub::UnconfiguredEngine);

    let (push, mut frames) = WsPushChannelClient::connect(&config.push_channel_url).await?;
    let push: Arc<dyn wm_adapters::PushChannelClient> = Arc::new(push);

    let manager = WorkerManager::new(store, outbox, engine, server.clone(), push.clone(), resolver, SystemClock, config.manager.clone());

    for workspace_id in config.workspaces.keys() {
        let topic = format!("workspace-{workspace_id}");
        if let Err(e) = push.subscribe(&topic).await {
            warn!(%workspace_id, error = %e, "failed to subscribe to workspace topic");
        }
    }

    let shutdown = CancellationToken::new();
    let timer_handles = manager.spawn_timers(shutdown.clone());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("wm-supervisor daemon ready");
    println!("READY");

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) => dispatch::route_frame(&manager, &server, &config.manager, frame).await,
                    None => {
                        info!("push channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    shutdown.cancel();
    if tokio::time::timeout(env::drain_timeout(), join_all(timer_handles)).await.is_err() {
        warn!("timers did not drain within the shutdown grace period");
    }

    info!("wm-supervisor daemon stopped");
    Ok(())
}
