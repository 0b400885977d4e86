//! talkgroupd — talkgroup engine daemon.
//!
//! Usage: `talkgroupd [config.toml]`. Without an argument the default config
//! location is used (see `talkgroup_core::config`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use talkgroup_api::{ApiState, EventLog};
use talkgroup_core::config::EngineConfig;
use talkgroup_core::Event;
use talkgroup_engine::{Engine, TopicFilter};

mod rallypoint;
mod udp;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from(Path::new(&path))
            .with_context(|| format!("failed to load config from {path}"))?,
        None => {
            if let Err(e) = EngineConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            EngineConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                EngineConfig::default()
            })
        }
    };
    tracing::info!(
        storage = %config.storage_path.display(),
        groups = config.groups.len(),
        "talkgroupd starting"
    );

    let transport = Arc::new(udp::UdpTransport::new(config.network.clone())?);
    let engine = Engine::new(transport);

    let events = EventLog::new(config.api.event_log_capacity);
    let _log_subscription = events.attach(engine.bus());
    let _trace_subscription = engine.subscribe(
        TopicFilter::All,
        Arc::new(|event: &Event| {
            tracing::debug!(event = %event.name(), group = event.group_id().unwrap_or("-"), "event");
        }),
    );

    let result = engine.initialize(
        config.policy(),
        config.identity.clone(),
        Some(&config.storage_path),
    );
    if !result.is_ok() {
        anyhow::bail!("engine initialize failed: {}", result.name());
    }
    engine.start();

    for group in config.groups.iter().cloned() {
        let id = group.id.clone();
        let result = engine.create_group(group);
        if !result.is_ok() {
            tracing::warn!(group = %id, result = result.name(), "configured group not created");
            continue;
        }
        engine.join_group(&id);
    }

    // ── HTTP API ─────────────────────────────────────────────────────────────

    let api_task = if config.api.enabled {
        let state = ApiState {
            engine: engine.clone(),
            events: events.clone(),
        };
        let port = config.api.port;
        Some(tokio::spawn(async move {
            if let Err(e) = talkgroup_api::serve(state, port).await {
                tracing::error!(error = %e, "api server failed");
            }
        }))
    } else {
        None
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    match api_task {
        Some(api_task) => tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
            r = api_task => tracing::error!("api task exited: {:?}", r),
        },
        None => {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        }
    }

    engine.shutdown().await;
    tracing::info!("talkgroupd stopped");
    Ok(())
}
