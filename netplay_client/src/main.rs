//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p netplay_client -- [--addr 127.0.0.1:5900] [--tick-hz 30] [--config client.json]
//!
//! The client connects to the server, sends a scripted input pattern every
//! tick and logs received game state. It exits when the server announces a
//! winner or the connection drops.

use std::env;

use anyhow::Context;
use netplay_client::{
    client::{self, ClientState},
    input,
};
use netplay_service::ServiceState;
use netplay_shared::config::SessionConfig;
use tokio::time::Instant;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<SessionConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let text = std::fs::read_to_string(&args[i + 1])
                .with_context(|| format!("read config {}", args[i + 1]))?;
            SessionConfig::from_json_str(&text).context("parse config")?
        }
        _ => SessionConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let mut service = client::connect(&cfg).await.context("connect")?;

    let tick_interval = cfg.tick_interval();
    let mut next_tick = Instant::now();
    let mut last = Instant::now();
    let mut tick: u64 = 0;

    while service.state() != ServiceState::Uninitialized {
        let now = Instant::now();
        if let Err(e) = service.poll(now - last, cfg.poll_timeout()).await {
            if e.is_fatal() {
                return Err(e).context("poll");
            }
            warn!(error = %e, "Session error");
        }
        last = now;

        if service.state() == ServiceState::Uninitialized {
            break;
        }

        tick += 1;
        client::send_inputs(&mut service, input::patrol(tick, cfg.tick_hz));
        service.flush()?;

        // Print state occasionally.
        let handler = service.handler();
        if tick % u64::from(cfg.tick_hz.max(1)) == 0 {
            if let Some(me) = handler.me() {
                info!(
                    snapshot_tick = handler.snapshot_tick(),
                    x = me.position.0,
                    y = me.position.1,
                    life = me.life,
                    ammo = me.ammo,
                    unconfirmed = handler.unconfirmed_inputs(),
                    "State"
                );
            }
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    match service.handler().state {
        ClientState::Finished => info!("Game over"),
        ClientState::Connecting => warn!("Could not reach server"),
        _ => info!("Disconnected from server"),
    }
    Ok(())
}
