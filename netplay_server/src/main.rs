//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p netplay_server -- [--addr 0.0.0.0:5900] [--tick-hz 30] [--round-ticks 0]
//!       [--master host] [--master-port 5902] [--local-ip 192.168.1.10] [--config server.json]
//!
//! The server accepts game connections, runs a fixed timestep simulation and
//! sends every peer a `GameStateUpdate` each tick. With `--master`, it registers
//! with the master server and logs NAT introductions.

use std::env;

use anyhow::Context;
use netplay_server::server::{check_poll, drop_malformed_peers, step_service, GameServer};
use netplay_service::{udp::UdpHost, Service, ServiceState};
use netplay_shared::config::SessionConfig;
use tokio::time::Instant;
use tracing::{debug, info, warn};

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
                cfg.bind_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            "--round-ticks" if i + 1 < args.len() => {
                cfg.round_ticks = args[i + 1].parse().unwrap_or(0);
                i += 2;
            }
            "--master" if i + 1 < args.len() => {
                cfg.master_address = Some(args[i + 1].clone());
                i += 2;
            }
            "--master-port" if i + 1 < args.len() => {
                cfg.master_port = args[i + 1].parse().unwrap_or(5902);
                i += 2;
            }
            "--local-ip" if i + 1 < args.len() => {
                cfg.local_ip_address = args[i + 1].clone();
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
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.bind_addr, tick_hz = cfg.tick_hz, round_ticks = cfg.round_ticks, "Starting server");

    let host = UdpHost::bind(cfg.bind_addr.parse().context("parse bind_addr")?)
        .await
        .context("bind server")?;
    let mut service = Service::new(host, GameServer::new(&cfg), &cfg);
    service.start()?;

    if cfg.master_address.is_some() {
        if let Err(e) = service.connect_master().await {
            warn!(error = %e, "Master server unavailable, running without it");
        }
    }

    // Main server loop.
    let tick_interval = cfg.tick_interval();
    let mut next_tick = Instant::now();
    let mut last = Instant::now();

    while service.state() != ServiceState::Uninitialized {
        let now = Instant::now();
        check_poll(service.poll(now - last, cfg.poll_timeout()).await)?;
        last = now;

        for peer in service.handler_mut().take_nat_peers() {
            debug!(address = %peer.address, port = peer.port, "Introduced peer is expected to connect");
        }

        drop_malformed_peers(&mut service);
        step_service(&mut service);
        service.flush()?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    info!("Server stopped");
    Ok(())
}
