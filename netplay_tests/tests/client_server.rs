//! Full socket-based integration tests for client ↔ server communication.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use netplay_client::{
    client::{self, ClientState},
    input::InputState,
};
use netplay_server::server::{run_for_ticks, GameServer};
use netplay_service::{udp::UdpHost, Service, ServiceState, Transport};
use netplay_shared::config::SessionConfig;
use tokio::time::Instant;

/// Full integration: spawn server, connect client, exchange inputs/game state
/// until the round ends.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    netplay_tests::init_tracing();

    let mut cfg = SessionConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_hz: 64,
        round_ticks: 30,
        ..Default::default()
    };
    let host = UdpHost::bind(cfg.bind_addr.parse()?).await?;
    cfg.server_addr = host
        .local_addr()
        .ok_or_else(|| anyhow::anyhow!("server not bound"))?
        .to_string();
    let mut server = Service::new(host, GameServer::new(&cfg), &cfg);
    server.start()?;

    let tick_interval = cfg.tick_interval();
    let poll_timeout = cfg.poll_timeout();
    let server_handle = tokio::spawn(async move {
        run_for_ticks(&mut server, 60, tick_interval, poll_timeout).await?;
        Ok::<_, anyhow::Error>(server)
    });

    let mut client = client::connect(&cfg).await?;
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut sent = 0;
    while client.state() != ServiceState::Uninitialized && Instant::now() < deadline {
        client
            .poll(Duration::from_millis(5), Duration::from_millis(5))
            .await?;
        if client.state() == ServiceState::Uninitialized {
            break;
        }
        client::send_inputs(
            &mut client,
            InputState {
                right: true,
                ..Default::default()
            },
        );
        if client.handler().state == ClientState::Ready {
            sent += 1;
        }
        client.flush()?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let server = server_handle.await??;

    let handler = client.handler();
    assert_eq!(handler.state, ClientState::Finished, "expected the round to end");
    assert!(handler.player_id().is_some());
    let last = handler.last_update().expect("expected game state");
    assert!(last.has_winner);
    assert!(last.confirm_input_tick <= last.input_tick);
    // The server confirmed inputs, so history did not grow with every send.
    assert!(handler.unconfirmed_inputs() < sent);
    assert!(server.handler().winner().is_some());
    Ok(())
}

/// The client gives up when nothing answers.
#[tokio::test]
async fn client_stops_when_server_is_unreachable() -> anyhow::Result<()> {
    netplay_tests::init_tracing();

    // Bind and drop a socket to get a port nobody listens on.
    let silent = UdpHost::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
    let addr = silent.local_addr().ok_or_else(|| anyhow::anyhow!("no addr"))?;
    drop(silent);

    let cfg = SessionConfig {
        server_addr: addr.to_string(),
        ..Default::default()
    };
    let mut client = client::connect(&cfg).await?;
    let deadline = Instant::now() + Duration::from_secs(15);
    while client.state() != ServiceState::Uninitialized && Instant::now() < deadline {
        client
            .poll(Duration::from_millis(20), Duration::from_millis(20))
            .await?;
    }
    assert_eq!(client.state(), ServiceState::Uninitialized);
    assert_eq!(client.handler().state, ClientState::Connecting);
    Ok(())
}
