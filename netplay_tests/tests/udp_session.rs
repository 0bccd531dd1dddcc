//! Service scenarios over a real UDP host, driven by a raw socket.

use std::{net::SocketAddr, time::Duration};

use bytes::{BufMut, BytesMut};
use netplay_service::{transport::SHUTDOWN_CODE, ConnectionId, ServiceError, ServiceState};
use netplay_shared::{
    event::GameStateUpdate,
    message::{Message, ObjectMessage},
    object::PlayerState,
};
use netplay_tests::{init_tracing, udp_service, Call, UdpService};
use tokio::net::UdpSocket;

const CONNECT_GAME: [u8; 5] = [1, 0, 0, 0, 1];
const BAD_OUTER_TAG: [u8; 3] = [4, 0x07, 0x00];
const DISCONNECT: [u8; 5] = [3, 0, 0, 0, 0];

async fn raw_client() -> anyhow::Result<UdpSocket> {
    Ok(UdpSocket::bind("127.0.0.1:0").await?)
}

fn data(message: impl Into<Message>) -> Vec<u8> {
    let packet = message.into().to_bytes();
    let mut datagram = BytesMut::with_capacity(1 + packet.len());
    datagram.put_u8(4);
    datagram.put_slice(&packet);
    datagram.to_vec()
}

async fn send_all(raw: &UdpSocket, to: SocketAddr, datagrams: &[&[u8]]) -> anyhow::Result<()> {
    for datagram in datagrams {
        raw.send_to(datagram, to).await?;
    }
    // Let everything land in the server's socket before it polls.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

fn connected_id(svc: &UdpService) -> ConnectionId {
    match svc.handler().calls.first() {
        Some(Call::PeerConnected(id)) => *id,
        other => panic!("expected a connected peer, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_connection_does_not_break_flush() -> anyhow::Result<()> {
    init_tracing();
    let (mut svc, addr) = udp_service().await?;
    let raw = raw_client().await?;
    send_all(&raw, addr, &[&CONNECT_GAME[..], &BAD_OUTER_TAG[..], &DISCONNECT[..]]).await?;

    let err = svc
        .poll(Duration::ZERO, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Framing { .. }));
    assert!(!err.is_fatal());

    // The transport already dropped the connection; the link is still there.
    let id = connected_id(&svc);
    assert!(svc.peer(id).is_some());
    svc.broadcast(ObjectMessage::Game(Default::default()));
    svc.flush()?;
    assert_eq!(svc.peer(id).unwrap().pending_outbound(), 0);

    svc.poll(Duration::ZERO, Duration::from_millis(50)).await?;
    assert_eq!(svc.peer_count(), 0);
    assert_eq!(
        svc.handler().calls.last(),
        Some(&Call::PeerDisconnected(id, 0))
    );
    assert_eq!(svc.state(), ServiceState::Started);
    Ok(())
}

#[tokio::test]
async fn stop_request_survives_framing_error_over_udp() -> anyhow::Result<()> {
    init_tracing();
    let (mut svc, addr) = udp_service().await?;
    svc.handler_mut().stop_on_event = Some(svc.stop_handle());
    let raw = raw_client().await?;
    let state = data(GameStateUpdate {
        input_tick: 1,
        confirm_input_tick: 0,
        snapshot_tick: 1,
        players: vec![PlayerState::spawn(1, (0.0, 0.0))],
        has_winner: false,
    });
    send_all(&raw, addr, &[&CONNECT_GAME[..], &state[..], &[4u8, 0x07][..]]).await?;

    let err = svc
        .poll(Duration::ZERO, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Framing { .. }));
    assert_eq!(svc.state(), ServiceState::Uninitialized);
    let id = connected_id(&svc);
    assert_eq!(
        svc.handler().calls.last(),
        Some(&Call::PeerDisconnected(id, SHUTDOWN_CODE))
    );

    // The client is told: ACCEPT first, then DISCONNECT.
    let mut buf = [0u8; 64];
    let mut kinds = Vec::new();
    while kinds.last() != Some(&3) {
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), raw.recv_from(&mut buf)).await??;
        assert!(n > 0);
        kinds.push(buf[0]);
    }
    assert_eq!(kinds, vec![2, 3]);
    Ok(())
}

#[tokio::test]
async fn local_disconnect_is_completed_by_the_next_poll() -> anyhow::Result<()> {
    init_tracing();
    let (mut svc, addr) = udp_service().await?;
    let raw = raw_client().await?;
    send_all(&raw, addr, &[&CONNECT_GAME[..]]).await?;
    svc.poll(Duration::ZERO, Duration::from_millis(500)).await?;
    let id = connected_id(&svc);

    svc.disconnect(id, 42);
    svc.peer_mut(id)
        .unwrap()
        .send(ObjectMessage::Player(PlayerState::spawn(1, (0.0, 0.0))));
    svc.flush()?;

    svc.poll(Duration::ZERO, Duration::ZERO).await?;
    assert!(svc.peer(id).is_none());
    assert_eq!(
        svc.handler().calls.last(),
        Some(&Call::PeerDisconnected(id, 42))
    );
    Ok(())
}
