//! Service scenarios over the scripted transport.

use bytes::Bytes;
use netplay_service::{
    transport::{DUPLICATE_MASTER_CODE, INVALID_INTENT_CODE},
    ConnectionId, ConnectionIntent, MasterError, ServiceError, ServiceState, StopHandle,
};
use netplay_shared::{
    event::GameStateUpdate,
    master::{MasterMessage, NatPeer},
    message::{EventMessage, Message},
    object::PlayerState,
};
use netplay_tests::{init_tracing, poll_once, scripted_service, Call, ScriptedService};

fn started() -> ScriptedService {
    init_tracing();
    let mut svc = scripted_service();
    svc.start().unwrap();
    svc
}

async fn with_peer(conn: u32) -> (ScriptedService, ConnectionId) {
    let mut svc = started();
    let id = ConnectionId(conn);
    svc.host_mut()
        .push_connect(id, ConnectionIntent::GameConnection.as_u32());
    poll_once(&mut svc).await.unwrap();
    (svc, id)
}

fn game_state(snapshot_tick: u64, x: f32, has_winner: bool) -> Bytes {
    Message::from(GameStateUpdate {
        input_tick: snapshot_tick,
        confirm_input_tick: 0,
        snapshot_tick,
        players: vec![PlayerState::spawn(1, (x, 0.0))],
        has_winner,
    })
    .to_bytes()
}

fn applied_snapshots(svc: &ScriptedService) -> Vec<u64> {
    svc.handler()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            EventMessage::GameStateUpdate(u) => Some(u.snapshot_tick),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn invalid_intent_is_force_closed_without_a_peer() {
    let mut svc = started();
    svc.host_mut().push_connect(ConnectionId(9), 5);
    poll_once(&mut svc).await.unwrap();

    assert_eq!(
        svc.host().disconnects_now,
        vec![(ConnectionId(9), INVALID_INTENT_CODE)]
    );
    assert!(svc.handler().calls.is_empty());
    assert_eq!(svc.peer_count(), 0);
}

#[tokio::test]
async fn every_intent_at_or_above_count_is_rejected() {
    let mut svc = started();
    for (n, raw) in [ConnectionIntent::COUNT, 4, 0x6666_6666, u32::MAX]
        .into_iter()
        .enumerate()
    {
        svc.host_mut().push_connect(ConnectionId(n as u32), raw);
    }
    poll_once(&mut svc).await.unwrap();
    assert_eq!(svc.host().disconnects_now.len(), 4);
    assert_eq!(svc.peer_count(), 0);
}

#[tokio::test]
async fn master_connect_then_disconnect_clears_the_proxy() {
    let mut svc = started();
    let id = ConnectionId(3);
    svc.host_mut()
        .push_connect(id, ConnectionIntent::MasterPushNatPeersToServer.as_u32());
    poll_once(&mut svc).await.unwrap();
    assert_eq!(svc.master().active(), Some(id));
    assert_eq!(svc.peer_count(), 0);

    svc.host_mut().push_disconnect(id, 0);
    poll_once(&mut svc).await.unwrap();
    assert_eq!(svc.master().active(), None);
    assert_eq!(
        svc.handler().calls,
        vec![Call::MasterConnected(id), Call::MasterDisconnected(id)]
    );
}

#[tokio::test]
async fn second_master_is_refused() {
    let mut svc = started();
    let push = ConnectionIntent::MasterPushNatPeersToServer.as_u32();
    svc.host_mut().push_connect(ConnectionId(1), push);
    svc.host_mut().push_connect(ConnectionId(2), push);

    let err = poll_once(&mut svc).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Master(MasterError::AlreadyConnected { .. })
    ));
    assert!(!err.is_fatal());
    assert_eq!(
        svc.host().disconnects_now,
        vec![(ConnectionId(2), DUPLICATE_MASTER_CODE)]
    );
    assert_eq!(svc.master().active(), Some(ConnectionId(1)));
    assert_eq!(svc.state(), ServiceState::Started);
}

#[tokio::test]
async fn nat_peers_reach_the_handler() {
    let mut svc = started();
    let id = ConnectionId(3);
    svc.host_mut()
        .push_connect(id, ConnectionIntent::MasterPushNatPeersToServer.as_u32());
    let peers = vec![NatPeer {
        address: "198.51.100.4".to_string(),
        port: 40_000,
    }];
    svc.host_mut().push_receive(
        id,
        MasterMessage::PushNatPeers {
            peers: peers.clone(),
        }
        .to_bytes(),
    );
    poll_once(&mut svc).await.unwrap();
    assert_eq!(svc.handler().calls.last(), Some(&Call::NatPeers(peers)));
}

#[tokio::test]
async fn undefined_inner_type_is_dropped_and_poll_succeeds() {
    let (mut svc, id) = with_peer(1).await;
    svc.host_mut()
        .push_receive(id, Bytes::from_static(&[0x01, 0x02, 0xde, 0xad]));
    poll_once(&mut svc).await.unwrap();

    assert_eq!(svc.state(), ServiceState::Started);
    assert!(svc.handler().events().is_empty());
    assert_eq!(svc.peer(id).unwrap().malformed_messages(), 1);
}

#[tokio::test]
async fn unknown_outer_type_is_a_framing_error() {
    let (mut svc, id) = with_peer(1).await;
    svc.host_mut()
        .push_receive(id, Bytes::from_static(&[0x07, 0x00]));
    svc.host_mut().push_receive(id, game_state(1, 0.0, false));

    let err = poll_once(&mut svc).await.unwrap_err();
    assert!(matches!(err, ServiceError::Framing { id: e, .. } if e == id));
    assert!(!err.is_fatal());
    assert_eq!(svc.peer(id).unwrap().malformed_messages(), 1);
    // The connection survives and later messages are still delivered.
    poll_once(&mut svc).await.unwrap();
    assert_eq!(applied_snapshots(&svc), vec![1]);
    assert_eq!(svc.state(), ServiceState::Started);
}

#[tokio::test]
async fn stop_request_survives_a_framing_error() {
    let (mut svc, id) = with_peer(1).await;
    svc.handler_mut().stop_on_event = Some(svc.stop_handle());
    svc.host_mut().push_receive(id, game_state(1, 0.0, false));
    svc.host_mut().push_receive(id, Bytes::from_static(&[0x07]));

    let err = poll_once(&mut svc).await.unwrap_err();
    assert!(matches!(err, ServiceError::Framing { .. }));
    assert_eq!(svc.state(), ServiceState::Uninitialized);
    assert_eq!(svc.host().disconnects, vec![(id, 0)]);
    assert_eq!(
        svc.handler().calls.last(),
        Some(&Call::PeerDisconnected(id, 0))
    );
}

#[tokio::test]
async fn truncated_payload_is_dropped() {
    let (mut svc, id) = with_peer(1).await;
    let full = game_state(1, 0.0, false);
    svc.host_mut().push_receive(id, full.slice(..full.len() - 3));
    poll_once(&mut svc).await.unwrap();
    assert!(svc.handler().events().is_empty());
    assert_eq!(svc.peer(id).unwrap().malformed_messages(), 1);
}

#[tokio::test]
async fn poll_while_uninitialized_touches_nothing() {
    init_tracing();
    let mut svc = scripted_service();
    svc.host_mut().push_connect(ConnectionId(1), 1);
    poll_once(&mut svc).await.unwrap();

    assert_eq!(svc.state(), ServiceState::Uninitialized);
    assert!(svc.host().untouched());
    assert_eq!(svc.host().queued_events(), 1);
    assert!(svc.handler().calls.is_empty());
}

#[tokio::test]
async fn stop_requested_in_handler_applies_after_dispatch() {
    let (mut svc, id) = with_peer(1).await;
    let stop: StopHandle = svc.stop_handle();
    svc.handler_mut().stop_on_event = Some(stop);

    svc.host_mut().push_receive(id, game_state(1, 0.0, false));
    svc.host_mut().push_receive(id, game_state(2, 1.0, false));
    poll_once(&mut svc).await.unwrap();

    // Both events were dispatched before the shutdown.
    assert_eq!(applied_snapshots(&svc), vec![1, 2]);
    assert_eq!(svc.state(), ServiceState::Uninitialized);
    assert_eq!(
        svc.handler().calls.last(),
        Some(&Call::PeerDisconnected(id, 0))
    );
}

#[tokio::test]
async fn snapshots_only_move_forward() {
    let (mut svc, id) = with_peer(1).await;
    for (tick, x) in [(5, 1.0), (5, 9.0), (4, 9.0), (6, 2.0)] {
        svc.host_mut().push_receive(id, game_state(tick, x, false));
    }
    poll_once(&mut svc).await.unwrap();

    assert_eq!(applied_snapshots(&svc), vec![5, 6]);
    let sync = svc.peer(id).unwrap().sync();
    assert_eq!(sync.last_snapshot_tick(), Some(6));
    assert_eq!(sync.players()[0].position, (2.0, 0.0));
}

#[tokio::test]
async fn winner_latch_freezes_peer_state() {
    let (mut svc, id) = with_peer(1).await;
    svc.host_mut().push_receive(id, game_state(3, 1.0, true));
    svc.host_mut().push_receive(id, game_state(4, 5.0, false));
    poll_once(&mut svc).await.unwrap();

    assert_eq!(applied_snapshots(&svc), vec![3]);
    assert!(svc.peer(id).unwrap().sync().is_finished());
}

#[tokio::test]
async fn queued_messages_are_flushed_by_poll() {
    let (mut svc, id) = with_peer(1).await;
    svc.peer_mut(id)
        .unwrap()
        .send(netplay_shared::message::ObjectMessage::Player(PlayerState::spawn(1, (0.0, 0.0))));
    svc.broadcast(netplay_shared::message::ObjectMessage::Game(Default::default()));
    poll_once(&mut svc).await.unwrap();

    assert_eq!(svc.host().sent_to(id).len(), 2);
    assert_eq!(svc.peer(id).unwrap().stats().packets_sent, 2);
}

#[tokio::test]
async fn master_registration_is_sent_on_outgoing_connect() {
    let mut svc = started();
    svc.set_master_address_and_port("127.0.0.1", 5902);
    svc.set_local_ip_address("10.0.0.2");
    let id = svc.connect_master().await.unwrap();
    assert_eq!(svc.host().connects[0].2, ConnectionIntent::None);

    svc.host_mut().push_connect(id, ConnectionIntent::None.as_u32());
    poll_once(&mut svc).await.unwrap();
    assert_eq!(svc.master().active(), Some(id));

    let sent = svc.host().sent_to(id);
    assert_eq!(
        MasterMessage::decode(sent[0].clone()).unwrap(),
        MasterMessage::RegisterServer {
            local_address: "10.0.0.2".to_string(),
            local_port: 0,
        }
    );
}

#[tokio::test]
async fn game_connection_on_master_link_is_unexpected() {
    let mut svc = started();
    svc.set_master_address_and_port("127.0.0.1", 5902);
    let id = svc.connect_master().await.unwrap();
    svc.host_mut()
        .push_connect(id, ConnectionIntent::GameConnection.as_u32());
    let err = poll_once(&mut svc).await.unwrap_err();
    assert!(matches!(err, ServiceError::UnexpectedConnect { .. }));
    assert_eq!(svc.peer_count(), 0);
}
