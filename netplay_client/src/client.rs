//! Client implementation.
//!
//! The client maintains:
//! - The connection to the authoritative server (through the session service)
//! - The player id the server assigned on join
//! - A history of inputs the server has not confirmed yet
//! - The newest applied `GameStateUpdate` (stale and post-winner ones never arrive here)
//!
//! Every tick it records one `PlayerControls` sample and sends all unconfirmed
//! inputs, so a lost datagram is covered by the next one.

use std::net::SocketAddr;

use anyhow::Context;
use netplay_service::{
    udp::UdpHost, ConnectionId, Peer, Service, SessionHandler, StopHandle, Transport,
};
use netplay_shared::{
    config::SessionConfig,
    event::{GameStateUpdate, PlayerInputsUpdate},
    message::{EventMessage, ObjectMessage},
    object::{GameObject, PlayerState},
    tick::InputHistory,
};
use tracing::{debug, info, warn};

use crate::input::InputState;

/// Upper bound on unconfirmed inputs kept while the server is silent.
pub const INPUT_HISTORY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the connection to complete.
    Connecting,
    /// Connected, waiting for the server to assign a player.
    Joining,
    /// Playing.
    Ready,
    /// A winner was announced.
    Finished,
    /// Connection lost.
    Disconnected,
}

/// Game client. Lives inside a [`Service`] as its handler.
pub struct GameClient {
    pub state: ClientState,
    stop: StopHandle,
    server: Option<ConnectionId>,
    player_id: Option<u32>,
    history: InputHistory,
    last_update: Option<GameStateUpdate>,
    game: Option<GameObject>,
}

impl GameClient {
    /// `stop` is signalled when the session is over.
    pub fn new(stop: StopHandle) -> Self {
        Self {
            state: ClientState::Connecting,
            stop,
            server: None,
            player_id: None,
            history: InputHistory::new(INPUT_HISTORY),
            last_update: None,
            game: None,
        }
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn server(&self) -> Option<ConnectionId> {
        self.server
    }

    /// Newest applied game state.
    pub fn last_update(&self) -> Option<&GameStateUpdate> {
        self.last_update.as_ref()
    }

    pub fn snapshot_tick(&self) -> u64 {
        self.last_update.as_ref().map_or(0, |u| u.snapshot_tick)
    }

    pub fn game(&self) -> Option<&GameObject> {
        self.game.as_ref()
    }

    /// Our own player as last reported by the server.
    pub fn me(&self) -> Option<&PlayerState> {
        let id = self.player_id?;
        self.last_update.as_ref()?.players.iter().find(|p| p.id == id)
    }

    pub fn unconfirmed_inputs(&self) -> usize {
        self.history.len()
    }

    pub fn has_winner(&self) -> bool {
        self.state == ClientState::Finished
    }

    /// Records one input tick and builds the update to send. `None` until joined.
    pub fn tick(&mut self, input: InputState) -> Option<PlayerInputsUpdate> {
        if self.state != ClientState::Ready {
            return None;
        }
        let player_id = self.player_id?;
        self.history.record(input.controls());
        Some(self.history.to_update(player_id, self.snapshot_tick()))
    }

    fn on_game_state(&mut self, update: GameStateUpdate) {
        self.history.confirm(update.confirm_input_tick);
        debug!(
            snapshot_tick = update.snapshot_tick,
            confirm_input_tick = update.confirm_input_tick,
            unconfirmed = self.history.len(),
            "Game state applied"
        );
        if update.has_winner {
            let winner = update.players.iter().filter(|p| p.alive).max_by(|a, b| {
                a.life.total_cmp(&b.life).then(b.id.cmp(&a.id))
            });
            info!(
                snapshot_tick = update.snapshot_tick,
                winner = winner.map(|p| p.id),
                me = self.player_id,
                "Game over"
            );
            self.state = ClientState::Finished;
            self.stop.request_stop();
        }
        self.last_update = Some(update);
    }
}

impl SessionHandler for GameClient {
    fn on_peer_connected(&mut self, peer: &mut Peer) {
        info!(server = %peer.id(), remote = ?peer.remote_addr(), "Connected to server");
        self.server = Some(peer.id());
        self.state = ClientState::Joining;
    }

    fn on_peer_disconnected(&mut self, peer: &Peer, reason: u32) {
        if self.server == Some(peer.id()) {
            info!(server = %peer.id(), reason, "Disconnected from server");
            self.server = None;
            if self.state != ClientState::Finished {
                self.state = ClientState::Disconnected;
            }
        }
    }

    fn on_object(&mut self, peer: &mut Peer, object: ObjectMessage) {
        match object {
            ObjectMessage::Player(player) => {
                if self.player_id.is_none() {
                    info!(server = %peer.id(), player = player.id, "Joined game");
                    self.player_id = Some(player.id);
                    self.state = ClientState::Ready;
                } else {
                    debug!(player = player.id, "Player object");
                }
            }
            ObjectMessage::Game(game) => {
                debug!(round = game.round, status = ?game.status, "Game object");
                self.game = Some(game);
            }
        }
    }

    fn on_event(&mut self, peer: &mut Peer, event: EventMessage) {
        match event {
            EventMessage::GameStateUpdate(update) => self.on_game_state(update),
            EventMessage::PlayerInputsUpdate(_) => {
                warn!(peer = %peer.id(), "Unexpected inputs from server");
            }
        }
    }
}

/// Records `input` and queues the resulting update for the server.
pub fn send_inputs<T: Transport>(service: &mut Service<T, GameClient>, input: InputState) {
    let Some(update) = service.handler_mut().tick(input) else {
        return;
    };
    let Some(server) = service.handler().server() else {
        return;
    };
    if let Some(peer) = service.peer_mut(server) {
        peer.send(update);
    }
}

/// Binds an ephemeral UDP host and starts connecting to `cfg.server_addr`.
pub async fn connect(cfg: &SessionConfig) -> anyhow::Result<Service<UdpHost, GameClient>> {
    let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
    let bind = SocketAddr::new(
        if server_addr.is_ipv4() {
            std::net::Ipv4Addr::UNSPECIFIED.into()
        } else {
            std::net::Ipv6Addr::UNSPECIFIED.into()
        },
        0,
    );
    let host = UdpHost::bind(bind).await.context("bind client")?;

    let stop = StopHandle::default();
    let mut service =
        Service::new(host, GameClient::new(stop.clone()), cfg).with_stop_handle(stop);
    service.connect(server_addr)?;
    info!(server = %server_addr, "Connecting");
    Ok(service)
}
