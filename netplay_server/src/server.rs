//! Server implementation.
//!
//! Authoritative side of a session. The server:
//! - Spawns a player for every game peer that connects
//! - Applies each client input exactly once, in tick order
//! - Runs a fixed timestep and stamps every step with a new snapshot tick
//! - Sends each peer a `GameStateUpdate` confirming the newest input it applied
//! - Latches a winner when one player is left standing or the round runs out
//!
//! Determinism notes:
//! - Simulation only advances from inputs and `step`, never from wall-clock time.
//! - Players are reported in id order.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use netplay_service::{
    udp::UdpHost, ConnectionId, Peer, Service, ServiceError, SessionHandler, Transport,
};
use netplay_shared::{
    config::SessionConfig,
    event::{PlayerControls, PlayerInputsUpdate},
    master::NatPeer,
    message::{EventMessage, ObjectMessage},
    object::{GameObject, GameStatus, Orientation, PlayerState},
    tick::TickAuthority,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Horizontal/vertical speed in units per second.
pub const MOVE_SPEED: f32 = 4.0;
pub const ARENA_HALF_WIDTH: f32 = 20.0;
pub const MAX_AMMO: u16 = 10;
pub const SHOT_DAMAGE: f32 = 25.0;
pub const SHOT_RANGE: f32 = 8.0;
/// Vertical tolerance for a shot to connect.
pub const SHOT_HEIGHT: f32 = 1.0;
/// Undecodable messages tolerated from one peer.
pub const MALFORMED_LIMIT: u32 = 16;
/// Disconnect code for a peer over [`MALFORMED_LIMIT`].
pub const MALFORMED_CODE: u32 = 0x6d61_6c66;

/// Per-connection player state.
#[derive(Debug, Clone)]
struct PlayerSlot {
    state: PlayerState,
    /// Newest client input tick applied for this player.
    last_applied_tick: u64,
}

/// Authoritative game server. Lives inside a [`Service`] as its handler.
pub struct GameServer {
    dt: f32,
    round_ticks: u64,
    authority: TickAuthority,
    players: HashMap<ConnectionId, PlayerSlot>,
    next_player_id: u32,
    game: GameObject,
    game_dirty: bool,
    winner: Option<u32>,
    nat_peers: Vec<NatPeer>,
}

impl GameServer {
    pub fn new(cfg: &SessionConfig) -> Self {
        Self {
            dt: cfg.tick_interval().as_secs_f32(),
            round_ticks: cfg.round_ticks,
            authority: TickAuthority::new(),
            players: HashMap::new(),
            next_player_id: 1,
            game: GameObject {
                round: 1,
                max_rounds: 1,
                status: GameStatus::Waiting,
            },
            game_dirty: false,
            winner: None,
            nat_peers: Vec::new(),
        }
    }

    pub fn snapshot_tick(&self) -> u64 {
        self.authority.snapshot_tick()
    }

    pub fn game(&self) -> &GameObject {
        &self.game
    }

    pub fn winner(&self) -> Option<u32> {
        self.winner
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Current player states in id order.
    pub fn players(&self) -> Vec<PlayerState> {
        let mut players: Vec<PlayerState> =
            self.players.values().map(|s| s.state.clone()).collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn player_for(&self, conn: ConnectionId) -> Option<&PlayerState> {
        self.players.get(&conn).map(|s| &s.state)
    }

    /// Newest input tick applied for the player on `conn`.
    pub fn last_applied_tick(&self, conn: ConnectionId) -> Option<u64> {
        self.players.get(&conn).map(|s| s.last_applied_tick)
    }

    /// NAT peers introduced by the master and not yet consumed.
    pub fn take_nat_peers(&mut self) -> Vec<NatPeer> {
        std::mem::take(&mut self.nat_peers)
    }

    /// Executes one fixed simulation step and queues a `GameStateUpdate` for every peer.
    pub fn step<'a>(&mut self, peers: impl Iterator<Item = &'a mut Peer>) {
        self.authority.advance();
        self.decide_winner();

        let players = self.players();
        let has_winner = self.winner.is_some();
        for peer in peers {
            if self.game_dirty {
                peer.send(ObjectMessage::Game(self.game));
            }
            let confirm = self
                .players
                .get(&peer.id())
                .map(|s| s.last_applied_tick)
                .unwrap_or(0);
            peer.send(self.authority.update_for(confirm, players.clone(), has_winner));
        }
        self.game_dirty = false;
    }

    fn set_status(&mut self, status: GameStatus) {
        if self.game.status != status {
            info!(from = ?self.game.status, to = ?status, "Game status changed");
            self.game.status = status;
            self.game_dirty = true;
        }
    }

    fn decide_winner(&mut self) {
        if self.winner.is_some() || self.players.is_empty() {
            return;
        }
        let alive = self.players.values().filter(|s| s.state.alive).count();
        let last_standing = self.players.len() > 1 && alive <= 1;
        let out_of_time = self.round_ticks > 0 && self.authority.snapshot_tick() >= self.round_ticks;
        if !(last_standing || out_of_time) {
            return;
        }

        let winner = self
            .players
            .values()
            .map(|s| &s.state)
            .max_by(|a, b| {
                a.alive
                    .cmp(&b.alive)
                    .then(a.life.total_cmp(&b.life))
                    .then(b.id.cmp(&a.id))
            })
            .map(|p| p.id);
        if let Some(id) = winner {
            info!(
                winner = id,
                snapshot_tick = self.authority.snapshot_tick(),
                last_standing,
                "Winner decided"
            );
            self.winner = Some(id);
            self.set_status(GameStatus::Over);
        }
    }

    fn on_inputs(&mut self, peer: &Peer, update: PlayerInputsUpdate) {
        let conn = peer.id();
        let Some(slot) = self.players.get(&conn) else {
            warn!(peer = %conn, "Inputs from peer without a player");
            return;
        };
        if update.player_id != slot.state.id {
            warn!(
                peer = %conn,
                claimed = update.player_id,
                actual = slot.state.id,
                "Inputs for another player ignored"
            );
            return;
        }
        if self.winner.is_some() {
            return;
        }

        let last = slot.last_applied_tick;
        let mut newest = last;
        for input in update.inputs.iter().filter(|i| i.tick > last) {
            self.apply_input(conn, input.controls);
            newest = newest.max(input.tick);
        }
        if let Some(slot) = self.players.get_mut(&conn) {
            slot.last_applied_tick = newest;
        }
        debug!(
            peer = %conn,
            applied = newest - last,
            input_tick = update.input_tick,
            "Inputs applied"
        );
    }

    fn apply_input(&mut self, conn: ConnectionId, controls: PlayerControls) {
        let dt = self.dt;
        let Some(slot) = self.players.get_mut(&conn) else {
            return;
        };
        let p = &mut slot.state;
        if !p.alive {
            return;
        }

        let mut velocity = (0.0, 0.0);
        if controls.contains(PlayerControls::LEFT) {
            velocity.0 -= MOVE_SPEED;
            p.orientation = Orientation::Left;
        }
        if controls.contains(PlayerControls::RIGHT) {
            velocity.0 += MOVE_SPEED;
            p.orientation = Orientation::Right;
        }
        if controls.contains(PlayerControls::UP) {
            velocity.1 += MOVE_SPEED;
        }
        if controls.contains(PlayerControls::DOWN) {
            velocity.1 -= MOVE_SPEED;
        }
        p.velocity = velocity;
        p.position.0 = (p.position.0 + velocity.0 * dt).clamp(-ARENA_HALF_WIDTH, ARENA_HALF_WIDTH);
        p.position.1 = (p.position.1 + velocity.1 * dt).clamp(-ARENA_HALF_WIDTH, ARENA_HALF_WIDTH);

        if controls.contains(PlayerControls::PICK) {
            p.ammo = MAX_AMMO;
        }
        if controls.contains(PlayerControls::STATUS) {
            debug!(player = p.id, life = p.life, ammo = p.ammo, "Status requested");
        }

        if controls.contains(PlayerControls::SHOOT) && p.ammo > 0 {
            p.ammo -= 1;
            let (shooter, origin, facing) = (p.id, p.position, p.orientation);
            self.resolve_shot(shooter, origin, facing);
        }
    }

    fn resolve_shot(&mut self, shooter: u32, origin: (f32, f32), facing: Orientation) {
        let dir = match facing {
            Orientation::Left => -1.0,
            Orientation::Right => 1.0,
        };
        let target = self
            .players
            .values_mut()
            .map(|s| &mut s.state)
            .filter(|p| p.alive && p.id != shooter)
            .filter(|p| {
                let ahead = (p.position.0 - origin.0) * dir;
                ahead > 0.0 && ahead <= SHOT_RANGE && (p.position.1 - origin.1).abs() <= SHOT_HEIGHT
            })
            .min_by(|a, b| {
                (a.position.0 - origin.0)
                    .abs()
                    .total_cmp(&(b.position.0 - origin.0).abs())
            });

        if let Some(p) = target {
            p.life = (p.life - SHOT_DAMAGE).max(0.0);
            debug!(shooter, target = p.id, life = p.life, "Hit");
            if p.life <= 0.0 {
                p.alive = false;
                info!(shooter, target = p.id, "Player eliminated");
            }
        }
    }
}

impl SessionHandler for GameServer {
    fn on_peer_connected(&mut self, peer: &mut Peer) {
        let id = self.next_player_id;
        self.next_player_id += 1;
        let lane = (id % 4) as f32;
        let state = PlayerState::spawn(id, (-ARENA_HALF_WIDTH / 2.0 + lane * 5.0, 0.0));

        peer.send(ObjectMessage::Player(state.clone()));
        self.players.insert(
            peer.id(),
            PlayerSlot {
                state,
                last_applied_tick: 0,
            },
        );
        info!(peer = %peer.id(), player = id, "Player joined");

        if self.winner.is_none() && self.players.len() > 1 {
            self.set_status(GameStatus::Running);
        }
        peer.send(ObjectMessage::Game(self.game));
    }

    fn on_peer_disconnected(&mut self, peer: &Peer, reason: u32) {
        if let Some(slot) = self.players.remove(&peer.id()) {
            info!(peer = %peer.id(), player = slot.state.id, reason, "Player left");
        }
    }

    fn on_object(&mut self, peer: &mut Peer, object: ObjectMessage) {
        debug!(peer = %peer.id(), kind = ?object.object_type(), "Ignoring object from client");
    }

    fn on_event(&mut self, peer: &mut Peer, event: EventMessage) {
        match event {
            EventMessage::PlayerInputsUpdate(update) => self.on_inputs(peer, update),
            EventMessage::GameStateUpdate(update) => {
                warn!(
                    peer = %peer.id(),
                    snapshot_tick = update.snapshot_tick,
                    "Client sent game state; ignored"
                );
            }
        }
    }

    fn on_nat_peers(&mut self, peers: Vec<NatPeer>) {
        for p in &peers {
            info!(address = %p.address, port = p.port, "NAT peer introduced");
        }
        self.nat_peers.extend(peers);
    }
}

/// Runs the authority step against every peer of `service`.
pub fn step_service<T: Transport>(service: &mut Service<T, GameServer>) {
    let (peers, server) = service.peers_and_handler();
    server.step(peers);
}

/// Disconnects every peer over [`MALFORMED_LIMIT`]. Returns how many were dropped.
pub fn drop_malformed_peers<T: Transport>(service: &mut Service<T, GameServer>) -> usize {
    let noisy: Vec<ConnectionId> = service
        .peers()
        .filter(|p| p.malformed_messages() > MALFORMED_LIMIT)
        .map(|p| p.id())
        .collect();
    for id in &noisy {
        warn!(peer = %id, limit = MALFORMED_LIMIT, "Too many malformed messages, disconnecting");
        service.disconnect(*id, MALFORMED_CODE);
    }
    noisy.len()
}

/// Logs recoverable poll errors; returns fatal ones.
pub fn check_poll(result: Result<(), ServiceError>) -> anyhow::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e).context("poll"),
        Err(e) => {
            warn!(error = %e, "Session error");
            Ok(())
        }
    }
}

/// Runs the server for a number of ticks.
pub async fn run_for_ticks<T: Transport>(
    service: &mut Service<T, GameServer>,
    ticks: u64,
    tick_interval: Duration,
    poll_timeout: Duration,
) -> anyhow::Result<()> {
    let mut next = Instant::now();
    let mut last = Instant::now();

    for _ in 0..ticks {
        next += tick_interval;
        let now = Instant::now();
        check_poll(service.poll(now - last, poll_timeout).await)?;
        last = now;
        drop_malformed_peers(service);
        step_service(service);
        service.flush()?;
        tokio::time::sleep_until(next).await;
    }
    Ok(())
}

/// Helper for tests: a started server on an ephemeral localhost port.
pub async fn bind_ephemeral(
    tick_hz: u32,
) -> anyhow::Result<(Service<UdpHost, GameServer>, SessionConfig)> {
    let mut cfg = SessionConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_hz,
        ..Default::default()
    };
    let host = UdpHost::bind(cfg.bind_addr.parse().context("parse bind_addr")?).await?;
    let local = host.local_addr().context("server has no local address")?;
    cfg.server_addr = local.to_string();

    let mut service = Service::new(host, GameServer::new(&cfg), &cfg);
    service.start()?;
    Ok((service, cfg))
}
