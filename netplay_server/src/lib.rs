//! `netplay_server`
//!
//! Authoritative side of a session:
//! - Fixed timestep simulation loop
//! - One player per connected game peer
//! - Receives `PlayerInputsUpdate`s, applies each input tick once
//! - Sends `GameStateUpdate`s stamped with input/confirm/snapshot ticks
//!
//! Networking model:
//! - UDP host driven by `netplay_service::Service::poll`
//! - Optional master server registration for NAT introductions

pub mod server;

pub use server::GameServer;
