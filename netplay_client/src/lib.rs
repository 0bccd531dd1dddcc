//! `netplay_client`
//!
//! Client-side systems:
//! - Connection to the authoritative server through the session service
//! - Input capture and per-tick `PlayerControls` generation
//! - Unconfirmed-input history, re-sent until the server confirms it
//! - Application of `GameStateUpdate`s (newest snapshot wins, winner ends the session)

pub mod client;
pub mod input;

pub use client::GameClient;
