//! `netplay_shared`
//!
//! Wire-level libraries used by the session service, the authority and clients.
//!
//! Design goals:
//! - One fixed binary layout, big-endian, no version negotiation.
//! - Every enumerated tag is checked; unknown values are decode errors.
//! - Tick synchronization state that only moves forward.
//! - No `unsafe`.

pub mod wire;

pub mod config;
pub mod event;
pub mod master;
pub mod message;
pub mod object;
pub mod tick;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::event::*;
    pub use crate::message::*;
    pub use crate::object::*;
    pub use crate::tick::*;
    pub use crate::wire::{Wire, WireError};
}
