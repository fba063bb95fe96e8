//! Real-time synchronization channel.
//!
//! Clients push their whole collection; the server replaces its store and
//! rebroadcasts to every other connected client.

mod channel;
mod hub;
pub mod protocol;
mod service;

pub use channel::*;
pub use hub::{ClientId, Frame, Hub};
pub use service::*;
