//! Typed publish/subscribe over a single bidirectional connection.

mod channel;
mod connection;
mod error;
mod hub;

pub use connection::{Binding, Connection, Inbound};
pub use error::ChannelError;
pub use hub::{Hub, RoomBinding};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
