//! # parley-shared
//!
//! Types shared between the Parley server and its clients: identifiers,
//! the persisted [`Message`] record and the JSON event protocol spoken over
//! the chat WebSocket.

pub mod constants;
pub mod error;
pub mod message;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use message::{Message, MessageKey};
pub use types::{ConnectionId, RoomId, UserId};
