use std::fmt;
use std::fmt::Display;

use tether_engine::session::SessionError;

/// A request the client could not accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    /// The operation needs a live connection
    NotConnected,

    /// A connection already exists or is being established
    AlreadyConnected,

    /// All 65535 packet identifiers are in flight
    PacketIdsExhausted,

    /// The outbound buffer cannot take the packet right now
    BufferFull,

    /// The packet could never fit the outbound buffer
    Oversized,
}

impl Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "Not connected"),
            ClientError::AlreadyConnected => write!(f, "Already connected"),
            ClientError::PacketIdsExhausted => write!(f, "No free packet identifiers"),
            ClientError::BufferFull => write!(f, "The outbound buffer is full"),
            ClientError::Oversized => write!(f, "The packet exceeds the outbound buffer"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<SessionError> for ClientError {
    fn from(e: SessionError) -> ClientError {
        match e {
            SessionError::PacketIdsExhausted => ClientError::PacketIdsExhausted,
            SessionError::BufferFull => ClientError::BufferFull,
            SessionError::Oversized => ClientError::Oversized,
        }
    }
}
