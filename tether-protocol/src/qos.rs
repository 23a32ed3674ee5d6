use std::fmt;
use std::fmt::Display;

/// Represents a single packet identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct PacketId {
    value: u16,
}

impl PacketId {
    /// The packet id
    pub fn value(&self) -> u16 {
        self.value
    }
}

impl From<PacketId> for u16 {
    fn from(packet_id: PacketId) -> Self {
        packet_id.value
    }
}

impl From<u16> for PacketId {
    fn from(packet_id: u16) -> Self {
        PacketId { value: packet_id }
    }
}

impl Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// The delivery guarantee attached to a message (QoS level)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QoS {
    /// QoS0 - delivered at most once, no acknowledgement
    AtMostOnce,

    /// QoS1 - delivered at least once, acknowledged with PUBACK,
    /// retransmitted until acknowledged
    AtLeastOnce,

    /// QoS2 - delivered exactly once, via the
    /// PUBLISH/PUBREC/PUBREL/PUBCOMP handshake
    ExactlyOnce,
}

impl QoS {
    /// The wire representation of this QoS level
    pub fn to_byte(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Parses a wire-level QoS value. Returns None for the reserved value 3
    /// and anything above it.
    pub fn from_byte(value: u8) -> Option<QoS> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS{}", self.to_byte())
    }
}

/// Determines whether a new connection starts a fresh session or resumes
/// the previous one.
/// When resuming, unacknowledged QoS1/QoS2 messages from the prior session
/// are retransmitted with the dup flag set, and subscriptions are retained.
/// When starting clean, both sides discard any prior session state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Start a clean session (discard prior session state)
    Clean,

    /// Resume the previous session (retransmit unacknowledged messages)
    Resume,
}

impl SessionMode {
    /// The CONNECT clean-session flag value for this mode
    pub fn clean_session_flag(self) -> bool {
        match self {
            SessionMode::Clean => true,
            SessionMode::Resume => false,
        }
    }
}
