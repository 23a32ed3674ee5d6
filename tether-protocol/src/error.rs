use std::fmt;
use std::fmt::Display;

/// Represents an error in encoding or decoding a packet
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The remaining-length field uses more than 4 bytes
    BadRemainingLength,

    /// The packet body exceeds the maximum MQTT packet size (268,435,455 bytes)
    OversizedPacket,

    /// The packet type nibble is one of the reserved values (0 or 15)
    ReservedPacketType(u8),

    /// The fixed-header flags are invalid for the packet type
    BadFixedHeaderFlags(u8),

    /// A QoS field carries the reserved value 3 or higher
    BadQoS(u8),

    /// A length-prefixed string is not valid UTF-8
    BadUtf8,

    /// A string is longer than a 16-bit length prefix can express
    StringTooLong,

    /// A PUBLISH packet carries a zero-length topic name
    EmptyTopic,

    /// A QoS1/QoS2 packet carries packet identifier zero
    ZeroPacketId,

    /// A QoS1/QoS2 PUBLISH was built without a packet identifier
    MissingPacketId,

    /// The packet body ended before all declared fields were read
    Truncated,

    /// The packet body contains bytes past the last declared field
    TrailingBytes,

    /// The CONNECT protocol name is not "MQTT"
    BadProtocolName,

    /// The CONNECT protocol level is not 4 (MQTT 3.1.1)
    BadProtocolLevel(u8),

    /// The CONNECT flags byte has its reserved bit set
    BadConnectFlags(u8),

    /// The CONNACK return code is one of the reserved values
    BadReturnCode(u8),

    /// A SUBSCRIBE or UNSUBSCRIBE packet carries no topic filters
    EmptySubscription,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BadRemainingLength => {
                write!(f, "remaining length field exceeds 4 bytes")
            }
            CodecError::OversizedPacket => {
                write!(f, "packet body exceeds the maximum MQTT packet size")
            }
            CodecError::ReservedPacketType(t) => {
                write!(f, "reserved packet type {}", t)
            }
            CodecError::BadFixedHeaderFlags(b) => {
                write!(f, "invalid fixed header flags {:#06b}", b)
            }
            CodecError::BadQoS(q) => write!(f, "invalid QoS value {}", q),
            CodecError::BadUtf8 => write!(f, "string field is not valid UTF-8"),
            CodecError::StringTooLong => {
                write!(f, "string longer than 65535 bytes")
            }
            CodecError::EmptyTopic => write!(f, "zero-length topic name"),
            CodecError::ZeroPacketId => write!(f, "packet identifier is zero"),
            CodecError::MissingPacketId => {
                write!(f, "QoS1/QoS2 publish without a packet identifier")
            }
            CodecError::Truncated => {
                write!(f, "packet body shorter than its declared fields")
            }
            CodecError::TrailingBytes => {
                write!(f, "packet body has bytes past its last field")
            }
            CodecError::BadProtocolName => {
                write!(f, "CONNECT protocol name is not MQTT")
            }
            CodecError::BadProtocolLevel(l) => {
                write!(f, "unsupported protocol level {}", l)
            }
            CodecError::BadConnectFlags(b) => {
                write!(f, "CONNECT flags {:#010b} have the reserved bit set", b)
            }
            CodecError::BadReturnCode(c) => {
                write!(f, "reserved return code {:#04x}", c)
            }
            CodecError::EmptySubscription => {
                write!(f, "subscription packet with no topic filters")
            }
        }
    }
}

impl std::error::Error for CodecError {}
