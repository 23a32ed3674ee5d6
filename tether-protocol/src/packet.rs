use crate::qos::{PacketId, QoS};
use std::fmt;
use std::fmt::Display;

/// A will message published by the broker on the client's behalf when the
/// connection drops without a clean DISCONNECT
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Will {
    /// The topic the will is published to
    pub topic: String,

    /// The will payload
    pub message: Vec<u8>,

    /// The QoS the will is published with
    pub qos: QoS,

    /// Whether the will is retained
    pub retain: bool,
}

/// A request to open an MQTT session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connect {
    /// The client identifier, unique per broker session
    pub client_id: String,

    /// TRUE to discard any prior session state on both sides
    pub clean_session: bool,

    /// Keepalive interval in seconds; 0 disables keepalive
    pub keepalive_secs: u16,

    /// Optional will message
    pub will: Option<Will>,

    /// Optional username credential
    pub username: Option<String>,

    /// Optional password credential
    pub password: Option<Vec<u8>>,
}

impl Connect {
    /// A minimal CONNECT with the given client id: clean session, 60s
    /// keepalive, no will, no credentials
    pub fn new(client_id: &str) -> Connect {
        Connect {
            client_id: client_id.to_owned(),
            clean_session: true,
            keepalive_secs: 60,
            will: None,
            username: None,
            password: None,
        }
    }
}

/// The broker's verdict on a CONNECT request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// The connection was accepted
    Accepted,

    /// The broker does not support the requested protocol level
    UnacceptableProtocolVersion,

    /// The client identifier was rejected
    IdentifierRejected,

    /// The MQTT service is unavailable
    ServerUnavailable,

    /// Malformed username or password
    BadCredentials,

    /// The client is not authorized to connect
    NotAuthorized,
}

impl ConnectReturnCode {
    /// The wire representation of this return code
    pub fn to_byte(self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0,
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadCredentials => 4,
            ConnectReturnCode::NotAuthorized => 5,
        }
    }

    /// Parses a wire-level return code. Values 6-255 are reserved.
    pub fn from_byte(value: u8) -> Option<ConnectReturnCode> {
        match value {
            0 => Some(ConnectReturnCode::Accepted),
            1 => Some(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Some(ConnectReturnCode::IdentifierRejected),
            3 => Some(ConnectReturnCode::ServerUnavailable),
            4 => Some(ConnectReturnCode::BadCredentials),
            5 => Some(ConnectReturnCode::NotAuthorized),
            _ => None,
        }
    }
}

impl Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The broker's response to a CONNECT request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connack {
    /// TRUE if the broker resumed a previous session for this client
    pub session_present: bool,

    /// The connect verdict
    pub return_code: ConnectReturnCode,
}

/// An application message, in either direction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publish {
    /// The topic name the message is published to
    pub topic: String,

    /// The message payload
    pub payload: Vec<u8>,

    /// The delivery guarantee
    pub qos: QoS,

    /// TRUE if the broker should retain this message for future subscribers
    pub retain: bool,

    /// TRUE if this is a retransmission of an earlier attempt
    pub dup: bool,

    /// The packet identifier; present exactly when qos > QoS0
    pub packet_id: Option<PacketId>,
}

impl Publish {
    /// A fresh QoS0 message
    pub fn new(topic: &str, payload: Vec<u8>) -> Publish {
        Publish {
            topic: topic.to_owned(),
            payload,
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }
}

/// The result of a single SUBSCRIBE topic filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    /// The subscription was accepted at the given QoS
    Granted(QoS),

    /// The subscription was refused
    Failure,
}

/// A request to subscribe to one or more topic filters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe {
    /// The packet identifier correlating the SUBACK
    pub packet_id: PacketId,

    /// The requested topic filters with their maximum QoS
    pub topics: Vec<(String, QoS)>,
}

/// The broker's response to a SUBSCRIBE request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suback {
    /// The packet identifier of the SUBSCRIBE being answered
    pub packet_id: PacketId,

    /// One return code per requested filter, in request order
    pub return_codes: Vec<SubscribeReturnCode>,
}

/// A request to drop one or more topic filters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsubscribe {
    /// The packet identifier correlating the UNSUBACK
    pub packet_id: PacketId,

    /// The topic filters to drop
    pub topics: Vec<String>,
}

/// An MQTT 3.1.1 control packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// Client request to connect (type 1)
    Connect(Connect),

    /// Connect acknowledgment (type 2)
    Connack(Connack),

    /// Application message (type 3)
    Publish(Publish),

    /// QoS1 publish acknowledgment (type 4)
    Puback(PacketId),

    /// QoS2 publish received, handshake part 1 (type 5)
    Pubrec(PacketId),

    /// QoS2 publish release, handshake part 2 (type 6)
    Pubrel(PacketId),

    /// QoS2 publish complete, handshake part 3 (type 7)
    Pubcomp(PacketId),

    /// Subscribe request (type 8)
    Subscribe(Subscribe),

    /// Subscribe acknowledgment (type 9)
    Suback(Suback),

    /// Unsubscribe request (type 10)
    Unsubscribe(Unsubscribe),

    /// Unsubscribe acknowledgment (type 11)
    Unsuback(PacketId),

    /// Keepalive probe (type 12)
    Pingreq,

    /// Keepalive probe response (type 13)
    Pingresp,

    /// Graceful disconnect notification (type 14)
    Disconnect,
}

impl Packet {
    /// A short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::Connack(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::Puback(_) => "PUBACK",
            Packet::Pubrec(_) => "PUBREC",
            Packet::Pubrel(_) => "PUBREL",
            Packet::Pubcomp(_) => "PUBCOMP",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::Suback(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::Unsuback(_) => "UNSUBACK",
            Packet::Pingreq => "PINGREQ",
            Packet::Pingresp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }
}
