use std::io::ErrorKind;
use std::time::Duration;

use tether_protocol::{ConnectReturnCode, PacketId, Publish, QoS};

/// Why a live connection was lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostReason {
    /// The transport failed or was closed by the peer
    Transport(ErrorKind),

    /// The broker stopped answering keepalive probes
    KeepaliveTimeout,

    /// The broker violated the protocol; the client will not reconnect
    Protocol,
}

/// Why the client gave up for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// The broker refused the connection
    Refused(ConnectReturnCode),

    /// The broker violated the protocol
    Protocol,

    /// Every reconnect attempt the policy allows has failed
    RetriesExhausted,
}

/// Something the application should know about, drained via `poll_event`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The broker accepted the connection
    Connected {
        /// TRUE if the broker resumed a previous session
        session_present: bool,
    },

    /// A message arrived on a subscribed topic
    Message(Publish),

    /// An outbound QoS1/QoS2 message finished its acknowledgement
    /// exchange
    DeliveryComplete(PacketId),

    /// The broker answered a subscribe request for one filter; `granted`
    /// is None when the broker refused it
    SubscribeCompleted {
        filter: String,
        granted: Option<QoS>,
    },

    /// The broker answered an unsubscribe request for one filter
    UnsubscribeCompleted { filter: String },

    /// The client disconnected at the application's request
    Disconnected,

    /// The connection died; the client may reconnect on its own
    ConnectionLost(LostReason),

    /// A reconnect attempt is scheduled
    Reconnecting {
        /// 1-based attempt counter
        attempt: u32,

        /// How long the client waits before this attempt
        delay: Duration,
    },

    /// The client has given up; a fresh `connect` is required
    Failed(FailReason),
}
