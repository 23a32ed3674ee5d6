//! The Tether-Engine Crate
//!
//! The MQTT session engine: incremental packet I/O over a nonblocking
//! stream, the CONNECT handshake driver, the session state machine, the
//! QoS delivery manager and the keepalive scheduler.

/// The CONNECT handshake driver and the live connection
pub mod connection;

/// QoS delivery tracking and packet identifier allocation
pub mod delivery;

/// PINGREQ scheduling and liveness detection
pub mod keepalive;

/// Packet-level I/O over byte buffers
pub mod packets;

/// The session state machine
pub mod session;

/// The abstract transport contract
pub mod transport;
