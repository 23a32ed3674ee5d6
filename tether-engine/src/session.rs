use std::fmt;
use std::fmt::Display;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::connection::Connection;
use crate::delivery::{Delivery, DeliveryError};
use crate::keepalive::{Keepalive, KeepaliveAction};
use tether_protocol::{
    CodecError, Packet, PacketId, Publish, QoS, SubscribeReturnCode, Subscribe, Unsubscribe,
};

/// Why a live session died
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFault {
    /// The transport failed or was closed by the peer
    Transport(ErrorKind),

    /// The broker sent bytes the codec rejects
    Malformed(CodecError),

    /// The broker sent a packet the protocol forbids at this point
    Violation(&'static str),

    /// The broker stopped answering keepalive probes
    KeepaliveTimeout,
}

impl Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::Transport(kind) => write!(f, "Transport failure: {:?}", kind),
            SessionFault::Malformed(e) => write!(f, "Malformed packet: {}", e),
            SessionFault::Violation(what) => write!(f, "Protocol violation: {}", what),
            SessionFault::KeepaliveTimeout => write!(f, "Keepalive timed out"),
        }
    }
}

impl std::error::Error for SessionFault {}

/// A request the session could not accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// No free packet identifier for the request
    PacketIdsExhausted,

    /// The outbound buffer cannot take the packet right now
    BufferFull,

    /// The packet could never fit the outbound buffer
    Oversized,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::PacketIdsExhausted => write!(f, "No free packet identifiers"),
            SessionError::BufferFull => write!(f, "The outbound buffer is full"),
            SessionError::Oversized => write!(f, "The packet exceeds the outbound buffer"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Something that happened on a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message arrived from the broker
    MessageArrived(Publish),

    /// An outbound QoS1/QoS2 message finished its acknowledgement exchange
    DeliveryComplete(PacketId),

    /// The broker answered a SUBSCRIBE request
    SubscribeAcknowledged {
        packet_id: PacketId,
        return_codes: Vec<SubscribeReturnCode>,
    },

    /// The broker answered an UNSUBSCRIBE request
    UnsubscribeAcknowledged(PacketId),
}

/// A connected MQTT session: packet exchange, QoS bookkeeping and
/// keepalive over an established connection.
///
/// The session is pumped by calling `process` regularly; requests queue
/// packets and `process` moves bytes and turns broker packets into
/// `SessionEvent`s. A fault from `process` means the session is dead; the
/// delivery state can be carried into a successor with `into_delivery`.
pub struct Session<S: Read + Write> {
    connection: Connection<S>,
    delivery: Delivery,
    keepalive: Keepalive,
}

impl<S: Read + Write> Session<S> {
    /// Starts a fresh session over a connection
    pub fn new(connection: Connection<S>, keepalive_secs: u16, now: Instant) -> Session<S> {
        Session {
            connection,
            delivery: Delivery::new(),
            keepalive: Keepalive::new(keepalive_secs, now),
        }
    }

    /// Resumes a session over a new connection, queueing retransmissions
    /// for every exchange the previous connection left unfinished
    ///
    /// # Errors
    /// `BufferFull`/`Oversized` if the retransmissions cannot be queued
    pub fn resume(
        connection: Connection<S>,
        delivery: Delivery,
        keepalive_secs: u16,
        now: Instant,
    ) -> Result<Session<S>, SessionError> {
        let mut session = Session {
            connection,
            delivery,
            keepalive: Keepalive::new(keepalive_secs, now),
        };
        for packet in session.delivery.redelivery_queue() {
            debug!("Queueing {} for redelivery", packet.kind());
            session.enqueue(&packet, now)?;
        }
        Ok(session)
    }

    /// The number of outbound messages awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.delivery.in_flight()
    }

    /// TRUE when every queued byte has been handed to the transport
    pub fn is_drained(&self) -> bool {
        self.connection.is_drained()
    }

    /// Takes the delivery state out of a dead session so a successor can
    /// retransmit its unfinished exchanges
    pub fn into_delivery(self) -> Delivery {
        self.delivery
    }

    /// Queues a message for publication and returns the PUBLISH as sent,
    /// packet id included for QoS1/QoS2
    ///
    /// # Errors
    /// `PacketIdsExhausted`, `BufferFull` or `Oversized`; in-flight
    /// messages are unaffected either way
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> Result<Publish, SessionError> {
        let publish = self
            .delivery
            .begin_publish(topic, payload, qos, retain)
            .map_err(|e| match e {
                DeliveryError::PacketIdsExhausted => SessionError::PacketIdsExhausted,
                DeliveryError::UnknownPacketId(_) => SessionError::BufferFull,
            })?;
        self.enqueue(&Packet::Publish(publish.clone()), now)?;
        Ok(publish)
    }

    /// Queues a SUBSCRIBE request and returns its packet id
    ///
    /// # Errors
    /// `PacketIdsExhausted`, `BufferFull` or `Oversized`
    pub fn subscribe(
        &mut self,
        topics: Vec<(String, QoS)>,
        now: Instant,
    ) -> Result<PacketId, SessionError> {
        let packet_id = self
            .delivery
            .reserve_control_id()
            .map_err(|_e| SessionError::PacketIdsExhausted)?;
        let subscribe = Subscribe { packet_id, topics };
        if let Err(e) = self.enqueue(&Packet::Subscribe(subscribe), now) {
            let _ = self.delivery.release_control_id(packet_id);
            return Err(e);
        }
        Ok(packet_id)
    }

    /// Queues an UNSUBSCRIBE request and returns its packet id
    ///
    /// # Errors
    /// `PacketIdsExhausted`, `BufferFull` or `Oversized`
    pub fn unsubscribe(
        &mut self,
        topics: Vec<String>,
        now: Instant,
    ) -> Result<PacketId, SessionError> {
        let packet_id = self
            .delivery
            .reserve_control_id()
            .map_err(|_e| SessionError::PacketIdsExhausted)?;
        let unsubscribe = Unsubscribe { packet_id, topics };
        if let Err(e) = self.enqueue(&Packet::Unsubscribe(unsubscribe), now) {
            let _ = self.delivery.release_control_id(packet_id);
            return Err(e);
        }
        Ok(packet_id)
    }

    /// Queues a DISCONNECT and flushes the outbound buffer, consuming the
    /// session. Delivery state for unfinished exchanges is returned so it
    /// can be persisted for a later resume.
    pub fn disconnect(mut self, now: Instant, budget: Duration) -> Delivery {
        if self.enqueue(&Packet::Disconnect, now).is_ok() {
            if let Err(e) = self.connection.send_task(budget) {
                debug!("Flush on disconnect failed: {}", e);
            }
        }
        self.delivery
    }

    /// Pumps the session: keepalive, outbound bytes, inbound bytes and
    /// packet dispatch, each within the given time budget.
    ///
    /// # Errors
    /// A `SessionFault` means the session is dead and must not be pumped
    /// again
    pub fn process(
        &mut self,
        now: Instant,
        budget: Duration,
    ) -> Result<Vec<SessionEvent>, SessionFault> {
        match self.keepalive.poll(now) {
            KeepaliveAction::Idle => {}
            KeepaliveAction::SendPing => {
                self.enqueue(&Packet::Pingreq, now)
                    .map_err(|_e| SessionFault::Transport(ErrorKind::WriteZero))?;
            }
            KeepaliveAction::Dead => return Err(SessionFault::KeepaliveTimeout),
        }

        self.connection
            .send_task(budget)
            .map_err(|e| SessionFault::Transport(e.kind()))?;
        self.connection
            .recv_task(budget)
            .map_err(|e| SessionFault::Transport(e.kind()))?;

        let mut events = Vec::new();
        loop {
            match self.connection.read() {
                Ok(Some(packet)) => self.dispatch(packet, now, &mut events)?,
                Ok(None) => break,
                Err(e) => return Err(SessionFault::Malformed(e)),
            }
        }
        Ok(events)
    }

    fn dispatch(
        &mut self,
        packet: Packet,
        now: Instant,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionFault> {
        trace!("Dispatching {}", packet.kind());
        match packet {
            Packet::Publish(publish) => {
                let (delivered, ack) = self.delivery.on_inbound_publish(publish);
                if let Some(ack) = ack {
                    self.send_ack(&ack, now)?;
                }
                if let Some(publish) = delivered {
                    events.push(SessionEvent::MessageArrived(publish));
                }
            }
            Packet::Puback(id) => match self.delivery.on_puback(id) {
                Ok(()) => events.push(SessionEvent::DeliveryComplete(id)),
                Err(e) => warn!("Ignoring PUBACK: {}", e),
            },
            Packet::Pubrec(id) => match self.delivery.on_pubrec(id) {
                Ok(release) => self.send_ack(&release, now)?,
                Err(e) => warn!("Ignoring PUBREC: {}", e),
            },
            Packet::Pubcomp(id) => match self.delivery.on_pubcomp(id) {
                Ok(()) => events.push(SessionEvent::DeliveryComplete(id)),
                Err(e) => warn!("Ignoring PUBCOMP: {}", e),
            },
            Packet::Pubrel(id) => {
                let done = self.delivery.on_pubrel(id);
                self.send_ack(&done, now)?;
            }
            Packet::Suback(suback) => {
                if let Err(e) = self.delivery.release_control_id(suback.packet_id) {
                    warn!("Ignoring SUBACK: {}", e);
                } else {
                    events.push(SessionEvent::SubscribeAcknowledged {
                        packet_id: suback.packet_id,
                        return_codes: suback.return_codes,
                    });
                }
            }
            Packet::Unsuback(id) => {
                if let Err(e) = self.delivery.release_control_id(id) {
                    warn!("Ignoring UNSUBACK: {}", e);
                } else {
                    events.push(SessionEvent::UnsubscribeAcknowledged(id));
                }
            }
            Packet::Pingresp => self.keepalive.on_pingresp(),
            Packet::Connack(_) => {
                return Err(SessionFault::Violation("CONNACK on a connected session"))
            }
            other => {
                // CONNECT, SUBSCRIBE, UNSUBSCRIBE, PINGREQ and DISCONNECT
                // only ever travel client to broker
                debug!("Broker sent a client-only packet: {}", other.kind());
                return Err(SessionFault::Violation("client-only packet from broker"));
            }
        }
        Ok(())
    }

    fn send_ack(&mut self, packet: &Packet, now: Instant) -> Result<(), SessionFault> {
        self.enqueue(packet, now)
            .map_err(|_e| SessionFault::Transport(ErrorKind::WriteZero))
    }

    fn enqueue(&mut self, packet: &Packet, now: Instant) -> Result<(), SessionError> {
        self.connection.write(packet).map_err(|e| match e.kind() {
            ErrorKind::WriteZero => SessionError::BufferFull,
            _ => SessionError::Oversized,
        })?;
        self.keepalive.on_outbound_packet(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectError, Connector};
    use crate::packets::Packetizer;
    use tether_protocol::{Connack, Connect, ConnectReturnCode};
    use tether_test_utils::{MockClientSocket, MockServerSocket, MockSocket};

    const BUDGET: Duration = Duration::from_millis(50);

    fn live_session(keepalive_secs: u16, now: Instant) -> (Session<MockClientSocket>, MockServerSocket) {
        let (client_socket, mut server_socket) = MockSocket::create();
        server_socket.push_packet(&Packet::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }));
        server_socket.allow_io_round();

        let mut handshake = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();
        let connection = loop {
            match handshake.complete() {
                Ok((connection, _connack)) => break connection,
                Err(ConnectError::WouldBlock(p)) => handshake = p,
                Err(_e) => panic!("handshake failed"),
            }
        };

        // swallow the CONNECT bytes so tests observe only session traffic
        let _ = received_packets(&mut server_socket);
        (Session::new(connection, keepalive_secs, now), server_socket)
    }

    fn received_packets(server_socket: &mut MockServerSocket) -> Vec<Packet> {
        let mut packetizer = Packetizer::new();
        packetizer.fill_from(server_socket).unwrap();
        let mut packets = Vec::new();
        while let Some(packet) = packetizer.next_packet().unwrap() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_inbound_qos0_message_arrives() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        server_socket.push_packet(&Packet::Publish(Publish::new("mytopic", vec![1, 2])));
        server_socket.allow_io_round();

        let events = sut.process(now, BUDGET).unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::MessageArrived(publish) => {
                assert_eq!(publish.topic, "mytopic");
                assert_eq!(publish.payload, vec![1, 2]);
            }
            _ => panic!("expected a message"),
        }
    }

    #[test]
    fn test_inbound_qos1_message_acked() {
        // Arrange
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        let mut publish = Publish::new("mytopic", vec![1, 2]);
        publish.qos = QoS::AtLeastOnce;
        publish.packet_id = Some(PacketId::from(42));
        server_socket.push_packet(&Packet::Publish(publish));
        server_socket.allow_io_round();

        // Act
        let events = sut.process(now, BUDGET).unwrap();
        server_socket.allow_io_round();
        sut.process(now, BUDGET).unwrap();

        // Assert
        assert_eq!(events.len(), 1);
        let acks = received_packets(&mut server_socket);
        assert_eq!(acks, vec![Packet::Puback(PacketId::from(42))]);
    }

    #[test]
    fn test_outbound_qos1_exchange() {
        // Arrange
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);

        // Act
        let publish = sut
            .publish("mytopic", vec![7], QoS::AtLeastOnce, false, now)
            .unwrap();
        let id = publish.packet_id.unwrap();
        server_socket.push_packet(&Packet::Puback(id));
        server_socket.allow_io_round();
        let events = sut.process(now, BUDGET).unwrap();

        // Assert
        assert_eq!(events, vec![SessionEvent::DeliveryComplete(id)]);
        assert_eq!(sut.in_flight(), 0);
        match &received_packets(&mut server_socket)[0] {
            Packet::Publish(sent) => assert_eq!(sent.packet_id, Some(id)),
            _ => panic!("expected the publish on the wire"),
        }
    }

    #[test]
    fn test_outbound_qos2_exchange() {
        // Arrange
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        let publish = sut
            .publish("mytopic", vec![7], QoS::ExactlyOnce, false, now)
            .unwrap();
        let id = publish.packet_id.unwrap();

        // Act: PUBREC moves the exchange to its release leg
        server_socket.push_packet(&Packet::Pubrec(id));
        server_socket.allow_io_round();
        let events = sut.process(now, BUDGET).unwrap();
        assert!(events.is_empty());
        server_socket.allow_io_round();
        sut.process(now, BUDGET).unwrap();

        let sent = received_packets(&mut server_socket);
        assert!(sent.contains(&Packet::Pubrel(id)));

        // Act: PUBCOMP completes it
        server_socket.push_packet(&Packet::Pubcomp(id));
        server_socket.allow_io_round();
        let events = sut.process(now, BUDGET).unwrap();

        // Assert
        assert_eq!(events, vec![SessionEvent::DeliveryComplete(id)]);
        assert_eq!(sut.in_flight(), 0);
    }

    #[test]
    fn test_inbound_pubrel_answered_with_pubcomp() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        server_socket.push_packet(&Packet::Pubrel(PacketId::from(9)));
        server_socket.allow_io_round();

        sut.process(now, BUDGET).unwrap();
        server_socket.allow_io_round();
        sut.process(now, BUDGET).unwrap();

        let sent = received_packets(&mut server_socket);
        assert!(sent.contains(&Packet::Pubcomp(PacketId::from(9))));
    }

    #[test]
    fn test_subscribe_roundtrip() {
        // Arrange
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);

        // Act
        let id = sut
            .subscribe(vec![("mytopic".to_owned(), QoS::AtLeastOnce)], now)
            .unwrap();
        server_socket.push_packet(&Packet::Suback(tether_protocol::Suback {
            packet_id: id,
            return_codes: vec![SubscribeReturnCode::Granted(QoS::AtLeastOnce)],
        }));
        server_socket.allow_io_round();
        let events = sut.process(now, BUDGET).unwrap();

        // Assert
        assert_eq!(
            events,
            vec![SessionEvent::SubscribeAcknowledged {
                packet_id: id,
                return_codes: vec![SubscribeReturnCode::Granted(QoS::AtLeastOnce)],
            }]
        );
        match &received_packets(&mut server_socket)[0] {
            Packet::Subscribe(sent) => {
                assert_eq!(sent.packet_id, id);
                assert_eq!(sent.topics.len(), 1);
            }
            _ => panic!("expected the subscribe on the wire"),
        }
    }

    #[test]
    fn test_unsubscribe_roundtrip() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);

        let id = sut.unsubscribe(vec!["mytopic".to_owned()], now).unwrap();
        server_socket.push_packet(&Packet::Unsuback(id));
        server_socket.allow_io_round();
        let events = sut.process(now, BUDGET).unwrap();

        assert_eq!(events, vec![SessionEvent::UnsubscribeAcknowledged(id)]);
    }

    #[test]
    fn test_quiet_session_pings_once() {
        // Arrange
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(10, now);

        // Act
        server_socket.allow_io_round();
        sut.process(now + Duration::from_secs(10), BUDGET).unwrap();
        server_socket.allow_io_round();
        sut.process(now + Duration::from_secs(11), BUDGET).unwrap();

        // Assert
        let sent = received_packets(&mut server_socket);
        assert_eq!(sent, vec![Packet::Pingreq]);
    }

    #[test]
    fn test_unanswered_ping_kills_the_session() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(10, now);

        server_socket.allow_io_round();
        sut.process(now + Duration::from_secs(10), BUDGET).unwrap();
        server_socket.allow_io_round();
        let res = sut.process(now + Duration::from_secs(15), BUDGET);

        assert_eq!(res.unwrap_err(), SessionFault::KeepaliveTimeout);
    }

    #[test]
    fn test_pingresp_keeps_the_session_alive() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(10, now);

        server_socket.allow_io_round();
        sut.process(now + Duration::from_secs(10), BUDGET).unwrap();
        server_socket.push_packet(&Packet::Pingresp);
        server_socket.allow_io_round();
        sut.process(now + Duration::from_secs(12), BUDGET).unwrap();
        server_socket.allow_io_round();
        let res = sut.process(now + Duration::from_secs(16), BUDGET);

        assert!(res.is_ok());
    }

    #[test]
    fn test_unexpected_connack_is_a_violation() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        server_socket.push_packet(&Packet::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }));
        server_socket.allow_io_round();

        let res = sut.process(now, BUDGET);

        match res.unwrap_err() {
            SessionFault::Violation(_) => {}
            _other => panic!("expected a violation"),
        }
    }

    #[test]
    fn test_malformed_bytes_kill_the_session() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        // PUBLISH with QoS 3
        server_socket.push_data(&[0x36, 0x05, 0x00, 0x01, b'a', 0x00, 0x01]);
        server_socket.allow_io_round();

        let res = sut.process(now, BUDGET);

        assert_eq!(
            res.unwrap_err(),
            SessionFault::Malformed(CodecError::BadQoS(3))
        );
    }

    #[test]
    fn test_closed_stream_is_a_transport_fault() {
        let now = Instant::now();
        let (mut sut, mut server_socket) = live_session(60, now);
        server_socket.push_write_ctl(Ok(8 * 1024));
        server_socket.push_read_ctl(Ok(0));

        // a zero-byte read means the peer closed the stream
        let res = sut.process(now, BUDGET);

        assert_eq!(
            res.unwrap_err(),
            SessionFault::Transport(ErrorKind::ConnectionAborted)
        );
    }

    #[test]
    fn test_resume_redelivers_in_flight_messages_in_order() {
        // Arrange: a session dies with packet ids 5 and 6 unacknowledged
        let now = Instant::now();
        let (mut first, mut first_server) = live_session(60, now);
        for _ in 0..4 {
            let id = first
                .publish("mytopic", vec![0], QoS::AtLeastOnce, false, now)
                .unwrap()
                .packet_id
                .unwrap();
            first_server.push_packet(&Packet::Puback(id));
        }
        first
            .publish("five", vec![5], QoS::AtLeastOnce, false, now)
            .unwrap();
        first
            .publish("six", vec![6], QoS::AtLeastOnce, false, now)
            .unwrap();
        first_server.allow_io_round();
        first.process(now, BUDGET).unwrap();
        let delivery = first.into_delivery();
        assert_eq!(delivery.in_flight(), 2);

        // Act: resume over a fresh connection
        let (second, mut second_server) = live_session(60, now);
        let mut sut = Session::resume(
            second.connection,
            delivery,
            60,
            now,
        )
        .unwrap();
        second_server.allow_io_round();
        sut.process(now, BUDGET).unwrap();

        // Assert: both messages retransmitted, dup flagged, in order
        let sent = received_packets(&mut second_server);
        assert_eq!(sent.len(), 2);
        match (&sent[0], &sent[1]) {
            (Packet::Publish(a), Packet::Publish(b)) => {
                assert_eq!(a.packet_id, Some(PacketId::from(5)));
                assert_eq!(b.packet_id, Some(PacketId::from(6)));
                assert!(a.dup && b.dup);
            }
            _ => panic!("expected two publishes"),
        }
    }

    #[test]
    fn test_disconnect_flushes_the_wire() {
        let now = Instant::now();
        let (sut, mut server_socket) = live_session(60, now);
        server_socket.push_write_ctl(Ok(8 * 1024));

        sut.disconnect(now, BUDGET);

        let sent = received_packets(&mut server_socket);
        assert_eq!(sent, vec![Packet::Disconnect]);
    }
}
