//! The Tether-Client Crate
//!
//! A polling MQTT 3.1.1 client over any nonblocking transport: connect,
//! subscribe, publish and disconnect, with automatic keepalive, QoS
//! bookkeeping and policy-driven reconnection. Everything that happens is
//! surfaced as a `ClientEvent`, drained with `poll_event`.

#![warn(
    bare_trait_objects,
    dead_code,
    elided_lifetimes_in_paths,
    keyword_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    redundant_semicolons,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_code,
    unreachable_patterns,
    unsafe_code,
    unused_allocation,
    unused_assignments,
    unused_imports,
    unused_must_use,
    unused_mut,
    unused_parens,
    unused_variables
)]

/// Reconnection backoff policy
pub mod backoff;

/// Client-side error taxonomy
pub mod error;

/// The event stream handed to the application
pub mod events;

/// Persistence of unacknowledged messages
pub mod persist;

/// Client configuration
pub mod settings;

mod sub;

pub use crate::backoff::ReconnectPolicy;
pub use crate::error::ClientError;
pub use crate::events::{ClientEvent, FailReason, LostReason};
pub use crate::persist::{MemoryStore, SessionStore};
pub use crate::settings::ClientSettings;

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::mem;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use tether_engine::connection::{ConnectError, Connector, Handshake};
use tether_engine::delivery::Delivery;
use tether_engine::session::{Session, SessionEvent, SessionFault};
use tether_engine::transport::Transport;
use tether_protocol::{PacketId, QoS, SessionMode};

use crate::sub::Subscriptions;

enum ConnState<S: Read + Write> {
    /// No connection and none wanted
    Idle,

    /// Waiting out the delay before a connection attempt
    Backoff {
        resume_at: Instant,
        attempt: u32,
        carried: Delivery,
    },

    /// CONNECT sent, waiting for the CONNACK
    Handshaking {
        handshake: Handshake<S>,
        attempt: u32,
        carried: Delivery,
    },

    /// Connected and pumping packets
    Live(Session<S>),

    /// Given up; only a fresh `connect` leaves this state
    Failed,
}

/// An MQTT client over the given transport.
///
/// The client is a state machine pumped by `process`; requests queue work
/// and `process` moves it along, turning everything notable into events.
pub struct MqttClient<T: Transport> {
    transport: T,
    settings: ClientSettings,
    state: ConnState<T::Stream>,
    events: VecDeque<ClientEvent>,
    subscriptions: Subscriptions,
    store: Option<Box<dyn SessionStore>>,
}

impl<T: Transport> MqttClient<T> {
    pub fn new(transport: T, settings: ClientSettings) -> MqttClient<T> {
        MqttClient {
            transport,
            settings,
            state: ConnState::Idle,
            events: VecDeque::new(),
            subscriptions: Subscriptions::new(),
            store: None,
        }
    }

    /// Attaches durable storage for unacknowledged messages. In resume
    /// mode the stored messages are retransmitted on the next `connect`.
    pub fn with_store(mut self, store: Box<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// TRUE while a session is live
    pub fn is_connected(&self) -> bool {
        match self.state {
            ConnState::Live(_) => true,
            _ => false,
        }
    }

    /// The next pending event, if any
    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Requests a connection to the broker. The attempt itself is driven
    /// by `process`; success surfaces as a `Connected` event.
    ///
    /// # Errors
    /// `AlreadyConnected` unless the client is idle or has failed
    pub fn connect(&mut self, now: Instant) -> Result<(), ClientError> {
        match self.state {
            ConnState::Idle | ConnState::Failed => {}
            _ => return Err(ClientError::AlreadyConnected),
        }

        if self.settings.session == SessionMode::Clean {
            // a clean session starts from nothing on both sides
            self.subscriptions.clear_granted();
        }

        info!("Connecting as {}", self.settings.client_id);
        self.state = ConnState::Backoff {
            resume_at: now,
            attempt: 0,
            carried: self.reload_carried(),
        };
        Ok(())
    }

    /// Queues a message for publication. For QoS1/QoS2 the returned packet
    /// id correlates the eventual `DeliveryComplete` event.
    ///
    /// # Errors
    /// `NotConnected` without a live session; `PacketIdsExhausted`,
    /// `BufferFull` or `Oversized` when the message cannot be queued
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> Result<Option<PacketId>, ClientError> {
        let session = self.live_session()?;
        let publish = session.publish(topic, payload, qos, retain, now)?;
        if let Some(store) = &mut self.store {
            store.save(&publish);
        }
        Ok(publish.packet_id)
    }

    /// Queues a subscribe request; the broker's verdict arrives as one
    /// `SubscribeCompleted` event per filter
    ///
    /// # Errors
    /// `NotConnected` without a live session; `PacketIdsExhausted`,
    /// `BufferFull` or `Oversized` when the request cannot be queued
    pub fn subscribe(
        &mut self,
        topics: Vec<(String, QoS)>,
        now: Instant,
    ) -> Result<PacketId, ClientError> {
        let session = self.live_session()?;
        let packet_id = session.subscribe(topics.clone(), now)?;
        self.subscriptions.track_subscribe(packet_id, topics);
        Ok(packet_id)
    }

    /// Queues an unsubscribe request; acknowledged by one
    /// `UnsubscribeCompleted` event per filter
    ///
    /// # Errors
    /// `NotConnected` without a live session; `PacketIdsExhausted`,
    /// `BufferFull` or `Oversized` when the request cannot be queued
    pub fn unsubscribe(
        &mut self,
        topics: Vec<String>,
        now: Instant,
    ) -> Result<PacketId, ClientError> {
        let session = self.live_session()?;
        let packet_id = session.unsubscribe(topics.clone(), now)?;
        self.subscriptions.track_unsubscribe(packet_id, topics);
        Ok(packet_id)
    }

    /// Disconnects cleanly, sending DISCONNECT if a session is live. Also
    /// cancels a pending reconnect.
    ///
    /// # Errors
    /// `NotConnected` when there is nothing to disconnect
    pub fn disconnect(&mut self, now: Instant, budget: Duration) -> Result<(), ClientError> {
        match mem::replace(&mut self.state, ConnState::Idle) {
            ConnState::Idle => Err(ClientError::NotConnected),
            ConnState::Failed => Err(ClientError::NotConnected),
            ConnState::Live(session) => {
                session.disconnect(now, budget);
                self.events.push_back(ClientEvent::Disconnected);
                Ok(())
            }
            _pending => {
                // a pending attempt is simply abandoned
                self.events.push_back(ClientEvent::Disconnected);
                Ok(())
            }
        }
    }

    /// Pumps the client one step: waits out backoff, drives the
    /// handshake, or exchanges packets on the live session
    pub fn process(&mut self, now: Instant, budget: Duration) {
        let state = mem::replace(&mut self.state, ConnState::Idle);
        self.state = match state {
            ConnState::Idle => ConnState::Idle,
            ConnState::Failed => ConnState::Failed,
            ConnState::Backoff {
                resume_at,
                attempt,
                carried,
            } => {
                if now < resume_at {
                    ConnState::Backoff {
                        resume_at,
                        attempt,
                        carried,
                    }
                } else {
                    self.open_attempt(attempt, carried, now)
                }
            }
            ConnState::Handshaking {
                handshake,
                attempt,
                carried,
            } => self.drive_handshake(handshake, attempt, carried, now),
            ConnState::Live(session) => self.pump_session(session, now, budget),
        };
    }

    /// The delivery state a connection attempt starts from: empty for a
    /// clean session, rebuilt from the store when resuming
    fn reload_carried(&self) -> Delivery {
        let mut carried = Delivery::new();
        if self.settings.session == SessionMode::Resume {
            if let Some(store) = &self.store {
                for publish in store.load() {
                    carried.restore(publish);
                }
            }
        }
        carried
    }

    fn live_session(&mut self) -> Result<&mut Session<T::Stream>, ClientError> {
        match &mut self.state {
            ConnState::Live(session) => Ok(session),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn open_attempt(
        &mut self,
        attempt: u32,
        carried: Delivery,
        now: Instant,
    ) -> ConnState<T::Stream> {
        let stream = match self.transport.open() {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Transport open failed: {}", e);
                return self.schedule_retry(attempt, carried, now);
            }
        };

        let connector = Connector::new(stream).with_timeout(self.settings.connect_timeout);
        match connector.connect(self.settings.to_connect()) {
            Ok(handshake) => ConnState::Handshaking {
                handshake,
                attempt,
                carried,
            },
            Err(e) => {
                debug!("Could not queue CONNECT: {}", e);
                self.schedule_retry(attempt, carried, now)
            }
        }
    }

    fn drive_handshake(
        &mut self,
        handshake: Handshake<T::Stream>,
        attempt: u32,
        carried: Delivery,
        now: Instant,
    ) -> ConnState<T::Stream> {
        match handshake.complete() {
            Ok((connection, connack)) => {
                match Session::resume(connection, carried, self.settings.keepalive_secs, now) {
                    Ok(mut session) => {
                        info!("Connected, session present: {}", connack.session_present);
                        self.events.push_back(ClientEvent::Connected {
                            session_present: connack.session_present,
                        });
                        let replay = self.subscriptions.replay_set(connack.session_present);
                        if !replay.is_empty() {
                            debug!("Replaying {} subscriptions", replay.len());
                            match session.subscribe(replay.clone(), now) {
                                Ok(packet_id) => {
                                    self.subscriptions.track_subscribe(packet_id, replay);
                                }
                                Err(e) => warn!("Could not replay subscriptions: {}", e),
                            }
                        }
                        ConnState::Live(session)
                    }
                    Err(e) => {
                        // redeliveries that would not fit the fresh buffer
                        // are rebuilt from the store on the next attempt
                        warn!("Could not queue redeliveries: {}", e);
                        let carried = self.reload_carried();
                        self.schedule_retry(attempt, carried, now)
                    }
                }
            }
            Err(ConnectError::WouldBlock(pending)) => ConnState::Handshaking {
                handshake: pending,
                attempt,
                carried,
            },
            Err(ConnectError::Refused(code)) => {
                warn!("Broker refused the connection: {:?}", code);
                self.events
                    .push_back(ClientEvent::Failed(FailReason::Refused(code)));
                ConnState::Failed
            }
            Err(ConnectError::Violation) => {
                self.events
                    .push_back(ClientEvent::ConnectionLost(LostReason::Protocol));
                self.events
                    .push_back(ClientEvent::Failed(FailReason::Protocol));
                ConnState::Failed
            }
            Err(ConnectError::Malformed(e)) => {
                warn!("Malformed handshake packet: {}", e);
                self.events
                    .push_back(ClientEvent::ConnectionLost(LostReason::Protocol));
                self.events
                    .push_back(ClientEvent::Failed(FailReason::Protocol));
                ConnState::Failed
            }
            Err(ConnectError::Io(kind)) => {
                debug!("Handshake transport failure: {:?}", kind);
                self.schedule_retry(attempt, carried, now)
            }
        }
    }

    fn pump_session(
        &mut self,
        mut session: Session<T::Stream>,
        now: Instant,
        budget: Duration,
    ) -> ConnState<T::Stream> {
        match session.process(now, budget) {
            Ok(events) => {
                for event in events {
                    self.surface(event);
                }
                ConnState::Live(session)
            }
            Err(fault) => {
                warn!("Session died: {}", fault);
                self.subscriptions.clear_pending();
                let carried = match self.settings.session {
                    SessionMode::Resume => session.into_delivery(),
                    SessionMode::Clean => {
                        // a clean session leaves nothing for the next one
                        self.subscriptions.clear_granted();
                        Delivery::new()
                    }
                };
                match fault {
                    SessionFault::Transport(kind) => {
                        self.events
                            .push_back(ClientEvent::ConnectionLost(LostReason::Transport(kind)));
                        self.schedule_retry(0, carried, now)
                    }
                    SessionFault::KeepaliveTimeout => {
                        self.events
                            .push_back(ClientEvent::ConnectionLost(LostReason::KeepaliveTimeout));
                        self.schedule_retry(0, carried, now)
                    }
                    SessionFault::Malformed(_) | SessionFault::Violation(_) => {
                        self.events
                            .push_back(ClientEvent::ConnectionLost(LostReason::Protocol));
                        self.events
                            .push_back(ClientEvent::Failed(FailReason::Protocol));
                        ConnState::Failed
                    }
                }
            }
        }
    }

    fn schedule_retry(
        &mut self,
        failed_attempt: u32,
        carried: Delivery,
        now: Instant,
    ) -> ConnState<T::Stream> {
        let next = failed_attempt + 1;
        if !self.settings.reconnect.allows(next) {
            warn!("Reconnect attempts exhausted");
            self.events
                .push_back(ClientEvent::Failed(FailReason::RetriesExhausted));
            return ConnState::Failed;
        }

        let delay = self.settings.reconnect.delay_before(next);
        info!("Reconnect attempt {} in {:?}", next, delay);
        self.events
            .push_back(ClientEvent::Reconnecting {
                attempt: next,
                delay,
            });
        ConnState::Backoff {
            resume_at: now + delay,
            attempt: next,
            carried,
        }
    }

    fn surface(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::MessageArrived(publish) => {
                self.events.push_back(ClientEvent::Message(publish));
            }
            SessionEvent::DeliveryComplete(id) => {
                if let Some(store) = &mut self.store {
                    store.remove(id);
                }
                self.events.push_back(ClientEvent::DeliveryComplete(id));
            }
            SessionEvent::SubscribeAcknowledged {
                packet_id,
                return_codes,
            } => {
                for (filter, granted) in self.subscriptions.on_suback(packet_id, &return_codes) {
                    self.events
                        .push_back(ClientEvent::SubscribeCompleted { filter, granted });
                }
            }
            SessionEvent::UnsubscribeAcknowledged(id) => {
                for filter in self.subscriptions.on_unsuback(id) {
                    self.events
                        .push_back(ClientEvent::UnsubscribeCompleted { filter });
                }
            }
        }
    }
}
