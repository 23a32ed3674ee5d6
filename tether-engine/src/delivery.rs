use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::fmt::Display;

use log::{debug, trace, warn};
use tether_protocol::{Packet, PacketId, Publish, QoS};

/// A delivery-tracking failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// All 65535 packet identifiers are in flight
    PacketIdsExhausted,

    /// An acknowledgement arrived for an id with no matching in-flight
    /// message
    UnknownPacketId(PacketId),
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::PacketIdsExhausted => write!(f, "No free packet identifiers"),
            DeliveryError::UnknownPacketId(id) => {
                write!(f, "No in-flight message with packet id {}", id)
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Where an outbound QoS1/QoS2 message stands in its acknowledgement
/// exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundStage {
    /// QoS1: PUBLISH sent, waiting for PUBACK
    AwaitingPuback,

    /// QoS2: PUBLISH sent, waiting for PUBREC
    AwaitingPubrec,

    /// QoS2: PUBREL sent, waiting for PUBCOMP
    AwaitingPubcomp,
}

#[derive(Debug)]
struct InFlight {
    publish: Publish,
    stage: OutboundStage,
}

/// Tracks QoS1/QoS2 message exchanges in both directions.
///
/// Outbound messages hold their packet id from PUBLISH until the final
/// acknowledgement; the id is only then free for reuse. Packet ids for
/// SUBSCRIBE and UNSUBSCRIBE come from the same space and are reserved
/// here too. Inbound QoS2 publishes are remembered until PUBREL so that
/// broker retransmissions are acknowledged without being delivered twice.
#[derive(Debug, Default)]
pub struct Delivery {
    outbound: VecDeque<InFlight>,
    control_ids: BTreeSet<u16>,
    inbound_qos2: BTreeSet<u16>,
}

impl Delivery {
    pub fn new() -> Delivery {
        Delivery::default()
    }

    /// The number of outbound messages awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.outbound.len()
    }

    /// TRUE when no outbound message or control packet awaits an
    /// acknowledgement
    pub fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.control_ids.is_empty()
    }

    /// Registers a new outbound message and returns the PUBLISH to send.
    /// QoS1/QoS2 messages get the smallest free packet id and are tracked
    /// until acknowledged; QoS0 messages pass through untracked.
    ///
    /// # Errors
    /// `PacketIdsExhausted` when no packet id is free. Only this message
    /// fails; in-flight messages are unaffected.
    pub fn begin_publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<Publish, DeliveryError> {
        let mut publish = Publish::new(topic, payload);
        publish.qos = qos;
        publish.retain = retain;

        if qos == QoS::AtMostOnce {
            return Ok(publish);
        }

        let id = self.allocate_id().ok_or(DeliveryError::PacketIdsExhausted)?;
        publish.packet_id = Some(id);
        debug!("Tracking outbound {} message with packet id {}", qos, id);

        let stage = match qos {
            QoS::AtLeastOnce => OutboundStage::AwaitingPuback,
            _ => OutboundStage::AwaitingPubrec,
        };
        self.outbound.push_back(InFlight {
            publish: publish.clone(),
            stage,
        });
        Ok(publish)
    }

    /// Re-registers a message restored from persistence, keeping its
    /// original packet id. Restored messages are retransmitted by
    /// `redelivery_queue` with the dup flag set.
    pub fn restore(&mut self, publish: Publish) {
        let stage = match publish.qos {
            QoS::AtMostOnce => return,
            QoS::AtLeastOnce => OutboundStage::AwaitingPuback,
            QoS::ExactlyOnce => OutboundStage::AwaitingPubrec,
        };
        trace!("Restoring in-flight message {:?}", publish.packet_id);
        self.outbound.push_back(InFlight { publish, stage });
    }

    /// Completes a QoS1 exchange, freeing the packet id
    ///
    /// # Errors
    /// `UnknownPacketId` if no QoS1 message with this id is in flight
    pub fn on_puback(&mut self, id: PacketId) -> Result<(), DeliveryError> {
        let pos = self
            .outbound
            .iter()
            .position(|f| {
                f.stage == OutboundStage::AwaitingPuback && f.publish.packet_id == Some(id)
            })
            .ok_or(DeliveryError::UnknownPacketId(id))?;
        self.outbound.remove(pos);
        debug!("PUBACK completed delivery of packet id {}", id);
        Ok(())
    }

    /// Advances a QoS2 exchange past PUBREC and returns the PUBREL to
    /// send. A repeated PUBREC for the same id yields the same PUBREL.
    ///
    /// # Errors
    /// `UnknownPacketId` if no QoS2 message with this id is in flight
    pub fn on_pubrec(&mut self, id: PacketId) -> Result<Packet, DeliveryError> {
        let flight = self
            .outbound
            .iter_mut()
            .find(|f| {
                (f.stage == OutboundStage::AwaitingPubrec
                    || f.stage == OutboundStage::AwaitingPubcomp)
                    && f.publish.packet_id == Some(id)
            })
            .ok_or(DeliveryError::UnknownPacketId(id))?;
        flight.stage = OutboundStage::AwaitingPubcomp;
        debug!("PUBREC received for packet id {}, releasing", id);
        Ok(Packet::Pubrel(id))
    }

    /// Completes a QoS2 exchange, freeing the packet id
    ///
    /// # Errors
    /// `UnknownPacketId` if no released QoS2 message with this id is in
    /// flight
    pub fn on_pubcomp(&mut self, id: PacketId) -> Result<(), DeliveryError> {
        let pos = self
            .outbound
            .iter()
            .position(|f| {
                f.stage == OutboundStage::AwaitingPubcomp && f.publish.packet_id == Some(id)
            })
            .ok_or(DeliveryError::UnknownPacketId(id))?;
        self.outbound.remove(pos);
        debug!("PUBCOMP completed delivery of packet id {}", id);
        Ok(())
    }

    /// Handles an inbound PUBLISH. Returns the message to hand to the
    /// application (None when it is a suppressed QoS2 duplicate) and the
    /// acknowledgement to send back (None for QoS0).
    pub fn on_inbound_publish(&mut self, publish: Publish) -> (Option<Publish>, Option<Packet>) {
        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => (Some(publish), None),
            (QoS::AtLeastOnce, Some(id)) => (Some(publish), Some(Packet::Puback(id))),
            (QoS::ExactlyOnce, Some(id)) => {
                if self.inbound_qos2.insert(id.value()) {
                    (Some(publish), Some(Packet::Pubrec(id)))
                } else {
                    warn!("Suppressing duplicate QoS2 message with packet id {}", id);
                    (None, Some(Packet::Pubrec(id)))
                }
            }
            // the decoder guarantees an id for QoS1/QoS2
            _ => (None, None),
        }
    }

    /// Handles an inbound PUBREL, closing the QoS2 receive guard for the
    /// id. Always answers with PUBCOMP.
    pub fn on_pubrel(&mut self, id: PacketId) -> Packet {
        if !self.inbound_qos2.remove(&id.value()) {
            trace!("PUBREL for unguarded packet id {}", id);
        }
        Packet::Pubcomp(id)
    }

    /// The packets to retransmit after a session resumes, in the original
    /// send order. PUBLISHes carry the dup flag; exchanges past PUBREC
    /// resume with their PUBREL.
    pub fn redelivery_queue(&self) -> Vec<Packet> {
        self.outbound
            .iter()
            .map(|f| match f.stage {
                OutboundStage::AwaitingPubcomp => {
                    // the decoder guarantees tracked publishes carry an id
                    Packet::Pubrel(f.publish.packet_id.unwrap_or_else(|| PacketId::from(0)))
                }
                _ => {
                    let mut publish = f.publish.clone();
                    publish.dup = true;
                    Packet::Publish(publish)
                }
            })
            .collect()
    }

    /// Reserves a packet id for a SUBSCRIBE or UNSUBSCRIBE exchange
    ///
    /// # Errors
    /// `PacketIdsExhausted` when no packet id is free
    pub fn reserve_control_id(&mut self) -> Result<PacketId, DeliveryError> {
        let id = self.allocate_id().ok_or(DeliveryError::PacketIdsExhausted)?;
        self.control_ids.insert(id.value());
        Ok(id)
    }

    /// Frees a reserved control packet id once its acknowledgement arrives
    ///
    /// # Errors
    /// `UnknownPacketId` if the id was not reserved
    pub fn release_control_id(&mut self, id: PacketId) -> Result<(), DeliveryError> {
        if self.control_ids.remove(&id.value()) {
            Ok(())
        } else {
            Err(DeliveryError::UnknownPacketId(id))
        }
    }

    /// Drops all delivery state, for a clean-session connect
    pub fn reset(&mut self) {
        self.outbound.clear();
        self.control_ids.clear();
        self.inbound_qos2.clear();
    }

    fn allocate_id(&self) -> Option<PacketId> {
        (1..=u16::max_value())
            .find(|id| !self.id_in_use(*id))
            .map(PacketId::from)
    }

    fn id_in_use(&self, id: u16) -> bool {
        self.control_ids.contains(&id)
            || self
                .outbound
                .iter()
                .any(|f| f.publish.packet_id == Some(PacketId::from(id)))
    }
}
