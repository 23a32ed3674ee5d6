use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use tether_protocol::{PacketId, QoS, SubscribeReturnCode};

/// The client's subscription table: filters granted by the broker plus
/// requests whose acknowledgement is still outstanding.
///
/// Granted filters survive reconnects; when the broker comes back without
/// the old session the whole table is replayed in one SUBSCRIBE. Pending
/// requests die with the connection that carried them.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    granted: BTreeMap<String, QoS>,
    pending_sub: HashMap<PacketId, Vec<(String, QoS)>>,
    pending_unsub: HashMap<PacketId, Vec<String>>,
}

impl Subscriptions {
    pub fn new() -> Subscriptions {
        Subscriptions::default()
    }

    /// Records an in-flight SUBSCRIBE request
    pub fn track_subscribe(&mut self, packet_id: PacketId, topics: Vec<(String, QoS)>) {
        self.pending_sub.insert(packet_id, topics);
    }

    /// Records an in-flight UNSUBSCRIBE request
    pub fn track_unsubscribe(&mut self, packet_id: PacketId, topics: Vec<String>) {
        self.pending_unsub.insert(packet_id, topics);
    }

    /// Resolves a SUBACK against its request, returning each filter with
    /// the QoS the broker granted (None for a refused filter)
    pub fn on_suback(
        &mut self,
        packet_id: PacketId,
        return_codes: &[SubscribeReturnCode],
    ) -> Vec<(String, Option<QoS>)> {
        let requested = match self.pending_sub.remove(&packet_id) {
            Some(requested) => requested,
            None => {
                warn!("SUBACK for unknown packet id {}", packet_id);
                return Vec::new();
            }
        };
        if requested.len() != return_codes.len() {
            warn!(
                "SUBACK carries {} return codes for {} filters",
                return_codes.len(),
                requested.len()
            );
        }

        requested
            .into_iter()
            .zip(return_codes.iter())
            .map(|((filter, _requested_qos), code)| match code {
                SubscribeReturnCode::Granted(qos) => {
                    debug!("Subscribed to {} at {}", filter, qos);
                    self.granted.insert(filter.clone(), *qos);
                    (filter, Some(*qos))
                }
                SubscribeReturnCode::Failure => {
                    warn!("Broker refused subscription to {}", filter);
                    (filter, None)
                }
            })
            .collect()
    }

    /// Resolves an UNSUBACK against its request, returning the dropped
    /// filters
    pub fn on_unsuback(&mut self, packet_id: PacketId) -> Vec<String> {
        let topics = match self.pending_unsub.remove(&packet_id) {
            Some(topics) => topics,
            None => {
                warn!("UNSUBACK for unknown packet id {}", packet_id);
                return Vec::new();
            }
        };
        for filter in &topics {
            self.granted.remove(filter);
        }
        topics
    }

    /// The filters to re-request on a fresh broker session. Empty when the
    /// broker resumed the old session (it still holds them).
    pub fn replay_set(&self, session_present: bool) -> Vec<(String, QoS)> {
        if session_present {
            return Vec::new();
        }
        self.granted
            .iter()
            .map(|(filter, qos)| (filter.clone(), *qos))
            .collect()
    }

    /// Drops in-flight requests whose acknowledgements died with the
    /// connection
    pub fn clear_pending(&mut self) {
        self.pending_sub.clear();
        self.pending_unsub.clear();
    }

    /// Drops the granted table; clean sessions never replay it
    pub fn clear_granted(&mut self) {
        self.granted.clear();
    }
}
