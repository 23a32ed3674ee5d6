use tether_protocol::{PacketId, Publish, QoS};

/// Durable storage for unacknowledged outbound messages.
///
/// When a client connects in resume mode it reloads the stored messages
/// and retransmits them with the dup flag set, so QoS1/QoS2 guarantees
/// survive a process restart. Messages are removed once their
/// acknowledgement exchange completes.
pub trait SessionStore {
    /// Records an unacknowledged outbound message
    fn save(&mut self, publish: &Publish);

    /// Drops the message once its exchange completes
    fn remove(&mut self, packet_id: PacketId);

    /// The stored messages, in original send order
    fn load(&self) -> Vec<Publish>;
}

/// An in-process store; survives reconnects but not restarts
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Vec<Publish>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn save(&mut self, publish: &Publish) {
        if publish.qos == QoS::AtMostOnce {
            return;
        }
        self.messages.push(publish.clone());
    }

    fn remove(&mut self, packet_id: PacketId) {
        self.messages
            .retain(|m| m.packet_id != Some(packet_id));
    }

    fn load(&self) -> Vec<Publish> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_keeps_only_unacknowledged_messages() {
        let mut sut = MemoryStore::new();
        let mut first = Publish::new("a", vec![1]);
        first.qos = QoS::AtLeastOnce;
        first.packet_id = Some(PacketId::from(1));
        let mut second = Publish::new("b", vec![2]);
        second.qos = QoS::ExactlyOnce;
        second.packet_id = Some(PacketId::from(2));

        sut.save(&first);
        sut.save(&second);
        sut.remove(PacketId::from(1));

        assert_eq!(sut.load(), vec![second]);
    }

    #[test]
    fn test_qos0_messages_are_not_stored() {
        let mut sut = MemoryStore::new();
        sut.save(&Publish::new("a", vec![1]));
        assert!(sut.is_empty());
    }
}
