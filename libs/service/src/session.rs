use std::num::NonZeroU16;
use std::sync::atomic::{AtomicBool, Ordering};

use bytestring::ByteString;
use codec::{PacketIdAllocator, Qos};
use fnv::FnvHashMap;
use parking_lot::Mutex;

use crate::ack_queue::{AckQueue, AckRole};

/// Per-connection session state: the six in-flight ack queues, the
/// subscribed-topic set, the will flag and the outbound packet-id
/// allocator. Lives from CONNECT to DISCONNECT or connection drop.
pub struct Session {
    client_id: ByteString,
    pub pub1ack: AckQueue,
    pub pub2in: AckQueue,
    pub pub2out: AckQueue,
    pub suback: AckQueue,
    pub unsuback: AckQueue,
    pub pingack: AckQueue,
    topics: Mutex<FnvHashMap<ByteString, Qos>>,
    will_flag: AtomicBool,
    packet_ids: Mutex<PacketIdAllocator>,
}

impl Session {
    pub fn new(client_id: impl Into<ByteString>, will_flag: bool) -> Self {
        Self {
            client_id: client_id.into(),
            pub1ack: AckQueue::new(AckRole::PublishQos1),
            pub2in: AckQueue::new(AckRole::PublishQos2In),
            pub2out: AckQueue::new(AckRole::PublishQos2Out),
            suback: AckQueue::new(AckRole::Subscribe),
            unsuback: AckQueue::new(AckRole::Unsubscribe),
            pingack: AckQueue::new(AckRole::Ping),
            topics: Mutex::new(FnvHashMap::default()),
            will_flag: AtomicBool::new(will_flag),
            packet_ids: Mutex::new(PacketIdAllocator::default()),
        }
    }

    #[inline]
    pub fn client_id(&self) -> &ByteString {
        &self.client_id
    }

    pub fn add_topic(&self, path: impl Into<ByteString>, qos: Qos) {
        self.topics.lock().insert(path.into(), qos);
    }

    pub fn remove_topic(&self, path: &str) -> Option<Qos> {
        self.topics.lock().remove(path)
    }

    pub fn has_topic(&self, path: &str) -> bool {
        self.topics.lock().contains_key(path)
    }

    pub fn topics(&self) -> Vec<(ByteString, Qos)> {
        self.topics
            .lock()
            .iter()
            .map(|(path, &qos)| (path.clone(), qos))
            .collect()
    }

    #[inline]
    pub fn will_flag(&self) -> bool {
        self.will_flag.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clear_will(&self) {
        self.will_flag.store(false, Ordering::Release);
    }

    #[inline]
    pub fn take_packet_id(&self) -> NonZeroU16 {
        self.packet_ids.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let session = Session::new("client-a", false);
        session.add_topic("a/b", Qos::AtLeastOnce);
        assert!(session.has_topic("a/b"));
        assert_eq!(session.remove_topic("a/b"), Some(Qos::AtLeastOnce));
        assert!(!session.has_topic("a/b"));
        assert_eq!(session.remove_topic("a/b"), None);
    }

    #[test]
    fn test_will_flag() {
        let session = Session::new("client-a", true);
        assert!(session.will_flag());
        session.clear_will();
        assert!(!session.will_flag());
    }

    #[test]
    fn test_packet_ids() {
        let session = Session::new("client-a", false);
        assert_eq!(session.take_packet_id().get(), 1);
        assert_eq!(session.take_packet_id().get(), 2);
    }
}
