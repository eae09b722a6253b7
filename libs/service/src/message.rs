use bytes::Bytes;
use bytestring::ByteString;
use codec::{Publish, Qos};
use serde::{Deserialize, Serialize};

/// Broker-internal form of an application message, as held by the
/// retained-message store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    topic: ByteString,
    qos: Qos,
    payload: Bytes,
    retain: bool,
}

impl Message {
    #[inline]
    pub fn new(topic: impl Into<ByteString>, qos: Qos, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload: payload.into(),
            retain: false,
        }
    }

    #[inline]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[inline]
    pub fn topic(&self) -> &ByteString {
        &self.topic
    }

    #[inline]
    pub fn qos(&self) -> Qos {
        self.qos
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn is_retain(&self) -> bool {
        self.retain
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    pub fn from_publish(publish: &Publish) -> Self {
        Self::new(publish.topic.clone(), publish.qos, publish.payload.clone())
            .with_retain(publish.retain)
    }

    #[inline]
    pub fn to_publish(&self) -> Publish {
        Publish {
            dup: false,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
            packet_id: None,
            payload: self.payload.clone(),
        }
    }
}
