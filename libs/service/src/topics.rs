use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use codec::{Publish, Qos};
use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::error::Error;
use crate::filter::TopicFilter;
use crate::filter_tree::FilterTree;
use crate::message::Message;

/// Receives application messages fanned out to a subscriber.
pub trait PublishSink: Send + Sync {
    fn deliver(&self, publish: &Publish) -> Result<(), Error>;
}

/// Stable identity token for a subscriber: an id issued by the manager plus
/// a weak reference to the subscriber's delivery sink. Never a raw pointer;
/// a handle whose sink is gone no longer carries the publish capability.
pub struct SubscriberHandle {
    id: u64,
    sink: Weak<dyn PublishSink>,
}

impl SubscriberHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct SubEntry {
    qos: Qos,
    sink: Weak<dyn PublishSink>,
}

/// Process-wide subscription registry and retained-message store, shared by
/// every session.
pub struct TopicManager {
    maximum_qos: Qos,
    next_subscriber_id: AtomicU64,
    tree: RwLock<FilterTree<SubEntry>>,
}

impl TopicManager {
    pub fn new(maximum_qos: Qos) -> Self {
        Self {
            maximum_qos,
            next_subscriber_id: AtomicU64::new(1),
            tree: RwLock::new(FilterTree::default()),
        }
    }

    /// Issue an identity token for a subscriber sink.
    pub fn handle(&self, sink: Weak<dyn PublishSink>) -> SubscriberHandle {
        SubscriberHandle {
            id: self.next_subscriber_id.fetch_add(1, Ordering::Relaxed),
            sink,
        }
    }

    /// Register a subscription; returns the granted QoS.
    pub fn subscribe(
        &self,
        filter: &TopicFilter,
        qos: Qos,
        subscriber: &SubscriberHandle,
    ) -> Result<Qos, Error> {
        if subscriber.sink.upgrade().is_none() {
            return Err(Error::SubscriberError("subscriber sink is gone".into()));
        }

        let granted = qos.min(self.maximum_qos);
        self.tree.write().insert(
            filter.path(),
            subscriber.id,
            SubEntry {
                qos: granted,
                sink: subscriber.sink.clone(),
            },
        );
        Ok(granted)
    }

    /// Returns whether a subscription existed.
    pub fn unsubscribe(&self, filter: &TopicFilter, subscriber: &SubscriberHandle) -> bool {
        self.tree
            .write()
            .remove(filter.path(), subscriber.id)
            .is_some()
    }

    /// Collect the sinks subscribed to `topic`, each with its delivery QoS
    /// downgraded to `min(publish_qos, granted_qos)`. Overlapping filters
    /// for one subscriber collapse to the maximum granted QoS.
    pub fn subscribers(
        &self,
        topic: &str,
        publish_qos: Qos,
        out: &mut Vec<(Weak<dyn PublishSink>, Qos)>,
    ) {
        let tree = self.tree.read();
        let mut seen: FnvHashMap<u64, usize> = FnvHashMap::default();

        for (&id, entry) in tree.matches(topic) {
            match seen.get(&id) {
                Some(&at) => {
                    let qos = &mut out[at].1;
                    *qos = (*qos).max(entry.qos);
                }
                None => {
                    seen.insert(id, out.len());
                    out.push((entry.sink.clone(), entry.qos));
                }
            }
        }

        for (_, qos) in out.iter_mut() {
            *qos = (*qos).min(publish_qos);
        }
    }

    /// Update the retained message for the publish's topic: an empty
    /// payload deletes, a non-empty one replaces.
    pub fn retain(&self, publish: &Publish) {
        let mut tree = self.tree.write();
        if publish.payload.is_empty() {
            tree.set_retained_message(&publish.topic, None);
        } else {
            tree.set_retained_message(&publish.topic, Some(Message::from_publish(publish)));
        }
    }

    /// Collect the retained messages matching a filter.
    pub fn retained(&self, filter: &TopicFilter, out: &mut Vec<Message>) {
        let tree = self.tree.read();
        out.extend(
            tree.matches_retained_messages(filter.path())
                .into_iter()
                .cloned(),
        );
    }

    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.tree.read().subscriber_count()
    }

    #[inline]
    pub fn retained_messages_count(&self) -> usize {
        self.tree.read().retained_messages_count()
    }
}
