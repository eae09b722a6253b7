use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct InternalMetrics {
    bytes_received: AtomicUsize,
    bytes_sent: AtomicUsize,
    msgs_received: AtomicUsize,
    msgs_sent: AtomicUsize,
    pub_msgs_received: AtomicUsize,
    pub_msgs_sent: AtomicUsize,
}

#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub bytes_received: usize,
    pub bytes_sent: usize,
    pub msgs_received: usize,
    pub msgs_sent: usize,
    pub pub_msgs_received: usize,
    pub pub_msgs_sent: usize,
}

impl InternalMetrics {
    #[inline]
    pub fn inc_bytes_received(&self, value: usize) {
        self.bytes_received.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_bytes_sent(&self, value: usize) {
        self.bytes_sent.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_msgs_received(&self, value: usize) {
        self.msgs_received.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_msgs_sent(&self, value: usize) {
        self.msgs_sent.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_pub_msgs_received(&self, value: usize) {
        self.pub_msgs_received.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_pub_msgs_sent(&self, value: usize) {
        self.pub_msgs_sent.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Metrics {
        Metrics {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            msgs_received: self.msgs_received.load(Ordering::Relaxed),
            msgs_sent: self.msgs_sent.load(Ordering::Relaxed),
            pub_msgs_received: self.pub_msgs_received.load(Ordering::Relaxed),
            pub_msgs_sent: self.pub_msgs_sent.load(Ordering::Relaxed),
        }
    }
}
