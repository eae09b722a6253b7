use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::metrics::InternalMetrics;
use crate::topics::TopicManager;

/// Process-wide state shared by every session: configuration, the topic
/// manager with its retained-message store, and the internal counters.
pub struct ServiceState {
    pub config: ServiceConfig,
    pub topics: TopicManager,
    pub metrics: InternalMetrics,
}

impl ServiceState {
    pub fn new(config: ServiceConfig) -> Arc<Self> {
        let topics = TopicManager::new(config.maximum_qos);
        Arc::new(Self {
            config,
            topics,
            metrics: InternalMetrics::default(),
        })
    }
}
