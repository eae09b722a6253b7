use codec::Qos;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Largest inbound or outbound frame the session accepts.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Ceiling applied to the QoS granted on subscribe.
    #[serde(default = "default_maximum_qos")]
    pub maximum_qos: Qos,

    /// Process already-buffered frames before honoring a stop signal.
    #[serde(default)]
    pub drain_on_shutdown: bool,
}

fn default_max_packet_size() -> usize {
    1024 * 1024
}

fn default_maximum_qos() -> Qos {
    Qos::ExactlyOnce
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_packet_size: default_max_packet_size(),
            maximum_qos: default_maximum_qos(),
            drain_on_shutdown: false,
        }
    }
}
