#![forbid(unsafe_code)]
#![warn(clippy::default_trait_access)]

mod ack_queue;
mod config;
mod error;
mod filter;
mod filter_tree;
mod frame;
mod message;
mod metrics;
mod outbound;
mod processor;
mod session;
mod state;
mod topics;

pub use ack_queue::{AckQueue, AckRole, OnCompleteFn, PendingAck};
pub use codec;
pub use config::ServiceConfig;
pub use error::Error;
pub use filter::TopicFilter;
pub use frame::FrameReader;
pub use message::Message;
pub use metrics::{InternalMetrics, Metrics};
pub use outbound::{channel, writer_loop, PacketSender, SessionSink};
pub use processor::{session_loop, Processor, ProcessorGates};
pub use session::Session;
pub use state::ServiceState;
pub use topics::{PublishSink, SubscriberHandle, TopicManager};
