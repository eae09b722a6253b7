#![forbid(unsafe_code)]
#![warn(clippy::default_trait_access)]

#[macro_use]
mod macros;
mod connack;
mod connect;
mod error;
mod packet;
mod packet_id_allocator;
mod puback;
mod pubcomp;
mod publish;
mod pubrec;
mod pubrel;
mod reader;
mod suback;
mod subscribe;
mod types;
mod unsuback;
mod unsubscribe;
mod writer;

pub use connack::{ConnAck, ConnectReturnCode};
pub use connect::{Connect, LastWill};
pub use error::{DecodeError, EncodeError};
pub use packet::{Packet, PacketKind};
pub use packet_id_allocator::PacketIdAllocator;
pub use puback::PubAck;
pub use pubcomp::PubComp;
pub use publish::Publish;
pub use pubrec::PubRec;
pub use pubrel::PubRel;
pub use suback::{SubAck, SubscribeReturnCode};
pub use subscribe::{Subscribe, SubscribeFilter};
pub use types::{Login, Qos};
pub use unsuback::UnsubAck;
pub use unsubscribe::Unsubscribe;
