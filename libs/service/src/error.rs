use codec::{DecodeError, EncodeError, PacketKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Not enough buffered bytes to peek a frame; wait for more input.
    #[error("short read")]
    ShortRead,

    #[error("malformed remaining length")]
    MalformedLength,

    #[error("decode packet: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode packet: {0}")]
    Encode(#[from] EncodeError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("duplicate packet id: {0}")]
    DuplicatePacketId(u16),

    #[error("no such packet id: {0}")]
    NoSuchPacketId(u16),

    #[error("ack {ack:?} does not follow {state:?}")]
    BadAckType { state: PacketKind, ack: PacketKind },

    #[error("write failed")]
    WriteFailed,

    #[error("subscriber error: {0}")]
    SubscriberError(String),

    #[error("invalid subscriber")]
    InvalidSubscriber,

    /// Clean termination requested by the peer; not a failure.
    #[error("peer disconnect")]
    PeerDisconnect,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
