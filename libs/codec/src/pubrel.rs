use std::convert::TryInto;
use std::num::NonZeroU16;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::PUBREL;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;
use crate::{DecodeError, EncodeError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PubRel {
    pub packet_id: NonZeroU16,
}

impl PubRel {
    pub(crate) fn decode(mut data: Bytes, flags: u8) -> Result<Self, DecodeError> {
        ensure!(flags == 0b0010, DecodeError::MalformedPacket);

        let packet_id = data
            .read_u16()?
            .try_into()
            .map_err(|_| DecodeError::InvalidPacketId)?;
        Ok(Self { packet_id })
    }

    pub(crate) fn encode(&self, data: &mut BytesMut, max_size: usize) -> Result<(), EncodeError> {
        data.put_u8((PUBREL << 4) | 0b0010);

        ensure!(max_size > 2, EncodeError::PacketTooLarge);
        data.write_remaining_length(2)?;

        data.put_u16(self.packet_id.get());
        Ok(())
    }
}
