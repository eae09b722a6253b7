use std::convert::TryInto;
use std::num::NonZeroU16;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::packet::SUBSCRIBE;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;
use crate::{DecodeError, EncodeError, Qos};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeFilter {
    pub path: ByteString,
    pub qos: Qos,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscribe {
    pub packet_id: NonZeroU16,
    pub filters: Vec<SubscribeFilter>,
}

impl Subscribe {
    pub(crate) fn decode(mut data: Bytes, flags: u8) -> Result<Self, DecodeError> {
        ensure!(flags == 0b0010, DecodeError::MalformedPacket);

        let packet_id = data
            .read_u16()?
            .try_into()
            .map_err(|_| DecodeError::InvalidPacketId)?;

        let mut filters = Vec::new();
        while data.has_remaining() {
            let path = data.read_string()?;
            let n_qos = data.read_u8()?;
            ensure!(n_qos & !0b11 == 0, DecodeError::MalformedPacket);
            let qos: Qos = n_qos
                .try_into()
                .map_err(|_| DecodeError::InvalidQOS(n_qos))?;
            filters.push(SubscribeFilter { path, qos });
        }

        // A SUBSCRIBE with no topic filters is a protocol violation [MQTT-3.8.3-3].
        ensure!(!filters.is_empty(), DecodeError::MalformedPacket);

        Ok(Self { packet_id, filters })
    }

    #[inline]
    fn payload_length(&self) -> usize {
        self.filters
            .iter()
            .map(|filter| 2 + filter.path.len() + 1)
            .sum()
    }

    pub(crate) fn encode(&self, data: &mut BytesMut, max_size: usize) -> Result<(), EncodeError> {
        data.put_u8((SUBSCRIBE << 4) | 0b0010);

        let size = 2 + self.payload_length();
        ensure!(size < max_size, EncodeError::PacketTooLarge);
        data.write_remaining_length(size)?;

        data.put_u16(self.packet_id.get());

        for filter in &self.filters {
            data.write_string(&filter.path)?;
            data.put_u8(filter.qos.into());
        }

        Ok(())
    }
}
