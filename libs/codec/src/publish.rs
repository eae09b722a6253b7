use std::convert::TryInto;
use std::num::NonZeroU16;

use bytes::{BufMut, Bytes, BytesMut};
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::packet::PUBLISH;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;
use crate::{DecodeError, EncodeError, Qos};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publish {
    #[serde(default)]
    pub dup: bool,
    pub qos: Qos,
    #[serde(default)]
    pub retain: bool,
    pub topic: ByteString,
    pub packet_id: Option<NonZeroU16>,
    #[serde(default)]
    pub payload: Bytes,
}

impl Publish {
    pub(crate) fn decode(mut data: Bytes, flags: u8) -> Result<Self, DecodeError> {
        let dup = flags & 0b1000 > 0;
        let qos: Qos = {
            let n_qos = (flags & 0b110) >> 1;
            n_qos
                .try_into()
                .map_err(|_| DecodeError::InvalidQOS(n_qos))?
        };
        let retain = flags & 0b1 > 0;
        let topic = data.read_string()?;
        let packet_id = if qos != Qos::AtMostOnce {
            Some(
                data.read_u16()?
                    .try_into()
                    .map_err(|_| DecodeError::InvalidPacketId)?,
            )
        } else {
            None
        };

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload: data,
        })
    }

    #[inline]
    fn variable_header_length(&self) -> usize {
        2 + self.topic.len() + if self.qos != Qos::AtMostOnce { 2 } else { 0 }
    }

    pub(crate) fn encode(&self, data: &mut BytesMut, max_size: usize) -> Result<(), EncodeError> {
        ensure!(
            self.qos == Qos::AtMostOnce || self.packet_id.is_some(),
            EncodeError::RequirePacketId
        );

        let flag = {
            let mut flag = 0;
            if self.dup {
                flag |= 0b1000;
            }
            let n: u8 = self.qos.into();
            flag |= n << 1;
            if self.retain {
                flag |= 0b1;
            }
            flag
        };

        data.put_u8((PUBLISH << 4) | flag);

        let size = self.variable_header_length() + self.payload.len();
        ensure!(size < max_size, EncodeError::PacketTooLarge);
        data.write_remaining_length(size)?;

        data.write_string(&self.topic)?;

        if let Some(packet_id) = self.packet_id {
            data.put_u16(packet_id.get());
        }

        data.put_slice(&self.payload);
        Ok(())
    }
}
