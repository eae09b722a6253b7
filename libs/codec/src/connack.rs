use std::convert::TryInto;

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::CONNACK;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;
use crate::{DecodeError, EncodeError};

const SESSION_PRESENT: u8 = 0b0001;

#[derive(
    Debug, Clone, Copy, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAck {
    pub(crate) fn decode(mut data: Bytes) -> Result<Self, DecodeError> {
        let flags = data.read_u8()?;
        ensure!(flags & !SESSION_PRESENT == 0, DecodeError::MalformedPacket);

        let n_return_code = data.read_u8()?;
        let return_code = n_return_code
            .try_into()
            .map_err(|_| DecodeError::InvalidConnectReturnCode(n_return_code))?;

        Ok(Self {
            session_present: flags & SESSION_PRESENT > 0,
            return_code,
        })
    }

    pub(crate) fn encode(&self, data: &mut BytesMut, max_size: usize) -> Result<(), EncodeError> {
        data.put_u8(CONNACK << 4);

        ensure!(max_size > 2, EncodeError::PacketTooLarge);
        data.write_remaining_length(2)?;

        data.put_u8(if self.session_present {
            SESSION_PRESENT
        } else {
            0
        });
        data.put_u8(self.return_code.into());
        Ok(())
    }
}
