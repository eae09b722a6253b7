use std::convert::TryInto;

use bytes::{BufMut, Bytes, BytesMut};
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::packet::CONNECT;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;
use crate::{DecodeError, EncodeError, Login, Qos};

const CF_USERNAME: u8 = 0b10000000;
const CF_PASSWORD: u8 = 0b01000000;
const CF_WILL_RETAIN: u8 = 0b00100000;
const CF_WILL_QOS: u8 = 0b00011000;
const CF_WILL: u8 = 0b00000100;
const CF_CLEAN_SESSION: u8 = 0b00000010;
const CF_RESERVED: u8 = 0b00000001;

const QOS_SHIFT: u8 = 3;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastWill {
    pub topic: ByteString,
    #[serde(default)]
    pub payload: Bytes,
    pub qos: Qos,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connect {
    #[serde(default)]
    pub clean_session: bool,
    #[serde(default)]
    pub keep_alive: u16,
    pub client_id: ByteString,
    pub last_will: Option<LastWill>,
    pub login: Option<Login>,
}

impl Connect {
    pub(crate) fn decode(mut data: Bytes) -> Result<Self, DecodeError> {
        let protocol = data.read_string()?;
        ensure!(
            protocol == PROTOCOL_NAME,
            DecodeError::InvalidProtocol(protocol)
        );

        let level = data.read_u8()?;
        ensure!(
            level == PROTOCOL_LEVEL,
            DecodeError::UnsupportedProtocolLevel(level)
        );

        let flags = data.read_u8()?;
        ensure!(flags & CF_RESERVED == 0, DecodeError::InvalidConnectFlags);

        let keep_alive = data.read_u16()?;
        let client_id = data.read_string()?;

        let last_will = if flags & CF_WILL > 0 {
            let topic = data.read_string()?;
            let payload = data.read_binary()?;
            let n_qos = (flags & CF_WILL_QOS) >> QOS_SHIFT;
            let qos: Qos = n_qos.try_into().map_err(|_| DecodeError::InvalidQOS(n_qos))?;
            Some(LastWill {
                topic,
                payload,
                qos,
                retain: flags & CF_WILL_RETAIN > 0,
            })
        } else {
            // With the will flag unset, the will QoS and retain bits must be zero.
            ensure!(
                flags & (CF_WILL_QOS | CF_WILL_RETAIN) == 0,
                DecodeError::InvalidConnectFlags
            );
            None
        };

        let login = if flags & CF_USERNAME > 0 {
            let username = data.read_string()?;
            let password = if flags & CF_PASSWORD > 0 {
                data.read_string()?
            } else {
                ByteString::default()
            };
            Some(Login { username, password })
        } else {
            ensure!(flags & CF_PASSWORD == 0, DecodeError::InvalidConnectFlags);
            None
        };

        Ok(Self {
            clean_session: flags & CF_CLEAN_SESSION > 0,
            keep_alive,
            client_id,
            last_will,
            login,
        })
    }

    #[inline]
    fn variable_header_length(&self) -> usize {
        2 + PROTOCOL_NAME.len() + 1 + 1 + 2
    }

    fn payload_length(&self) -> usize {
        let mut len = 2 + self.client_id.len();
        if let Some(last_will) = &self.last_will {
            len += 2 + last_will.topic.len() + 2 + last_will.payload.len();
        }
        if let Some(login) = &self.login {
            len += 2 + login.username.len();
            if !login.password.is_empty() {
                len += 2 + login.password.len();
            }
        }
        len
    }

    pub(crate) fn encode(&self, data: &mut BytesMut, max_size: usize) -> Result<(), EncodeError> {
        data.put_u8(CONNECT << 4);

        let size = self.variable_header_length() + self.payload_length();
        ensure!(size < max_size, EncodeError::PacketTooLarge);
        data.write_remaining_length(size)?;

        data.write_string(PROTOCOL_NAME)?;
        data.put_u8(PROTOCOL_LEVEL);

        let flags = {
            let mut flags = 0;
            if self.clean_session {
                flags |= CF_CLEAN_SESSION;
            }
            if let Some(last_will) = &self.last_will {
                flags |= CF_WILL;
                flags |= u8::from(last_will.qos) << QOS_SHIFT;
                if last_will.retain {
                    flags |= CF_WILL_RETAIN;
                }
            }
            if let Some(login) = &self.login {
                flags |= CF_USERNAME;
                if !login.password.is_empty() {
                    flags |= CF_PASSWORD;
                }
            }
            flags
        };
        data.put_u8(flags);

        data.put_u16(self.keep_alive);
        data.write_string(&self.client_id)?;

        if let Some(last_will) = &self.last_will {
            data.write_string(&last_will.topic)?;
            data.write_binary(&last_will.payload)?;
        }

        if let Some(login) = &self.login {
            data.write_string(&login.username)?;
            if !login.password.is_empty() {
                data.write_string(&login.password)?;
            }
        }

        Ok(())
    }
}
