use std::num::NonZeroU16;

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    ConnAck, Connect, DecodeError, EncodeError, PubAck, PubComp, PubRec, PubRel, Publish, SubAck,
    Subscribe, UnsubAck, Unsubscribe,
};

pub const RESERVED: u8 = 0;
pub const CONNECT: u8 = 1;
pub const CONNACK: u8 = 2;
pub const PUBLISH: u8 = 3;
pub const PUBACK: u8 = 4;
pub const PUBREC: u8 = 5;
pub const PUBREL: u8 = 6;
pub const PUBCOMP: u8 = 7;
pub const SUBSCRIBE: u8 = 8;
pub const SUBACK: u8 = 9;
pub const UNSUBSCRIBE: u8 = 10;
pub const UNSUBACK: u8 = 11;
pub const PINGREQ: u8 = 12;
pub const PINGRESP: u8 = 13;
pub const DISCONNECT: u8 = 14;

/// Control packet type code from the high nibble of the fixed header.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum PacketKind {
    Connect = CONNECT,
    ConnAck = CONNACK,
    Publish = PUBLISH,
    PubAck = PUBACK,
    PubRec = PUBREC,
    PubRel = PUBREL,
    PubComp = PUBCOMP,
    Subscribe = SUBSCRIBE,
    SubAck = SUBACK,
    Unsubscribe = UNSUBSCRIBE,
    UnsubAck = UNSUBACK,
    PingReq = PINGREQ,
    PingResp = PINGRESP,
    Disconnect = DISCONNECT,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    #[inline]
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Connect(_) => PacketKind::Connect,
            Packet::ConnAck(_) => PacketKind::ConnAck,
            Packet::Publish(_) => PacketKind::Publish,
            Packet::PubAck(_) => PacketKind::PubAck,
            Packet::PubRec(_) => PacketKind::PubRec,
            Packet::PubRel(_) => PacketKind::PubRel,
            Packet::PubComp(_) => PacketKind::PubComp,
            Packet::Subscribe(_) => PacketKind::Subscribe,
            Packet::SubAck(_) => PacketKind::SubAck,
            Packet::Unsubscribe(_) => PacketKind::Unsubscribe,
            Packet::UnsubAck(_) => PacketKind::UnsubAck,
            Packet::PingReq => PacketKind::PingReq,
            Packet::PingResp => PacketKind::PingResp,
            Packet::Disconnect => PacketKind::Disconnect,
        }
    }

    #[inline]
    pub fn packet_id(&self) -> Option<NonZeroU16> {
        match self {
            Packet::Publish(publish) => publish.packet_id,
            Packet::PubAck(pub_ack) => Some(pub_ack.packet_id),
            Packet::PubRec(pub_rec) => Some(pub_rec.packet_id),
            Packet::PubRel(pub_rel) => Some(pub_rel.packet_id),
            Packet::PubComp(pub_comp) => Some(pub_comp.packet_id),
            Packet::Subscribe(subscribe) => Some(subscribe.packet_id),
            Packet::SubAck(sub_ack) => Some(sub_ack.packet_id),
            Packet::Unsubscribe(unsubscribe) => Some(unsubscribe.packet_id),
            Packet::UnsubAck(unsub_ack) => Some(unsub_ack.packet_id),
            _ => None,
        }
    }

    /// Decode a packet body; the caller has already consumed the fixed
    /// header and framed `data` to the remaining length.
    pub fn decode(header: u8, data: Bytes) -> Result<Self, DecodeError> {
        let flags = header & 0x0f;
        let packet = match header >> 4 {
            RESERVED => return Err(DecodeError::ReservedPacketType),
            CONNECT => Self::Connect(Connect::decode(data)?),
            CONNACK => Self::ConnAck(ConnAck::decode(data)?),
            PUBLISH => Self::Publish(Publish::decode(data, flags)?),
            PUBACK => Self::PubAck(PubAck::decode(data)?),
            PUBREC => Self::PubRec(PubRec::decode(data)?),
            PUBREL => Self::PubRel(PubRel::decode(data, flags)?),
            PUBCOMP => Self::PubComp(PubComp::decode(data)?),
            SUBSCRIBE => Self::Subscribe(Subscribe::decode(data, flags)?),
            SUBACK => Self::SubAck(SubAck::decode(data)?),
            UNSUBSCRIBE => Self::Unsubscribe(Unsubscribe::decode(data, flags)?),
            UNSUBACK => Self::UnsubAck(UnsubAck::decode(data)?),
            PINGREQ => Self::PingReq,
            PINGRESP => Self::PingResp,
            DISCONNECT => Self::Disconnect,
            n => return Err(DecodeError::UnknownPacketType(n)),
        };
        Ok(packet)
    }

    pub fn encode(&self, data: &mut BytesMut, max_size: usize) -> Result<(), EncodeError> {
        match self {
            Packet::Connect(connect) => connect.encode(data, max_size),
            Packet::ConnAck(conn_ack) => conn_ack.encode(data, max_size),
            Packet::Publish(publish) => publish.encode(data, max_size),
            Packet::PubAck(pub_ack) => pub_ack.encode(data, max_size),
            Packet::PubRec(pub_rec) => pub_rec.encode(data, max_size),
            Packet::PubRel(pub_rel) => pub_rel.encode(data, max_size),
            Packet::PubComp(pub_comp) => pub_comp.encode(data, max_size),
            Packet::Subscribe(subscribe) => subscribe.encode(data, max_size),
            Packet::SubAck(sub_ack) => sub_ack.encode(data, max_size),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.encode(data, max_size),
            Packet::UnsubAck(unsub_ack) => unsub_ack.encode(data, max_size),
            Packet::PingReq => {
                data.put_slice(&[PINGREQ << 4, 0]);
                Ok(())
            }
            Packet::PingResp => {
                data.put_slice(&[PINGRESP << 4, 0]);
                Ok(())
            }
            Packet::Disconnect => {
                data.put_slice(&[DISCONNECT << 4, 0]);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::*;
    use crate::{ConnectReturnCode, LastWill, Login, Qos, SubscribeFilter, SubscribeReturnCode};

    fn round_trip(packet: Packet) {
        let mut data = BytesMut::new();
        packet.encode(&mut data, usize::MAX).unwrap();

        let header = data[0];
        let mut offset = 1;
        let mut remaining = 0;
        let mut shift = 0;
        loop {
            let byte = data[offset];
            offset += 1;
            remaining |= ((byte & 0x7f) as usize) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        assert_eq!(data.len(), offset + remaining);

        let decoded = Packet::decode(header, data.freeze().slice(offset..)).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_round_trip() {
        round_trip(Packet::Connect(Connect {
            clean_session: true,
            keep_alive: 30,
            client_id: "client-1".into(),
            last_will: Some(LastWill {
                topic: "a/b".into(),
                payload: b"gone".as_ref().into(),
                qos: Qos::AtLeastOnce,
                retain: true,
            }),
            login: Some(Login {
                username: "user".into(),
                password: "pass".into(),
            }),
        }));
        round_trip(Packet::Connect(Connect {
            clean_session: false,
            keep_alive: 0,
            client_id: "client-2".into(),
            last_will: None,
            login: None,
        }));
        round_trip(Packet::ConnAck(ConnAck {
            session_present: true,
            return_code: ConnectReturnCode::Accepted,
        }));
        round_trip(Packet::Publish(Publish {
            dup: false,
            qos: Qos::AtMostOnce,
            retain: false,
            topic: "a/b".into(),
            packet_id: None,
            payload: b"x".as_ref().into(),
        }));
        round_trip(Packet::Publish(Publish {
            dup: true,
            qos: Qos::ExactlyOnce,
            retain: true,
            topic: "a/b/c".into(),
            packet_id: Some(7.try_into().unwrap()),
            payload: b"payload".as_ref().into(),
        }));
        round_trip(Packet::PubAck(PubAck {
            packet_id: 1.try_into().unwrap(),
        }));
        round_trip(Packet::PubRec(PubRec {
            packet_id: 2.try_into().unwrap(),
        }));
        round_trip(Packet::PubRel(PubRel {
            packet_id: 3.try_into().unwrap(),
        }));
        round_trip(Packet::PubComp(PubComp {
            packet_id: 4.try_into().unwrap(),
        }));
        round_trip(Packet::Subscribe(Subscribe {
            packet_id: 5.try_into().unwrap(),
            filters: vec![
                SubscribeFilter {
                    path: "a/+".into(),
                    qos: Qos::AtLeastOnce,
                },
                SubscribeFilter {
                    path: "#".into(),
                    qos: Qos::AtMostOnce,
                },
            ],
        }));
        round_trip(Packet::SubAck(SubAck {
            packet_id: 5.try_into().unwrap(),
            return_codes: vec![SubscribeReturnCode::QoS1, SubscribeReturnCode::Failure],
        }));
        round_trip(Packet::Unsubscribe(Unsubscribe {
            packet_id: 6.try_into().unwrap(),
            filters: vec!["a/+".into()],
        }));
        round_trip(Packet::UnsubAck(UnsubAck {
            packet_id: 6.try_into().unwrap(),
        }));
        round_trip(Packet::PingReq);
        round_trip(Packet::PingResp);
        round_trip(Packet::Disconnect);
    }

    #[test]
    fn test_reserved_type() {
        assert!(matches!(
            Packet::decode(0x00, Bytes::new()),
            Err(DecodeError::ReservedPacketType)
        ));
        assert!(matches!(
            Packet::decode(0xf0, Bytes::new()),
            Err(DecodeError::UnknownPacketType(15))
        ));
    }

    #[test]
    fn test_pubrel_flags() {
        // PUBREL requires the reserved flag bits 0b0010.
        let mut data = BytesMut::new();
        Packet::PubRel(PubRel {
            packet_id: 3.try_into().unwrap(),
        })
        .encode(&mut data, usize::MAX)
        .unwrap();
        assert_eq!(data[0], (PUBREL << 4) | 0b0010);

        assert!(matches!(
            Packet::decode(PUBREL << 4, data.freeze().slice(2..)),
            Err(DecodeError::MalformedPacket)
        ));
    }

    #[test]
    fn test_publish_invalid_qos() {
        let mut data = BytesMut::new();
        Packet::Publish(Publish {
            dup: false,
            qos: Qos::AtMostOnce,
            retain: false,
            topic: "a".into(),
            packet_id: None,
            payload: Bytes::new(),
        })
        .encode(&mut data, usize::MAX)
        .unwrap();

        // Both QoS bits set is a malformed publish.
        assert!(matches!(
            Packet::decode((PUBLISH << 4) | 0b0110, data.freeze().slice(2..)),
            Err(DecodeError::InvalidQOS(3))
        ));
    }

    #[test]
    fn test_encode_max_size() {
        let mut data = BytesMut::new();
        let res = Packet::Publish(Publish {
            dup: false,
            qos: Qos::AtMostOnce,
            retain: false,
            topic: "a/b".into(),
            packet_id: None,
            payload: vec![0u8; 1024].into(),
        })
        .encode(&mut data, 16);
        assert!(matches!(res, Err(EncodeError::PacketTooLarge)));
    }

    #[test]
    fn test_publish_requires_packet_id() {
        let mut data = BytesMut::new();
        let res = Packet::Publish(Publish {
            dup: false,
            qos: Qos::AtLeastOnce,
            retain: false,
            topic: "a/b".into(),
            packet_id: None,
            payload: Bytes::new(),
        })
        .encode(&mut data, usize::MAX);
        assert!(matches!(res, Err(EncodeError::RequirePacketId)));
    }
}
