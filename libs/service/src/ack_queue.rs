use std::fmt;

use bytes::{Bytes, BytesMut};
use codec::{Packet, PacketKind};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::Error;

/// Invoked exactly once when a pending exchange reaches its terminal state.
/// Receives the originally registered message and the final acknowledgment.
pub type OnCompleteFn =
    Box<dyn FnOnce(&Packet, &Packet, Option<&Error>) -> Result<(), Error> + Send>;

/// Which exchange this queue tracks; fixes the legal ack transitions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AckRole {
    /// Outbound QoS 1 publish awaiting PUBACK.
    PublishQos1,
    /// Outbound QoS 2 publish: PUBREC then PUBCOMP.
    PublishQos2Out,
    /// Inbound QoS 2 publish held until PUBREL releases it.
    PublishQos2In,
    /// SUBSCRIBE awaiting SUBACK.
    Subscribe,
    /// UNSUBSCRIBE awaiting UNSUBACK.
    Unsubscribe,
    /// PINGREQ awaiting PINGRESP.
    Ping,
}

pub struct PendingAck {
    pub mtype: PacketKind,
    pub msgbuf: Bytes,
    pub state: PacketKind,
    pub ackbuf: Bytes,
    pub on_complete: Option<OnCompleteFn>,
}

impl fmt::Debug for PendingAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAck")
            .field("mtype", &self.mtype)
            .field("state", &self.state)
            .field("msgbuf", &self.msgbuf.len())
            .field("ackbuf", &self.ackbuf.len())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Pending-acknowledgment table keyed by packet id, in insertion order.
/// Shared between the dispatcher and the outbound publish path, so the
/// table carries its own lock.
pub struct AckQueue {
    role: AckRole,
    inner: Mutex<IndexMap<u16, PendingAck>>,
}

// PINGREQ carries no packet id; it keys the reserved id 0.
#[inline]
fn pkid_of(packet: &Packet) -> u16 {
    packet.packet_id().map(|id| id.get()).unwrap_or(0)
}

fn encode_packet(packet: &Packet) -> Result<Bytes, Error> {
    let mut buf = BytesMut::new();
    packet.encode(&mut buf, usize::MAX)?;
    Ok(buf.freeze())
}

/// The new state after `ack` arrives, or `None` when the transition is
/// illegal for the role.
fn transition(role: AckRole, state: PacketKind, ack: PacketKind) -> Option<PacketKind> {
    match (role, state, ack) {
        (AckRole::PublishQos1, PacketKind::Publish, PacketKind::PubAck) => Some(PacketKind::PubAck),
        (AckRole::PublishQos2Out, PacketKind::Publish, PacketKind::PubRec) => {
            Some(PacketKind::PubRel)
        }
        (AckRole::PublishQos2Out, PacketKind::PubRel, PacketKind::PubComp) => {
            Some(PacketKind::PubComp)
        }
        (AckRole::PublishQos2In, PacketKind::Publish, PacketKind::PubRel) => {
            Some(PacketKind::PubRel)
        }
        (AckRole::Subscribe, PacketKind::Subscribe, PacketKind::SubAck) => Some(PacketKind::SubAck),
        (AckRole::Unsubscribe, PacketKind::Unsubscribe, PacketKind::UnsubAck) => {
            Some(PacketKind::UnsubAck)
        }
        (AckRole::Ping, PacketKind::PingReq, PacketKind::PingResp) => Some(PacketKind::PingResp),
        _ => None,
    }
}

fn is_terminal(role: AckRole, state: PacketKind) -> bool {
    matches!(
        (role, state),
        (AckRole::PublishQos1, PacketKind::PubAck)
            | (AckRole::PublishQos2Out, PacketKind::PubComp)
            | (AckRole::PublishQos2In, PacketKind::PubRel)
            | (AckRole::Subscribe, PacketKind::SubAck)
            | (AckRole::Unsubscribe, PacketKind::UnsubAck)
            | (AckRole::Ping, PacketKind::PingResp)
    )
}

impl AckQueue {
    pub fn new(role: AckRole) -> Self {
        Self {
            role,
            inner: Mutex::new(IndexMap::new()),
        }
    }

    #[inline]
    pub fn role(&self) -> AckRole {
        self.role
    }

    /// Register a new pending exchange for the message's packet id, holding
    /// its encoded form until the exchange completes.
    pub fn wait(&self, msg: &Packet, on_complete: Option<OnCompleteFn>) -> Result<(), Error> {
        let pkid = pkid_of(msg);
        let msgbuf = encode_packet(msg)?;

        let mut inner = self.inner.lock();
        if inner.contains_key(&pkid) {
            return Err(Error::DuplicatePacketId(pkid));
        }
        inner.insert(
            pkid,
            PendingAck {
                mtype: msg.kind(),
                msgbuf,
                state: msg.kind(),
                ackbuf: Bytes::new(),
                on_complete,
            },
        );
        Ok(())
    }

    /// Record an acknowledgment against the entry with the same packet id.
    pub fn ack(&self, ack: &Packet) -> Result<(), Error> {
        let pkid = pkid_of(ack);
        let ackbuf = encode_packet(ack)?;

        let mut inner = self.inner.lock();
        let pending = inner
            .get_mut(&pkid)
            .ok_or(Error::NoSuchPacketId(pkid))?;
        let next = transition(self.role, pending.state, ack.kind()).ok_or(Error::BadAckType {
            state: pending.state,
            ack: ack.kind(),
        })?;
        pending.state = next;
        pending.ackbuf = ackbuf;
        Ok(())
    }

    /// Drain every entry whose exchange reached its terminal state, in
    /// insertion order.
    pub fn acked(&self) -> Vec<PendingAck> {
        let mut inner = self.inner.lock();
        let done = inner
            .iter()
            .filter(|(_, pending)| is_terminal(self.role, pending.state))
            .map(|(&pkid, _)| pkid)
            .collect::<Vec<_>>();
        done.into_iter()
            .filter_map(|pkid| inner.shift_remove(&pkid))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use codec::{PubAck, PubComp, PubRec, PubRel, Publish, Qos};

    use super::*;

    fn publish(pkid: u16, qos: Qos) -> Packet {
        Packet::Publish(Publish {
            dup: false,
            qos,
            retain: false,
            topic: "a/b".into(),
            packet_id: Some(pkid.try_into().unwrap()),
            payload: b"x".as_ref().into(),
        })
    }

    #[test]
    fn test_qos1_exchange() {
        let queue = AckQueue::new(AckRole::PublishQos1);
        queue.wait(&publish(1, Qos::AtLeastOnce), None).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.acked().is_empty());

        queue
            .ack(&Packet::PubAck(PubAck {
                packet_id: 1.try_into().unwrap(),
            }))
            .unwrap();

        let acked = queue.acked();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].mtype, PacketKind::Publish);
        assert_eq!(acked[0].state, PacketKind::PubAck);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_qos2_out_two_step() {
        let queue = AckQueue::new(AckRole::PublishQos2Out);
        queue.wait(&publish(9, Qos::ExactlyOnce), None).unwrap();

        queue
            .ack(&Packet::PubRec(PubRec {
                packet_id: 9.try_into().unwrap(),
            }))
            .unwrap();
        // PUBREC alone is not terminal; the PUBREL leg is still in flight.
        assert!(queue.acked().is_empty());
        assert_eq!(queue.len(), 1);

        // A second PUBREC is no longer legal.
        let err = queue
            .ack(&Packet::PubRec(PubRec {
                packet_id: 9.try_into().unwrap(),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::BadAckType { .. }));

        queue
            .ack(&Packet::PubComp(PubComp {
                packet_id: 9.try_into().unwrap(),
            }))
            .unwrap();
        let acked = queue.acked();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].state, PacketKind::PubComp);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_qos2_in() {
        let queue = AckQueue::new(AckRole::PublishQos2In);
        queue.wait(&publish(5, Qos::ExactlyOnce), None).unwrap();

        queue
            .ack(&Packet::PubRel(PubRel {
                packet_id: 5.try_into().unwrap(),
            }))
            .unwrap();
        let acked = queue.acked();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].state, PacketKind::PubRel);

        // The stored buffer decodes back to the original publish.
        let msg = crate::frame::decode_frame(acked[0].msgbuf.clone()).unwrap();
        assert_eq!(msg, publish(5, Qos::ExactlyOnce));
    }

    #[test]
    fn test_duplicate_packet_id() {
        let queue = AckQueue::new(AckRole::PublishQos1);
        queue.wait(&publish(3, Qos::AtLeastOnce), None).unwrap();
        let err = queue.wait(&publish(3, Qos::AtLeastOnce), None).unwrap_err();
        assert!(matches!(err, Error::DuplicatePacketId(3)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_no_such_packet_id() {
        let queue = AckQueue::new(AckRole::PublishQos1);
        queue.wait(&publish(3, Qos::AtLeastOnce), None).unwrap();

        let err = queue
            .ack(&Packet::PubAck(PubAck {
                packet_id: 4.try_into().unwrap(),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchPacketId(4)));

        // No side effect on the pending entry.
        assert_eq!(queue.len(), 1);
        assert!(queue.acked().is_empty());
    }

    #[test]
    fn test_bad_ack_type() {
        let queue = AckQueue::new(AckRole::PublishQos1);
        queue.wait(&publish(3, Qos::AtLeastOnce), None).unwrap();

        let err = queue
            .ack(&Packet::PubRel(PubRel {
                packet_id: 3.try_into().unwrap(),
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BadAckType {
                state: PacketKind::Publish,
                ack: PacketKind::PubRel,
            }
        ));
    }

    #[test]
    fn test_ping_uses_reserved_id() {
        let queue = AckQueue::new(AckRole::Ping);
        queue.wait(&Packet::PingReq, None).unwrap();
        queue.ack(&Packet::PingResp).unwrap();
        assert_eq!(queue.acked().len(), 1);
    }

    #[test]
    fn test_on_complete_runs_once() {
        let queue = AckQueue::new(AckRole::PublishQos1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        queue
            .wait(
                &publish(1, Qos::AtLeastOnce),
                Some(Box::new(move |_msg, _ack, _err| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
        queue
            .ack(&Packet::PubAck(PubAck {
                packet_id: 1.try_into().unwrap(),
            }))
            .unwrap();

        for pending in queue.acked() {
            let msg = crate::frame::decode_frame(pending.msgbuf.clone()).unwrap();
            let ack = crate::frame::decode_frame(pending.ackbuf.clone()).unwrap();
            if let Some(on_complete) = pending.on_complete {
                on_complete(&msg, &ack, None).unwrap();
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(queue.acked().is_empty());
    }

    #[test]
    fn test_drain_order() {
        let queue = AckQueue::new(AckRole::PublishQos1);
        for pkid in [2u16, 7, 4] {
            queue.wait(&publish(pkid, Qos::AtLeastOnce), None).unwrap();
        }
        for pkid in [2u16, 7, 4] {
            queue
                .ack(&Packet::PubAck(PubAck {
                    packet_id: pkid.try_into().unwrap(),
                }))
                .unwrap();
        }
        let order = queue
            .acked()
            .iter()
            .map(|pending| {
                crate::frame::decode_frame(pending.ackbuf.clone())
                    .unwrap()
                    .packet_id()
                    .unwrap()
                    .get()
            })
            .collect::<Vec<_>>();
        assert_eq!(order, vec![2, 7, 4]);
    }
}
