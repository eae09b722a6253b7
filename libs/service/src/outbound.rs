use std::sync::Arc;

use bytes::BytesMut;
use codec::{Packet, Publish, Qos};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::ack_queue::OnCompleteFn;
use crate::error::Error;
use crate::session::Session;
use crate::state::ServiceState;
use crate::topics::PublishSink;

pub fn channel() -> (PacketSender, mpsc::UnboundedReceiver<Packet>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (PacketSender(sender), receiver)
}

/// Handle to the session's outbound writer task.
#[derive(Clone)]
pub struct PacketSender(mpsc::UnboundedSender<Packet>);

impl PacketSender {
    #[inline]
    pub fn send(&self, packet: Packet) -> Result<(), Error> {
        self.0.send(packet).map_err(|_| Error::WriteFailed)
    }
}

/// Drains the session's outbound queue onto the transport. Runs until the
/// last [`PacketSender`] is dropped or a write fails.
pub async fn writer_loop<W>(
    mut receiver: mpsc::UnboundedReceiver<Packet>,
    mut writer: W,
    state: Arc<ServiceState>,
) where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();

    while let Some(packet) = receiver.recv().await {
        buf.clear();
        if let Err(err) = packet.encode(&mut buf, state.config.max_packet_size) {
            tracing::error!(
                packet = ?packet,
                error = %err,
                "encode outbound packet",
            );
            break;
        }
        if let Err(err) = writer.write_all(&buf).await {
            tracing::debug!(
                error = %err,
                "write outbound packet",
            );
            break;
        }
        state.metrics.inc_msgs_sent(1);
        state.metrics.inc_bytes_sent(buf.len());
    }

    receiver.close();
}

/// The session's outbound publish path. QoS 1/2 publishes register in the
/// session's ack queues before the packet reaches the wire.
pub struct SessionSink {
    session: Arc<Session>,
    sender: PacketSender,
}

impl SessionSink {
    pub fn new(session: Arc<Session>, sender: PacketSender) -> Self {
        Self { session, sender }
    }

    pub fn publish(&self, publish: &Publish, on_complete: Option<OnCompleteFn>) -> Result<(), Error> {
        let mut msg = publish.clone();
        msg.dup = false;

        match msg.qos {
            Qos::AtMostOnce => {
                msg.packet_id = None;
                self.sender.send(Packet::Publish(msg))
            }
            Qos::AtLeastOnce | Qos::ExactlyOnce => {
                msg.packet_id = Some(self.session.take_packet_id());
                let queue = if msg.qos == Qos::AtLeastOnce {
                    &self.session.pub1ack
                } else {
                    &self.session.pub2out
                };
                let packet = Packet::Publish(msg);
                queue.wait(&packet, on_complete)?;
                self.sender.send(packet)
            }
        }
    }
}

impl PublishSink for SessionSink {
    fn deliver(&self, publish: &Publish) -> Result<(), Error> {
        self.publish(publish, None)
    }
}
