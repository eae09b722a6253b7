use std::sync::{Arc, Weak};

use codec::{
    Packet, PacketKind, PubComp, PubRel, Publish, Qos, SubAck, Subscribe, SubscribeReturnCode,
    UnsubAck, Unsubscribe,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::ack_queue::AckQueue;
use crate::error::Error;
use crate::filter::TopicFilter;
use crate::frame::{self, FrameReader};
use crate::message::Message;
use crate::outbound::{self, PacketSender, SessionSink};
use crate::session::Session;
use crate::state::ServiceState;
use crate::topics::{PublishSink, SubscriberHandle};

/// Supervisor-side handles for one processor: the start gate resolves once
/// the inbound task is live, the stop sender requests termination, and the
/// stop gate fires after teardown.
pub struct ProcessorGates {
    pub started: oneshot::Receiver<()>,
    pub stop: watch::Sender<bool>,
    pub stopped: Arc<Notify>,
}

/// Per-session inbound dispatcher. Consumes framed packets from the
/// transport, drives the QoS state machines against the session's ack
/// queues, fans publishes out through the topic manager, and writes control
/// replies through the outbound sender.
pub struct Processor<R> {
    state: Arc<ServiceState>,
    session: Arc<Session>,
    frame: FrameReader<R>,
    sender: PacketSender,
    sink: Arc<SessionSink>,
    handle: SubscriberHandle,
    started: Option<oneshot::Sender<()>>,
    stop: watch::Receiver<bool>,
    stopped: Arc<Notify>,
    subs: Vec<(Weak<dyn PublishSink>, Qos)>,
}

impl<R> Processor<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub fn new(
        state: Arc<ServiceState>,
        session: Arc<Session>,
        reader: R,
        sender: PacketSender,
    ) -> (Self, ProcessorGates) {
        let (started_sender, started_receiver) = oneshot::channel();
        let (stop_sender, stop_receiver) = watch::channel(false);
        let stopped = Arc::new(Notify::new());

        let sink = Arc::new(SessionSink::new(session.clone(), sender.clone()));
        let dyn_sink: Arc<dyn PublishSink> = sink.clone();
        let handle = state.topics.handle(Arc::downgrade(&dyn_sink));
        let frame = FrameReader::new(reader, state.config.max_packet_size);

        let processor = Self {
            state,
            session,
            frame,
            sender,
            sink,
            handle,
            started: Some(started_sender),
            stop: stop_receiver,
            stopped: stopped.clone(),
            subs: Vec::new(),
        };
        let gates = ProcessorGates {
            started: started_receiver,
            stop: stop_sender,
            stopped,
        };
        (processor, gates)
    }

    /// Run the inbound loop to completion. A DISCONNECT from the peer is a
    /// clean exit; every other handler error is logged here and tears the
    /// session down.
    pub async fn run(mut self) -> Result<(), Error> {
        if let Some(started) = self.started.take() {
            let _ = started.send(());
        }
        tracing::debug!(client_id = %self.session.client_id(), "processor started");

        let res = self.process_loop().await;
        match &res {
            Ok(()) => {
                tracing::debug!(client_id = %self.session.client_id(), "processor stopped")
            }
            Err(Error::PeerDisconnect) => {
                tracing::debug!(client_id = %self.session.client_id(), "peer disconnect")
            }
            Err(err) => tracing::error!(
                client_id = %self.session.client_id(),
                error = %err,
                "processor terminated",
            ),
        }

        self.teardown();
        match res {
            Err(Error::PeerDisconnect) => Ok(()),
            other => other,
        }
    }

    /// Run on a spawned task. A panic inside the loop is trapped at the
    /// task boundary and converted into the same stop-gate teardown.
    pub fn spawn(self) -> JoinHandle<()>
    where
        R: 'static,
    {
        let stopped = self.stopped.clone();
        let client_id = self.session.client_id().clone();
        let task = tokio::spawn(self.run());
        tokio::spawn(async move {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!(client_id = %client_id, "processor panicked");
                    stopped.notify_one();
                }
            }
        })
    }

    fn teardown(&mut self) {
        for (path, _) in self.session.topics() {
            if let Some(filter) = TopicFilter::try_new(path) {
                self.state.topics.unsubscribe(&filter, &self.handle);
            }
        }
        self.stopped.notify_one();
    }

    #[inline]
    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    async fn process_loop(&mut self) -> Result<(), Error> {
        loop {
            let (kind, total_len) = loop {
                if self.stop_requested()
                    && (!self.state.config.drain_on_shutdown || self.frame.is_empty())
                {
                    return Ok(());
                }

                match self.frame.peek_message_size() {
                    Ok(res) => break res,
                    Err(Error::ShortRead) => {
                        if self.stop_requested() {
                            // A partial frame cannot complete without
                            // filling past the stop signal.
                            return Ok(());
                        }
                        if self.frame.is_eof() {
                            if !self.frame.is_empty() {
                                tracing::debug!(
                                    client_id = %self.session.client_id(),
                                    buffered = self.frame.len(),
                                    "eof with incomplete frame",
                                );
                            }
                            return Ok(());
                        }
                        let mut stop = self.stop.clone();
                        tokio::select! {
                            res = self.frame.fill() => {
                                res?;
                            }
                            res = stop.changed() => {
                                // A dropped stop sender means the supervisor
                                // is gone; treat it as a stop request.
                                if res.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Err(err) => return Err(err),
                }
            };

            let (packet, frame_len) = self.frame.peek_message(kind, total_len)?;
            self.state.metrics.inc_msgs_received(1);
            self.state.metrics.inc_bytes_received(frame_len);
            tracing::debug!(
                client_id = %self.session.client_id(),
                packet = ?packet,
                "receive packet",
            );

            self.process_incoming(packet)?;
            self.frame.read_commit(total_len)?;
        }
    }

    fn process_incoming(&mut self, packet: Packet) -> Result<(), Error> {
        let session = self.session.clone();
        match packet {
            Packet::Publish(publish) => self.process_publish(publish),
            packet @ Packet::PubAck(_) => {
                if let Err(err) = session.pub1ack.ack(&packet) {
                    tracing::debug!(
                        client_id = %session.client_id(),
                        error = %err,
                        "puback for unknown exchange",
                    );
                }
                self.process_acked(&session.pub1ack);
                Ok(())
            }
            Packet::PubRec(pub_rec) => {
                let packet_id = pub_rec.packet_id;
                session.pub2out.ack(&Packet::PubRec(pub_rec))?;
                self.sender.send(Packet::PubRel(PubRel { packet_id }))
            }
            Packet::PubRel(pub_rel) => {
                let packet_id = pub_rel.packet_id;
                session.pub2in.ack(&Packet::PubRel(pub_rel))?;
                self.process_acked(&session.pub2in);
                self.sender.send(Packet::PubComp(PubComp { packet_id }))
            }
            Packet::PubComp(pub_comp) => {
                session.pub2out.ack(&Packet::PubComp(pub_comp))?;
                self.process_acked(&session.pub2out);
                Ok(())
            }
            Packet::Subscribe(subscribe) => self.process_subscribe(subscribe),
            packet @ Packet::SubAck(_) => {
                if let Err(err) = session.suback.ack(&packet) {
                    tracing::debug!(
                        client_id = %session.client_id(),
                        error = %err,
                        "suback for unknown exchange",
                    );
                }
                self.process_acked(&session.suback);
                Ok(())
            }
            Packet::Unsubscribe(unsubscribe) => self.process_unsubscribe(unsubscribe),
            packet @ Packet::UnsubAck(_) => {
                if let Err(err) = session.unsuback.ack(&packet) {
                    tracing::debug!(
                        client_id = %session.client_id(),
                        error = %err,
                        "unsuback for unknown exchange",
                    );
                }
                self.process_acked(&session.unsuback);
                Ok(())
            }
            Packet::PingReq => self.sender.send(Packet::PingResp),
            packet @ Packet::PingResp => {
                if let Err(err) = session.pingack.ack(&packet) {
                    tracing::debug!(
                        client_id = %session.client_id(),
                        error = %err,
                        "pingresp without pingreq",
                    );
                }
                self.process_acked(&session.pingack);
                Ok(())
            }
            Packet::Disconnect => {
                self.session.clear_will();
                Err(Error::PeerDisconnect)
            }
            Packet::Connect(_) | Packet::ConnAck(_) => {
                Err(Error::ProtocolViolation("unexpected handshake packet"))
            }
        }
    }

    /// Fire completions for every exchange the queue has finished. A
    /// released QoS 2 publish (terminal state PUBREL) fans out here; errors
    /// past that point are post-exchange and only logged.
    fn process_acked(&mut self, queue: &AckQueue) {
        for pending in queue.acked() {
            let msg = match frame::decode_frame(pending.msgbuf.clone()) {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::error!(
                        mtype = ?pending.mtype,
                        error = %err,
                        "decode pending message",
                    );
                    continue;
                }
            };
            let ack = match frame::decode_frame(pending.ackbuf.clone()) {
                Ok(ack) => ack,
                Err(err) => {
                    tracing::error!(
                        state = ?pending.state,
                        error = %err,
                        "decode pending ack",
                    );
                    continue;
                }
            };

            if pending.state == PacketKind::PubRel {
                if let Packet::Publish(publish) = &msg {
                    if let Err(err) = self.on_publish(publish) {
                        tracing::error!(
                            client_id = %self.session.client_id(),
                            error = %err,
                            "fan out released publish",
                        );
                    }
                }
            }

            if let Some(on_complete) = pending.on_complete {
                if let Err(err) = on_complete(&msg, &ack, None) {
                    tracing::error!(error = %err, "on_complete callback");
                }
            }
        }
    }

    fn process_publish(&mut self, publish: Publish) -> Result<(), Error> {
        if !crate::filter::valid_topic(&publish.topic) {
            return Err(Error::ProtocolViolation("invalid publish topic"));
        }
        self.state.metrics.inc_pub_msgs_received(1);

        match publish.qos {
            Qos::AtMostOnce => self.on_publish(&publish),
            Qos::AtLeastOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or(Error::ProtocolViolation("qos 1 publish without packet id"))?;
                self.sender
                    .send(Packet::PubAck(codec::PubAck { packet_id }))?;
                self.on_publish(&publish)
            }
            Qos::ExactlyOnce => {
                let packet_id = publish
                    .packet_id
                    .ok_or(Error::ProtocolViolation("qos 2 publish without packet id"))?;
                let msg = Packet::Publish(publish);
                if let Err(err) = self.session.pub2in.wait(&msg, None) {
                    // A DUP redelivery lands on an id that is already
                    // pending; acknowledge it again rather than tearing
                    // the session down.
                    tracing::debug!(
                        client_id = %self.session.client_id(),
                        error = %err,
                        "qos 2 publish already pending",
                    );
                }
                self.sender
                    .send(Packet::PubRec(codec::PubRec { packet_id }))
            }
        }
    }

    /// Fan an application message out to every subscriber of its topic.
    /// Called inline for QoS 0/1 and from the PUBREL drain for QoS 2.
    fn on_publish(&mut self, publish: &Publish) -> Result<(), Error> {
        if publish.retain {
            self.state.topics.retain(publish);
        }

        self.subs.clear();
        self.state
            .topics
            .subscribers(&publish.topic, publish.qos, &mut self.subs);
        if self.subs.is_empty() {
            return Ok(());
        }

        // Retain applies to the store, not to live fan-out.
        let mut msg = publish.clone();
        msg.retain = false;
        msg.dup = false;
        msg.packet_id = None;

        for (sink, qos) in self.subs.drain(..) {
            let sink = sink.upgrade().ok_or(Error::InvalidSubscriber)?;
            msg.qos = qos;
            sink.deliver(&msg)?;
            self.state.metrics.inc_pub_msgs_sent(1);
        }

        Ok(())
    }

    /// Register every topic filter, reply with the accumulated return codes
    /// (one per filter, a failed filter contributing 0x80), then replay
    /// retained messages after the SUBACK is on its way out.
    fn process_subscribe(&mut self, subscribe: Subscribe) -> Result<(), Error> {
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        let mut rmsgs: Vec<(Message, Qos)> = Vec::new();

        for filter in &subscribe.filters {
            let topic_filter = match TopicFilter::try_new(filter.path.clone()) {
                Some(topic_filter) => topic_filter,
                None => {
                    tracing::debug!(
                        client_id = %self.session.client_id(),
                        filter = %filter.path,
                        "invalid topic filter",
                    );
                    return_codes.push(SubscribeReturnCode::Failure);
                    continue;
                }
            };

            let granted = match self
                .state
                .topics
                .subscribe(&topic_filter, filter.qos, &self.handle)
            {
                Ok(granted) => granted,
                Err(err) => {
                    tracing::debug!(
                        client_id = %self.session.client_id(),
                        filter = %filter.path,
                        error = %err,
                        "subscribe rejected",
                    );
                    return_codes.push(SubscribeReturnCode::Failure);
                    continue;
                }
            };

            self.session.add_topic(filter.path.clone(), granted);
            return_codes.push(match granted {
                Qos::AtMostOnce => SubscribeReturnCode::QoS0,
                Qos::AtLeastOnce => SubscribeReturnCode::QoS1,
                Qos::ExactlyOnce => SubscribeReturnCode::QoS2,
            });

            let mut retained = Vec::new();
            self.state.topics.retained(&topic_filter, &mut retained);
            rmsgs.extend(retained.into_iter().map(|msg| (msg, granted)));
        }

        self.sender.send(Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            return_codes,
        }))?;

        // Retained messages go out after the SUBACK, through the same
        // outbound path as live deliveries. A broken pipe here ends the
        // session.
        for (msg, granted) in rmsgs {
            let mut publish = msg.to_publish();
            publish.qos = publish.qos.min(granted);
            if let Err(err) = self.sink.publish(&publish, None) {
                tracing::error!(
                    client_id = %self.session.client_id(),
                    topic = %publish.topic,
                    error = %err,
                    "deliver retained message",
                );
                return Err(err);
            }
        }

        Ok(())
    }

    /// Manager rejections are logged, never abort the list; the UNSUBACK
    /// always echoes the packet id.
    fn process_unsubscribe(&mut self, unsubscribe: Unsubscribe) -> Result<(), Error> {
        for path in &unsubscribe.filters {
            match TopicFilter::try_new(path.clone()) {
                Some(filter) => {
                    if !self.state.topics.unsubscribe(&filter, &self.handle) {
                        tracing::debug!(
                            client_id = %self.session.client_id(),
                            filter = %path,
                            "no subscription existed",
                        );
                    }
                }
                None => {
                    tracing::debug!(
                        client_id = %self.session.client_id(),
                        filter = %path,
                        "invalid topic filter",
                    );
                }
            }
            self.session.remove_topic(path);
        }

        self.sender.send(Packet::UnsubAck(UnsubAck {
            packet_id: unsubscribe.packet_id,
        }))
    }
}

/// Wire a processor and its outbound writer over one transport and drive
/// both to completion. The connection supervisor calls this once the
/// CONNECT handshake has produced a session.
pub async fn session_loop<R, W>(
    state: Arc<ServiceState>,
    session: Arc<Session>,
    reader: R,
    writer: W,
) -> Result<(), Error>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Unpin,
{
    let (sender, receiver) = outbound::channel();
    let (processor, _gates) = Processor::new(state.clone(), session, reader, sender);
    let (res, ()) = tokio::join!(
        processor.run(),
        outbound::writer_loop(receiver, writer, state),
    );
    res
}
