// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! One task per accepted TCP connection: the session state machine.
//!
//! A [`Session`] is owned entirely by the task that reads its socket. The
//! router never holds a `Session` - it holds a [`SessionHandle`], a cheap
//! `Arc` clone whose `deliver` becomes a no-op once the session reaches
//! [`Status::Closed`]. This is the non-owning back-reference this broker
//! substitutes in place of Go's doubly-linked subscriber lists: the router can
//! push a message to a session it does not own, and a closed session simply
//! swallows deliveries addressed to subscriptions it hasn't unsubscribed yet.

mod codec_io;
mod handshake;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;

use codec::v3::{PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket};
use codec::{EncodePacket, QoS};
use log::{debug, info, warn};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

use crate::config::SessionConfig;
use crate::handler::Handler;
use crate::router::{RouterHandle, SYS_ALL_TOPIC};
use crate::trie::{Message, SubscriptionId};

/// Lifecycle states a session passes through, in order. A session never
/// moves backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Status {
    Connected = 0,
    Closed = 1,
}

impl From<u8> for Status {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

struct SessionInner {
    client_id: String,
    state: AtomicU8,
    mid_counter: AtomicU16,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    close_signal: Notify,
}

/// A cloneable, non-owning reference to a session. Subscriptions stored in
/// the trie hold one of these instead of the `Session` itself.
#[derive(Clone)]
pub struct SessionHandle(Arc<SessionInner>);

impl SessionHandle {
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.0.client_id
    }

    /// Encodes `msg` as a PUBLISH at the lower of `sub_qos` and the
    /// message's own QoS and queues it on the write adapter.
    /// A no-op once the session has closed.
    ///
    /// `retained_reply` marks the synchronous delivery a fresh subscription
    /// receives from a node's stored retained message (spec.md §4.2): only
    /// that path forwards the original RETAIN bit. Every other delivery is
    /// a live publication and always carries RETAIN=0, regardless of the
    /// publisher's own retain flag.
    pub fn deliver(&self, msg: &Message, sub_qos: QoS, retained_reply: bool) {
        if Status::from(self.0.state.load(Ordering::Acquire)) != Status::Connected {
            return;
        }
        let effective_qos = sub_qos.min(msg.qos);
        let packet_id = if effective_qos == QoS::AtMostOnce {
            None
        } else {
            Some(self.next_mid())
        };
        let packet = PublishPacket {
            dup: false,
            qos: effective_qos,
            retain: retained_reply && msg.retain,
            topic: msg.topic.clone(),
            packet_id,
            payload: msg.payload.clone(),
        };
        let mut buf = Vec::new();
        if let Err(err) = packet.encode(&mut buf) {
            warn!("session {}: failed to encode outbound PUBLISH: {err}", self.client_id());
            return;
        }
        let _ = self.0.writer.send(buf);
    }

    /// Wakes the owning reader task so it closes the connection, whether or
    /// not that task is currently blocked on a socket read. Used by the
    /// router's `$SYS/all` shutdown walk.
    pub fn force_close(&self) {
        self.0.close_signal.notify_one();
    }

    fn next_mid(&self) -> u16 {
        let mut v = self.0.mid_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if v == 0 {
            v = self.0.mid_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        }
        v
    }
}

/// Runs one accepted connection to completion: handshake, then the
/// steady-state read loop, then cleanup. All failures are logged and end
/// the session instead of propagating - there is nothing above this task
/// to hand an error to.
pub async fn run(stream: TcpStream, router: RouterHandle, handler: Arc<dyn Handler>, config: SessionConfig) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!("session: failed to set TCP_NODELAY: {err}");
    }
    let (mut read_half, write_half) = stream.into_split();
    let (writer_tx, writer_task) = crate::writer::spawn(write_half);

    let accepted = match handshake::perform(&mut read_half, &writer_tx, &handler, &config).await {
        Ok(accepted) => accepted,
        Err(err) => {
            debug!("session: handshake failed: {err}");
            drop(writer_tx);
            let _ = writer_task.await;
            return;
        }
    };

    let handle = SessionHandle(Arc::new(SessionInner {
        client_id: accepted.client_id,
        state: AtomicU8::new(Status::Connected as u8),
        mid_counter: AtomicU16::new(0),
        writer: writer_tx,
        close_signal: Notify::new(),
    }));

    let sys_all_id = SubscriptionId::next();
    if let Err(err) = router
        .create_subscription(sys_all_id, handle.clone(), SYS_ALL_TOPIC.to_string(), QoS::AtMostOnce)
        .await
    {
        warn!("session {}: failed to join {SYS_ALL_TOPIC}: {err}", handle.client_id());
    }

    let mut subs_by_filter = HashMap::new();
    subs_by_filter.insert(SYS_ALL_TOPIC.to_string(), sys_all_id);

    let mut session = Session {
        handle: handle.clone(),
        router: router.clone(),
        handler,
        config,
        subs_by_filter,
        inflight_rx: HashMap::new(),
        will: accepted.will,
        keep_alive: accepted.keep_alive,
    };

    info!("session {}: connected", handle.client_id());
    let close_cause = session.run(&mut read_half).await;
    handle.0.state.store(Status::Closed as u8, Ordering::Release);

    for id in session.subs_by_filter.values() {
        let _ = router.remove_subscription(*id).await;
    }

    if let Some(will) = session.will.take() {
        if !matches!(close_cause, CloseCause::ClientDisconnect) {
            let _ = router.publish(will).await;
        }
    }

    session.handler.on_disconnect(handle.client_id());
    info!("session {}: closed ({close_cause:?})", handle.client_id());

    drop(session.handle);
    let _ = writer_task.await;
}

#[derive(Debug)]
enum CloseCause {
    /// Client sent `DISCONNECT`: will is discarded.
    ClientDisconnect,
    /// Socket error, protocol error, or idle keep-alive timeout: will (if
    /// any) is published.
    Abnormal,
    /// The router forced this session closed (`$SYS/close` walk).
    RouterRequested,
}

struct Session {
    handle: SessionHandle,
    router: RouterHandle,
    handler: Arc<dyn Handler>,
    config: SessionConfig,
    subs_by_filter: HashMap<String, SubscriptionId>,
    inflight_rx: HashMap<u16, Message>,
    will: Option<Message>,
    keep_alive: u16,
}

impl Session {
    async fn run(&mut self, reader: &mut OwnedReadHalf) -> CloseCause {
        let idle_timeout = self.config.idle_timeout(self.keep_alive);
        loop {
            let read_fut = codec_io::read_packet(reader, self.config.max_packet_size);
            let packet = if let Some(timeout) = idle_timeout {
                tokio::select! {
                    result = tokio::time::timeout(timeout, read_fut) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_elapsed) => {
                                warn!("session {}: idle keep-alive timeout", self.handle.client_id());
                                return CloseCause::Abnormal;
                            }
                        }
                    }
                    () = self.handle.0.close_signal.notified() => return CloseCause::RouterRequested,
                }
            } else {
                tokio::select! {
                    result = read_fut => result,
                    () = self.handle.0.close_signal.notified() => return CloseCause::RouterRequested,
                }
            };

            let packet = match packet {
                Ok(packet) => packet,
                Err(err) => {
                    debug!("session {}: read failed, closing: {err}", self.handle.client_id());
                    return CloseCause::Abnormal;
                }
            };

            match packet {
                codec_io::InboundPacket::Connect(_) => {
                    debug!("session {}: duplicate CONNECT, closing", self.handle.client_id());
                    return CloseCause::Abnormal;
                }
                codec_io::InboundPacket::Publish(publish) => {
                    if self.handle_publish(publish).await.is_err() {
                        return CloseCause::Abnormal;
                    }
                }
                codec_io::InboundPacket::PublishAck(_) | codec_io::InboundPacket::PublishComplete(_) => {
                    // Outbound QoS 1/2 deliveries to this client are not
                    // tracked for redelivery (no persistent session store),
                    // so these acks are simply
                    // observed and discarded.
                }
                codec_io::InboundPacket::PublishReceived(rec) => {
                    self.send_packet(&PublishReleasePacket::new(rec.packet_id)).await;
                }
                codec_io::InboundPacket::PublishRelease(rel) => {
                    let Some(msg) = self.inflight_rx.remove(&rel.packet_id) else {
                        warn!(
                            "session {}: PUBREL for unknown message id {}, closing",
                            self.handle.client_id(),
                            rel.packet_id
                        );
                        return CloseCause::Abnormal;
                    };
                    let _ = self.router.publish(msg).await;
                    self.send_packet(&PublishCompletePacket::new(rel.packet_id)).await;
                }
                codec_io::InboundPacket::Subscribe(sub) => {
                    self.handle_subscribe(sub).await;
                }
                codec_io::InboundPacket::Unsubscribe(unsub) => {
                    self.handle_unsubscribe(unsub).await;
                }
                codec_io::InboundPacket::PingRequest(_) => {
                    self.send_packet(&codec::v3::PingResponsePacket).await;
                }
                codec_io::InboundPacket::Disconnect(_) => {
                    return CloseCause::ClientDisconnect;
                }
            }
        }
    }

    async fn send_packet(&self, packet: &impl EncodePacket) {
        let mut buf = Vec::new();
        if let Err(err) = packet.encode(&mut buf) {
            warn!("session {}: failed to encode outbound packet: {err}", self.handle.client_id());
            return;
        }
        let _ = self.handle.0.writer.send(buf);
    }

    async fn handle_publish(&mut self, publish: PublishPacket) -> Result<(), ()> {
        if !self.handler.on_publish(self.handle.client_id(), &publish.topic) {
            debug!(
                "session {}: PUBLISH to \"{}\" rejected by handler",
                self.handle.client_id(),
                publish.topic
            );
            return Ok(());
        }

        let msg = Message::new(publish.topic.clone(), publish.payload.clone(), publish.qos, publish.retain);

        match publish.qos {
            QoS::AtMostOnce => {
                let _ = self.router.publish(msg).await;
            }
            QoS::AtLeastOnce => {
                let _ = self.router.publish(msg).await;
                if let Some(packet_id) = publish.packet_id {
                    self.send_packet(&PublishAckPacket::new(packet_id)).await;
                }
            }
            QoS::ExactOnce => {
                let Some(packet_id) = publish.packet_id else {
                    return Err(());
                };
                // The message is handed to the router only once the
                // matching PUBREL arrives; storing it here
                // just remembers it across a retransmitted PUBLISH with
                // the same id sent before that PUBREL shows up.
                self.inflight_rx.insert(packet_id, msg);
                self.send_packet(&PublishReceivedPacket::new(packet_id)).await;
            }
        }
        Ok(())
    }

    async fn handle_subscribe(&mut self, sub: codec::v3::SubscribePacket) {
        let mut acks = Vec::with_capacity(sub.topics.len());
        for topic in &sub.topics {
            if !self.handler.on_subscribe(self.handle.client_id(), &topic.filter, topic.qos) {
                acks.push(codec::v3::SubscribeAck::Failed);
                continue;
            }
            if let Some(existing_id) = self.subs_by_filter.get(&topic.filter).copied() {
                let _ = self.router.update_subscription_qos(existing_id, topic.qos).await;
            } else {
                let id = SubscriptionId::next();
                if self
                    .router
                    .create_subscription(id, self.handle.clone(), topic.filter.clone(), topic.qos)
                    .await
                    .is_ok()
                {
                    self.subs_by_filter.insert(topic.filter.clone(), id);
                }
            }
            acks.push(codec::v3::SubscribeAck::QoS(topic.qos));
        }
        self.send_packet(&codec::v3::SubscribeAckPacket::new(sub.packet_id, acks)).await;
    }

    async fn handle_unsubscribe(&mut self, unsub: codec::v3::UnsubscribePacket) {
        for filter in &unsub.filters {
            if let Some(id) = self.subs_by_filter.remove(filter) {
                let _ = self.router.remove_subscription(id).await;
            }
        }
        self.send_packet(&codec::v3::UnsubscribeAckPacket::new(unsub.packet_id)).await;
    }
}
