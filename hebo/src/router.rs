// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The single-consumer event loop that owns the topic trie.
//!
//! Every session talks to the [`Trie`] only through [`RouterHandle`] and two
//! channels, mirroring the reference broker's unbuffered `subs`/`pubs`
//! channels into one task: no locks are needed because nothing outside
//! [`Router::run`] ever touches the trie.

use codec::QoS;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::session::SessionHandle;
use crate::trie::{Message, SubscriptionId, Trie};

/// Reserved topic that shuts the broker down when published to. Any
/// session, or the listener on bind failure, can trigger this through
/// [`RouterHandle::shutdown`].
pub const SYS_CLOSE_TOPIC: &str = "$SYS/close";

/// Reserved topic every session auto-subscribes to on connect, so the
/// router's shutdown walk has a way to reach every live session without the
/// trie exposing its internals, supplemented from the reference broker's
/// `Join()`.
pub const SYS_ALL_TOPIC: &str = "$SYS/all";

/// Backlog depth for the two event channels. Small and bounded, like the
/// reference broker's unbuffered Go channels: a session blocks briefly
/// rather than the router accumulating unbounded backlog.
const CHANNEL_CAPACITY: usize = 64;

enum SubscribeChange {
    Create {
        id: SubscriptionId,
        session: SessionHandle,
        filter: String,
        qos: QoS,
    },
    UpdateQos {
        id: SubscriptionId,
        qos: QoS,
    },
    Remove {
        id: SubscriptionId,
    },
}

/// Cheap, cloneable front door to the router task. Every session holds one.
#[derive(Clone)]
pub struct RouterHandle {
    subs_tx: mpsc::Sender<SubscribeChange>,
    pub_tx: mpsc::Sender<Message>,
}

impl RouterHandle {
    /// Registers `filter` for `session` under a brand new id.
    ///
    /// # Errors
    ///
    /// Returns error if the router task has already shut down.
    pub async fn create_subscription(
        &self,
        id: SubscriptionId,
        session: SessionHandle,
        filter: String,
        qos: QoS,
    ) -> Result<(), Error> {
        Ok(self
            .subs_tx
            .send(SubscribeChange::Create { id, session, filter, qos })
            .await?)
    }

    /// Updates the granted QoS of a subscription already registered under
    /// `id`, used when a client re-subscribes to a filter it already holds.
    ///
    /// # Errors
    ///
    /// Returns error if the router task has already shut down.
    pub async fn update_subscription_qos(&self, id: SubscriptionId, qos: QoS) -> Result<(), Error> {
        Ok(self.subs_tx.send(SubscribeChange::UpdateQos { id, qos }).await?)
    }

    /// Detaches a subscription. Safe to call more than once for the same
    /// id (the trie's `unsubscribe` is idempotent).
    ///
    /// # Errors
    ///
    /// Returns error if the router task has already shut down.
    pub async fn remove_subscription(&self, id: SubscriptionId) -> Result<(), Error> {
        Ok(self.subs_tx.send(SubscribeChange::Remove { id }).await?)
    }

    /// Routes a published message to every matching subscriber.
    ///
    /// # Errors
    ///
    /// Returns error if the router task has already shut down.
    pub async fn publish(&self, msg: Message) -> Result<(), Error> {
        Ok(self.pub_tx.send(msg).await?)
    }

    /// Publishes to [`SYS_CLOSE_TOPIC`], the one way a task outside the
    /// router can ask it to shut the broker down.
    ///
    /// # Errors
    ///
    /// Returns error if the router task has already shut down.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.publish(Message::new(SYS_CLOSE_TOPIC, Vec::new(), QoS::AtMostOnce, false))
            .await
    }
}

/// Owns the topic trie exclusively. Spawn [`Router::run`] once; every other
/// task talks to it through the [`RouterHandle`] returned by [`Router::new`].
pub struct Router {
    trie: Trie,
    subs_rx: mpsc::Receiver<SubscribeChange>,
    pub_rx: mpsc::Receiver<Message>,
}

impl Router {
    #[must_use]
    pub fn new() -> (Self, RouterHandle) {
        let (subs_tx, subs_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (pub_tx, pub_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                trie: Trie::new(),
                subs_rx,
                pub_rx,
            },
            RouterHandle { subs_tx, pub_tx },
        )
    }

    /// Runs until [`SYS_CLOSE_TOPIC`] is published or every [`RouterHandle`]
    /// clone has been dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                change = self.subs_rx.recv() => {
                    match change {
                        Some(change) => self.apply_subscribe_change(change),
                        None => break,
                    }
                }
                msg = self.pub_rx.recv() => {
                    match msg {
                        Some(msg) if msg.topic == SYS_CLOSE_TOPIC => {
                            info!("router: received shutdown request, closing all sessions");
                            self.close_all_sessions();
                            break;
                        }
                        Some(msg) => {
                            debug!("router: publishing to \"{}\" ({} bytes)", msg.topic, msg.payload.len());
                            self.trie.publish(&msg);
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn apply_subscribe_change(&mut self, change: SubscribeChange) {
        match change {
            SubscribeChange::Create { id, session, filter, qos } => {
                if self.trie.contains(id) {
                    self.trie.update_qos(id, qos);
                } else {
                    self.trie.subscribe(&filter, id, session, qos);
                }
            }
            SubscribeChange::UpdateQos { id, qos } => self.trie.update_qos(id, qos),
            SubscribeChange::Remove { id } => self.trie.unsubscribe(id),
        }
    }

    fn close_all_sessions(&self) {
        let path: Vec<&str> = codec::topic::split(SYS_ALL_TOPIC);
        for session in self.trie.exact_subscribers(&path) {
            session.force_close();
        }
    }
}
