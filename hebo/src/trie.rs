// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The topic trie: retained messages, subscriptions and wildcard matching.
//!
//! One [`Trie`] is owned exclusively by the [`crate::router::Router`] task;
//! nothing here is `Sync`-guarded because nothing outside that task ever
//! touches it. Nodes live in a [`slab::Slab`] arena addressed by [`NodeId`]
//! rather than behind `Rc<RefCell<_>>`, so the whole structure stays
//! `Send + 'static` and can be moved into a spawned task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use codec::QoS;
use slab::Slab;

use crate::session::SessionHandle;

/// A published message as it flows through the trie. Cheap to clone: the
/// payload is the only owned allocation, and retained copies and fan-out
/// deliveries both need their own `Message`.
#[derive(Clone, Debug)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            retain,
        }
    }
}

/// Opaque identity for one subscription. Go's reference broker used the
/// `*Subscription` pointer itself as the removal key in an intrusive
/// doubly-linked list; this broker instead substitutes a stable id
/// plus a side table, which is what `SubscriptionId` plus [`Trie::locations`]
/// does here, using a `slab::Slab` to get O(1) detach without unsafe code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type NodeId = usize;

struct StoredSub {
    id: SubscriptionId,
    session: SessionHandle,
    qos: QoS,
}

#[derive(Clone, Copy)]
enum ListKind {
    Exact,
    MultiLevelWildcard,
}

struct Location {
    node: NodeId,
    list: ListKind,
    key: usize,
}

struct TopicNode {
    parent: Option<NodeId>,
    name: String,
    children: HashMap<String, NodeId>,
    wildcard_child: Option<NodeId>,
    subs: Slab<StoredSub>,
    mlwc_subs: Slab<StoredSub>,
    retained: Option<Message>,
}

impl TopicNode {
    fn leaf(parent: Option<NodeId>, name: String) -> Self {
        Self {
            parent,
            name,
            children: HashMap::new(),
            wildcard_child: None,
            subs: Slab::new(),
            mlwc_subs: Slab::new(),
            retained: None,
        }
    }
}

/// The trie itself: an arena of [`TopicNode`]s plus the subscription
/// side-table that lets `unsubscribe`/`update_qos` run in O(1).
pub struct Trie {
    nodes: Slab<TopicNode>,
    root: NodeId,
    locations: HashMap<SubscriptionId, Location>,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Slab::new();
        let root = nodes.insert(TopicNode::leaf(None, String::new()));
        Self {
            nodes,
            root,
            locations: HashMap::new(),
        }
    }

    /// Number of live subscriptions (exact-match plus `#`), for tests and
    /// the invariant that `locations.len()` tracks live subscriptions
    /// exactly.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.locations.len()
    }

    /// Number of nodes currently in the trie, including the root. Used by
    /// tests asserting that unrelated branches prune back to just the root.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn new_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.nodes.insert(TopicNode::leaf(Some(parent), name.to_string()))
    }

    /// Register `session` for `filter`, creating any trie nodes the path
    /// needs. Unless `filter`'s last segment is `#`, every already-stored
    /// retained message whose topic matches `filter` - not just one living
    /// at the node this particular subscription attaches to - is then
    /// delivered to `session` synchronously (see [`Self::collect_retained`]):
    /// a `+` in `filter` matches any single literal child, so e.g. `x/+`
    /// must see a retained message stored at the literal node `x/y`, which
    /// is a different trie node than the one the `+` subscription itself
    /// lives on. A `#` subscription does not receive a synchronous retained
    /// reply here; it only sees messages published after it subscribes.
    pub fn subscribe(&mut self, filter: &str, id: SubscriptionId, session: SessionHandle, qos: QoS) {
        let owned: Vec<String> = codec::topic::split(filter).into_iter().map(str::to_string).collect();
        let segments: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.subscribe_rec(self.root, &segments, id, session.clone(), qos);

        if segments.last() != Some(&"#") {
            let mut retained = Vec::new();
            self.collect_retained(self.root, &segments, &mut retained);
            for msg in retained {
                session.deliver(&msg, qos, true);
            }
        }
    }

    /// Collects every already-stored retained message whose topic matches
    /// `segments`, read with the same single-level-wildcard semantics
    /// [`Self::publish_rec`] applies when fanning out a live publication: a
    /// literal segment requires an exact child, `+` matches every literal
    /// child at that level. Only literal trie nodes ever hold a retained
    /// message (a published topic never contains `+`/`#`), so this never
    /// needs to look at `wildcard_child`.
    fn collect_retained(&self, node: NodeId, segments: &[&str], out: &mut Vec<Message>) {
        if segments.is_empty() {
            if let Some(msg) = &self.nodes[node].retained {
                out.push(msg.clone());
            }
            return;
        }

        let head = segments[0];
        let tail = &segments[1..];
        if head == "+" {
            for &child in self.nodes[node].children.values() {
                self.collect_retained(child, tail, out);
            }
        } else if let Some(&child) = self.nodes[node].children.get(head) {
            self.collect_retained(child, tail, out);
        }
    }

    fn subscribe_rec(
        &mut self,
        node: NodeId,
        segments: &[&str],
        id: SubscriptionId,
        session: SessionHandle,
        qos: QoS,
    ) {
        if segments.is_empty() {
            let key = self.nodes[node].subs.insert(StoredSub { id, session, qos });
            self.locations.insert(
                id,
                Location {
                    node,
                    list: ListKind::Exact,
                    key,
                },
            );
            return;
        }

        let seg = segments[0];
        let tail = &segments[1..];

        if seg == "#" {
            let key = self.nodes[node].mlwc_subs.insert(StoredSub { id, session, qos });
            self.locations.insert(
                id,
                Location {
                    node,
                    list: ListKind::MultiLevelWildcard,
                    key,
                },
            );
            return;
        }

        let child = if seg == "+" {
            match self.nodes[node].wildcard_child {
                Some(c) => c,
                None => {
                    let c = self.new_child(node, "+");
                    self.nodes[node].wildcard_child = Some(c);
                    c
                }
            }
        } else {
            match self.nodes[node].children.get(seg).copied() {
                Some(c) => c,
                None => {
                    let c = self.new_child(node, seg);
                    self.nodes[node].children.insert(seg.to_string(), c);
                    c
                }
            }
        };
        self.subscribe_rec(child, tail, id, session, qos);
    }

    /// Detach a subscription by id. Idempotent: an unknown id is a no-op,
    /// since a session may race a router-driven removal (e.g. `$SYS/close`)
    /// against its own `UNSUBSCRIBE`.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        let Some(loc) = self.locations.remove(&id) else {
            return;
        };
        match loc.list {
            ListKind::Exact => {
                self.nodes[loc.node].subs.remove(loc.key);
            }
            ListKind::MultiLevelWildcard => {
                self.nodes[loc.node].mlwc_subs.remove(loc.key);
            }
        }
        self.maybe_prune(loc.node);
    }

    /// Update the granted QoS of an existing subscription in place, used
    /// when a client re-subscribes to a filter it already holds (Open
    /// Question: the reference broker leaves the old grant
    /// untouched on re-subscribe; this broker updates it, matching the
    /// OASIS v3.1 requirement that a `SUBSCRIBE` of an existing filter
    /// replaces the prior subscription's QoS).
    pub fn update_qos(&mut self, id: SubscriptionId, qos: QoS) {
        let Some(loc) = self.locations.get(&id) else {
            return;
        };
        match loc.list {
            ListKind::Exact => {
                if let Some(sub) = self.nodes[loc.node].subs.get_mut(loc.key) {
                    sub.qos = qos;
                }
            }
            ListKind::MultiLevelWildcard => {
                if let Some(sub) = self.nodes[loc.node].mlwc_subs.get_mut(loc.key) {
                    sub.qos = qos;
                }
            }
        }
    }

    /// True if `id` is already subscribed (used to decide Create vs
    /// `UpdateQos` at the router).
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.locations.contains_key(&id)
    }

    /// Deliver `msg` to every matching subscriber and update retained state.
    pub fn publish(&mut self, msg: &Message) {
        let owned: Vec<String> = codec::topic::split(&msg.topic).into_iter().map(str::to_string).collect();
        let segments: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.publish_rec(self.root, &segments, msg);
    }

    fn publish_rec(&mut self, node: NodeId, path: &[&str], msg: &Message) {
        if path.is_empty() {
            self.deliver_list(node, ListKind::Exact, msg);
        } else {
            let head = path[0];
            let tail = &path[1..];
            match self.nodes[node].children.get(head).copied() {
                Some(child) => self.publish_rec(child, tail, msg),
                None => {
                    if msg.retain {
                        let leaf = self.create_chain(node, path);
                        self.publish_rec(leaf, &[], msg);
                    }
                }
            }
            // The recursion above may have pruned `node` itself: clearing a
            // retained message can cascade `maybe_prune` up through every
            // ancestor with nothing else left alive, not just the node the
            // retained message lived on. `node` must be checked again before
            // any further indexing.
            if self.nodes.contains(node) {
                if let Some(wc) = self.nodes[node].wildcard_child {
                    self.publish_rec(wc, tail, msg);
                }
            }
        }

        if !self.nodes.contains(node) {
            return;
        }

        // Multi-level wildcard subscribers are notified before any retained
        // state mutation below: clearing an empty-payload retained message
        // can prune `node` out of the slab entirely (see `maybe_prune`), and
        // indexing `node` afterward would panic.
        self.deliver_list(node, ListKind::MultiLevelWildcard, msg);

        if path.is_empty() && msg.retain {
            if msg.payload.is_empty() {
                self.nodes[node].retained = None;
                self.maybe_prune(node);
            } else {
                self.nodes[node].retained = Some(msg.clone());
            }
        }
    }

    fn deliver_list(&self, node: NodeId, list: ListKind, msg: &Message) {
        let subs = match list {
            ListKind::Exact => &self.nodes[node].subs,
            ListKind::MultiLevelWildcard => &self.nodes[node].mlwc_subs,
        };
        for (_, sub) in subs.iter() {
            sub.session.deliver(msg, sub.qos, false);
        }
    }

    /// Create every node along `path` that doesn't exist yet, so a retained
    /// message published to a topic with no live subscribers still has
    /// somewhere to live. A published topic name never contains wildcard
    /// characters, so this is a plain literal chain.
    fn create_chain(&mut self, mut node: NodeId, path: &[&str]) -> NodeId {
        for seg in path {
            node = match self.nodes[node].children.get(*seg).copied() {
                Some(id) => id,
                None => {
                    let id = self.new_child(node, seg);
                    self.nodes[node].children.insert((*seg).to_string(), id);
                    id
                }
            };
        }
        node
    }

    fn eligible_for_removal(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        node.parent.is_some()
            && node.subs.is_empty()
            && node.mlwc_subs.is_empty()
            && node.retained.is_none()
            && node.wildcard_child.is_none()
            && node.children.is_empty()
    }

    fn maybe_prune(&mut self, id: NodeId) {
        if self.eligible_for_removal(id) {
            self.remove_node(id);
        }
    }

    fn remove_node(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id].parent else {
            return;
        };
        let name = self.nodes[id].name.clone();
        if name == "+" {
            self.nodes[parent].wildcard_child = None;
        } else {
            self.nodes[parent].children.remove(&name);
        }
        self.nodes.remove(id);
        self.maybe_prune(parent);
    }

    /// Exact-match subscribers at `path`, used by the router's `$SYS/all`
    /// shutdown walk. Does not consider wildcard subscribers:
    /// the walk only needs sessions that registered under the literal
    /// `$SYS/all` topic.
    #[must_use]
    pub fn exact_subscribers(&self, path: &[&str]) -> Vec<SessionHandle> {
        let mut node = self.root;
        for seg in path {
            match self.nodes[node].children.get(*seg) {
                Some(&id) => node = id,
                None => return Vec::new(),
            }
        }
        self.nodes[node].subs.iter().map(|(_, s)| s.session.clone()).collect()
    }
}
