// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The authorization boundary a session consults before it acts.
//!
//! Unlike the router, a `Handler` is called directly from each session's own
//! task (there is one per connection, running concurrently), so the trait
//! must be `Send + Sync` and its methods plain synchronous calls rather than
//! channel round-trips. Policy (ACLs, credential stores, rate limits) is
//! explicitly out of scope here; this crate only defines the seam.

use codec::v3::ConnectReturnCode;
use codec::QoS;

/// Outcome of a `CONNECT` authorization check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectDecision {
    Accept,
    Reject(ConnectReturnCode),
}

/// Capability boundary consulted at each point a session would otherwise
/// need broker-wide policy knowledge: connecting, publishing, subscribing,
/// and disconnecting.
pub trait Handler: Send + Sync {
    /// Called once, after the `CONNECT` packet decodes successfully and
    /// before a `CONNACK` is sent.
    fn on_connect(&self, client_id: &str, username: Option<&str>, password: Option<&[u8]>) -> ConnectDecision;

    /// Called once the session has fully closed, for audit/cleanup hooks.
    /// Infallible: a disconnect is never refused.
    fn on_disconnect(&self, client_id: &str);

    /// Called for every inbound `PUBLISH`, before it reaches the router.
    /// Returning `false` drops the message silently as a policy decision,
    /// not a protocol error.
    fn on_publish(&self, client_id: &str, topic: &str) -> bool;

    /// Called for each topic filter in an inbound `SUBSCRIBE`, before the
    /// router registers it. Returning `false` causes that filter to be
    /// granted `SubscribeAck::Failed` rather than a QoS.
    fn on_subscribe(&self, client_id: &str, filter: &str, qos: QoS) -> bool;
}

/// Permits everything. The broker's default policy when no [`Handler`] is
/// supplied, matching the reference broker's behavior with an empty ACL
/// table.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Handler for AllowAll {
    fn on_connect(&self, _client_id: &str, _username: Option<&str>, _password: Option<&[u8]>) -> ConnectDecision {
        ConnectDecision::Accept
    }

    fn on_disconnect(&self, _client_id: &str) {}

    fn on_publish(&self, _client_id: &str, _topic: &str) -> bool {
        true
    }

    fn on_subscribe(&self, _client_id: &str, _filter: &str, _qos: QoS) -> bool {
        true
    }
}
