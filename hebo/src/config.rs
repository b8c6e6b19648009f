// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};

use codec::utils::DEFAULT_MAX_CLIENT_ID_LEN;

/// Six megabytes, matching the OASIS MQTT v3.1 maximum packet size.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 6 * 1024 * 1024;

/// The broker doubles the client's declared keep alive to get an idle-read
/// timeout: "1.5x keep_alive" rounds down to the same threshold the
/// reference broker uses, applied as `keep_alive * 3 / 2`.
pub const KEEP_ALIVE_IDLE_FACTOR_NUM: u64 = 3;
pub const KEEP_ALIVE_IDLE_FACTOR_DEN: u64 = 2;

/// Broker-wide configuration, shared read-only by the listener and every
/// session it spawns.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Address the TCP listener binds to, e.g. `0.0.0.0:1883`.
    pub listen_address: String,

    #[serde(flatten)]
    pub session: SessionConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:1883".to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Per-session limits, applied uniformly to every connection this broker
/// accepts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Largest encoded control packet the broker will decode or emit.
    pub max_packet_size: usize,

    /// Largest accepted `ClientId` byte length.
    pub max_client_id_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_client_id_len: DEFAULT_MAX_CLIENT_ID_LEN,
        }
    }
}

impl SessionConfig {
    /// Idle-read timeout derived from a CONNECT packet's `keep_alive` field,
    /// A `keep_alive` of zero disables the timeout.
    #[must_use]
    pub fn idle_timeout(&self, keep_alive: u16) -> Option<std::time::Duration> {
        if keep_alive == 0 {
            return None;
        }
        let secs = u64::from(keep_alive) * KEEP_ALIVE_IDLE_FACTOR_NUM / KEEP_ALIVE_IDLE_FACTOR_DEN;
        Some(std::time::Duration::from_secs(secs))
    }
}
