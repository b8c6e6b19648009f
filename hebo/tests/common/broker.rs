// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Spawns a whole broker (router task + listener accept loop) in-process on
//! an ephemeral loopback port, the way `examples/RustRobotics-hebo`'s own
//! `tests/common/server.rs` spawns a compiled binary as a subprocess - this
//! crate has no file-based config loader to hand such a subprocess a config
//! file, so the equivalent here runs the same `Router`/`Listener` types the
//! `hebo` binary itself constructs, directly in the test process.

use std::net::SocketAddr;
use std::sync::Arc;

use hebo::{AllowAll, BrokerConfig, Listener, Router};

pub struct TestBroker {
    pub addr: SocketAddr,
}

impl TestBroker {
    /// Binds to `127.0.0.1:0`, letting the OS pick a free port, and spawns
    /// the router and accept loop as background tasks for the lifetime of
    /// the test process.
    pub async fn start() -> Self {
        let config = BrokerConfig {
            listen_address: "127.0.0.1:0".to_string(),
            ..BrokerConfig::default()
        };

        let (router, router_handle) = Router::new();
        tokio::spawn(router.run());

        let listener = Listener::bind(&config, router_handle, Arc::new(AllowAll))
            .await
            .expect("bind ephemeral test port");
        let addr = listener.local_addr().expect("listener local_addr");

        tokio::spawn(async move {
            let _ = listener.run().await;
        });

        Self { addr }
    }
}
