// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! TCP accept loop: one [`crate::session`] task per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use crate::config::{BrokerConfig, SessionConfig};
use crate::error::Error;
use crate::handler::Handler;
use crate::router::RouterHandle;
use crate::session;

/// Binds `config.listen_address` and spawns a [`session::run`] task for
/// every accepted connection, forever, until the process is killed or the
/// listener socket itself errors.
pub struct Listener {
    tcp: TcpListener,
    router: RouterHandle,
    handler: Arc<dyn Handler>,
    session_config: SessionConfig,
}

impl Listener {
    /// # Errors
    ///
    /// Returns error if binding `config.listen_address` fails.
    pub async fn bind(config: &BrokerConfig, router: RouterHandle, handler: Arc<dyn Handler>) -> Result<Self, Error> {
        let tcp = TcpListener::bind(&config.listen_address).await?;
        info!("listener: bound to {}", config.listen_address);
        Ok(Self {
            tcp,
            router,
            handler,
            session_config: config.session.clone(),
        })
    }

    /// The address actually bound, useful when `config.listen_address` asked
    /// for an ephemeral port (`:0`), as integration tests do.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying socket can't report its local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Runs the accept loop. Each connection gets its own task and this
    /// method does not wait for any of them; it only returns if `accept`
    /// itself errors, which on a bound socket only happens when the
    /// process is out of file descriptors or similar resource exhaustion.
    pub async fn run(self) -> Result<(), Error> {
        loop {
            let (stream, peer_addr) = match self.tcp.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("listener: accept failed: {err}");
                    return Err(err.into());
                }
            };
            info!("listener: accepted connection from {peer_addr}");

            let router = self.router.clone();
            let handler = Arc::clone(&self.handler);
            let session_config = self.session_config.clone();
            tokio::spawn(async move {
                session::run(stream, router, handler, session_config).await;
            });
        }
    }
}
