// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Arc;

use clap::Parser;
use hebo::config::{BrokerConfig, SessionConfig, DEFAULT_MAX_PACKET_SIZE};
use hebo::{AllowAll, Listener, Router};
use log::error;

/// Single-node MQTT v3.1 broker.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Address to listen for MQTT connections on.
    #[arg(short, long, default_value = "0.0.0.0:1883")]
    listen: String,

    /// Largest encoded control packet the broker will decode or emit.
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    max_packet_size: usize,

    /// Largest accepted `ClientId` byte length.
    #[arg(long, default_value_t = codec::utils::DEFAULT_MAX_CLIENT_ID_LEN)]
    max_client_id_len: usize,

    /// Increase log verbosity. Repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = BrokerConfig {
        listen_address: cli.listen,
        session: SessionConfig {
            max_packet_size: cli.max_packet_size,
            max_client_id_len: cli.max_client_id_len,
        },
    };

    let (router, router_handle) = Router::new();
    let router_task = tokio::spawn(router.run());

    let listener = match Listener::bind(&config, router_handle, Arc::new(AllowAll)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {err}", config.listen_address);
            std::process::exit(1);
        }
    };

    if let Err(err) = listener.run().await {
        error!("listener exited: {err}");
    }

    let _ = router_task.await;
}
