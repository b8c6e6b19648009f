// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The async write adapter: an unbounded queue interposed
//! between encoding and the socket, so a slow reader on the other end of
//! the TCP connection never blocks the router or another session's reader
//! task from making progress.

use log::warn;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawns the single consumer task that drains encoded frames to `sink`.
/// Returns a cloneable sender; dropping every clone lets the task drain
/// whatever is already queued, then exit and close the socket's write half.
#[must_use]
pub fn spawn(mut sink: OwnedWriteHalf) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = sink.write_all(&frame).await {
                warn!("writer: failed to write frame, closing: {err}");
                break;
            }
        }
        let _ = sink.shutdown().await;
    });
    (tx, handle)
}
