// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-channel topic-subscribe transport (`spec.md` §6).
//!
//! A persistent WebSocket connection multiplexing per-topic subscriptions;
//! `tokio-tungstenite` is already a teacher dependency used for a similar
//! local-sidecar streaming connection (`crates/adapters/src/agent/docker`).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum PushChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Serialize)]
struct SubscribeFrame<'a> {
    action: &'static str,
    topic: &'a str,
}

/// Raw frame received on a subscribed topic, tagged by topic and kind so the
/// caller can route to `WorkerCommandEvent` or `WorkspaceEvent` parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct PushFrame {
    pub topic: String,
    pub kind: String,
    pub body: serde_json::Value,
}

/// Adapter seam to the push-channel transport. Implementations hand back a
/// receiver of frames for every topic ever subscribed to on this client.
#[async_trait]
pub trait PushChannelClient: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> Result<(), PushChannelError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), PushChannelError>;
}

/// WebSocket-backed push channel. Connects once; `subscribe`/`unsubscribe`
/// send control frames over the shared socket. Incoming frames are fanned
/// out on the channel returned by [`WsPushChannelClient::connect`].
pub struct WsPushChannelClient {
    outbound: mpsc::Sender<Message>,
}

impl WsPushChannelClient {
    /// Connect to `url` and spawn the read/write pump. Returns the client
    /// handle plus a receiver of parsed [`PushFrame`]s.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<PushFrame>), PushChannelError> {
        let (stream, _) =
            tokio_tungstenite::connect_async(url).await.map_err(|e| PushChannelError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<PushFrame>(256);

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                let Message::Text(text) = msg else { continue };
                match serde_json::from_str::<PushFrame>(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping unparsable push frame"),
                }
            }
        });

        Ok((Self { outbound: outbound_tx }, inbound_rx))
    }
}

#[async_trait]
impl PushChannelClient for WsPushChannelClient {
    async fn subscribe(&self, topic: &str) -> Result<(), PushChannelError> {
        let frame = SubscribeFrame { action: "subscribe", topic };
        let text = serde_json::to_string(&frame).map_err(|_| PushChannelError::Closed)?;
        self.outbound.send(Message::Text(text)).await.map_err(|_| PushChannelError::Closed)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), PushChannelError> {
        let frame = SubscribeFrame { action: "unsubscribe", topic };
        let text = serde_json::to_string(&frame).map_err(|_| PushChannelError::Closed)?;
        self.outbound.send(Message::Text(text)).await.map_err(|_| PushChannelError::Closed)
    }
}
