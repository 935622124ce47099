//! In-process channel transport.
//!
//! Each bound address gets an mpsc inbox drained by its own task, so a
//! handler sees its requests one at a time in arrival order. Replies travel
//! back over a oneshot channel bounded by the caller's deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use super::{Envelope, MessageHandler, TransportError, TransportLayer, WorkerReply};

/// Inbox capacity per bound address.
const INBOX_CAPACITY: usize = 256;

struct Request {
    envelope: Envelope,
    reply: oneshot::Sender<WorkerReply>,
}

type Subscribers = Vec<(u64, Arc<dyn MessageHandler>)>;

/// Transport connecting handlers living in the same process.
#[derive(Default)]
pub struct ChannelTransport {
    inboxes: RwLock<HashMap<String, mpsc::Sender<Request>>>,
    subscribers: RwLock<HashMap<String, Subscribers>>,
    next_token: AtomicU64,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses that currently have a point-to-point handler.
    pub async fn bound_addresses(&self) -> Vec<String> {
        self.inboxes.read().await.keys().cloned().collect()
    }
}

fn spawn_inbox(address: String, handler: Arc<dyn MessageHandler>) -> mpsc::Sender<Request> {
    let (tx, mut rx) = mpsc::channel::<Request>(INBOX_CAPACITY);
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let reply = handler.handle(request.envelope).await;
            if request.reply.send(reply).is_err() {
                debug!(address = %address, "Requester gave up before reply was ready");
            }
        }
        debug!(address = %address, "Inbox closed");
    });
    tx
}

#[async_trait]
impl TransportLayer for ChannelTransport {
    async fn register_handler(&self, address: &str, handler: Arc<dyn MessageHandler>) {
        let inbox = spawn_inbox(address.to_string(), handler);
        let mut inboxes = self.inboxes.write().await;
        if inboxes.insert(address.to_string(), inbox).is_some() {
            warn!(address = %address, "Replaced existing handler");
        } else {
            info!(address = %address, "Handler registered");
        }
    }

    async fn unregister_handler(&self, address: &str) -> bool {
        let removed = self.inboxes.write().await.remove(address).is_some();
        if removed {
            info!(address = %address, "Handler unregistered");
        }
        removed
    }

    async fn send(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> std::result::Result<WorkerReply, TransportError> {
        let address = envelope.receiver.clone();
        let inbox = self
            .inboxes
            .read()
            .await
            .get(&address)
            .cloned()
            .ok_or_else(|| TransportError::NoHandlers {
                address: address.clone(),
            })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            envelope,
            reply: reply_tx,
        };

        let exchange = async {
            inbox
                .send(request)
                .await
                .map_err(|_| TransportError::NoHandlers {
                    address: address.clone(),
                })?;
            reply_rx
                .await
                .map_err(|_| TransportError::RecipientFailure {
                    address: address.clone(),
                    reason: "reply channel dropped".to_string(),
                })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout { address, timeout }),
        }
    }

    async fn subscribe(&self, address: &str, handler: Arc<dyn MessageHandler>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .await
            .entry(address.to_string())
            .or_default()
            .push((token, handler));
        debug!(address = %address, token, "Broadcast subscriber added");
        token
    }

    async fn unsubscribe(&self, address: &str, token: u64) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(list) = subscribers.get_mut(address) {
            list.retain(|(t, _)| *t != token);
            if list.is_empty() {
                subscribers.remove(address);
            }
        }
    }

    async fn publish(&self, address: &str, envelope: Envelope) -> usize {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subscribers
            .read()
            .await
            .get(address)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            let handler = Arc::clone(handler);
            let envelope = envelope.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(envelope).await {
                    debug!(error = %e, "Broadcast subscriber replied with error");
                }
            });
        }

        debug!(address = %address, subscribers = handlers.len(), "Published broadcast");
        handlers.len()
    }
}
