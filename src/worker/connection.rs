//! Message handler a worker binds under its registered id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use super::{Configurable, TransactionManager};
use crate::compensation::Compensable;
use crate::transfer::{
    Body, Command, Envelope, MessageHandler, SpecialCommand, WorkerReply, TRANSACTION_BEGIN,
    TRANSACTION_COMMIT, TRANSACTION_ROLLBACK, TX_ID_ARG,
};

/// Connection-level instruction surfaced to the owning agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    ResetConnection,
    Exit(i32),
}

struct Inner<H: Compensable> {
    handler: H,
    transactions: TransactionManager<H::Op>,
}

/// Routes incoming requests to the transaction manager or the handler's
/// command table, recording undos while a transaction is open.
pub struct WorkerConnection<H: Compensable> {
    inner: Mutex<Inner<H>>,
    signals: mpsc::UnboundedSender<ControlSignal>,
}

impl<H: Configurable> WorkerConnection<H> {
    pub fn new(handler: H) -> (Arc<Self>, mpsc::UnboundedReceiver<ControlSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            inner: Mutex::new(Inner {
                handler,
                transactions: TransactionManager::new(),
            }),
            signals,
        });
        (connection, rx)
    }

    pub(crate) fn signal_sender(&self) -> mpsc::UnboundedSender<ControlSignal> {
        self.signals.clone()
    }

    /// Run `f` with exclusive access to the handler.
    pub async fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        let mut inner = self.inner.lock().await;
        f(&mut inner.handler)
    }

    pub async fn in_transaction(&self) -> bool {
        self.inner.lock().await.transactions.in_transaction()
    }

    /// Forget any open transaction and clear the handler.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.transactions = TransactionManager::new();
        inner.handler.reset();
    }

    /// Execute one ordinary or transaction-control command.
    pub async fn execute(&self, command: &Command) -> WorkerReply {
        let mut guard = self.inner.lock().await;
        let Inner {
            handler,
            transactions,
        } = &mut *guard;

        let tx_id = command
            .arg(TX_ID_ARG)
            .and_then(Value::as_str)
            .unwrap_or_default();

        match command.method.as_str() {
            TRANSACTION_BEGIN => {
                transactions.begin(tx_id);
                Ok(json!({}))
            }
            TRANSACTION_COMMIT => {
                if transactions.current() != Some(tx_id) {
                    warn!(expected = ?transactions.current(), tx_id = %tx_id, "Commit for other transaction");
                }
                transactions.commit();
                Ok(json!({}))
            }
            TRANSACTION_ROLLBACK => {
                if !transactions.in_transaction() {
                    debug!(tx_id = %tx_id, "Rollback without open transaction");
                    return Ok(json!({}));
                }
                transactions.rollback(handler).map(|_| json!({}))
            }
            method => {
                let create_undo = transactions.in_transaction();
                let reply = H::commands().dispatch(handler, method, &command.args, create_undo);
                match (reply.result, reply.undo) {
                    (Ok(value), Some(undo)) => {
                        transactions.record(undo);
                        Ok(value)
                    }
                    (Ok(value), None) => Ok(value),
                    (Err(e), Some(partial)) => {
                        debug!(method = %method, error = %e, "Restoring after partial failure");
                        if let Err(undo_err) = partial.execute(handler) {
                            error!(method = %method, error = %undo_err, "Partial failure could not be restored");
                        }
                        Err(e)
                    }
                    (Err(e), None) => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl<H: Configurable> MessageHandler for WorkerConnection<H> {
    async fn handle(&self, envelope: Envelope) -> WorkerReply {
        match envelope.body {
            Body::Special(SpecialCommand::Heartbeat) => {
                let state = self.with_handler(|h| h.health()).await;
                Ok(json!({ "state": state }))
            }
            Body::Special(SpecialCommand::ResetConnection) => {
                let _ = self.signals.send(ControlSignal::ResetConnection);
                Ok(json!({}))
            }
            Body::Special(SpecialCommand::ExitProcess { status_code }) => {
                let _ = self.signals.send(ControlSignal::Exit(status_code));
                Ok(json!({}))
            }
            Body::Command(command) => self.execute(&command).await,
        }
    }
}
