//! Wire vocabulary shared by the coordinator and its workers.
//!
//! Every exchange is a single request/reply: an [`Envelope`] addressed to a
//! handler, answered by exactly one [`WorkerReply`]. Ordinary requests carry
//! a [`Command`]; a small fixed set of [`SpecialCommand`]s is recognised by a
//! worker before ordinary dispatch.

pub mod channel;
mod error;
pub mod transport;

pub use channel::ChannelTransport;
pub use error::{CommandError, ErrorCode, TransportError};
pub use transport::{MessageHandler, TransportLayer};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Address the fleet registry listens on.
pub const REGISTRY_ADDRESS: &str = "sm_address";
/// Broadcast address used to tell every worker to drop its state and re-register.
pub const RESET_BROADCAST_ADDRESS: &str = "module_reset";

/// Method name opening a worker-local transaction.
pub const TRANSACTION_BEGIN: &str = "transactionBegin";
/// Method name committing a worker-local transaction.
pub const TRANSACTION_COMMIT: &str = "transactionCommit";
/// Method name rolling back a worker-local transaction.
pub const TRANSACTION_ROLLBACK: &str = "transactionRollback";

/// Argument key carrying a transaction id on transaction control commands.
pub const TX_ID_ARG: &str = "txId";

/// Insertion-ordered argument map.
pub type Args = Map<String, Value>;

/// Reply to any request: a JSON result or a structured error.
pub type WorkerReply = std::result::Result<Value, CommandError>;

/// A named operation plus its arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub method: String,
    #[serde(default)]
    pub args: Args,
}

impl Command {
    pub fn new(method: impl Into<String>, args: Args) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Command with an empty argument map.
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Args::new())
    }

    /// Builder-style argument insertion, preserving insertion order.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn transaction_begin(tx_id: &str) -> Self {
        Self::bare(TRANSACTION_BEGIN).with_arg(TX_ID_ARG, tx_id)
    }

    pub fn transaction_commit(tx_id: &str) -> Self {
        Self::bare(TRANSACTION_COMMIT).with_arg(TX_ID_ARG, tx_id)
    }

    pub fn transaction_rollback(tx_id: &str) -> Self {
        Self::bare(TRANSACTION_ROLLBACK).with_arg(TX_ID_ARG, tx_id)
    }
}

/// Look up a required string argument.
pub fn str_arg<'a>(args: &'a Args, key: &str) -> std::result::Result<&'a str, CommandError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::invalid_message(format!("missing argument [{key}]")))
}

/// Commands handled by the worker runtime itself rather than its command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "special", rename_all = "camelCase")]
pub enum SpecialCommand {
    /// Liveness probe; the worker answers with its current state.
    Heartbeat,
    /// Drop the current registration and start over.
    ResetConnection,
    /// Stop the worker process with the given status code.
    ExitProcess { status_code: i32 },
}

impl SpecialCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SpecialCommand::Heartbeat => "heartbeat",
            SpecialCommand::ResetConnection => "resetConnection",
            SpecialCommand::ExitProcess { .. } => "exitProcess",
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Special(SpecialCommand),
    Command(Command),
}

/// Addressed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub receiver: String,
    pub body: Body,
}

impl Envelope {
    pub fn command(receiver: impl Into<String>, command: Command) -> Self {
        Self {
            sender: None,
            receiver: receiver.into(),
            body: Body::Command(command),
        }
    }

    pub fn special(receiver: impl Into<String>, special: SpecialCommand) -> Self {
        Self {
            sender: None,
            receiver: receiver.into(),
            body: Body::Special(special),
        }
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Short label for logging.
    pub fn label(&self) -> &str {
        match &self.body {
            Body::Command(command) => &command.method,
            Body::Special(special) => special.name(),
        }
    }
}
