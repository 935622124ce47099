//! Unit of work in a coordinated batch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::registry::protocol::ERROR_KEY;
use crate::transfer::{Command, CommandError};

/// Decides whether a worker's reply counts as success.
pub trait ResultVerifier: Send + Sync {
    fn verify(&self, reply: &Value) -> Result<(), CommandError>;
}

impl<F> ResultVerifier for F
where
    F: Fn(&Value) -> Result<(), CommandError> + Send + Sync,
{
    fn verify(&self, reply: &Value) -> Result<(), CommandError> {
        self(reply)
    }
}

/// Any reply the worker did not reject is a success.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ResultVerifier for AcceptAll {
    fn verify(&self, _reply: &Value) -> Result<(), CommandError> {
        Ok(())
    }
}

/// Fails replies that carry an `error` member.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoErrorMember;

impl ResultVerifier for NoErrorMember {
    fn verify(&self, reply: &Value) -> Result<(), CommandError> {
        match reply.get(ERROR_KEY) {
            Some(error) => Err(CommandError::rejected(
                error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            )
            .with_details(reply.clone())),
            None => Ok(()),
        }
    }
}

/// A command for one worker, its deadline and how to judge the reply.
#[derive(Clone)]
pub struct TransactionalCommandTask {
    pub module_id: String,
    pub command: Command,
    pub verifier: Arc<dyn ResultVerifier>,
    pub timeout: Duration,
}

impl TransactionalCommandTask {
    pub fn new(module_id: impl Into<String>, command: Command, timeout: Duration) -> Self {
        Self {
            module_id: module_id.into(),
            command,
            verifier: Arc::new(AcceptAll),
            timeout,
        }
    }

    pub fn with_verifier(mut self, verifier: impl ResultVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }
}

impl fmt::Debug for TransactionalCommandTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalCommandTask")
            .field("module_id", &self.module_id)
            .field("method", &self.command.method)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
