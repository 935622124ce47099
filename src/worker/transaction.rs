//! Worker-local transaction: an undo stack bracketed by begin and commit/rollback.

use tracing::{debug, info, warn};

use crate::compensation::{Compensable, CompensatingActionSet, Operation, Undo};
use crate::transfer::CommandError;

/// Tracks the open worker-local transaction and the undos recorded inside it.
#[derive(Debug)]
pub struct TransactionManager<O: Operation> {
    current: Option<String>,
    undos: CompensatingActionSet<O>,
}

impl<O: Operation> Default for TransactionManager<O> {
    fn default() -> Self {
        Self {
            current: None,
            undos: CompensatingActionSet::new(),
        }
    }
}

impl<O: Operation> TransactionManager<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Number of undos waiting on the stack.
    pub fn pending(&self) -> usize {
        self.undos.len()
    }

    /// Enter a transaction with an empty undo stack.
    ///
    /// A begin while already inside one discards the old stack and restarts.
    pub fn begin(&mut self, tx_id: &str) {
        if let Some(previous) = &self.current {
            warn!(
                previous = %previous,
                tx_id = %tx_id,
                dropped_undos = self.undos.len(),
                "Begin inside open transaction, restarting"
            );
        }
        self.undos.clear();
        self.current = Some(tx_id.to_string());
        debug!(tx_id = %tx_id, "Transaction begun");
    }

    /// Record an undo. Ignored outside a transaction.
    pub fn record(&mut self, undo: Undo<O>) {
        if self.in_transaction() {
            self.undos.push(undo);
        }
    }

    /// Keep every applied change and leave the transaction.
    pub fn commit(&mut self) {
        info!(
            tx_id = ?self.current,
            undos = self.undos.len(),
            "Transaction committed"
        );
        self.undos.clear();
        self.current = None;
    }

    /// Execute recorded undos newest first, then leave the transaction.
    ///
    /// Stops at the first failing undo and reports it. The transaction is
    /// closed either way.
    pub fn rollback<H>(&mut self, handler: &mut H) -> Result<(), CommandError>
    where
        H: Compensable<Op = O>,
    {
        let undos = std::mem::take(&mut self.undos);
        let tx_id = self.current.take();
        let count = undos.len();
        let result = undos.execute(handler);
        match &result {
            Ok(()) => info!(tx_id = ?tx_id, undos = count, "Transaction rolled back"),
            Err(e) => warn!(tx_id = ?tx_id, error = %e, "Transaction rollback incomplete"),
        }
        result
    }
}
