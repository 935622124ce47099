//! Compensating actions.
//!
//! A successful forward operation on a [`Compensable`] handler may return an
//! [`Undo`]: either a single [`CompensatingAction`] that exactly reverses it,
//! or a [`CompensatingActionSet`] for composite operations that stopped part
//! way. Undo values are consumed by execution, so each reversal runs at most
//! once.
//!
//! Operations are a finite tag set ([`Operation`]) per handler type, routed
//! through an explicit [`CommandRegistry`] rather than looked up by name at
//! runtime reflection.

mod registry;

pub use registry::{CommandFn, CommandRegistry};

use std::fmt::Debug;

use serde_json::Value;
use tracing::{debug, warn};

use crate::transfer::{Args, Command, CommandError};

/// Finite operation tag set of a handler.
pub trait Operation: Copy + Debug + Eq + Send + Sync + 'static {
    /// Wire method name for this tag.
    fn method_name(&self) -> &'static str;
}

/// A handler whose operations can be invoked by tag and reversed.
pub trait Compensable: Send + Sized + 'static {
    type Op: Operation;

    /// Routing table for this handler type.
    fn commands() -> &'static CommandRegistry<Self>;

    /// Run `op` against this handler.
    ///
    /// `create_undo` is false when the caller will never roll back, e.g.
    /// outside a transaction or while executing an undo itself.
    fn invoke(&mut self, op: Self::Op, args: &Args, create_undo: bool) -> CommandReply<Self::Op> {
        Self::commands().invoke(self, op, args, create_undo)
    }
}

/// The reverse of a prior effect: an operation tag plus its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensatingAction<O: Operation> {
    op: O,
    args: Args,
}

impl<O: Operation> CompensatingAction<O> {
    pub fn new(op: O, args: Args) -> Self {
        Self { op, args }
    }

    pub fn op(&self) -> O {
        self.op
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Wire form of this action.
    pub fn to_command(&self) -> Command {
        Command::new(self.op.method_name(), self.args.clone())
    }

    /// Execute the reversal. Undo execution never produces further undos.
    pub fn execute<H>(self, handler: &mut H) -> Result<(), CommandError>
    where
        H: Compensable<Op = O>,
    {
        debug!(method = self.op.method_name(), "Executing compensating action");
        handler.invoke(self.op, &self.args, false).result.map(|_| ())
    }
}

/// Ordered collection of undos executed newest first.
///
/// Later forward steps may depend on state created by earlier ones, so the
/// reversal runs in reverse order of addition. Execution stops at the first
/// failing entry and reports it; entries below it are left unexecuted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensatingActionSet<O: Operation> {
    stack: Vec<Undo<O>>,
}

impl<O: Operation> Default for CompensatingActionSet<O> {
    fn default() -> Self {
        Self { stack: Vec::new() }
    }
}

impl<O: Operation> CompensatingActionSet<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, undo: impl Into<Undo<O>>) {
        self.stack.push(undo.into());
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Drop every entry without executing it.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Wire methods in execution order.
    pub fn execution_order(&self) -> Vec<&'static str> {
        let mut methods = Vec::new();
        for undo in self.stack.iter().rev() {
            match undo {
                Undo::Action(action) => methods.push(action.op.method_name()),
                Undo::Set(set) => methods.extend(set.execution_order()),
            }
        }
        methods
    }

    pub fn execute<H>(mut self, handler: &mut H) -> Result<(), CommandError>
    where
        H: Compensable<Op = O>,
    {
        let total = self.stack.len();
        while let Some(undo) = self.stack.pop() {
            if let Err(e) = undo.execute(handler) {
                warn!(
                    remaining = self.stack.len(),
                    total,
                    error = %e,
                    "Compensation stopped at failing undo"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Either a single compensating action or a nested set.
#[derive(Debug, Clone, PartialEq)]
pub enum Undo<O: Operation> {
    Action(CompensatingAction<O>),
    Set(CompensatingActionSet<O>),
}

impl<O: Operation> Undo<O> {
    pub fn execute<H>(self, handler: &mut H) -> Result<(), CommandError>
    where
        H: Compensable<Op = O>,
    {
        match self {
            Undo::Action(action) => action.execute(handler),
            Undo::Set(set) => set.execute(handler),
        }
    }
}

impl<O: Operation> From<CompensatingAction<O>> for Undo<O> {
    fn from(action: CompensatingAction<O>) -> Self {
        Undo::Action(action)
    }
}

impl<O: Operation> From<CompensatingActionSet<O>> for Undo<O> {
    fn from(set: CompensatingActionSet<O>) -> Self {
        Undo::Set(set)
    }
}

/// Outcome of one operation on a handler.
///
/// A failed composite operation may still carry an undo: the partial set of
/// sub-steps that did complete, to be executed to restore the prior state.
#[derive(Debug)]
pub struct CommandReply<O: Operation> {
    pub result: Result<Value, CommandError>,
    pub undo: Option<Undo<O>>,
}

impl<O: Operation> CommandReply<O> {
    pub fn ok(value: Value) -> Self {
        Self {
            result: Ok(value),
            undo: None,
        }
    }

    pub fn failed(error: CommandError) -> Self {
        Self {
            result: Err(error),
            undo: None,
        }
    }

    /// Shorthand for an application rejection with no side effects.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::failed(CommandError::rejected(message))
    }

    /// Attach `undo` only when the caller asked for one.
    pub fn with_undo(mut self, undo: impl Into<Undo<O>>, create_undo: bool) -> Self {
        if create_undo {
            self.undo = Some(undo.into());
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests;
