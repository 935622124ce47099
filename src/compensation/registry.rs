//! Explicit method-name routing for compensable handlers.

use std::collections::HashMap;

use super::{CommandReply, Compensable, Operation};
use crate::transfer::{Args, CommandError};

/// Function implementing one operation of handler `H`.
///
/// `Err` is a rejection with no side effects; a failure that did change
/// state returns `Ok` with an error result and the undo restoring it.
pub type CommandFn<H> =
    fn(&mut H, &Args, bool) -> Result<CommandReply<<H as Compensable>::Op>, CommandError>;

/// Table from operation tag to the function implementing it.
pub struct CommandRegistry<H: Compensable> {
    routes: HashMap<&'static str, (H::Op, CommandFn<H>)>,
}

impl<H: Compensable> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<H: Compensable> CommandRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, op: H::Op, f: CommandFn<H>) -> Self {
        self.routes.insert(op.method_name(), (op, f));
        self
    }

    /// Resolve a wire method name to its tag.
    pub fn resolve(&self, method: &str) -> Option<H::Op> {
        self.routes.get(method).map(|(op, _)| *op)
    }

    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.keys().copied()
    }

    /// Run the operation named `method`. Unknown names are rejected.
    pub fn dispatch(
        &self,
        handler: &mut H,
        method: &str,
        args: &Args,
        create_undo: bool,
    ) -> CommandReply<H::Op> {
        match self.routes.get(method) {
            Some((_, f)) => f(handler, args, create_undo).unwrap_or_else(CommandReply::failed),
            None => CommandReply::failed(CommandError::rejected(format!(
                "unknown method [{method}]"
            ))),
        }
    }

    pub fn invoke(
        &self,
        handler: &mut H,
        op: H::Op,
        args: &Args,
        create_undo: bool,
    ) -> CommandReply<H::Op> {
        self.dispatch(handler, op.method_name(), args, create_undo)
    }
}
