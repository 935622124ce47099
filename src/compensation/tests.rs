use std::collections::BTreeSet;
use std::sync::OnceLock;

use serde_json::{json, Value};

use super::*;
use crate::transfer::{str_arg, Args, CommandError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameOp {
    Add,
    Remove,
}

impl Operation for NameOp {
    fn method_name(&self) -> &'static str {
        match self {
            NameOp::Add => "add",
            NameOp::Remove => "remove",
        }
    }
}

/// Set of names with a log of applied calls, for observing execution order.
#[derive(Default)]
struct Names {
    names: BTreeSet<String>,
    log: Vec<String>,
    refuse_remove: Option<String>,
}

fn args_for(name: &str) -> Args {
    let mut args = Args::new();
    args.insert("name".to_string(), Value::from(name));
    args
}

impl Names {
    fn add(&mut self, args: &Args, create_undo: bool) -> Result<CommandReply<NameOp>, CommandError> {
        let name = str_arg(args, "name")?.to_string();
        if !self.names.insert(name.clone()) {
            return Err(CommandError::rejected("exists"));
        }
        self.log.push(format!("add {name}"));
        Ok(CommandReply::ok(Value::Null).with_undo(
            CompensatingAction::new(NameOp::Remove, args_for(&name)),
            create_undo,
        ))
    }

    fn remove(
        &mut self,
        args: &Args,
        create_undo: bool,
    ) -> Result<CommandReply<NameOp>, CommandError> {
        let name = str_arg(args, "name")?.to_string();
        if self.refuse_remove.as_deref() == Some(name.as_str()) || !self.names.remove(&name) {
            return Err(CommandError::rejected("unknown"));
        }
        self.log.push(format!("remove {name}"));
        Ok(CommandReply::ok(Value::Null).with_undo(
            CompensatingAction::new(NameOp::Add, args_for(&name)),
            create_undo,
        ))
    }
}

impl Compensable for Names {
    type Op = NameOp;

    fn commands() -> &'static CommandRegistry<Self> {
        static COMMANDS: OnceLock<CommandRegistry<Names>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandRegistry::new()
                .route(NameOp::Add, Names::add)
                .route(NameOp::Remove, Names::remove)
        })
    }
}

fn undo_of(reply: CommandReply<NameOp>) -> Undo<NameOp> {
    reply.undo.expect("reply should carry an undo")
}

#[test]
fn test_successful_op_returns_exact_reverse() {
    let mut names = Names::default();
    let reply = names.invoke(NameOp::Add, &args_for("Temp"), true);
    assert!(reply.is_ok());

    let undo = undo_of(reply);
    match &undo {
        Undo::Action(action) => {
            assert_eq!(action.op(), NameOp::Remove);
            assert_eq!(action.to_command().method, "remove");
            assert_eq!(action.args().get("name"), Some(&json!("Temp")));
        }
        Undo::Set(_) => panic!("expected single action"),
    }

    undo.execute(&mut names).unwrap();
    assert!(names.names.is_empty());
}

#[test]
fn test_rejected_op_carries_no_undo() {
    let mut names = Names::default();
    names.invoke(NameOp::Add, &args_for("Temp"), true);

    let reply = names.invoke(NameOp::Add, &args_for("Temp"), true);
    assert!(reply.undo.is_none());
    let err = reply.result.unwrap_err();
    assert_eq!(err.code, ErrorCode::CommandNotExecuted);
    assert_eq!(err.message, "exists");
}

#[test]
fn test_no_undo_when_not_requested() {
    let mut names = Names::default();
    let reply = names.invoke(NameOp::Add, &args_for("Temp"), false);
    assert!(reply.is_ok());
    assert!(reply.undo.is_none());
}

#[test]
fn test_set_executes_newest_first() {
    let mut names = Names::default();
    let mut set = CompensatingActionSet::new();
    for name in ["a", "b", "c"] {
        set.push(undo_of(names.invoke(NameOp::Add, &args_for(name), true)));
    }
    assert_eq!(set.len(), 3);
    assert_eq!(set.execution_order(), ["remove", "remove", "remove"]);

    names.log.clear();
    set.execute(&mut names).unwrap();
    assert_eq!(names.log, ["remove c", "remove b", "remove a"]);
    assert!(names.names.is_empty());
}

#[test]
fn test_nested_set_unwinds_as_one_entry() {
    let mut names = Names::default();
    let mut inner = CompensatingActionSet::new();
    inner.push(undo_of(names.invoke(NameOp::Add, &args_for("x"), true)));
    inner.push(undo_of(names.invoke(NameOp::Add, &args_for("y"), true)));

    let mut outer = CompensatingActionSet::new();
    outer.push(undo_of(names.invoke(NameOp::Add, &args_for("first"), true)));
    outer.push(inner);
    outer.push(undo_of(names.invoke(NameOp::Add, &args_for("last"), true)));

    names.log.clear();
    outer.execute(&mut names).unwrap();
    assert_eq!(
        names.log,
        ["remove last", "remove y", "remove x", "remove first"]
    );
}

#[test]
fn test_set_stops_at_first_failure() {
    let mut names = Names::default();
    let mut set = CompensatingActionSet::new();
    for name in ["a", "b", "c"] {
        set.push(undo_of(names.invoke(NameOp::Add, &args_for(name), true)));
    }
    names.refuse_remove = Some("b".to_string());
    names.log.clear();

    let err = set.execute(&mut names).unwrap_err();
    assert_eq!(err.message, "unknown");
    assert_eq!(names.log, ["remove c"]);
    assert!(names.names.contains("a"));
    assert!(names.names.contains("b"));
}

#[test]
fn test_registry_rejects_unknown_method() {
    let mut names = Names::default();
    let reply = Names::commands().dispatch(&mut names, "explode", &Args::new(), true);
    let err = reply.result.unwrap_err();
    assert_eq!(err.code, ErrorCode::CommandNotExecuted);
    assert!(err.message.contains("explode"));
}

#[test]
fn test_registry_resolves_method_names() {
    assert_eq!(Names::commands().resolve("add"), Some(NameOp::Add));
    assert_eq!(Names::commands().resolve("nope"), None);
    let mut methods: Vec<_> = Names::commands().methods().collect();
    methods.sort();
    assert_eq!(methods, ["add", "remove"]);
}
