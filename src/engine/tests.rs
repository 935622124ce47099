use serde_json::{json, Value};

use super::keys::*;
use super::*;
use crate::compensation::{Compensable, CompensatingAction, Undo};
use crate::transfer::{Args, ErrorCode};
use crate::worker::Configurable;

fn args(value: Value) -> Args {
    value.as_object().cloned().expect("test args must be an object")
}

fn store_with_temp() -> EngineConfigStore {
    let mut store = EngineConfigStore::default();
    let reply = store.invoke(EngineOp::RegisterEventType, &args(json!({"name": "Temp"})), false);
    assert!(reply.is_ok());
    store
}

fn sensor_definition() -> Args {
    args(json!({
        "virtualSensorId": "vs-1",
        "eventTypes": [{"name": "Inside"}, {"name": "Outside"}],
        "resultEventType": {"name": "Delta"},
        "statements": [
            {"name": "diff", "query": "select * from Inside, Outside"}
        ],
        "resultStatement": {
            "name": "delta-out",
            "query": "select * from Delta",
            "targets": ["sink-a"]
        }
    }))
}

/// Engine whose listeners never attach, and optionally whose statements
/// cannot be destroyed either.
#[derive(Default)]
struct DeafEngine {
    inner: InMemoryEngine,
    stuck_statements: bool,
}

impl RuleEngine for DeafEngine {
    fn add_event_type(&mut self, name: &str, definition: &Value) -> Result<(), EngineError> {
        self.inner.add_event_type(name, definition)
    }
    fn remove_event_type(&mut self, name: &str) -> Result<(), EngineError> {
        self.inner.remove_event_type(name)
    }
    fn has_event_type(&self, name: &str) -> bool {
        self.inner.has_event_type(name)
    }
    fn event_type_names(&self) -> Vec<String> {
        self.inner.event_type_names()
    }
    fn create_statement(&mut self, name: &str, query: &str) -> Result<(), EngineError> {
        self.inner.create_statement(name, query)
    }
    fn destroy_statement(&mut self, name: &str) -> Result<(), EngineError> {
        if self.stuck_statements {
            return Err(EngineError(format!("{name} is pinned")));
        }
        self.inner.destroy_statement(name)
    }
    fn statement_text(&self, name: &str) -> Option<String> {
        self.inner.statement_text(name)
    }
    fn statement_names(&self) -> Vec<String> {
        self.inner.statement_names()
    }
    fn attach_listener(&mut self, statement: &str) -> Result<(), EngineError> {
        Err(EngineError(format!("no listener slot for {statement}")))
    }
    fn detach_listener(&mut self, statement: &str) -> Result<(), EngineError> {
        self.inner.detach_listener(statement)
    }
    fn has_listeners(&self, statement: &str) -> bool {
        self.inner.has_listeners(statement)
    }
    fn send_event(&mut self, event_type: &str, event: &Value) -> Result<(), EngineError> {
        self.inner.send_event(event_type, event)
    }
    fn processed_events(&self) -> u64 {
        self.inner.processed_events()
    }
    fn destroy_all(&mut self) {
        self.inner.destroy_all()
    }
}

fn deaf_store(stuck_statements: bool) -> EngineConfigStore {
    let mut store = EngineConfigStore::new(Box::new(DeafEngine {
        stuck_statements,
        ..DeafEngine::default()
    }));
    let reply = store.invoke(EngineOp::RegisterEventType, &args(json!({"name": "Temp"})), false);
    assert!(reply.is_ok());
    store
}

fn targeted_statement() -> Args {
    args(json!({"name": "hot", "query": "select * from Temp", "targets": ["sink-a"]}))
}

#[test]
fn test_unattachable_statement_is_dropped() {
    let mut store = deaf_store(false);

    let reply = store.invoke(EngineOp::RegisterStatement, &targeted_statement(), true);
    assert_eq!(reply.result.unwrap_err().message, "no listener slot for hot");
    assert!(reply.undo.is_none());
    assert!(!store.has_statement("hot"));
    assert!(store.sensor_targets("hot").is_none());
}

#[test]
fn test_failed_cleanup_keeps_attach_error() {
    let mut store = deaf_store(true);

    let reply = store.invoke(EngineOp::RegisterStatement, &targeted_statement(), true);
    assert_eq!(reply.result.unwrap_err().message, "no listener slot for hot");
    assert!(reply.undo.is_none());
    assert!(store.sensor_targets("hot").is_none());
}

#[test]
fn test_register_event_type_twice_rejects_second() {
    let mut store = EngineConfigStore::default();

    let first = store.invoke(EngineOp::RegisterEventType, &args(json!({"name": "Temp"})), true);
    assert!(first.is_ok());
    match first.undo {
        Some(Undo::Action(action)) => {
            assert_eq!(
                action,
                CompensatingAction::new(
                    EngineOp::UnregisterEventType,
                    args(json!({"name": "Temp"}))
                )
            );
        }
        other => panic!("expected single undo, got {other:?}"),
    }

    let second = store.invoke(EngineOp::RegisterEventType, &args(json!({"name": "Temp"})), true);
    assert!(second.undo.is_none());
    let err = second.result.unwrap_err();
    assert_eq!(err.code, ErrorCode::CommandNotExecuted);
    assert_eq!(err.message, "existing eventtype");
}

#[test]
fn test_unregister_unknown_event_type() {
    let mut store = EngineConfigStore::default();
    let reply = store.invoke(EngineOp::UnregisterEventType, &args(json!({"name": "Nope"})), true);
    assert_eq!(reply.result.unwrap_err().message, "unknown eventtype");
}

#[test]
fn test_unregister_event_type_undo_restores_config() {
    let mut store = EngineConfigStore::default();
    store.invoke(
        EngineOp::RegisterEventType,
        &args(json!({"name": "Temp", "config": {"unit": "C"}})),
        false,
    );

    let reply = store.invoke(EngineOp::UnregisterEventType, &args(json!({"name": "Temp"})), true);
    assert!(reply.is_ok());
    assert!(!store.has_event_type("Temp"));

    let Some(Undo::Action(action)) = reply.undo else {
        panic!("expected single undo");
    };
    assert_eq!(action.op(), EngineOp::RegisterEventType);
    assert_eq!(action.args().get("config"), Some(&json!({"unit": "C"})));
    action.execute(&mut store).unwrap();
    assert!(store.has_event_type("Temp"));
}

#[test]
fn test_statement_lifecycle() {
    let mut store = store_with_temp();

    let reply = store.invoke(
        EngineOp::RegisterStatement,
        &args(json!({"name": "hot", "query": "select * from Temp where value > 30"})),
        true,
    );
    assert!(reply.is_ok());
    assert!(store.has_statement("hot"));

    let again = store.invoke(
        EngineOp::RegisterStatement,
        &args(json!({"name": "hot", "query": "select * from Temp"})),
        true,
    );
    assert_eq!(again.result.unwrap_err().message, "already registered");

    let bad = store.invoke(
        EngineOp::RegisterStatement,
        &args(json!({"name": "cold", "query": "select * from Missing"})),
        true,
    );
    let err = bad.result.unwrap_err();
    assert!(err.message.starts_with("Can't register query"));
    assert!(bad.undo.is_none());

    let removed = store.invoke(EngineOp::UnregisterStatement, &args(json!({"name": "hot"})), true);
    assert!(removed.is_ok());
    assert!(!store.has_statement("hot"));
    removed.undo.unwrap().execute(&mut store).unwrap();
    assert!(store.has_statement("hot"));

    let unknown = store.invoke(EngineOp::UnregisterStatement, &args(json!({"name": "nope"})), true);
    assert_eq!(unknown.result.unwrap_err().message, "unknown statement");
}

#[test]
fn test_event_type_in_use_cannot_be_removed() {
    let mut store = store_with_temp();
    store.invoke(
        EngineOp::RegisterStatement,
        &args(json!({"name": "all", "query": "select * from Temp"})),
        false,
    );

    let reply = store.invoke(EngineOp::UnregisterEventType, &args(json!({"name": "Temp"})), true);
    let err = reply.result.unwrap_err();
    assert!(err.message.starts_with("can't remove eventtype"));
    assert!(store.has_event_type("Temp"));
}

#[test]
fn test_listeners_are_reference_counted() {
    let mut store = store_with_temp();
    store.invoke(
        EngineOp::RegisterStatement,
        &args(json!({"name": "all", "query": "select * from Temp"})),
        false,
    );

    for id in ["l1", "l2"] {
        let reply = store.invoke(
            EngineOp::RegisterUpdateListener,
            &args(json!({"id": id, "statementName": "all", "address": "out"})),
            false,
        );
        assert!(reply.is_ok());
    }
    assert_eq!(store.listener_count("all"), 2);

    let duplicate = store.invoke(
        EngineOp::RegisterUpdateListener,
        &args(json!({"id": "l1", "statementName": "all"})),
        false,
    );
    assert_eq!(duplicate.result.unwrap_err().message, "existing listener");

    let in_use = store.invoke(EngineOp::UnregisterStatement, &args(json!({"name": "all"})), true);
    assert_eq!(in_use.result.unwrap_err().message, "existing listener");
    assert!(store.has_statement("all"));

    let removed = store.invoke(
        EngineOp::UnregisterUpdateListener,
        &args(json!({"id": "l1"})),
        true,
    );
    assert!(removed.is_ok());
    assert_eq!(store.listener_count("all"), 1);

    let Some(Undo::Action(undo)) = removed.undo else {
        panic!("expected single undo");
    };
    assert_eq!(undo.args().get("statementName"), Some(&json!("all")));
    assert_eq!(undo.args().get("address"), Some(&json!("out")));

    let by_statement = store.invoke(
        EngineOp::UnregisterUpdateListener,
        &args(json!({"statementName": "all"})),
        false,
    );
    assert!(by_statement.is_ok());
    assert_eq!(store.listener_count("all"), 0);

    let none_left = store.invoke(
        EngineOp::UnregisterUpdateListener,
        &args(json!({"statementName": "all"})),
        false,
    );
    assert_eq!(none_left.result.unwrap_err().message, "unknown listener id");

    let unknown = store.invoke(
        EngineOp::UnregisterUpdateListener,
        &args(json!({"id": "ghost"})),
        false,
    );
    assert_eq!(unknown.result.unwrap_err().message, "unknown listener");

    let neither = store.invoke(EngineOp::UnregisterUpdateListener, &Args::new(), false);
    assert_eq!(
        neither.result.unwrap_err().message,
        "args do neither contain statementName nor id"
    );
}

#[test]
fn test_listener_on_unknown_statement_rejected() {
    let mut store = store_with_temp();
    let reply = store.invoke(
        EngineOp::RegisterUpdateListener,
        &args(json!({"id": "l1", "statementName": "nope"})),
        true,
    );
    assert_eq!(reply.result.unwrap_err().message, "unknown statement");
    assert!(reply.undo.is_none());
}

#[test]
fn test_failed_composite_returns_partial_set_restoring_state() {
    let mut store = EngineConfigStore::default();
    let before = store.snapshot();

    // Fourth sub-step reads from an unregistered event type.
    let definition = args(json!({
        "virtualSensorId": "vs-broken",
        "eventTypes": [{"name": "A"}, {"name": "B"}],
        "statements": [
            {"name": "first", "query": "select * from A"},
            {"name": "second", "query": "select * from Missing"}
        ]
    }));
    let reply = store.invoke(EngineOp::RegisterVirtualSensor, &definition, true);

    let err = reply.result.unwrap_err();
    assert!(err.message.starts_with("Can't register query"));
    let Some(Undo::Set(partial)) = reply.undo else {
        panic!("expected partial set");
    };
    assert_eq!(
        partial.execution_order(),
        ["unregisterStatement", "unregisterEventType", "unregisterEventType"]
    );
    assert!(store.has_statement("first"));

    partial.execute(&mut store).unwrap();
    assert_eq!(store.snapshot(), before);
    assert!(!store.has_virtual_sensor("vs-broken"));
}

#[test]
fn test_virtual_sensor_round_trip() {
    let mut store = EngineConfigStore::default();
    let before = store.snapshot();

    let registered = store.invoke(EngineOp::RegisterVirtualSensor, &sensor_definition(), true);
    assert!(registered.is_ok());
    assert!(store.has_virtual_sensor("vs-1"));
    assert!(store.has_event_type("Delta"));
    assert_eq!(store.sensor_targets("delta-out"), Some(&[json!("sink-a")][..]));
    let after_register = store.snapshot();

    let removed = store.invoke(
        EngineOp::UnregisterVirtualSensor,
        &args(json!({"virtualSensorId": "vs-1"})),
        true,
    );
    assert!(removed.is_ok());
    assert_eq!(store.snapshot(), before);

    removed.undo.unwrap().execute(&mut store).unwrap();
    assert_eq!(store.snapshot(), after_register);

    registered.undo.unwrap().execute(&mut store).unwrap();
    assert_eq!(store.snapshot(), before);
}

#[test]
fn test_unregister_unknown_virtual_sensor() {
    let mut store = EngineConfigStore::default();
    let reply = store.invoke(
        EngineOp::UnregisterVirtualSensor,
        &args(json!({"virtualSensorId": "vs-9"})),
        true,
    );
    assert_eq!(
        reply.result.unwrap_err().message,
        "Virtual sensor with id vs-9 not found."
    );
}

#[test]
fn test_update_targets_undo_restores_previous() {
    let mut store = EngineConfigStore::default();
    store.invoke(EngineOp::RegisterVirtualSensor, &sensor_definition(), false);

    let reply = store.invoke(
        EngineOp::UpdateVirtualSensorTargets,
        &args(json!({"resultStatementName": "delta-out", "targets": "[\"sink-b\", \"sink-c\"]"})),
        true,
    );
    assert!(reply.is_ok());
    assert_eq!(
        store.sensor_targets("delta-out"),
        Some(&[json!("sink-b"), json!("sink-c")][..])
    );

    reply.undo.unwrap().execute(&mut store).unwrap();
    assert_eq!(store.sensor_targets("delta-out"), Some(&[json!("sink-a")][..]));

    let missing = store.invoke(
        EngineOp::UpdateVirtualSensorTargets,
        &args(json!({"resultStatementName": "nope", "targets": []})),
        true,
    );
    assert_eq!(
        missing.result.unwrap_err().message,
        "VirtualSensor UpdateListener not found"
    );
}

#[test]
fn test_queries_report_current_configuration() {
    let mut store = store_with_temp();
    store.invoke(
        EngineOp::RegisterStatement,
        &args(json!({"name": "all", "query": "select * from Temp"})),
        false,
    );
    store.invoke(
        EngineOp::RegisterUpdateListener,
        &args(json!({"id": "l1", "statementName": "all"})),
        false,
    );
    store.send_event("Temp", &json!({"value": 21})).unwrap();
    assert!(store.send_event("Pressure", &json!({})).is_err());

    let statements = store.invoke(EngineOp::GetStatements, &Args::new(), true);
    assert_eq!(statements.result.unwrap(), json!({"all": "select * from Temp"}));
    assert!(statements.undo.is_none());

    let types = store.invoke(EngineOp::GetEventTypes, &Args::new(), true);
    assert_eq!(types.result.unwrap(), json!({"eventTypes": ["Temp"]}));

    let count = store.invoke(EngineOp::GetUpdateListenerCount, &args(json!({"name": "all"})), true);
    assert_eq!(count.result.unwrap(), json!({"listenerCount": 1}));

    let processed = store.invoke(EngineOp::CountProcessedEvents, &Args::new(), true);
    assert_eq!(processed.result.unwrap(), json!({"processedEvents": 1}));
}

#[test]
fn test_apply_setup_replaces_configuration() {
    let mut store = store_with_temp();
    let setup = json!({
        "eventTypes": [{"name": "Humidity"}],
        "statements": [{"name": "wet", "query": "select * from Humidity"}],
        "listeners": [{"id": "l1", "statementName": "wet", "address": "alerts"}],
        "virtualSensors": [sensor_definition()]
    });

    store.apply_setup(&setup).unwrap();

    assert!(!store.has_event_type("Temp"));
    assert!(store.has_event_type("Humidity"));
    assert!(store.has_event_type("Delta"));
    assert!(store.has_statement("wet"));
    assert!(store.has_statement("delta-out"));
    assert!(store.has_virtual_sensor("vs-1"));
    assert_eq!(store.listener_count("wet"), 1);
}

#[test]
fn test_apply_setup_counts_rejected_entries() {
    let mut store = EngineConfigStore::default();
    let setup = json!({
        "eventTypes": [{"name": "Humidity"}],
        "statements": [{"name": "broken", "query": "select * from Missing"}]
    });

    let err = store.apply_setup(&setup).unwrap_err();
    assert!(err.message.contains('1'));
    assert!(store.has_event_type("Humidity"));
    assert!(!store.has_statement("broken"));
}

#[test]
fn test_reset_clears_everything() {
    let mut store = EngineConfigStore::default();
    store.invoke(EngineOp::RegisterVirtualSensor, &sensor_definition(), false);

    let reply = store.invoke(EngineOp::Reset, &Args::new(), true);
    assert!(reply.is_ok());
    assert!(reply.undo.is_none());
    assert_eq!(store.snapshot(), EngineConfigStore::default().snapshot());
}
