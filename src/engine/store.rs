//! Compensable engine configuration store.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::keys::*;
use super::{EngineOp, InMemoryEngine, RuleEngine};
use crate::compensation::{
    CommandFn, CommandRegistry, CommandReply, Compensable, CompensatingAction,
    CompensatingActionSet,
};
use crate::transfer::{str_arg, Args, CommandError};
use crate::worker::Configurable;

type Reply = Result<CommandReply<EngineOp>, CommandError>;

#[derive(Debug, Clone)]
struct ListenerRecord {
    statement: String,
    address: Option<String>,
}

/// Engine-visible configuration of one rule worker.
///
/// Listener attachment is reference-counted per statement: the engine sees a
/// single listener however many update listeners are registered, attached
/// with the first and detached with the last.
pub struct EngineConfigStore {
    engine: Box<dyn RuleEngine>,
    event_types: BTreeMap<String, Value>,
    listeners: BTreeMap<String, ListenerRecord>,
    listener_counts: BTreeMap<String, usize>,
    /// Result statements forwarding to virtual sensor targets.
    sensor_targets: BTreeMap<String, Vec<Value>>,
    virtual_sensors: BTreeMap<String, Args>,
}

impl Default for EngineConfigStore {
    fn default() -> Self {
        Self::new(Box::new(InMemoryEngine::new()))
    }
}

fn name_args(name: &str) -> Args {
    let mut args = Args::new();
    args.insert(NAME.to_string(), Value::from(name));
    args
}

fn single_arg(key: &str, value: impl Into<Value>) -> Args {
    let mut args = Args::new();
    args.insert(key.to_string(), value.into());
    args
}

fn as_object(value: &Value, what: &str) -> Result<Args, CommandError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| CommandError::invalid_message(format!("{what} must be an object")))
}

/// Objects listed under `key`; a missing key reads as an empty list.
fn object_list(args: &Args, key: &str) -> Result<Vec<Args>, CommandError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(|item| as_object(item, key)).collect(),
        Some(_) => Err(CommandError::invalid_message(format!(
            "{key} must be an array"
        ))),
    }
}

/// Listed objects under `list_key` followed by the single object under `result_key`.
fn with_result(args: &Args, list_key: &str, result_key: &str) -> Result<Vec<Args>, CommandError> {
    let mut items = object_list(args, list_key)?;
    if let Some(result) = args.get(result_key) {
        items.push(as_object(result, result_key)?);
    }
    Ok(items)
}

/// Targets given either as a JSON array or as its string encoding.
fn targets_arg(args: &Args) -> Result<Vec<Value>, CommandError> {
    match args.get(TARGETS) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::String(encoded)) => serde_json::from_str(encoded)
            .map_err(|e| CommandError::invalid_message(format!("invalid targets: {e}"))),
        Some(_) => Err(CommandError::invalid_message("targets must be an array")),
    }
}

impl EngineConfigStore {
    pub fn new(engine: Box<dyn RuleEngine>) -> Self {
        Self {
            engine,
            event_types: BTreeMap::new(),
            listeners: BTreeMap::new(),
            listener_counts: BTreeMap::new(),
            sensor_targets: BTreeMap::new(),
            virtual_sensors: BTreeMap::new(),
        }
    }

    pub fn has_event_type(&self, name: &str) -> bool {
        self.engine.has_event_type(name)
    }

    pub fn has_statement(&self, name: &str) -> bool {
        self.engine.statement_text(name).is_some()
    }

    pub fn listener_count(&self, statement: &str) -> usize {
        self.listener_counts.get(statement).copied().unwrap_or(0)
    }

    pub fn has_virtual_sensor(&self, id: &str) -> bool {
        self.virtual_sensors.contains_key(id)
    }

    pub fn sensor_targets(&self, statement: &str) -> Option<&[Value]> {
        self.sensor_targets.get(statement).map(Vec::as_slice)
    }

    pub fn send_event(&mut self, event_type: &str, event: &Value) -> Result<(), CommandError> {
        self.engine.send_event(event_type, event)?;
        Ok(())
    }

    /// Everything a caller can observe about the configuration.
    pub fn snapshot(&self) -> Value {
        let statements: BTreeMap<String, Option<String>> = self
            .engine
            .statement_names()
            .into_iter()
            .map(|name| {
                let text = self.engine.statement_text(&name);
                (name, text)
            })
            .collect();
        let listeners: BTreeMap<&String, &String> = self
            .listeners
            .iter()
            .map(|(id, record)| (id, &record.statement))
            .collect();
        json!({
            EVENT_TYPES: self.engine.event_type_names(),
            STATEMENTS: statements,
            LISTENERS: listeners,
            "listenerCounts": self.listener_counts,
            TARGETS: self.sensor_targets,
            VIRTUAL_SENSORS: self.virtual_sensors.keys().collect::<Vec<_>>(),
        })
    }

    fn clear(&mut self) {
        self.engine.destroy_all();
        self.event_types.clear();
        self.listeners.clear();
        self.listener_counts.clear();
        self.sensor_targets.clear();
        self.virtual_sensors.clear();
    }

    fn register_event_type(&mut self, args: &Args, create_undo: bool) -> Reply {
        let name = str_arg(args, NAME)?;
        if self.engine.has_event_type(name) {
            debug!(event_type = %name, "Skipping existing event type");
            return Err(CommandError::rejected("existing eventtype"));
        }
        let config = args.get(CONFIG).cloned().unwrap_or_else(|| json!({}));
        self.engine.add_event_type(name, &config)?;
        self.event_types.insert(name.to_string(), config);
        info!(event_type = %name, "Registered event type");

        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::UnregisterEventType, name_args(name)),
            create_undo,
        ))
    }

    fn unregister_event_type(&mut self, args: &Args, create_undo: bool) -> Reply {
        let name = str_arg(args, NAME)?;
        if !self.engine.has_event_type(name) {
            return Err(CommandError::rejected("unknown eventtype"));
        }
        self.engine
            .remove_event_type(name)
            .map_err(|e| CommandError::rejected(format!("can't remove eventtype: {e}")))?;
        let config = self.event_types.remove(name).unwrap_or_else(|| json!({}));
        info!(event_type = %name, "Removed event type");

        let mut undo_args = name_args(name);
        undo_args.insert(CONFIG.to_string(), config);
        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::RegisterEventType, undo_args),
            create_undo,
        ))
    }

    fn register_statement(&mut self, args: &Args, create_undo: bool) -> Reply {
        let name = str_arg(args, NAME)?;
        let query = str_arg(args, QUERY)?;
        let targets = targets_arg(args)?;
        if self.has_statement(name) {
            debug!(statement = %name, "Skipping registered statement");
            return Err(CommandError::rejected("already registered"));
        }
        self.engine.create_statement(name, query).map_err(|e| {
            CommandError::rejected(format!("Can't register query {query} with name {name}: {e}"))
        })?;
        if !targets.is_empty() {
            if let Err(e) = self.engine.attach_listener(name) {
                if let Err(cleanup) = self.engine.destroy_statement(name) {
                    warn!(statement = %name, error = %cleanup, "Failed to drop statement after listener attach failed");
                }
                return Err(e.into());
            }
            self.sensor_targets.insert(name.to_string(), targets);
        }
        info!(statement = %name, "Registered statement");

        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::UnregisterStatement, name_args(name)),
            create_undo,
        ))
    }

    fn unregister_statement(&mut self, args: &Args, create_undo: bool) -> Reply {
        let name = str_arg(args, NAME)?;
        let Some(query) = self.engine.statement_text(name) else {
            warn!(statement = %name, "Skipping unknown statement");
            return Err(CommandError::rejected("unknown statement"));
        };
        if self.listener_count(name) > 0 {
            return Err(CommandError::rejected("existing listener"));
        }
        if self.sensor_targets.contains_key(name) {
            self.engine.detach_listener(name)?;
        }
        let targets = self.sensor_targets.remove(name);
        self.engine.destroy_statement(name)?;
        info!(statement = %name, "Removed statement");

        let mut undo_args = name_args(name);
        undo_args.insert(QUERY.to_string(), Value::from(query));
        if let Some(targets) = targets {
            undo_args.insert(TARGETS.to_string(), Value::from(targets));
        }
        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::RegisterStatement, undo_args),
            create_undo,
        ))
    }

    fn register_update_listener(&mut self, args: &Args, create_undo: bool) -> Reply {
        let id = str_arg(args, ID)?;
        let statement = str_arg(args, STATEMENT_NAME)?;
        let address = args
            .get(LISTENER_ADDRESS)
            .and_then(Value::as_str)
            .map(str::to_string);
        if self.listeners.contains_key(id) {
            return Err(CommandError::rejected("existing listener"));
        }
        if !self.has_statement(statement) {
            return Err(CommandError::rejected("unknown statement"));
        }
        if self.listener_count(statement) == 0 {
            self.engine.attach_listener(statement)?;
        }
        *self
            .listener_counts
            .entry(statement.to_string())
            .or_default() += 1;
        self.listeners.insert(
            id.to_string(),
            ListenerRecord {
                statement: statement.to_string(),
                address,
            },
        );
        info!(
            listener = %id,
            statement = %statement,
            listeners = self.listener_count(statement),
            "Registered update listener"
        );

        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::UnregisterUpdateListener, single_arg(ID, id)),
            create_undo,
        ))
    }

    fn unregister_update_listener(&mut self, args: &Args, create_undo: bool) -> Reply {
        let id = if let Some(statement) = args.get(STATEMENT_NAME).and_then(Value::as_str) {
            self.listeners
                .iter()
                .find(|(_, record)| record.statement == statement)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| CommandError::rejected("unknown listener id"))?
        } else if let Some(id) = args.get(ID).and_then(Value::as_str) {
            id.to_string()
        } else {
            return Err(CommandError::rejected(
                "args do neither contain statementName nor id",
            ));
        };
        let Some(record) = self.listeners.get(&id).cloned() else {
            return Err(CommandError::rejected("unknown listener"));
        };

        let remaining = self.listener_count(&record.statement).saturating_sub(1);
        if remaining == 0 {
            self.engine.detach_listener(&record.statement)?;
            self.listener_counts.remove(&record.statement);
        } else {
            self.listener_counts
                .insert(record.statement.clone(), remaining);
        }
        self.listeners.remove(&id);
        info!(listener = %id, statement = %record.statement, remaining, "Removed update listener");

        let mut undo_args = single_arg(ID, id.as_str());
        undo_args.insert(STATEMENT_NAME.to_string(), Value::from(record.statement));
        if let Some(address) = record.address {
            undo_args.insert(LISTENER_ADDRESS.to_string(), Value::from(address));
        }
        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::RegisterUpdateListener, undo_args),
            create_undo,
        ))
    }

    /// Run `plan` in order, collecting the undo of every completed step.
    ///
    /// On the first failure the collected set is returned alongside the error.
    fn run_composite(
        &mut self,
        plan: Vec<(CommandFn<Self>, Args)>,
    ) -> Result<(), (CommandError, CompensatingActionSet<EngineOp>)> {
        let mut completed = CompensatingActionSet::new();
        for (step, args) in plan {
            let reply = step(self, &args, true).unwrap_or_else(CommandReply::failed);
            match reply.result {
                Ok(_) => {
                    if let Some(undo) = reply.undo {
                        completed.push(undo);
                    }
                }
                Err(e) => {
                    if let Some(undo) = reply.undo {
                        completed.push(undo);
                    }
                    return Err((e, completed));
                }
            }
        }
        Ok(())
    }

    fn register_virtual_sensor(&mut self, args: &Args, create_undo: bool) -> Reply {
        let id = str_arg(args, VIRTUAL_SENSOR_ID)?;
        if self.virtual_sensors.contains_key(id) {
            return Err(CommandError::rejected(format!(
                "Virtual sensor with id {id} already registered."
            )));
        }

        let mut plan: Vec<(CommandFn<Self>, Args)> = Vec::new();
        for event_type in with_result(args, EVENT_TYPES, RESULT_EVENT_TYPE)? {
            plan.push((Self::register_event_type, event_type));
        }
        for statement in with_result(args, STATEMENTS, RESULT_STATEMENT)? {
            plan.push((Self::register_statement, statement));
        }

        if let Err((e, completed)) = self.run_composite(plan) {
            warn!(virtual_sensor = %id, error = %e, completed = completed.len(), "Virtual sensor registration failed");
            return Ok(CommandReply {
                result: Err(e),
                undo: (!completed.is_empty()).then(|| completed.into()),
            });
        }

        self.virtual_sensors.insert(id.to_string(), args.clone());
        info!(virtual_sensor = %id, "Registered virtual sensor");

        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(
                EngineOp::UnregisterVirtualSensor,
                single_arg(VIRTUAL_SENSOR_ID, id),
            ),
            create_undo,
        ))
    }

    fn unregister_virtual_sensor(&mut self, args: &Args, create_undo: bool) -> Reply {
        let id = str_arg(args, VIRTUAL_SENSOR_ID)?;
        let Some(cached) = self.virtual_sensors.get(id).cloned() else {
            warn!(virtual_sensor = %id, "Skipping unknown virtual sensor");
            return Err(CommandError::rejected(format!(
                "Virtual sensor with id {id} not found."
            )));
        };

        let mut plan: Vec<(CommandFn<Self>, Args)> = Vec::new();
        for statement in with_result(&cached, STATEMENTS, RESULT_STATEMENT)? {
            plan.push((Self::unregister_statement, statement));
        }
        for event_type in with_result(&cached, EVENT_TYPES, RESULT_EVENT_TYPE)? {
            plan.push((Self::unregister_event_type, event_type));
        }

        if let Err((e, completed)) = self.run_composite(plan) {
            warn!(virtual_sensor = %id, error = %e, completed = completed.len(), "Virtual sensor removal failed");
            return Ok(CommandReply {
                result: Err(e),
                undo: (!completed.is_empty()).then(|| completed.into()),
            });
        }

        self.virtual_sensors.remove(id);
        info!(virtual_sensor = %id, "Removed virtual sensor");

        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::RegisterVirtualSensor, cached),
            create_undo,
        ))
    }

    fn update_virtual_sensor_targets(&mut self, args: &Args, create_undo: bool) -> Reply {
        let statement = str_arg(args, RESULT_STATEMENT_NAME)?;
        let targets = targets_arg(args)?;
        let Some(current) = self.sensor_targets.get_mut(statement) else {
            return Err(CommandError::rejected(
                "VirtualSensor UpdateListener not found",
            ));
        };
        let previous = std::mem::replace(current, targets);
        info!(statement = %statement, "Updated virtual sensor targets");

        let mut undo_args = single_arg(RESULT_STATEMENT_NAME, statement);
        undo_args.insert(TARGETS.to_string(), Value::from(previous));
        Ok(CommandReply::ok(json!({})).with_undo(
            CompensatingAction::new(EngineOp::UpdateVirtualSensorTargets, undo_args),
            create_undo,
        ))
    }

    fn get_statements(&mut self, _args: &Args, _create_undo: bool) -> Reply {
        let mut statements = Args::new();
        for name in self.engine.statement_names() {
            if let Some(text) = self.engine.statement_text(&name) {
                statements.insert(name, Value::from(text));
            }
        }
        Ok(CommandReply::ok(Value::Object(statements)))
    }

    fn get_event_types(&mut self, _args: &Args, _create_undo: bool) -> Reply {
        Ok(CommandReply::ok(
            json!({ EVENT_TYPES: self.engine.event_type_names() }),
        ))
    }

    fn get_update_listener_count(&mut self, args: &Args, _create_undo: bool) -> Reply {
        let name = str_arg(args, NAME)?;
        if !self.has_statement(name) {
            return Err(CommandError::rejected("unknown statement"));
        }
        Ok(CommandReply::ok(
            json!({ LISTENER_COUNT: self.listener_count(name) }),
        ))
    }

    fn count_processed_events(&mut self, _args: &Args, _create_undo: bool) -> Reply {
        Ok(CommandReply::ok(
            json!({ PROCESSED_EVENTS: self.engine.processed_events() }),
        ))
    }

    fn reset_all(&mut self, _args: &Args, _create_undo: bool) -> Reply {
        info!("Resetting engine configuration");
        self.clear();
        Ok(CommandReply::ok(json!({})))
    }

    /// Install a whole setup document, replacing the current configuration.
    ///
    /// Entries are applied in dependency order: event types, virtual sensor
    /// event types, statements, virtual sensor statements, virtual sensors,
    /// listeners. Rejected entries are skipped and counted.
    pub fn setup(&mut self, doc: &Value) -> Result<(), CommandError> {
        let doc = as_object(doc, "setup")?;
        let sensors = object_list(&doc, VIRTUAL_SENSORS)?;
        self.clear();

        let mut plan: Vec<(CommandFn<Self>, Args)> = Vec::new();
        for event_type in object_list(&doc, EVENT_TYPES)? {
            plan.push((Self::register_event_type, event_type));
        }
        for sensor in &sensors {
            for event_type in with_result(sensor, EVENT_TYPES, RESULT_EVENT_TYPE)? {
                plan.push((Self::register_event_type, event_type));
            }
        }
        for statement in object_list(&doc, STATEMENTS)? {
            plan.push((Self::register_statement, statement));
        }
        for sensor in &sensors {
            for statement in with_result(sensor, STATEMENTS, RESULT_STATEMENT)? {
                plan.push((Self::register_statement, statement));
            }
        }
        let listeners = object_list(&doc, LISTENERS)?;

        let mut failures = 0usize;
        let mut apply = |store: &mut Self, step: CommandFn<Self>, args: &Args| {
            if let Err(e) = step(store, args, false) {
                warn!(error = %e, "Setup entry rejected");
                failures += 1;
            }
        };
        for (step, args) in &plan {
            apply(self, *step, args);
        }
        for sensor in sensors {
            if let Ok(id) = str_arg(&sensor, VIRTUAL_SENSOR_ID) {
                self.virtual_sensors.insert(id.to_string(), sensor.clone());
            }
        }
        for listener in &listeners {
            apply(self, Self::register_update_listener, listener);
        }

        if failures > 0 {
            return Err(CommandError::rejected(format!(
                "setup applied with {failures} rejected entries"
            )));
        }
        info!(
            event_types = self.event_types.len(),
            virtual_sensors = self.virtual_sensors.len(),
            listeners = self.listeners.len(),
            "Engine setup applied"
        );
        Ok(())
    }
}

impl Compensable for EngineConfigStore {
    type Op = EngineOp;

    fn commands() -> &'static CommandRegistry<Self> {
        static COMMANDS: OnceLock<CommandRegistry<EngineConfigStore>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandRegistry::new()
                .route(EngineOp::RegisterEventType, Self::register_event_type)
                .route(EngineOp::UnregisterEventType, Self::unregister_event_type)
                .route(EngineOp::RegisterStatement, Self::register_statement)
                .route(EngineOp::UnregisterStatement, Self::unregister_statement)
                .route(EngineOp::RegisterUpdateListener, Self::register_update_listener)
                .route(
                    EngineOp::UnregisterUpdateListener,
                    Self::unregister_update_listener,
                )
                .route(EngineOp::RegisterVirtualSensor, Self::register_virtual_sensor)
                .route(
                    EngineOp::UnregisterVirtualSensor,
                    Self::unregister_virtual_sensor,
                )
                .route(
                    EngineOp::UpdateVirtualSensorTargets,
                    Self::update_virtual_sensor_targets,
                )
                .route(EngineOp::GetStatements, Self::get_statements)
                .route(EngineOp::GetEventTypes, Self::get_event_types)
                .route(EngineOp::GetUpdateListenerCount, Self::get_update_listener_count)
                .route(EngineOp::CountProcessedEvents, Self::count_processed_events)
                .route(EngineOp::Reset, Self::reset_all)
        })
    }
}

impl Configurable for EngineConfigStore {
    fn apply_setup(&mut self, setup: &Value) -> Result<(), CommandError> {
        self.setup(setup)
    }

    fn reset(&mut self) {
        self.clear();
    }
}
