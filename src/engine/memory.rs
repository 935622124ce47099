//! In-memory rule engine.
//!
//! Keeps just enough structure to behave like a real engine at the
//! configuration boundary: statements must reference known event types, and
//! an event type cannot be removed while a statement still reads from it.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{EngineError, RuleEngine};

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    event_types: BTreeMap<String, Value>,
    statements: BTreeMap<String, String>,
    listeners: BTreeMap<String, usize>,
    processed: u64,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Event type names a query reads from: every identifier following `from`.
fn referenced_event_types(query: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut tokens = query.split_whitespace();
    while let Some(token) = tokens.next() {
        if !token.eq_ignore_ascii_case("from") {
            continue;
        }
        if let Some(source) = tokens.next() {
            let name: String = source
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                names.push(name);
            }
        }
    }
    names
}

impl RuleEngine for InMemoryEngine {
    fn add_event_type(&mut self, name: &str, definition: &Value) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError("event type name must not be empty".to_string()));
        }
        if self.event_types.contains_key(name) {
            return Err(EngineError(format!("event type {name} already exists")));
        }
        self.event_types.insert(name.to_string(), definition.clone());
        Ok(())
    }

    fn remove_event_type(&mut self, name: &str) -> Result<(), EngineError> {
        if !self.event_types.contains_key(name) {
            return Err(EngineError(format!("unknown event type {name}")));
        }
        if let Some((statement, _)) = self
            .statements
            .iter()
            .find(|(_, query)| referenced_event_types(query).iter().any(|t| t == name))
        {
            return Err(EngineError(format!(
                "event type {name} is in use by statement {statement}"
            )));
        }
        self.event_types.remove(name);
        Ok(())
    }

    fn has_event_type(&self, name: &str) -> bool {
        self.event_types.contains_key(name)
    }

    fn event_type_names(&self) -> Vec<String> {
        self.event_types.keys().cloned().collect()
    }

    fn create_statement(&mut self, name: &str, query: &str) -> Result<(), EngineError> {
        if self.statements.contains_key(name) {
            return Err(EngineError(format!("statement {name} already exists")));
        }
        let sources = referenced_event_types(query);
        if sources.is_empty() {
            return Err(EngineError(format!("query of {name} reads from no event type")));
        }
        if let Some(unknown) = sources.iter().find(|s| !self.event_types.contains_key(*s)) {
            return Err(EngineError(format!(
                "query of {name} reads from unknown event type {unknown}"
            )));
        }
        self.statements.insert(name.to_string(), query.to_string());
        Ok(())
    }

    fn destroy_statement(&mut self, name: &str) -> Result<(), EngineError> {
        if self.statements.remove(name).is_none() {
            return Err(EngineError(format!("unknown statement {name}")));
        }
        self.listeners.remove(name);
        Ok(())
    }

    fn statement_text(&self, name: &str) -> Option<String> {
        self.statements.get(name).cloned()
    }

    fn statement_names(&self) -> Vec<String> {
        self.statements.keys().cloned().collect()
    }

    fn attach_listener(&mut self, statement: &str) -> Result<(), EngineError> {
        if !self.statements.contains_key(statement) {
            return Err(EngineError(format!("unknown statement {statement}")));
        }
        *self.listeners.entry(statement.to_string()).or_default() += 1;
        Ok(())
    }

    fn detach_listener(&mut self, statement: &str) -> Result<(), EngineError> {
        match self.listeners.get_mut(statement) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.listeners.remove(statement);
            }
            None => return Err(EngineError(format!("no listener on {statement}"))),
        }
        Ok(())
    }

    fn has_listeners(&self, statement: &str) -> bool {
        self.listeners.contains_key(statement)
    }

    fn send_event(&mut self, event_type: &str, _event: &Value) -> Result<(), EngineError> {
        if !self.event_types.contains_key(event_type) {
            return Err(EngineError(format!("unknown event type {event_type}")));
        }
        self.processed += 1;
        Ok(())
    }

    fn processed_events(&self) -> u64 {
        self.processed
    }

    fn destroy_all(&mut self) {
        self.listeners.clear();
        self.statements.clear();
        self.event_types.clear();
    }
}
