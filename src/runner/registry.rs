//! Commands run by the processor itself instead of being sent to an agent.
//!
//! Handlers are registered under `(componentType, action)`. An action ending
//! in `*` matches every action with that prefix (`Verify*`). Exact entries win
//! over prefix entries.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};

use super::context::Scope;
use super::executor::{CommandOutcome, ScriptProcessor};
use crate::parser::Command;

#[async_trait]
pub trait LocalCommand: Send + Sync {
    /// Run an already-substituted command in `scope`
    async fn run(
        &self,
        processor: &mut ScriptProcessor,
        command: &Command,
        scope: &mut Scope,
    ) -> CommandOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("local command '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid local command name '{0}'")]
    InvalidName(String),
}

fn component_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("component pattern is valid"))
}

fn action_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9]*\*?$").expect("action pattern is valid")
    })
}

#[derive(Clone)]
struct Entry {
    component_type: String,
    action: String,
    prefix: bool,
    handler: Arc<dyn LocalCommand>,
}

impl Entry {
    fn name(&self) -> String {
        format!(
            "{}.{}{}",
            self.component_type,
            self.action,
            if self.prefix { "*" } else { "" }
        )
    }

    fn matches(&self, component_type: &str, action: &str) -> bool {
        component_type == self.component_type
            && if self.prefix {
                action.starts_with(&self.action)
            } else {
                action == self.action
            }
    }
}

#[derive(Clone, Default)]
pub struct CommandRegistry {
    entries: Vec<Entry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        component_type: &str,
        action: &str,
        handler: Arc<dyn LocalCommand>,
    ) -> Result<(), RegistryError> {
        if !component_regex().is_match(component_type) || !action_regex().is_match(action) {
            return Err(RegistryError::InvalidName(format!(
                "{}.{}",
                component_type, action
            )));
        }

        let action = action.to_lowercase();
        let entry = Entry {
            component_type: component_type.to_lowercase(),
            prefix: action.ends_with('*'),
            action: action.trim_end_matches('*').to_string(),
            handler,
        };
        let name = entry.name();
        if self.entries.iter().any(|e| e.name() == name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Handler for `command`, if it is a local command
    pub fn lookup(&self, command: &Command) -> Option<Arc<dyn LocalCommand>> {
        if command.is_comment() {
            return None;
        }
        let component_type = command.component_type().to_lowercase();
        let action = command.action().to_lowercase();
        let matching = || {
            self.entries
                .iter()
                .filter(|e| e.matches(&component_type, &action))
        };
        matching()
            .find(|e| !e.prefix)
            .or_else(|| matching().max_by_key(|e| e.action.len()))
            .map(|e| e.handler.clone())
    }

    /// Registered names, lower-case, e.g. `vars.verify*`
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(Entry::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use crate::runner::error::StepOutcome;

    struct Fixed(&'static str);

    #[async_trait]
    impl LocalCommand for Fixed {
        async fn run(
            &self,
            _processor: &mut ScriptProcessor,
            _command: &Command,
            _scope: &mut Scope,
        ) -> CommandOutcome {
            CommandOutcome::from(StepOutcome::passed(self.0))
        }
    }

    #[test]
    fn test_register_validates_names() {
        let mut registry = CommandRegistry::new();
        assert!(registry.register("Vars", "Define", Arc::new(Fixed("a"))).is_ok());
        assert_eq!(
            registry.register("vars", "define", Arc::new(Fixed("b"))),
            Err(RegistryError::Duplicate("vars.define".into()))
        );
        assert!(matches!(
            registry.register("Vars", "De fine", Arc::new(Fixed("c"))),
            Err(RegistryError::InvalidName(_))
        ));
        assert!(matches!(
            registry.register("", "Run", Arc::new(Fixed("c"))),
            Err(RegistryError::InvalidName(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_prefers_exact_match() {
        let mut registry = CommandRegistry::new();
        registry.register("Vars", "Verify*", Arc::new(Fixed("prefix"))).unwrap();
        registry.register("Vars", "VerifyNot", Arc::new(Fixed("exact"))).unwrap();

        assert!(registry.lookup(&parse_line("vars * verifywildcard a b")).is_some());
        assert!(registry.lookup(&parse_line("Vars * Define a")).is_none());
        assert!(registry.lookup(&parse_line("Button * Verify")).is_none());
        assert!(registry.lookup(&parse_line("# Vars * Verify")).is_none());
        assert_eq!(registry.names(), vec!["vars.verify*", "vars.verifynot"]);
    }
}
