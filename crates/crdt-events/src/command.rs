use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::CoreError;

/// Names a target aggregate (type + id) and carries a payload; routed by a
/// [`Dispatcher`] to exactly one registered handler.
#[derive(Debug, Clone)]
pub struct Command {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub command_type: String,
    pub payload: Value,
}

/// A command handler. Conventionally loads the target aggregate via a
/// repository, invokes a domain method (which calls `apply_change`), and
/// saves via the repository.
pub type CommandHandler = Arc<dyn Fn(&Command) -> Result<(), CoreError> + Send + Sync>;

/// Maps command type to handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command_type: impl Into<String>, handler: CommandHandler) {
        self.handlers.insert(command_type.into(), handler);
    }

    pub fn get(&self, command_type: &str) -> Option<&CommandHandler> {
        self.handlers.get(command_type)
    }
}

/// Routes a command to exactly one handler; adds no concurrency or retry
/// policy of its own — it is a pass-through.
pub struct Dispatcher {
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn dispatch(&self, command: &Command) -> Result<(), CoreError> {
        let handler = self
            .registry
            .get(&command.command_type)
            .ok_or_else(|| CoreError::NoHandler(command.command_type.clone()))?;
        handler(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn dispatch_routes_to_registered_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "do_thing",
            Arc::new(move |_cmd: &Command| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let dispatcher = Dispatcher::new(registry);

        let command = Command {
            aggregate_type: "counter".to_string(),
            aggregate_id: "a-1".to_string(),
            command_type: "do_thing".to_string(),
            payload: json!({}),
        };
        dispatcher.dispatch(&command).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_fails_with_no_handler() {
        let dispatcher = Dispatcher::new(HandlerRegistry::new());
        let command = Command {
            aggregate_type: "counter".to_string(),
            aggregate_id: "a-1".to_string(),
            command_type: "missing".to_string(),
            payload: json!({}),
        };
        let err = dispatcher.dispatch(&command).unwrap_err();
        assert!(matches!(err, CoreError::NoHandler(ref c) if c == "missing"));
    }
}
