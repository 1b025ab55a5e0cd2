//! Handler registry and dispatch loop.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::{Map, Value, json};
use tracing::error;

use aavion_events::EventBus;
use aavion_utils::Scope;
use aavion_utils::error::AavionError;

use crate::parser::ParserContext;
use crate::response::{Response, Status};

/// One dispatched request: the lowercased action plus named parameters,
/// optional JSON payload, and the per-task scope binding.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub action: String,
    pub params: Map<String, Value>,
    pub payload: Option<Value>,
    pub scope: Scope,
}

impl CommandRequest {
    /// Build a request with the implicit full scope.
    #[must_use]
    pub fn new(action: &str, params: Map<String, Value>, payload: Option<Value>) -> Self {
        Self {
            action: action.to_lowercase(),
            params,
            payload,
            scope: Scope::all(),
        }
    }

    /// Rebind the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Required string parameter.
    pub fn str_param(&self, name: &str) -> Result<&str, AavionError> {
        self.params
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| AavionError::InvalidParameter {
                name: name.to_string(),
                reason: "required".to_string(),
            })
    }

    /// Optional string parameter.
    #[must_use]
    pub fn opt_str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// Optional boolean parameter; accepts `true`/`false` strings too.
    #[must_use]
    pub fn bool_param(&self, name: &str, default: bool) -> bool {
        match self.params.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.as_str() {
                "true" => true,
                "false" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Optional integer parameter.
    #[must_use]
    pub fn int_param(&self, name: &str) -> Option<i64> {
        match self.params.get(name) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A registered command handler.
pub type Handler = Arc<dyn Fn(&CommandRequest) -> Result<Response, AavionError> + Send + Sync>;

type ParserHandler = Arc<dyn Fn(&mut ParserContext) -> Result<(), AavionError> + Send + Sync>;

/// Descriptive metadata shown by `status`/help surfaces.
#[derive(Debug, Clone, Default)]
pub struct CommandMeta {
    pub description: String,
}

struct ParserEntry {
    verb: Option<String>,
    priority: i32,
    order: usize,
    handler: ParserHandler,
}

/// Named registry of command handlers plus pluggable parser handlers.
pub struct Dispatcher {
    bus: EventBus,
    commands: RwLock<BTreeMap<String, (Handler, CommandMeta)>>,
    parser_handlers: RwLock<Vec<ParserEntry>>,
}

impl Dispatcher {
    /// Create an empty dispatcher emitting on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            commands: RwLock::new(BTreeMap::new()),
            parser_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler under a lowercased name. Duplicate names fail.
    pub fn register<F>(&self, name: &str, meta: CommandMeta, handler: F) -> Result<(), AavionError>
    where
        F: Fn(&CommandRequest) -> Result<Response, AavionError> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        let mut commands = self.commands.write().expect("command registry poisoned");
        if commands.contains_key(&key) {
            return Err(AavionError::InvalidParameter {
                name: "command".to_string(),
                reason: format!("'{key}' is already registered"),
            });
        }
        commands.insert(key, (Arc::new(handler), meta));
        Ok(())
    }

    /// Register a parser handler. `verb = None` runs for every statement;
    /// otherwise only when the leading token matches. Lower priorities
    /// run first; ties run in registration order.
    pub fn register_parser_handler<F>(&self, verb: Option<&str>, priority: i32, handler: F)
    where
        F: Fn(&mut ParserContext) -> Result<(), AavionError> + Send + Sync + 'static,
    {
        let mut handlers = self
            .parser_handlers
            .write()
            .expect("parser registry poisoned");
        let order = handlers.len();
        handlers.push(ParserEntry {
            verb: verb.map(str::to_lowercase),
            priority,
            order,
            handler: Arc::new(handler),
        });
    }

    /// Registered command names with metadata.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, CommandMeta)> {
        self.commands
            .read()
            .expect("command registry poisoned")
            .iter()
            .map(|(name, (_, meta))| (name.clone(), meta.clone()))
            .collect()
    }

    /// Parse a statement through the registered parser handlers and
    /// dispatch the resulting action.
    pub fn execute_statement(&self, statement: &str, scope: Scope) -> Response {
        let mut ctx = match ParserContext::from_statement(statement) {
            Ok(ctx) => ctx,
            Err(err) => return Response::from_error("parse", &err),
        };
        let verb = ctx.action.clone();

        let handlers: Vec<ParserHandler> = {
            let mut entries: Vec<(i32, usize, ParserHandler)> = self
                .parser_handlers
                .read()
                .expect("parser registry poisoned")
                .iter()
                .filter(|e| e.verb.as_deref().is_none_or(|v| v == verb))
                .map(|e| (e.priority, e.order, Arc::clone(&e.handler)))
                .collect();
            entries.sort_by_key(|(priority, order, _)| (*priority, *order));
            entries.into_iter().map(|(_, _, h)| h).collect()
        };
        for handler in handlers {
            if let Err(err) = handler(&mut ctx) {
                return Response::from_error(&ctx.action, &err);
            }
        }

        let request = CommandRequest {
            action: ctx.action,
            params: ctx.parameters,
            payload: ctx.payload,
            scope,
        };
        self.dispatch(request)
    }

    /// Dispatch a request to its handler, coercing any failure into an
    /// envelope and emitting execution events.
    pub fn dispatch(&self, request: CommandRequest) -> Response {
        let action = request.action.clone();
        let handler = {
            let commands = self.commands.read().expect("command registry poisoned");
            commands.get(&action).map(|(h, _)| Arc::clone(h))
        };
        let Some(handler) = handler else {
            return Response::error(&action, format!("unknown command '{action}'"));
        };

        let start = Instant::now();
        let response = match catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                error!(action = %action, error = %err, "command failed");
                Response::from_error(&action, &err)
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(action = %action, panic = %message, "command handler panicked");
                Response::error(&action, format!("internal error: {message}")).with_meta(
                    "exception",
                    json!({"message": message, "type": "HandlerException"}),
                )
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let event = if response.has_exception() {
            "command.failed"
        } else {
            "command.executed"
        };
        let status = match response.status {
            Status::Ok => "ok",
            Status::Error => "error",
        };
        self.bus.emit(
            event,
            json!({"action": action, "status": status, "duration_ms": duration_ms}),
        );
        response
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(EventBus::new())
    }

    #[test]
    fn register_and_dispatch() {
        let d = dispatcher();
        d.register("Ping", CommandMeta::default(), |req| {
            Ok(Response::ok(&req.action, "pong", json!({"ok": true})))
        })
        .unwrap();
        // Names are lowercased on both sides.
        let resp = d.dispatch(CommandRequest::new("PING", Map::new(), None));
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.message, "pong");
    }

    #[test]
    fn duplicate_registration_fails() {
        let d = dispatcher();
        d.register("ping", CommandMeta::default(), |req| {
            Ok(Response::ok_message(&req.action, "1"))
        })
        .unwrap();
        assert!(
            d.register("PING", CommandMeta::default(), |req| {
                Ok(Response::ok_message(&req.action, "2"))
            })
            .is_err()
        );
    }

    #[test]
    fn unknown_command_is_plain_error() {
        let resp = dispatcher().dispatch(CommandRequest::new("nope", Map::new(), None));
        assert_eq!(resp.status, Status::Error);
        assert!(!resp.has_exception());
    }

    #[test]
    fn handler_error_becomes_envelope() {
        let d = dispatcher();
        d.register("boom", CommandMeta::default(), |_| {
            Err(AavionError::IntegrityFailure {
                path: "x".into(),
                reason: "hash_mismatch".into(),
            })
        })
        .unwrap();
        let resp = d.dispatch(CommandRequest::new("boom", Map::new(), None));
        assert_eq!(resp.status, Status::Error);
        assert!(resp.has_exception());
    }

    #[test]
    fn handler_panic_is_contained() {
        let d = dispatcher();
        d.register("panic", CommandMeta::default(), |_| {
            panic!("deliberate test panic")
        })
        .unwrap();
        let resp = d.dispatch(CommandRequest::new("panic", Map::new(), None));
        assert_eq!(resp.status, Status::Error);
        assert!(resp.has_exception());
        let meta = resp.meta.unwrap();
        assert_eq!(meta["exception"]["type"], json!("HandlerException"));
    }

    #[test]
    fn events_fire_per_outcome() {
        let bus = EventBus::new();
        let executed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&executed);
        bus.subscribe("command.executed", move |_| {
            e.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let f = Arc::clone(&failed);
        bus.subscribe("command.failed", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let d = Dispatcher::new(bus);
        d.register("ok", CommandMeta::default(), |req| {
            Ok(Response::ok_message(&req.action, "fine"))
        })
        .unwrap();
        d.register("notfound", CommandMeta::default(), |_| {
            Err(AavionError::not_found("entity", "hero"))
        })
        .unwrap();
        d.register("crash", CommandMeta::default(), |_| panic!("nope"))
            .unwrap();

        d.dispatch(CommandRequest::new("ok", Map::new(), None));
        // Validation error: no exception, so command.executed.
        d.dispatch(CommandRequest::new("notfound", Map::new(), None));
        d.dispatch(CommandRequest::new("crash", Map::new(), None));

        assert_eq!(executed.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn statement_flows_through_parser_handlers() {
        let d = dispatcher();
        d.register_parser_handler(Some("entity"), 0, |ctx| {
            ctx.consume_subaction();
            ctx.bind_positional(&["project", "entity"]);
            Ok(())
        });
        d.register("entity show", CommandMeta::default(), |req| {
            Ok(Response::ok(
                &req.action,
                "found",
                json!({"project": req.str_param("project")?, "entity": req.str_param("entity")?}),
            ))
        })
        .unwrap();

        let resp = d.execute_statement("entity show demo hero", Scope::all());
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.data.unwrap()["project"], json!("demo"));
    }

    #[test]
    fn parser_handler_priority_orders_execution() {
        let d = dispatcher();
        d.register_parser_handler(None, 10, |ctx| {
            ctx.parameters.insert("order".into(), json!("late"));
            Ok(())
        });
        d.register_parser_handler(None, -10, |ctx| {
            ctx.parameters.insert("order".into(), json!("early"));
            Ok(())
        });
        d.register("probe", CommandMeta::default(), |req| {
            Ok(Response::ok(
                &req.action,
                "done",
                json!({"order": req.str_param("order")?}),
            ))
        })
        .unwrap();
        let resp = d.execute_statement("probe", Scope::all());
        // The higher-priority (later) handler overwrote the earlier value.
        assert_eq!(resp.data.unwrap()["order"], json!("late"));
    }
}
