//! Synchronous event bus for AavionDB core components.
//!
//! The bus delivers every emitted event to all matching subscribers in
//! registration order, on the emitting thread. Subscribers register exact
//! event names or wildcard patterns (`*` matches one dot-separated segment,
//! `**` matches any number). A failing or panicking listener is isolated:
//! its error is logged and the emit chain continues.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::error;

/// A single emitted event: a dotted name plus a JSON payload.
#[derive(Debug, Clone)]
pub struct Event {
    /// Dotted event name, e.g. `brain.entity.saved`.
    pub name: String,
    /// Structured event payload.
    pub data: Value,
}

type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    id: u64,
    pattern: String,
    listener: Listener,
}

/// Handle returned by [`EventBus::subscribe`], usable for unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Synchronous publish/subscribe bus shared across the runtime.
///
/// Cloning is cheap; all clones share the same subscriber list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

struct BusInner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 1,
                subscriptions: Vec::new(),
            })),
        }
    }

    /// Register a listener for `pattern`. Delivery order follows
    /// registration order within each emit.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.push(Subscription {
            id,
            pattern: pattern.into(),
            listener: Arc::new(listener),
        });
        SubscriptionId(id)
    }

    /// Remove a previously registered listener. Returns false if the id is
    /// unknown (already removed).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id.0);
        inner.subscriptions.len() != before
    }

    /// Emit an event to every subscriber whose pattern matches `name`.
    pub fn emit(&self, name: &str, data: Value) {
        let listeners: Vec<Listener> = {
            let inner = self.inner.lock().expect("event bus poisoned");
            inner
                .subscriptions
                .iter()
                .filter(|s| pattern_matches(&s.pattern, name))
                .map(|s| Arc::clone(&s.listener))
                .collect()
        };
        let event = Event {
            name: name.to_string(),
            data,
        };
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(event = %event.name, error = %err, "event listener failed");
                }
                Err(_) => {
                    error!(event = %event.name, "event listener panicked");
                }
            }
        }
    }

    /// Number of currently registered subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("event bus poisoned")
            .subscriptions
            .len()
    }
}

/// Match a dotted event name against a subscription pattern.
///
/// `*` consumes exactly one segment, `**` consumes zero or more.
#[must_use]
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pat: Vec<&str> = pattern.split('.').collect();
    let segs: Vec<&str> = name.split('.').collect();
    match_segments(&pat, &segs)
}

fn match_segments(pat: &[&str], segs: &[&str]) -> bool {
    match (pat.first(), segs.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(&"**"), _) => {
            // Zero segments, or consume one and keep the globstar active.
            match_segments(&pat[1..], segs)
                || (!segs.is_empty() && match_segments(pat, &segs[1..]))
        }
        (Some(_), None) => false,
        (Some(&"*"), Some(_)) => match_segments(&pat[1..], &segs[1..]),
        (Some(&p), Some(&s)) => p == s && match_segments(&pat[1..], &segs[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exact_match_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe("brain.entity.saved", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit("brain.entity.saved", json!({"project": "demo"}));
        bus.emit("brain.entity.deleted", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_star_matches_one_segment() {
        assert!(pattern_matches("brain.*.saved", "brain.entity.saved"));
        assert!(!pattern_matches("brain.*", "brain.entity.saved"));
        assert!(pattern_matches("brain.*", "brain.compacted"));
    }

    #[test]
    fn double_star_matches_any_depth() {
        assert!(pattern_matches("**", "command.executed"));
        assert!(pattern_matches("brain.**", "brain.write.integrity_failed"));
        assert!(pattern_matches("brain.**", "brain.compacted"));
        assert!(!pattern_matches("auth.**", "brain.compacted"));
        assert!(pattern_matches("**.failed", "command.failed"));
    }

    #[test]
    fn listener_order_is_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let o = Arc::clone(&order);
            bus.subscribe("**", move |_| {
                o.lock().unwrap().push(tag);
                Ok(())
            });
        }
        bus.emit("anything", Value::Null);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_listener_does_not_abort_chain() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("**", |_| anyhow::bail!("listener error"));
        bus.subscribe("**", |_| panic!("listener panic"));
        let h = Arc::clone(&hits);
        bus.subscribe("**", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit("api.state.changed", json!({"enabled": true}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe("**", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.emit("x", Value::Null);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit("x", Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
