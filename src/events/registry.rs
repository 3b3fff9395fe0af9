use std::collections::HashMap;
use std::sync::Arc;

use super::event::{Event, EventKind};
use crate::core::errors::CoreError;

/// Subscriber callback. Identity is the `Arc` allocation, so keep a clone
/// around to unsubscribe later.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Event transform applied before or after handler fan-out.
pub type Middleware = Arc<dyn Fn(Event) -> anyhow::Result<Event> + Send + Sync>;

pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Event) -> anyhow::Result<Event> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a subscription listens to: one topic, or every topic under `prefix.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicFilter {
    Exact(EventKind),
    Prefix(String),
}

impl TopicFilter {
    /// `"ingest.*"` becomes `Prefix("ingest")`; anything else must be a
    /// concrete topic.
    pub fn parse(pattern: &str) -> Result<Self, CoreError> {
        let pattern = pattern.trim();
        if let Some(prefix) = pattern.strip_suffix(".*") {
            if prefix.is_empty() || prefix.contains('*') {
                return Err(CoreError::InvalidTopic(pattern.to_string()));
            }
            return Ok(TopicFilter::Prefix(prefix.to_string()));
        }
        EventKind::parse(pattern).map(TopicFilter::Exact)
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicFilter::Exact(kind) => write!(f, "{}", kind),
            TopicFilter::Prefix(prefix) => write!(f, "{}.*", prefix),
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    subs: HashMap<TopicFilter, Vec<Handler>>,
    before: Vec<Middleware>,
    after: Vec<Middleware>,
}

impl Registry {
    /// Returns `false` when the handler was already registered for `filter`.
    pub(crate) fn subscribe(&mut self, filter: TopicFilter, handler: Handler) -> bool {
        let handlers = self.subs.entry(filter).or_default();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    pub(crate) fn unsubscribe(&mut self, filter: &TopicFilter, handler: &Handler) -> bool {
        let Some(handlers) = self.subs.get_mut(filter) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.subs.remove(filter);
        }
        removed
    }

    pub(crate) fn use_before(&mut self, mw: Middleware) {
        self.before.push(mw);
    }

    pub(crate) fn use_after(&mut self, mw: Middleware) {
        self.after.push(mw);
    }

    pub(crate) fn clear(&mut self) {
        self.subs.clear();
        self.before.clear();
        self.after.clear();
    }

    /// Exact-topic handlers first, then wildcard handlers from the shortest
    /// prefix to the longest, each group in registration order.
    pub(crate) fn handlers_for(&self, kind: &EventKind) -> Vec<Handler> {
        let mut handlers: Vec<Handler> = self
            .subs
            .get(&TopicFilter::Exact(kind.clone()))
            .cloned()
            .unwrap_or_default();
        for prefix in kind.prefixes() {
            if let Some(wild) = self.subs.get(&TopicFilter::Prefix(prefix.to_string())) {
                handlers.extend(wild.iter().cloned());
            }
        }
        handlers
    }

    pub(crate) fn handler_count(&self, filter: &TopicFilter) -> usize {
        self.subs.get(filter).map_or(0, Vec::len)
    }

    pub(crate) fn before_chain(&self) -> Vec<Middleware> {
        self.before.clone()
    }

    pub(crate) fn after_chain(&self) -> Vec<Middleware> {
        self.after.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        handler(|_| Ok(()))
    }

    #[test]
    fn parse_distinguishes_exact_and_prefix() {
        assert_eq!(
            TopicFilter::parse("ingest.*").unwrap(),
            TopicFilter::Prefix("ingest".to_string())
        );
        assert_eq!(
            TopicFilter::parse("run.completed").unwrap(),
            TopicFilter::Exact(EventKind::RunCompleted)
        );
        assert!(TopicFilter::parse(".*").is_err());
        assert!(TopicFilter::parse("*").is_err());
        assert!(TopicFilter::parse("").is_err());
    }

    #[test]
    fn duplicate_subscription_is_stored_once() {
        let mut registry = Registry::default();
        let h = noop();
        let filter = TopicFilter::parse("run.started").unwrap();

        assert!(registry.subscribe(filter.clone(), h.clone()));
        assert!(!registry.subscribe(filter.clone(), h.clone()));
        assert_eq!(registry.handler_count(&filter), 1);

        // A different allocation with the same body is a different handler.
        assert!(registry.subscribe(filter.clone(), noop()));
        assert_eq!(registry.handler_count(&filter), 2);
    }

    #[test]
    fn unsubscribe_missing_handler_is_noop() {
        let mut registry = Registry::default();
        let filter = TopicFilter::parse("run.started").unwrap();
        assert!(!registry.unsubscribe(&filter, &noop()));
    }

    #[test]
    fn handlers_for_orders_exact_then_wildcards() {
        let mut registry = Registry::default();
        let exact = noop();
        let shallow = noop();
        let deep = noop();
        registry.subscribe(TopicFilter::parse("a.b.*").unwrap(), deep.clone());
        registry.subscribe(TopicFilter::parse("a.*").unwrap(), shallow.clone());
        registry.subscribe(TopicFilter::parse("a.b.c").unwrap(), exact.clone());

        let found = registry.handlers_for(&EventKind::parse("a.b.c").unwrap());
        assert_eq!(found.len(), 3);
        assert!(Arc::ptr_eq(&found[0], &exact));
        assert!(Arc::ptr_eq(&found[1], &shallow));
        assert!(Arc::ptr_eq(&found[2], &deep));

        let other = registry.handlers_for(&EventKind::parse("b.c").unwrap());
        assert!(other.is_empty());
    }
}
