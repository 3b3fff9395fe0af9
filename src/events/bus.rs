//! In-process publish/subscribe hub.
//!
//! Two delivery paths share one pipeline (`before` middleware → handler
//! fan-out → `after` middleware):
//!
//! - [`EventBus::publish`] delivers inline on the caller's thread.
//! - [`EventBus::enqueue`] offers the event to a bounded queue drained by a
//!   single background task started with [`EventBus::start`]. When the queue
//!   stays full past the enqueue timeout the event is dropped.
//!
//! Handler and middleware failures, including panics, are logged and
//! isolated; they never reach the publisher or other subscribers.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::event::{into_fields, Event, IntoTopic};
use super::registry::{Handler, Middleware, Registry, TopicFilter};
use crate::core::config::EventSettings;
use crate::core::errors::CoreError;

/// Cloneable handle; clones share registry, queue and worker.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    registry: RwLock<Registry>,
    tx: mpsc::Sender<Event>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    worker: Mutex<Option<Worker>>,
    dropped: AtomicU64,
    enqueue_timeout: Duration,
    stop_timeout: Duration,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(&EventSettings::default())
    }
}

impl EventBus {
    pub fn new(settings: &EventSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                worker: Mutex::new(None),
                dropped: AtomicU64::new(0),
                enqueue_timeout: Duration::from_millis(settings.enqueue_timeout_ms),
                stop_timeout: Duration::from_millis(settings.stop_timeout_ms),
            }),
        }
    }

    // ---------- subscription ----------

    /// Registers `handler` for a topic or a `prefix.*` pattern. Registering
    /// the same handler twice is a no-op.
    pub fn subscribe(&self, topic: &str, handler: Handler) -> Result<(), CoreError> {
        let filter = TopicFilter::parse(topic)?;
        if self.inner.write_registry().subscribe(filter.clone(), handler) {
            tracing::debug!("Subscribed handler to {}", filter);
        }
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str, handler: &Handler) -> Result<(), CoreError> {
        let filter = TopicFilter::parse(topic)?;
        if self.inner.write_registry().unsubscribe(&filter, handler) {
            tracing::debug!("Unsubscribed handler from {}", filter);
        }
        Ok(())
    }

    /// Number of handlers registered under exactly this topic or pattern.
    pub fn handler_count(&self, topic: &str) -> usize {
        match TopicFilter::parse(topic) {
            Ok(filter) => self.inner.read_registry().handler_count(&filter),
            Err(_) => 0,
        }
    }

    /// Drops every subscription and middleware.
    pub fn clear(&self) {
        self.inner.write_registry().clear();
    }

    // ---------- middleware ----------

    pub fn use_before(&self, mw: Middleware) {
        self.inner.write_registry().use_before(mw);
    }

    pub fn use_after(&self, mw: Middleware) {
        self.inner.write_registry().use_after(mw);
    }

    // ---------- delivery ----------

    /// Delivers synchronously and returns the event as left by the `after` chain.
    ///
    /// Only an invalid topic is an error; handler failures are logged.
    pub fn publish(
        &self,
        topic: impl IntoTopic,
        payload: Value,
        meta: Value,
    ) -> Result<Event, CoreError> {
        let event = Event::new(topic.into_kind()?, into_fields(payload), into_fields(meta));
        Ok(self.inner.deliver(event))
    }

    /// Queues the event for the background worker.
    ///
    /// Waits at most the enqueue timeout for room; a full queue drops the
    /// event with a warning instead of failing.
    pub async fn enqueue(
        &self,
        topic: impl IntoTopic,
        payload: Value,
        meta: Value,
    ) -> Result<(), CoreError> {
        let event = Event::new(topic.into_kind()?, into_fields(payload), into_fields(meta));
        match self.inner.tx.send_timeout(event, self.inner.enqueue_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) | Err(SendTimeoutError::Closed(event)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Event queue full; dropping event: {}", event.topic());
            }
        }
        Ok(())
    }

    /// Events dropped by [`enqueue`](Self::enqueue) since construction.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Events waiting for the background worker.
    pub fn queue_len(&self) -> usize {
        self.inner.tx.max_capacity() - self.inner.tx.capacity()
    }

    // ---------- worker lifecycle ----------

    /// Spawns the background delivery task unless one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(Arc::clone(&self.inner), cancel.clone()));
        *worker = Some(Worker { cancel, handle });
        tracing::info!("EventBus worker started");
    }

    /// Signals the worker and waits up to the stop timeout. Queued events
    /// stay queued for the next [`start`](Self::start).
    pub async fn stop(&self) {
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Worker { cancel, handle }) = worker else {
            return;
        };

        cancel.cancel();
        match tokio::time::timeout(self.inner.stop_timeout, handle).await {
            Ok(Ok(())) => tracing::info!("EventBus worker stopped"),
            Ok(Err(err)) => tracing::warn!("EventBus worker ended abnormally: {}", err),
            Err(_) => tracing::warn!(
                "EventBus worker still busy after {:?}; leaving it to finish",
                self.inner.stop_timeout
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

async fn run_worker(inner: Arc<Inner>, cancel: CancellationToken) {
    // A previous worker that outlived its stop timeout still holds the
    // receiver; wait for it rather than delivering concurrently.
    let mut rx = tokio::select! {
        _ = cancel.cancelled() => return,
        guard = inner.rx.lock() => guard,
    };

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(event) => event,
                None => break,
            },
        };
        inner.deliver(event);
    }
}

impl Inner {
    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the full pipeline. Chains and handlers are snapshotted and the
    /// lock released before any callback runs, so callbacks may freely
    /// (un)subscribe.
    fn deliver(&self, event: Event) -> Event {
        let before = self.read_registry().before_chain();
        let event = apply_chain(&before, event, "before");

        let handlers = self.read_registry().handlers_for(event.kind());
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!("Handler #{} error for {}: {:#}", index, event.topic(), err)
                }
                Err(panic) => tracing::error!(
                    "Handler #{} panicked for {}: {}",
                    index,
                    event.topic(),
                    panic_message(panic.as_ref())
                ),
            }
        }

        let after = self.read_registry().after_chain();
        apply_chain(&after, event, "after")
    }
}

fn apply_chain(chain: &[Middleware], mut event: Event, stage: &str) -> Event {
    for mw in chain {
        let input = event.clone();
        event = match catch_unwind(AssertUnwindSafe(|| mw(event))) {
            Ok(Ok(next)) if next.id() == input.id() && next.kind() == input.kind() => next,
            Ok(Ok(_)) => {
                tracing::error!(
                    "{} middleware replaced the identity of {}; ignoring its output",
                    stage,
                    input.topic()
                );
                input
            }
            Ok(Err(err)) => {
                tracing::error!("{} middleware error for {}: {:#}", stage, input.topic(), err);
                input
            }
            Err(panic) => {
                tracing::error!(
                    "{} middleware panicked for {}: {}",
                    stage,
                    input.topic(),
                    panic_message(panic.as_ref())
                );
                input
            }
        };
    }
    event
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
