//! Hash-chained provenance log fed from bus events.
//!
//! Each entry's `hash` is the SHA-256 of its canonical JSON (sorted keys,
//! `hash` omitted) followed by `prev_hash`, so editing or dropping any entry
//! breaks every later link.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::bus::EventBus;
use super::event::Event;
use super::registry::handler;
use crate::core::errors::CoreError;

/// Topic patterns recorded when attached with [`AuditTrail::attach`].
pub const AUDITED_TOPICS: [&str; 2] = ["run.*", "ingest.*"];

const DEFAULT_ACTOR: &str = "covenant";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub ts: f64,
    pub actor: String,
    pub action: String,
    pub input: String,
    pub output: String,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditEntry {
    fn seal(ts: f64, actor: String, action: String, input: String, output: String, prev_hash: String) -> Self {
        let hash = entry_hash(ts, &actor, &action, &input, &output, &prev_hash);
        Self {
            ts,
            actor,
            action,
            input,
            output,
            prev_hash,
            hash,
        }
    }

    fn recomputed_hash(&self) -> String {
        entry_hash(self.ts, &self.actor, &self.action, &self.input, &self.output, &self.prev_hash)
    }
}

#[derive(Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribes the trail to the run and ingest lifecycle topics.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<(), CoreError> {
        for topic in AUDITED_TOPICS {
            let trail = Arc::clone(self);
            bus.subscribe(
                topic,
                handler(move |event: &Event| {
                    trail.record(event);
                    Ok(())
                }),
            )?;
        }
        Ok(())
    }

    /// Appends an entry for `event`: the actor comes from `meta.actor`, the
    /// input is the event meta and the output its payload.
    pub fn record(&self, event: &Event) -> AuditEntry {
        let actor = event
            .meta
            .get("actor")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ACTOR)
            .to_string();
        let input = Value::Object(event.meta.clone()).to_string();
        let output = Value::Object(event.payload.clone()).to_string();

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let prev_hash = entries.last().map(|e| e.hash.clone()).unwrap_or_default();
        let entry = AuditEntry::seal(
            event.timestamp(),
            actor,
            event.topic().to_string(),
            input,
            output,
            prev_hash,
        );
        entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the first entry whose hash or back-link does not check out.
    pub fn first_broken_link(&self) -> Option<usize> {
        first_broken_link(&self.entries())
    }
}

pub fn first_broken_link(entries: &[AuditEntry]) -> Option<usize> {
    let mut prev = "";
    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash != prev || entry.hash != entry.recomputed_hash() {
            return Some(index);
        }
        prev = &entry.hash;
    }
    None
}

fn entry_hash(ts: f64, actor: &str, action: &str, input: &str, output: &str, prev_hash: &str) -> String {
    // serde_json maps keep keys sorted, which makes this the canonical form.
    let body = json!({
        "ts": ts,
        "actor": actor,
        "action": action,
        "input": input,
        "output": output,
        "prev_hash": prev_hash,
    });
    let mut hasher = Sha256::new();
    hasher.update(body.to_string().as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached() -> (EventBus, Arc<AuditTrail>) {
        let bus = EventBus::default();
        let trail = AuditTrail::new();
        trail.attach(&bus).unwrap();
        (bus, trail)
    }

    #[test]
    fn entries_link_to_their_predecessor() {
        let (bus, trail) = attached();
        bus.publish("run.started", json!({"stage": "query"}), json!({"question": "q"}))
            .unwrap();
        bus.publish("retrieve.done", json!({"n_hits": 1}), Value::Null)
            .unwrap();
        bus.publish("run.completed", json!({"status": "ok"}), json!({"actor": "cli"}))
            .unwrap();
        bus.publish("ingest.requested", json!({"path": "/docs"}), Value::Null)
            .unwrap();

        let entries = trail.entries();
        let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["run.started", "run.completed", "ingest.requested"]);

        assert_eq!(entries[0].prev_hash, "");
        for pair in entries.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
        assert!(entries.iter().all(|e| e.hash.len() == 64));
        assert_eq!(entries[0].actor, "covenant");
        assert_eq!(entries[1].actor, "cli");
        assert_eq!(entries[0].input, r#"{"question":"q"}"#);
        assert_eq!(entries[0].output, r#"{"stage":"query"}"#);
        assert_eq!(trail.first_broken_link(), None);
    }

    #[test]
    fn tampering_is_detected() {
        let (bus, trail) = attached();
        for status in ["ok", "ok", "error"] {
            bus.publish("run.completed", json!({"status": status}), Value::Null)
                .unwrap();
        }

        let mut entries = trail.entries();
        entries[1].output = r#"{"status":"forged"}"#.to_string();
        assert_eq!(first_broken_link(&entries), Some(1));

        let mut entries = trail.entries();
        entries.remove(1);
        assert_eq!(first_broken_link(&entries), Some(1));
    }

    #[test]
    fn identical_events_get_distinct_hashes() {
        let trail = AuditTrail::new();
        let first = trail.record(&Event::new(
            crate::events::EventKind::RunStarted,
            Default::default(),
            Default::default(),
        ));
        let second = trail.record(&Event::new(
            crate::events::EventKind::RunStarted,
            Default::default(),
            Default::default(),
        ));
        assert_ne!(first.hash, second.hash);
        assert_eq!(second.prev_hash, first.hash);
    }
}
