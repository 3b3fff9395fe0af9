use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::errors::CoreError;

/// JSON object carried in an event's payload and meta.
pub type Fields = Map<String, Value>;

/// Typed topic tags for the lifecycle events this crate emits.
///
/// Anything else a caller publishes travels as [`EventKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStarted,
    RetrieveDone,
    RunCompleted,
    IngestRequested,
    IngestCompleted,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::RunStarted => "run.started",
            EventKind::RetrieveDone => "retrieve.done",
            EventKind::RunCompleted => "run.completed",
            EventKind::IngestRequested => "ingest.requested",
            EventKind::IngestCompleted => "ingest.completed",
            EventKind::Custom(topic) => topic,
        }
    }

    /// Parses a concrete topic. Empty topics and wildcard patterns are rejected.
    pub fn parse(topic: &str) -> Result<Self, CoreError> {
        let topic = topic.trim();
        if topic.is_empty() || topic.contains('*') {
            return Err(CoreError::InvalidTopic(topic.to_string()));
        }
        Ok(match topic {
            "run.started" => EventKind::RunStarted,
            "retrieve.done" => EventKind::RetrieveDone,
            "run.completed" => EventKind::RunCompleted,
            "ingest.requested" => EventKind::IngestRequested,
            "ingest.completed" => EventKind::IngestCompleted,
            other => EventKind::Custom(other.to_string()),
        })
    }

    /// Dot-separated ancestors usable as wildcard prefixes, shortest first.
    ///
    /// `a.b.c` yields `a`, `a.b`.
    pub(crate) fn prefixes(&self) -> impl Iterator<Item = &str> {
        let topic = self.as_str();
        topic
            .match_indices('.')
            .map(move |(idx, _)| &topic[..idx])
            .filter(|prefix| !prefix.is_empty())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that names a concrete topic.
pub trait IntoTopic {
    fn into_kind(self) -> Result<EventKind, CoreError>;
}

impl IntoTopic for EventKind {
    fn into_kind(self) -> Result<EventKind, CoreError> {
        match self {
            EventKind::Custom(topic) => EventKind::parse(&topic),
            kind => Ok(kind),
        }
    }
}

impl IntoTopic for &str {
    fn into_kind(self) -> Result<EventKind, CoreError> {
        EventKind::parse(self)
    }
}

impl IntoTopic for String {
    fn into_kind(self) -> Result<EventKind, CoreError> {
        EventKind::parse(&self)
    }
}

/// A single published or enqueued event.
///
/// `id`, `timestamp` and `topic` are fixed when the bus creates the event;
/// middleware may rewrite `payload` and `meta` before delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: Uuid,
    #[serde(rename = "ts")]
    timestamp: f64,
    #[serde(serialize_with = "serialize_kind", rename = "topic")]
    kind: EventKind,
    pub payload: Fields,
    pub meta: Fields,
}

impl Event {
    pub(crate) fn new(kind: EventKind, payload: Fields, meta: Fields) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            kind,
            payload,
            meta,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn topic(&self) -> &str {
        self.kind.as_str()
    }
}

fn serialize_kind<S: serde::Serializer>(kind: &EventKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.as_str())
}

/// Coerces a JSON value into event fields: objects pass through, `null`
/// becomes empty, any other value is stored under `"value"`.
pub fn into_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        Value::Null => Fields::new(),
        other => {
            let mut map = Fields::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
