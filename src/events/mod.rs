//! Topic-based event bus used for run lifecycle observability.

mod audit;
mod bus;
mod event;
mod registry;

pub use audit::{first_broken_link, AuditEntry, AuditTrail, AUDITED_TOPICS};
pub use bus::EventBus;
pub use event::{into_fields, Event, EventKind, Fields, IntoTopic};
pub use registry::{handler, middleware, Handler, Middleware, TopicFilter};
