//! Text generation against an HTTP model server.

mod http;
mod provider;
mod types;


pub use http::HttpProvider;
pub use provider::GenerationProvider;
pub use types::{ChatMessage, GenerateOptions, HealthReport};
