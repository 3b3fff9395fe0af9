use async_trait::async_trait;

use super::types::{GenerateOptions, HealthReport};

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// provider name reported in health checks
    fn name(&self) -> &str;

    /// text completion; failures come back as bracketed diagnostic strings
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> String;

    /// reachability probe; never fails
    async fn health(&self) -> HealthReport {
        HealthReport {
            ok: true,
            ..HealthReport::new(self.name(), "")
        }
    }
}
