use anyhow::Result;
use tracing::info;

use super::PolicySink;

/// Policy sink that only records updates in the trace log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPolicy;

#[async_trait::async_trait]
impl PolicySink for LoggingPolicy {
    async fn update(&self, endpoint: &str, action: &str, reward: f64) -> Result<()> {
        info!(endpoint, action, reward, "policy update");
        Ok(())
    }
}
