use async_trait::async_trait;
use tracing::info;

use super::{StageExecutor, StageOutcome, StageRequest};
use crate::Result;

/// Logs every task and succeeds without running anything
#[derive(Debug, Default)]
pub struct DryRunExecutor;

impl DryRunExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn execute(&self, request: StageRequest) -> Result<StageOutcome> {
        info!(
            "[dry-run] {} -> {}",
            request.task_id,
            request.output_dir().display()
        );
        Ok(StageOutcome::default())
    }
}
