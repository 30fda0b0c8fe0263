use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::model::{ProtocolError, StepContext};
use crate::observability::Metrics;
use crate::plugin::Step;

/// Decorator recording name, module, duration, and terminal status for each
/// step execution.
pub(crate) struct InstrumentedStep {
    inner: Arc<dyn Step>,
    name: String,
    module: String,
    metrics: Arc<Metrics>,
}

impl InstrumentedStep {
    pub(crate) fn wrap(
        inner: Arc<dyn Step>,
        name: String,
        module: String,
        metrics: Arc<Metrics>,
    ) -> Arc<dyn Step> {
        Arc::new(Self {
            inner,
            name,
            module,
            metrics,
        })
    }
}

#[async_trait]
impl Step for InstrumentedStep {
    async fn run(&self, ctx: &mut StepContext) -> Result<(), ProtocolError> {
        let start = Instant::now();
        let result = self.inner.run(ctx).await;
        let status = if result.is_ok() { "success" } else { "failed" };
        self.metrics
            .step_completed(&self.name, &self.module, status, start.elapsed());
        result
    }
}
