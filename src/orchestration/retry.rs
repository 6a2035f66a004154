//! Step invocation with retry and exponential backoff

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::adapters::metrics_handler::EngineMetrics;
use crate::domain::{CapabilityRequest, Payload, StepResult};
use crate::orchestration::gateway::InvocationGateway;

/// One step or node, resolved and ready to invoke
#[derive(Debug, Clone)]
pub struct StepCall {
    pub step_id: String,
    pub agent_id: String,
    pub capability: String,
    pub input: Payload,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub session_id: Option<String>,
}

/// Drives a [`StepCall`] through the gateway: up to `retry_count` extra
/// attempts, waiting `base_delay * 2^attempt` between them.
#[derive(Clone)]
pub struct StepRunner {
    gateway: InvocationGateway,
    caller_id: String,
    base_delay: Duration,
    metrics: Option<Arc<EngineMetrics>>,
}

impl StepRunner {
    pub fn new(gateway: InvocationGateway, caller_id: impl Into<String>, base_delay: Duration) -> Self {
        Self {
            gateway,
            caller_id: caller_id.into(),
            base_delay,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run the call to success or exhaustion. Cost is summed over every
    /// attempt. Cancellation interrupts a pending backoff, never an attempt
    /// already in flight.
    pub async fn run(&self, call: &StepCall, cancel: &CancellationToken) -> StepResult {
        let mut total_cost = 0.0;
        let mut total_duration = 0;
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..=call.retry_count {
            attempts += 1;
            let request = CapabilityRequest::new(&call.capability, call.input.clone(), call.timeout_ms);
            let response = self
                .gateway
                .invoke(&self.caller_id, &call.agent_id, request, call.session_id.clone())
                .await;

            total_cost += response.cost;
            total_duration += response.duration_ms;

            if response.success {
                return StepResult {
                    success: true,
                    result: response.result,
                    error: None,
                    cost: total_cost,
                    duration_ms: total_duration,
                    attempts,
                    skipped: false,
                };
            }

            tracing::warn!(
                step_id = %call.step_id,
                agent_id = %call.agent_id,
                attempt = attempts,
                error = response.error.as_deref().unwrap_or("unknown error"),
                "Step attempt failed"
            );
            last_error = response.error;

            if attempt < call.retry_count {
                if let Some(metrics) = &self.metrics {
                    metrics.retries_total.with_label_values(&[call.agent_id.as_str()]).inc();
                }
                let delay = self.backoff(attempt);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::info!(step_id = %call.step_id, "Retry abandoned after cancellation");
                        break;
                    }
                }
            }
        }

        StepResult {
            success: false,
            result: serde_json::Value::Null,
            error: Some(last_error.unwrap_or_else(|| "step failed".to_string())),
            cost: total_cost,
            duration_ms: total_duration,
            attempts,
            skipped: false,
        }
    }
}
