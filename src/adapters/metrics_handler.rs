use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for executions and agent invocations
pub struct EngineMetrics {
    registry: Registry,

    // Execution metrics
    pub executions_total: CounterVec,
    pub executions_in_flight: Gauge,

    // Invocation metrics
    pub invocations_total: CounterVec,
    pub invocation_duration: HistogramVec,
    pub retries_total: CounterVec,
    pub shape_mismatches_total: CounterVec,

    // Cost metrics
    pub cost_units_total: CounterVec,
}

impl EngineMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Execution metrics
        let executions_total = CounterVec::new(
            Opts::new("stride_executions_total", "Finished executions"),
            &["kind", "status"],
        )?;
        registry.register(Box::new(executions_total.clone()))?;

        let executions_in_flight = Gauge::new(
            "stride_executions_in_flight",
            "Executions currently running",
        )?;
        registry.register(Box::new(executions_in_flight.clone()))?;

        // Invocation metrics
        let invocations_total = CounterVec::new(
            Opts::new("stride_invocations_total", "Agent capability invocations"),
            &["agent", "capability", "outcome"],
        )?;
        registry.register(Box::new(invocations_total.clone()))?;

        let invocation_duration = HistogramVec::new(
            HistogramOpts::new(
                "stride_invocation_duration_seconds",
                "Agent invocation latency in seconds",
            ),
            &["agent"],
        )?;
        registry.register(Box::new(invocation_duration.clone()))?;

        let retries_total = CounterVec::new(
            Opts::new("stride_retries_total", "Retried step attempts"),
            &["agent"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let shape_mismatches_total = CounterVec::new(
            Opts::new(
                "stride_shape_mismatches_total",
                "Payloads that did not match the agent's declared input shape",
            ),
            &["agent"],
        )?;
        registry.register(Box::new(shape_mismatches_total.clone()))?;

        // Cost metrics
        let cost_units_total = CounterVec::new(
            Opts::new("stride_cost_units_total", "Cost units charged by agents"),
            &["agent"],
        )?;
        registry.register(Box::new(cost_units_total.clone()))?;

        Ok(Self {
            registry,
            executions_total,
            executions_in_flight,
            invocations_total,
            invocation_duration,
            retries_total,
            shape_mismatches_total,
            cost_units_total,
        })
    }

    pub fn record_invocation(
        &self,
        agent: &str,
        capability: &str,
        outcome: &str,
        duration_secs: f64,
        cost: f64,
    ) {
        self.invocations_total
            .with_label_values(&[agent, capability, outcome])
            .inc();
        self.invocation_duration
            .with_label_values(&[agent])
            .observe(duration_secs);
        if cost > 0.0 {
            self.cost_units_total.with_label_values(&[agent]).inc_by(cost);
        }
    }

    pub fn record_shape_mismatch(&self, agent: &str) {
        self.shape_mismatches_total.with_label_values(&[agent]).inc();
    }

    pub fn execution_started(&self) {
        self.executions_in_flight.inc();
    }

    pub fn execution_finished(&self, kind: &str, status: &str) {
        self.executions_in_flight.dec();
        self.executions_total.with_label_values(&[kind, status]).inc();
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<EngineMetrics>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<EngineMetrics>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        assert!(EngineMetrics::new().is_ok());
    }

    #[test]
    fn test_metrics_encoding() {
        let collector = EngineMetrics::new().unwrap();

        collector.record_invocation("coach", "personalized_coaching", "success", 0.02, 0.05);
        collector.execution_started();
        collector.execution_finished("workflow", "completed");

        let metrics_text = collector.encode().unwrap();
        assert!(metrics_text.contains("stride_invocations_total"));
        assert!(metrics_text.contains("stride_cost_units_total"));
        assert!(metrics_text.contains("stride_executions_total"));
        assert_eq!(collector.executions_in_flight.get(), 0.0);
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let collector = Arc::new(EngineMetrics::new().unwrap());
        let handler = MetricsHandler::new(collector.clone());

        collector.retries_total.with_label_values(&["sensor"]).inc();

        let output = handler.metrics().await;
        assert!(output.contains("stride_retries_total"));
    }
}
