//! Invocation gateway: the one place the engine calls out to agents
//!
//! Every call becomes an [`InvocationRequest`] with a fresh correlation id.
//! The agent runs on its own task and answers through [`InvocationGateway::deliver`];
//! the caller waits for the correlated response or gives up after the request
//! timeout. The gateway never retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::{timeout, Duration};

use crate::adapters::metrics_handler::EngineMetrics;
use crate::domain::{
    AgentPort, CapabilityRequest, CapabilityResponse, InvocationRequest, InvocationResponse,
};

pub const TIMEOUT_ERROR: &str = "timeout";

type PendingMap = HashMap<String, oneshot::Sender<InvocationResponse>>;

#[derive(Clone)]
pub struct InvocationGateway {
    agents: Arc<RwLock<HashMap<String, Arc<dyn AgentPort>>>>,
    pending: Arc<Mutex<PendingMap>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl InvocationGateway {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach the implementation answering calls addressed to `agent_id`
    pub async fn register_agent(&self, agent_id: impl Into<String>, agent: Arc<dyn AgentPort>) {
        let agent_id = agent_id.into();
        tracing::info!(agent_id = %agent_id, "Agent attached to gateway");
        self.agents.write().await.insert(agent_id, agent);
    }

    pub async fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send `request` to `to_agent` and wait for the correlated response.
    ///
    /// Never fails: unknown agents, agent errors and timeouts all come back as
    /// `success = false` responses.
    pub async fn invoke(
        &self,
        from_agent: &str,
        to_agent: &str,
        request: CapabilityRequest,
        session_id: Option<String>,
    ) -> CapabilityResponse {
        let started = Instant::now();
        let timeout_ms = request.timeout_ms;
        let capability = request.capability.clone();

        let agent = self.agents.read().await.get(to_agent).cloned();
        let Some(agent) = agent else {
            let response = CapabilityResponse::failure(
                format!("No agent registered for '{}'", to_agent),
                0,
            );
            self.record(to_agent, &capability, &response, started);
            return response;
        };

        let message = InvocationRequest::new(from_agent, to_agent, request, session_id);
        let correlation_id = message.correlation_id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id.clone(), tx);

        tracing::debug!(
            message_id = %message.message_id,
            correlation_id = %correlation_id,
            from_agent,
            to_agent,
            capability = %capability,
            "Dispatching capability request"
        );

        let gateway = self.clone();
        tokio::spawn(async move {
            let response = call_agent(agent.as_ref(), &message).await;
            gateway
                .deliver(InvocationResponse::reply_to(&message, response))
                .await;
        });

        let mut response = match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(reply)) => reply.response,
            Ok(Err(_)) => CapabilityResponse::failure("agent dropped the request", 0),
            Err(_) => {
                self.pending.lock().await.remove(&correlation_id);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    to_agent,
                    timeout_ms,
                    "Capability request timed out"
                );
                CapabilityResponse::failure(TIMEOUT_ERROR, 0)
            }
        };
        response.duration_ms = started.elapsed().as_millis() as u64;

        self.record(to_agent, &capability, &response, started);
        response
    }

    /// Route a response to its waiting caller. Returns false when nobody is
    /// waiting any more (the caller timed out) and the response is dropped.
    pub async fn deliver(&self, response: InvocationResponse) -> bool {
        let sender = self.pending.lock().await.remove(&response.correlation_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(
                    correlation_id = %response.correlation_id,
                    from_agent = %response.from_agent,
                    "Dropping late response"
                );
                false
            }
        }
    }

    fn record(&self, agent: &str, capability: &str, response: &CapabilityResponse, started: Instant) {
        if let Some(metrics) = &self.metrics {
            let outcome = match (&response.error, response.success) {
                (_, true) => "success",
                (Some(e), false) if e == TIMEOUT_ERROR => "timeout",
                _ => "failure",
            };
            metrics.record_invocation(
                agent,
                capability,
                outcome,
                started.elapsed().as_secs_f64(),
                response.cost,
            );
        }
    }
}

impl Default for InvocationGateway {
    fn default() -> Self {
        Self::new()
    }
}

async fn call_agent(agent: &dyn AgentPort, message: &InvocationRequest) -> CapabilityResponse {
    let started = Instant::now();
    match agent
        .invoke(&message.capability, message.payload.clone())
        .await
    {
        Ok(output) => CapabilityResponse {
            success: output.success,
            result: output.result,
            error: output.error,
            cost: output.cost,
            duration_ms: started.elapsed().as_millis() as u64,
        },
        Err(e) => CapabilityResponse::failure(e.to_string(), started.elapsed().as_millis() as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentOutput, Payload};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Echoes its input after `delay_ms`
    struct EchoAgent {
        delay_ms: u64,
    }

    #[async_trait]
    impl AgentPort for EchoAgent {
        async fn invoke(&self, capability: &str, input: Payload) -> anyhow::Result<AgentOutput> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            if capability == "explode" {
                anyhow::bail!("sensor offline");
            }
            Ok(AgentOutput::ok(Value::Object(input), 0.1))
        }
    }

    fn request(capability: &str, input: Value, timeout_ms: u64) -> CapabilityRequest {
        CapabilityRequest::new(capability, input.as_object().cloned().unwrap_or_default(), timeout_ms)
    }

    #[tokio::test]
    async fn test_invoke_returns_agent_result() {
        let gateway = InvocationGateway::new();
        gateway.register_agent("echo", Arc::new(EchoAgent { delay_ms: 0 })).await;

        let response = gateway
            .invoke("orchestrator", "echo", request("analyze", json!({"reps": 12}), 1000), None)
            .await;

        assert!(response.success);
        assert_eq!(response.result, json!({"reps": 12}));
        assert_eq!(response.cost, 0.1);
        assert_eq!(gateway.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_agent_error_becomes_failed_response() {
        let gateway = InvocationGateway::new();
        gateway.register_agent("echo", Arc::new(EchoAgent { delay_ms: 0 })).await;

        let response = gateway
            .invoke("orchestrator", "echo", request("explode", json!({}), 1000), None)
            .await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("sensor offline"));
        assert_eq!(response.cost, 0.0);
    }

    #[tokio::test]
    async fn test_timeout_and_late_response_dropped() {
        let gateway = InvocationGateway::new();
        gateway.register_agent("slow", Arc::new(EchoAgent { delay_ms: 200 })).await;

        let response = gateway
            .invoke("orchestrator", "slow", request("analyze", json!({}), 20), None)
            .await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(TIMEOUT_ERROR));
        assert_eq!(gateway.pending_count().await, 0);

        // The agent still finishes; its reply finds no waiter
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(gateway.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let gateway = InvocationGateway::new();
        let response = gateway
            .invoke("orchestrator", "ghost", request("analyze", json!({}), 100), None)
            .await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_correlated() {
        let gateway = InvocationGateway::new();
        gateway.register_agent("echo", Arc::new(EchoAgent { delay_ms: 10 })).await;

        let calls = (0..16).map(|i| {
            let gateway = gateway.clone();
            async move {
                let response = gateway
                    .invoke("orchestrator", "echo", request("analyze", json!({"n": i}), 1000), None)
                    .await;
                (i, response)
            }
        });
        for (i, response) in futures::future::join_all(calls).await {
            assert_eq!(response.result, json!({"n": i}));
        }
    }
}
