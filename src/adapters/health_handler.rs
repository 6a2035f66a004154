use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::orchestration::Engine;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub agents: usize,
    /// Directory entries with an implementation attached to the gateway
    pub attached_agents: usize,
    pub pending_invocations: usize,
    pub workflows: usize,
    pub compositions: usize,
    pub executions: usize,
}

pub struct HealthHandler {
    engine: Arc<Engine>,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            start_time: std::time::Instant::now(),
        }
    }

    async fn checks(&self) -> HealthChecks {
        let interfaces = self.engine.directory.list().await;
        let mut attached_agents = 0;
        for interface in &interfaces {
            if self.engine.gateway.has_agent(&interface.agent_id).await {
                attached_agents += 1;
            }
        }
        HealthChecks {
            agents: interfaces.len(),
            attached_agents,
            pending_invocations: self.engine.gateway.pending_count().await,
            workflows: self.engine.orchestrator.workflow_count().await,
            compositions: self.engine.compositions.composition_count().await,
            executions: self.engine.orchestrator.execution_count().await
                + self.engine.compositions.execution_count().await,
        }
    }

    /// Basic health check - returns 200 if server is running
    pub async fn health(&self) -> impl IntoResponse {
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks: self.checks().await,
        };

        (StatusCode::OK, Json(status))
    }

    /// Readiness check - ready once at least one directory agent can be invoked
    pub async fn ready(&self) -> impl IntoResponse {
        let checks = self.checks().await;
        if checks.attached_agents > 0 {
            (StatusCode::OK, Json(serde_json::json!({
                "status": "ready",
                "message": "Engine is ready to accept executions",
                "checks": checks
            })))
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({
                "status": "not_ready",
                "message": "No invocable agents registered",
                "checks": checks
            })))
        }
    }

    /// Liveness check - returns 200 if server is alive
    pub async fn live(&self) -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "alive",
            "message": "Server is alive"
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;

    #[tokio::test]
    async fn test_health_endpoint() {
        let engine = Arc::new(Engine::new(EngineSettings::default()).unwrap());
        let handler = HealthHandler::new(engine);

        let response = handler.health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_requires_agents() {
        let engine = Arc::new(Engine::new(EngineSettings::default()).unwrap());
        let handler = HealthHandler::new(engine.clone());
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Published interface without an implementation behind it
        engine
            .register_capability(crate::orchestration::test_support::interface("ghost"))
            .await;
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(handler.checks().await.attached_agents, 0);

        engine.load_builtin_catalog().await.unwrap();
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let checks = handler.checks().await;
        assert_eq!(checks.attached_agents, checks.agents - 1);
        assert_eq!(checks.pending_invocations, 0);
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let engine = Arc::new(Engine::new(EngineSettings::default()).unwrap());
        let handler = HealthHandler::new(engine);
        let response = handler.live().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
