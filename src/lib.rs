//! # Stride - multi-agent workflow orchestration
//!
//! Stride coordinates capability-described agents through declarative
//! workflows and compositions. A single engine owns the capability
//! directory, the invocation gateway and two executors.
//!
//! ## Features
//!
//! - **Capability Directory**: agents publish typed interfaces, tags and cost hints
//! - **Workflows**: sequential, parallel, hierarchical and conditional topologies
//! - **Compositions**: chains, ensembles, tiered trees and feedback loops with data mappings
//! - **Budgets and Cancellation**: per-execution cost limits and cooperative cancel
//! - **Metrics**: Prometheus metrics for monitoring
//! - **Health Checks**: Kubernetes-ready health endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stride::config::EngineSettings;
//! use stride::orchestration::Engine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::with_builtin_catalog(EngineSettings::default()).await?;
//!     let execution = engine
//!         .orchestrator
//!         .execute_workflow("comprehensive_fitness_assessment", Default::default(), None)
//!         .await?;
//!     println!("{:?}", execution.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: definitions, execution records and the agent port
//! - **Orchestration**: resolver, gateway, strategies and executors
//! - **Adapters**: HTTP handlers, metrics and mock agents
//! - **Config**: configuration management

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod orchestration;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::MetricsHandler;
use crate::orchestration::Engine;
use axum::{routing::{get, post}, Router};
use std::sync::Arc;

/// Creates the Axum application router with all endpoints configured.
///
/// Health and metrics handlers are built from the engine, so every
/// router observes the same directory, stores and registry.
pub fn create_app(engine: Arc<Engine>) -> Router {
    let health_handler = Arc::new(HealthHandler::new(engine.clone()));
    let metrics_handler = Arc::new(MetricsHandler::new(engine.metrics.clone()));

    let ops_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }))
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }));

    let api_state = ApiState { engine };

    let api_router = Router::new()
        // Capability discovery
        .route("/capabilities", get(api_handler::list_capabilities).post(api_handler::register_capability))
        .route("/capabilities/:agent_id", get(api_handler::get_capability))
        .route("/agents/compatible", get(api_handler::find_compatible_agents))
        // Workflows
        .route("/workflows", get(api_handler::list_workflows).post(api_handler::register_workflow))
        .route("/workflows/:id", get(api_handler::get_workflow))
        .route("/workflows/:id/execute", post(api_handler::execute_workflow))
        // Compositions
        .route("/compositions", get(api_handler::list_compositions).post(api_handler::register_composition))
        .route("/compositions/:id", get(api_handler::get_composition))
        .route("/compositions/:id/execute", post(api_handler::execute_composition))
        // Executions of either kind
        .route("/executions/:id", get(api_handler::get_execution))
        .route("/executions/:id/cancel", post(api_handler::cancel_execution))
        .with_state(api_state);

    ops_router.nest("/api", api_router).layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
