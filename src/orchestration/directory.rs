//! Capability directory: agent id -> published interface

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::adapters::metrics_handler::EngineMetrics;
use crate::domain::{CapabilityInterface, Payload};

#[derive(Clone, Default)]
pub struct CapabilityDirectory {
    interfaces: Arc<RwLock<HashMap<String, CapabilityInterface>>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl CapabilityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Store an interface; a later registration for the same agent replaces it
    pub async fn register(&self, interface: CapabilityInterface) {
        let mut interfaces = self.interfaces.write().await;
        if let Some(previous) = interfaces.insert(interface.agent_id.clone(), interface) {
            tracing::debug!(agent_id = %previous.agent_id, "Replaced capability interface");
        }
    }

    pub async fn lookup(&self, agent_id: &str) -> Option<CapabilityInterface> {
        let interfaces = self.interfaces.read().await;
        interfaces.get(agent_id).cloned()
    }

    /// Agents exposing `capability`, optionally sharing at least one of `tags`.
    /// Results are sorted by agent id.
    pub async fn find_by_capability(
        &self,
        capability: &str,
        tags: Option<&[String]>,
    ) -> Vec<CapabilityInterface> {
        let interfaces = self.interfaces.read().await;
        let mut found: Vec<CapabilityInterface> = interfaces
            .values()
            .filter(|i| i.supports(capability))
            .filter(|i| match tags {
                Some(tags) if !tags.is_empty() => i.shares_tag(tags),
                _ => true,
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        found
    }

    /// Agents matching any of `capabilities`, optionally filtered by tags
    pub async fn find_compatible(
        &self,
        capabilities: &[String],
        tags: Option<&[String]>,
    ) -> Vec<CapabilityInterface> {
        let interfaces = self.interfaces.read().await;
        let mut found: Vec<CapabilityInterface> = interfaces
            .values()
            .filter(|i| capabilities.iter().any(|c| i.supports(c)))
            .filter(|i| match tags {
                Some(tags) if !tags.is_empty() => i.shares_tag(tags),
                _ => true,
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        found
    }

    pub async fn list(&self) -> Vec<CapabilityInterface> {
        let interfaces = self.interfaces.read().await;
        let mut all: Vec<CapabilityInterface> = interfaces.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Point-in-time copy used by registration validation
    pub async fn snapshot(&self) -> HashMap<String, CapabilityInterface> {
        self.interfaces.read().await.clone()
    }

    /// Advisory check of a payload against the agent's input shape, run
    /// before every dispatch.
    ///
    /// Mismatches are logged and counted, never enforced: agents decide what
    /// they accept.
    pub async fn check_input(&self, agent_id: &str, payload: &Payload) -> bool {
        let interfaces = self.interfaces.read().await;
        let Some(interface) = interfaces.get(agent_id) else {
            return false;
        };
        match interface.input_shape.validate(payload) {
            Ok(()) => true,
            Err(problems) => {
                tracing::warn!(
                    agent_id,
                    problems = %problems.join(", "),
                    "Payload does not match declared input shape"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_shape_mismatch(agent_id);
                }
                false
            }
        }
    }
}
