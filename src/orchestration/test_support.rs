//! Scripted agents shared by the orchestrator and composition suites

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};

use crate::config::EngineSettings;
use crate::domain::{AgentOutput, AgentPort, CapabilityInterface, Payload, Shape};
use crate::orchestration::directory::CapabilityDirectory;
use crate::orchestration::gateway::InvocationGateway;

pub const AGENT: &str = "scripted";

/// Succeeds with a deterministic echo unless the capability is `fail`.
/// `slow` sleeps for `delay` first. Every call costs `cost`.
pub struct ScriptedAgent {
    pub cost: f64,
    pub delay: Duration,
    pub failing: HashSet<String>,
    pub calls: AtomicUsize,
    pub by_capability: Mutex<HashMap<String, usize>>,
}

impl ScriptedAgent {
    pub fn new(cost: f64) -> Self {
        Self {
            cost,
            delay: Duration::from_millis(0),
            failing: HashSet::from(["fail".to_string()]),
            calls: AtomicUsize::new(0),
            by_capability: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, capability: &str) -> usize {
        self.by_capability
            .lock()
            .unwrap()
            .get(capability)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AgentPort for ScriptedAgent {
    async fn invoke(&self, capability: &str, input: Payload) -> anyhow::Result<AgentOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .by_capability
            .lock()
            .unwrap()
            .entry(capability.to_string())
            .or_default() += 1;

        if capability == "slow" {
            sleep(self.delay).await;
        }
        if self.failing.contains(capability) {
            return Ok(AgentOutput::failed(format!("{} refused", capability), self.cost));
        }
        let keys: Vec<&String> = input.keys().collect();
        Ok(AgentOutput::ok(
            json!({"capability": capability, "score": 0.8, "seen": keys}),
            self.cost,
        ))
    }
}

pub fn interface(agent_id: &str) -> CapabilityInterface {
    CapabilityInterface {
        agent_id: agent_id.to_string(),
        input_shape: Shape::open(),
        output_shape: Shape::open(),
        capabilities: ["analyze", "coach", "fail", "slow"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        compatibility_tags: vec!["test".to_string()],
        version: "1.0.0".to_string(),
    }
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry_base_delay_ms: 1,
        feedback_interval_ms: 1,
        ..EngineSettings::default()
    }
}

pub async fn wired(agent: Arc<ScriptedAgent>) -> (CapabilityDirectory, InvocationGateway) {
    let directory = CapabilityDirectory::new();
    directory.register(interface(AGENT)).await;
    let gateway = InvocationGateway::new();
    gateway.register_agent(AGENT, agent).await;
    (directory, gateway)
}

pub fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}
