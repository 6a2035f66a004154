use config::{Config, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod validator;

use crate::cli::Cli;
use crate::domain::{AgentComposition, CapabilityInterface, WorkflowDefinition};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub capabilities: Vec<CapabilityInterface>,
    /// In-process mock agents answering capability calls
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
    #[serde(default)]
    pub compositions: Vec<AgentComposition>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Tunables of the orchestration engine
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineSettings {
    /// Base of the exponential backoff between attempts
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Iteration cap for feedback loops that do not set their own
    #[serde(default = "default_max_feedback_iterations")]
    pub max_feedback_iterations: u32,
    /// Pause between feedback-loop iterations
    #[serde(default = "default_feedback_interval")]
    pub feedback_interval_ms: u64,
    /// Abort workflows that outlive their `global_timeout_secs`
    #[serde(default = "default_true")]
    pub enforce_global_timeout: bool,
    /// Sender id stamped on every invocation message
    #[serde(default = "default_caller_id")]
    pub caller_id: String,
    /// Seed the directory with the built-in fitness catalog at startup
    #[serde(default = "default_true")]
    pub builtin_catalog: bool,
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_max_feedback_iterations() -> u32 {
    10
}

fn default_feedback_interval() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_caller_id() -> String {
    "orchestrator".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: default_retry_base_delay(),
            max_feedback_iterations: default_max_feedback_iterations(),
            feedback_interval_ms: default_feedback_interval(),
            enforce_global_timeout: true,
            caller_id: default_caller_id(),
            builtin_catalog: true,
        }
    }
}

/// Mock agent definition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    #[serde(default)]
    pub behaviors: Vec<MockBehavior>,
}

/// How a mock agent answers one capability
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MockBehavior {
    pub capability: String,
    /// Response payload; string leaves are rendered as Tera templates against the input
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub latency_ms: u64,
    /// Probability in [0, 1] that an invocation fails
    #[serde(default)]
    pub failure_rate: f64,
    /// Always fail with this error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MockBehavior {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            response: Value::Object(Default::default()),
            cost: 0.0,
            latency_ms: 0,
            failure_rate: 0.0,
            error: None,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let config_path = &cli.config;
        let root = config_path
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(".");

        let s = Config::builder()
            .add_source(File::from(config_path.clone()).required(false))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);

        settings.load_external_configs(root)?;
        settings.validate()?;

        Ok(settings)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if cli.no_builtin_catalog {
            self.engine.builtin_catalog = false;
        }
    }

    pub fn from_root(root: &str) -> Result<Self, anyhow::Error> {
        let config_path = std::path::Path::new(root).join("stride");
        let s = Config::builder()
            .add_source(File::from(config_path).required(false))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;

        settings.load_external_configs(root)?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    /// Entries found under `config/<kind>/` override same-id entries from the main file
    fn load_external_configs(&mut self, root: &str) -> Result<(), anyhow::Error> {
        let capabilities = load_from_dir(&format!("{}/config/capabilities", root))?;
        Self::merge_vec_by_key(&mut self.capabilities, capabilities, |c| c.agent_id.clone());

        let agents = load_from_dir(&format!("{}/config/agents", root))?;
        Self::merge_vec_by_key(&mut self.agents, agents, |a| a.agent_id.clone());

        let workflows = load_from_dir(&format!("{}/config/workflows", root))?;
        Self::merge_vec_by_key(&mut self.workflows, workflows, |w| w.workflow_id.clone());

        let compositions = load_from_dir(&format!("{}/config/compositions", root))?;
        Self::merge_vec_by_key(&mut self.compositions, compositions, |c| {
            c.composition_id.clone()
        });
        Ok(())
    }

    /// Merge two vectors by a key function.
    /// Items from `other` override items in `base` with the same key.
    /// Items from `other` not in `base` are added.
    fn merge_vec_by_key<T, K, F>(base: &mut Vec<T>, other: Vec<T>, key_fn: F)
    where
        K: Eq + std::hash::Hash,
        F: Fn(&T) -> K,
    {
        use std::collections::HashMap;

        let mut key_to_index: HashMap<K, usize> = HashMap::new();
        for (i, item) in base.iter().enumerate() {
            key_to_index.insert(key_fn(item), i);
        }

        for item in other {
            let key = key_fn(&item);
            if let Some(&idx) = key_to_index.get(&key) {
                base[idx] = item;
            } else {
                key_to_index.insert(key, base.len());
                base.push(item);
            }
        }
    }
}

/// Read every json/yaml/toml file in `path`, in file-name order
fn load_from_dir<T: DeserializeOwned>(path: &str) -> Result<Vec<T>, anyhow::Error> {
    let pattern = format!("{}/*", path);
    let mut items = Vec::new();
    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) => {
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    if matches!(ext, "json" | "yaml" | "yml" | "toml") {
                        let content = std::fs::read_to_string(&path)?;
                        let item: T = match ext {
                            "json" => serde_json::from_str(&content)?,
                            "toml" => toml::from_str(&content)?,
                            _ => serde_yaml::from_str(&content)?,
                        };
                        tracing::debug!("Loaded {}", path.display());
                        items.push(item);
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to read glob entry: {}", e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineSettings::default();
        assert_eq!(engine.retry_base_delay_ms, 1000);
        assert_eq!(engine.max_feedback_iterations, 10);
        assert!(engine.enforce_global_timeout);
        assert_eq!(engine.caller_id, "orchestrator");
    }

    #[test]
    fn test_merge_vec_by_key_overrides_and_appends() {
        let mut base = vec![("a", 1), ("b", 2)];
        Settings::merge_vec_by_key(&mut base, vec![("b", 20), ("c", 3), ("c", 30)], |i| i.0);
        assert_eq!(base, vec![("a", 1), ("b", 20), ("c", 30)]);
    }

    #[test]
    fn test_mock_behavior_deserializes_with_defaults() {
        let behavior: MockBehavior = serde_yaml::from_str("capability: analyze\ncost: 0.1\n").unwrap();
        assert_eq!(behavior.capability, "analyze");
        assert_eq!(behavior.failure_rate, 0.0);
        assert!(behavior.error.is_none());
        assert_eq!(behavior.response, Value::Null);
    }
}
