//! Agent compositions: free-form node graphs with role tags and field mappings

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capability::Shape;
use super::workflow::StepConditions;

/// Role a node plays inside a composition or a hierarchical workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    #[default]
    Primary,
    Secondary,
    Validator,
    Aggregator,
    Fallback,
}

impl AgentRole {
    /// Execution tiers, in the order the hierarchical strategy runs them
    pub const TIERS: [AgentRole; 5] = [
        AgentRole::Primary,
        AgentRole::Secondary,
        AgentRole::Validator,
        AgentRole::Aggregator,
        AgentRole::Fallback,
    ];

    pub fn tier(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentRole::Primary => "primary",
            AgentRole::Secondary => "secondary",
            AgentRole::Validator => "validator",
            AgentRole::Aggregator => "aggregator",
            AgentRole::Fallback => "fallback",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionType {
    SequentialChain,
    ParallelEnsemble,
    HierarchicalTree,
    FeedbackLoop,
    ConditionalBranch,
}

impl std::fmt::Display for CompositionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompositionType::SequentialChain => "sequential_chain",
            CompositionType::ParallelEnsemble => "parallel_ensemble",
            CompositionType::HierarchicalTree => "hierarchical_tree",
            CompositionType::FeedbackLoop => "feedback_loop",
            CompositionType::ConditionalBranch => "conditional_branch",
        };
        write!(f, "{}", name)
    }
}

/// One agent invocation inside a composition graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CompositionNode {
    pub node_id: String,
    pub agent_id: String,
    /// Capability to invoke; the agent's primary capability when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default)]
    pub role: AgentRole,
    /// localKey -> sourceKey, where `node.field` reads another node's output
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    /// localKey -> key in this node's result
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<StepConditions>,
    #[serde(default = "super::workflow::default_step_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
}

impl CompositionNode {
    pub fn new(node_id: impl Into<String>, agent_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            node_id: node_id.into(),
            agent_id: agent_id.into(),
            capability: None,
            role,
            input_mapping: BTreeMap::new(),
            output_mapping: BTreeMap::new(),
            depends_on: Vec::new(),
            conditions: None,
            timeout_ms: super::workflow::default_step_timeout(),
            retry_count: 0,
        }
    }

    pub fn map_input(mut self, local: impl Into<String>, source: impl Into<String>) -> Self {
        self.input_mapping.insert(local.into(), source.into());
        self
    }

    pub fn map_output(mut self, local: impl Into<String>, result_key: impl Into<String>) -> Self {
        self.output_mapping.insert(local.into(), result_key.into());
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_conditions(mut self, conditions: StepConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Node ids this node reads from through `node.field` mappings
    pub fn mapped_sources(&self) -> impl Iterator<Item = &str> {
        self.input_mapping
            .values()
            .filter_map(|source| source.split_once('.').map(|(node, _)| node))
    }
}

/// Splits a mapping source into `(node_id, field)` when it references a node.
///
/// Returns `Ok(None)` for plain input keys and `Err` for a malformed path
/// such as `.field` or `node.`.
pub fn parse_source(source: &str) -> Result<Option<(&str, &str)>, String> {
    match source.split_once('.') {
        None => Ok(None),
        Some((node, field)) if node.is_empty() || field.is_empty() => {
            Err(format!("malformed source path '{}'", source))
        }
        Some((node, field)) => Ok(Some((node, field))),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentComposition {
    pub composition_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub composition_type: CompositionType,
    pub nodes: Vec<CompositionNode>,
    #[serde(default = "Shape::open")]
    pub input_shape: Shape,
    #[serde(default = "Shape::open")]
    pub output_shape: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_limit: Option<f64>,
    /// Iteration cap for feedback loops; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AgentComposition {
    pub fn new(
        composition_id: impl Into<String>,
        composition_type: CompositionType,
        nodes: Vec<CompositionNode>,
    ) -> Self {
        let composition_id = composition_id.into();
        Self {
            name: composition_id.clone(),
            composition_id,
            description: String::new(),
            composition_type,
            nodes,
            input_shape: Shape::open(),
            output_shape: Shape::open(),
            cost_limit: None,
            max_iterations: None,
            metadata: Map::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&CompositionNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Distinct agent ids, in first-use order
    pub fn agents_required(&self) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for node in &self.nodes {
            if !agents.contains(&node.agent_id) {
                agents.push(node.agent_id.clone());
            }
        }
        agents
    }
}

/// Catalog entry returned by composition listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionSummary {
    pub composition_id: String,
    pub name: String,
    pub description: String,
    pub composition_type: CompositionType,
    pub node_count: usize,
    pub agents_required: Vec<String>,
    pub complexity: String,
    pub category: String,
    pub estimated_duration_mins: u64,
    pub target_users: Vec<String>,
    pub estimated_cost: Option<f64>,
}

impl From<&AgentComposition> for CompositionSummary {
    fn from(comp: &AgentComposition) -> Self {
        let text = |key: &str, default: &str| {
            comp.metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let target_users = comp
            .metadata
            .get("target_users")
            .and_then(Value::as_array)
            .map(|users| {
                users
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            composition_id: comp.composition_id.clone(),
            name: comp.name.clone(),
            description: comp.description.clone(),
            composition_type: comp.composition_type,
            node_count: comp.nodes.len(),
            agents_required: comp.agents_required(),
            complexity: text("complexity", "medium"),
            category: text("category", "general"),
            estimated_duration_mins: comp
                .metadata
                .get("estimated_duration")
                .and_then(Value::as_u64)
                .unwrap_or(30),
            target_users,
            estimated_cost: comp.cost_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_source() {
        assert_eq!(parse_source("exercise").unwrap(), None);
        assert_eq!(
            parse_source("analyze.stability_score").unwrap(),
            Some(("analyze", "stability_score"))
        );
        assert!(parse_source(".score").is_err());
        assert!(parse_source("analyze.").is_err());
    }

    #[test]
    fn test_roles_are_tiered_in_order() {
        let tiers: Vec<usize> = AgentRole::TIERS.iter().map(AgentRole::tier).collect();
        assert_eq!(tiers, vec![0, 1, 2, 3, 4]);
        assert!(AgentRole::Validator < AgentRole::Aggregator);
    }

    #[test]
    fn test_summary_reads_metadata() {
        let mut comp = AgentComposition::new(
            "wellness",
            CompositionType::HierarchicalTree,
            vec![
                CompositionNode::new("a", "sensor", AgentRole::Primary),
                CompositionNode::new("b", "coach", AgentRole::Secondary),
                CompositionNode::new("c", "sensor", AgentRole::Aggregator),
            ],
        );
        comp.metadata.insert("complexity".into(), json!("high"));

        let summary = CompositionSummary::from(&comp);
        assert_eq!(summary.agents_required, vec!["sensor", "coach"]);
        assert_eq!(summary.complexity, "high");
        assert_eq!(summary.category, "general");
        assert_eq!(summary.estimated_duration_mins, 30);
    }
}
