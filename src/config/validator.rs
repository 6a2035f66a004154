use std::collections::HashMap;
use thiserror::Error;

use crate::config::{AgentConfig, EngineSettings, ServerSettings, Settings};
use crate::domain::{AgentComposition, CapabilityInterface, WorkflowDefinition};

/// Problems found in configuration or in a definition submitted for registration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("{owner} references unknown agent '{agent_id}'")]
    UnknownAgent { owner: String, agent_id: String },

    #[error("{owner}: agent '{agent_id}' does not provide capability '{capability}'")]
    UnknownCapability {
        owner: String,
        agent_id: String,
        capability: String,
    },

    #[error("{owner} depends on unknown step '{dependency}'")]
    UnknownDependency { owner: String, dependency: String },

    #[error("{owner} has a malformed mapping: {reason}")]
    MalformedMapping { owner: String, reason: String },

    #[error("{owner} maps field '{field}' which agent '{agent_id}' does not declare")]
    UndeclaredField {
        owner: String,
        field: String,
        agent_id: String,
    },

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("{owner} ({role}) cannot depend on '{dependency}' which runs in a later tier")]
    RoleOrder {
        owner: String,
        role: String,
        dependency: String,
    },
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_server(&settings.server) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_engine(&settings.engine) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_capabilities(&settings.capabilities) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_agents(&settings.agents) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_workflows(&settings.workflows) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_compositions(&settings.compositions) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_cross_references(settings) {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_engine(engine: &EngineSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if engine.max_feedback_iterations == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "engine.max_feedback_iterations".to_string(),
                reason: "Feedback loops need at least one iteration".to_string(),
            });
        }

        if engine.caller_id.is_empty() {
            errors.push(ValidationError::MissingField("engine.caller_id".to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_capabilities(
        capabilities: &[CapabilityInterface],
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_ids = HashMap::new();

        for (idx, interface) in capabilities.iter().enumerate() {
            if let Some(prev_idx) = seen_ids.insert(&interface.agent_id, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Capability interface '{}' appears at indices {} and {}",
                    interface.agent_id, prev_idx, idx
                )));
            }

            if interface.agent_id.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "capabilities[{}].agent_id",
                    idx
                )));
            }

            if interface.capabilities.is_empty() {
                errors.push(ValidationError::InvalidValue {
                    field: format!("capabilities[{}].capabilities", idx),
                    reason: "An agent must expose at least one capability".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_agents(agents: &[AgentConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_ids = HashMap::new();

        for (idx, agent) in agents.iter().enumerate() {
            if let Some(prev_idx) = seen_ids.insert(&agent.agent_id, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Agent '{}' appears at indices {} and {}",
                    agent.agent_id, prev_idx, idx
                )));
            }

            for behavior in &agent.behaviors {
                if !(0.0..=1.0).contains(&behavior.failure_rate) {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("agents[{}].{}.failure_rate", idx, behavior.capability),
                        reason: "Failure rate must be between 0.0 and 1.0".to_string(),
                    });
                }
                if behavior.cost < 0.0 {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("agents[{}].{}.cost", idx, behavior.capability),
                        reason: "Cost cannot be negative".to_string(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_workflows(workflows: &[WorkflowDefinition]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_ids = HashMap::new();

        for (idx, workflow) in workflows.iter().enumerate() {
            if let Some(prev_idx) = seen_ids.insert(&workflow.workflow_id, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Workflow '{}' appears at indices {} and {}",
                    workflow.workflow_id, prev_idx, idx
                )));
            }

            if workflow.steps.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "workflows[{}].steps",
                    idx
                )));
            }

            if let Some(limit) = workflow.cost_limit {
                if limit <= 0.0 {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("workflows[{}].cost_limit", idx),
                        reason: "Cost limit must be positive".to_string(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_compositions(
        compositions: &[AgentComposition],
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_ids = HashMap::new();

        for (idx, composition) in compositions.iter().enumerate() {
            if let Some(prev_idx) = seen_ids.insert(&composition.composition_id, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Composition '{}' appears at indices {} and {}",
                    composition.composition_id, prev_idx, idx
                )));
            }

            if let Some(limit) = composition.cost_limit {
                if limit <= 0.0 {
                    errors.push(ValidationError::InvalidValue {
                        field: format!("compositions[{}].cost_limit", idx),
                        reason: "Cost limit must be positive".to_string(),
                    });
                }
            }

            if composition.max_iterations == Some(0) {
                errors.push(ValidationError::InvalidValue {
                    field: format!("compositions[{}].max_iterations", idx),
                    reason: "Feedback loops need at least one iteration".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Mock agents must only answer capabilities their declared interface lists
    fn validate_cross_references(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for agent in &settings.agents {
            let Some(interface) = settings
                .capabilities
                .iter()
                .find(|c| c.agent_id == agent.agent_id)
            else {
                continue;
            };

            for behavior in &agent.behaviors {
                if !interface.supports(&behavior.capability) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Agent '{}' configures capability '{}' missing from its interface",
                        agent.agent_id, behavior.capability
                    )));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockBehavior;
    use crate::domain::{Topology, WorkflowStep};

    fn base_settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_valid_config() {
        let mut settings = base_settings();
        settings.workflows.push(WorkflowDefinition::new(
            "assessment",
            Topology::Sequential,
            vec![WorkflowStep::new("a", "sensor", "analyze")],
        ));

        assert!(ConfigValidator::validate(&settings).is_ok());
    }

    #[test]
    fn test_invalid_port() {
        let mut settings = base_settings();
        settings.server.port = 0;

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ValidationError::InvalidValue { field, .. } if field == "server.port"
        ));
    }

    #[test]
    fn test_duplicate_workflow_ids_and_bad_cost_limit() {
        let mut settings = base_settings();
        let wf = WorkflowDefinition::new(
            "dup",
            Topology::Parallel,
            vec![WorkflowStep::new("a", "sensor", "analyze")],
        );
        settings.workflows.push(wf.clone());
        settings.workflows.push(wf.with_cost_limit(0.0));

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Duplicate(_))));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidValue { field, .. } if field.ends_with("cost_limit"))));
    }

    #[test]
    fn test_zero_feedback_cap_rejected() {
        let mut settings = base_settings();
        settings.engine.max_feedback_iterations = 0;

        assert!(ConfigValidator::validate(&settings).is_err());
    }

    #[test]
    fn test_agent_behavior_must_match_interface() {
        let mut settings = base_settings();
        settings.capabilities.push(CapabilityInterface {
            agent_id: "coach".into(),
            input_shape: crate::domain::Shape::open(),
            output_shape: crate::domain::Shape::open(),
            capabilities: vec!["coaching".into()],
            compatibility_tags: vec![],
            version: "1.0.0".into(),
        });
        settings.agents.push(AgentConfig {
            agent_id: "coach".into(),
            behaviors: vec![MockBehavior::new("nutrition")],
        });

        let errors = ConfigValidator::validate(&settings).unwrap_err();
        assert!(matches!(&errors[0], ValidationError::CrossReference(_)));
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = ValidationError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
    }
}
