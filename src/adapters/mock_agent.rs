//! Config-driven in-process agents
//!
//! Each configured capability answers with a canned response. String leaves
//! in the response are Tera templates rendered against the request payload,
//! so `"{{ exercise }}"` echoes the caller's field back.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde_json::{Map, Value};
use tera::{Context, Tera};
use tokio::time::{sleep, Duration};

use crate::config::{AgentConfig, MockBehavior};
use crate::domain::{AgentOutput, AgentPort, Payload};

pub struct MockAgent {
    agent_id: String,
    behaviors: HashMap<String, MockBehavior>,
}

impl MockAgent {
    pub fn new(agent_id: impl Into<String>, behaviors: Vec<MockBehavior>) -> Self {
        Self {
            agent_id: agent_id.into(),
            behaviors: behaviors
                .into_iter()
                .map(|b| (b.capability.clone(), b))
                .collect(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.agent_id.clone(), config.behaviors.clone())
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self.behaviors.keys().cloned().collect();
        caps.sort();
        caps
    }

    fn render(&self, response: &Value, input: &Payload) -> Result<Value> {
        if response.is_null() {
            return Ok(Value::Object(input.clone()));
        }
        let mut context = Context::new();
        for (k, v) in input {
            context.insert(k, v);
        }
        render_value(response, &context)
    }
}

fn render_value(value: &Value, context: &Context) -> Result<Value> {
    match value {
        Value::String(template) if template.contains("{{") || template.contains("{%") => {
            let rendered = Tera::one_off(template, context, false)?;
            // Templates that produce JSON keep their type
            Ok(serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered)))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (k, v) in fields {
                out.insert(k.clone(), render_value(v, context)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[async_trait]
impl AgentPort for MockAgent {
    async fn invoke(&self, capability: &str, input: Payload) -> Result<AgentOutput> {
        let Some(behavior) = self.behaviors.get(capability) else {
            tracing::warn!(agent_id = %self.agent_id, capability, "Capability not configured");
            return Ok(AgentOutput::failed(
                format!("agent '{}' does not handle '{}'", self.agent_id, capability),
                0.0,
            ));
        };

        if behavior.latency_ms > 0 {
            sleep(Duration::from_millis(behavior.latency_ms)).await;
        }

        if let Some(error) = &behavior.error {
            return Ok(AgentOutput::failed(error.clone(), behavior.cost));
        }

        if behavior.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < behavior.failure_rate {
            tracing::debug!(agent_id = %self.agent_id, capability, "Simulated failure");
            return Ok(AgentOutput::failed("simulated failure", behavior.cost));
        }

        let result = self.render(&behavior.response, &input)?;
        Ok(AgentOutput::ok(result, behavior.cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn behavior(capability: &str, response: Value) -> MockBehavior {
        MockBehavior {
            response,
            cost: 0.05,
            ..MockBehavior::new(capability)
        }
    }

    fn input(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_renders_templates_against_input() {
        let agent = MockAgent::new(
            "coach",
            vec![behavior(
                "personalized_coaching",
                json!({
                    "coaching_message": "Keep your core tight during {{ current_exercise }}",
                    "reps": "{{ reps * 2 }}",
                    "form_corrections": ["{{ current_exercise | upper }}", 3]
                }),
            )],
        );

        let output = agent
            .invoke(
                "personalized_coaching",
                input(json!({"current_exercise": "plank", "reps": 6})),
            )
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.cost, 0.05);
        assert_eq!(
            output.result["coaching_message"],
            json!("Keep your core tight during plank")
        );
        assert_eq!(output.result["reps"], json!(12));
        assert_eq!(output.result["form_corrections"], json!(["PLANK", 3]));
    }

    #[tokio::test]
    async fn test_null_response_echoes_input() {
        let agent = MockAgent::new("echo", vec![behavior("session_management", Value::Null)]);
        let output = agent
            .invoke("session_management", input(json!({"action": "start_session"})))
            .await
            .unwrap();
        assert_eq!(output.result, json!({"action": "start_session"}));
    }

    #[tokio::test]
    async fn test_forced_and_random_failures() {
        let forced = MockBehavior {
            error: Some("sensor offline".into()),
            cost: 0.2,
            ..MockBehavior::new("muscle_activation_analysis")
        };
        let always = MockBehavior {
            failure_rate: 1.0,
            ..MockBehavior::new("compensation_detection")
        };
        let agent = MockAgent::new("sensor", vec![forced, always]);

        let output = agent
            .invoke("muscle_activation_analysis", Payload::new())
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("sensor offline"));
        assert_eq!(output.cost, 0.2);

        let output = agent.invoke("compensation_detection", Payload::new()).await.unwrap();
        assert_eq!(output.error.as_deref(), Some("simulated failure"));

        let output = agent.invoke("teleport", Payload::new()).await.unwrap();
        assert!(!output.success);
        assert_eq!(agent.capabilities().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_template_is_an_error() {
        let agent = MockAgent::new("broken", vec![behavior("analyze", json!("{{ unclosed"))]);
        assert!(agent.invoke("analyze", Payload::new()).await.is_err());
    }
}
