//! Building invocation payloads from definitions and accumulated results

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::domain::composition::parse_source;
use crate::domain::{CompositionNode, Payload, StepResult, WorkflowStep};
use crate::orchestration::conditions::lookup_path;

pub const USER_CONTEXT_KEY: &str = "user_context";

/// Payload for a workflow step: static `input_data`, overlaid by the run
/// input, plus `<dep>_result` for every dependency that succeeded and the
/// caller's context under `user_context`.
pub fn step_input(
    step: &WorkflowStep,
    input: &Payload,
    user_context: Option<&Value>,
    results: &BTreeMap<String, StepResult>,
) -> Payload {
    let mut payload = step.input_data.clone();
    for (key, value) in input {
        payload.insert(key.clone(), value.clone());
    }

    for dep in &step.depends_on {
        if let Some(result) = results.get(dep).filter(|r| r.success) {
            payload.insert(format!("{}_result", dep), result.result.clone());
        }
    }

    if let Some(ctx) = user_context {
        payload.insert(USER_CONTEXT_KEY.to_string(), ctx.clone());
    }
    payload
}

/// Per-run state of a composition: the data map every plain mapping reads
/// from, and the mapped outputs of nodes that succeeded.
#[derive(Debug, Clone, Default)]
pub struct CompositionContext {
    pub data: Map<String, Value>,
    pub outputs: HashMap<String, Map<String, Value>>,
}

impl CompositionContext {
    pub fn new(input: Payload) -> Self {
        Self {
            data: input,
            outputs: HashMap::new(),
        }
    }

    /// Resolve a node's input mapping. Missing values are omitted.
    pub fn node_input(
        &self,
        node: &CompositionNode,
        results: &BTreeMap<String, StepResult>,
    ) -> Payload {
        let mut payload = Payload::new();
        for (local, source) in &node.input_mapping {
            let value = match parse_source(source) {
                Ok(Some((source_node, field))) => self.node_value(source_node, field, results),
                Ok(None) => self.data.get(source).cloned(),
                Err(_) => None,
            };
            if let Some(value) = value.filter(|v| !v.is_null()) {
                payload.insert(local.clone(), value);
            }
        }
        payload
    }

    /// `node.field` reads the node's mapped outputs first, then its raw result
    fn node_value(
        &self,
        node_id: &str,
        field: &str,
        results: &BTreeMap<String, StepResult>,
    ) -> Option<Value> {
        let result = results.get(node_id).filter(|r| r.success)?;
        if let Some(value) = self.outputs.get(node_id).and_then(|o| o.get(field)) {
            return Some(value.clone());
        }
        lookup_path(&result.result, field).cloned()
    }

    /// Apply a node's output mapping to its result and fold it into the data map
    pub fn record_output(&mut self, node: &CompositionNode, result: &StepResult) {
        if !result.success {
            return;
        }
        let mapped = map_output(node, &result.result);
        for (key, value) in &mapped {
            self.data.insert(key.clone(), value.clone());
        }
        self.outputs.insert(node.node_id.clone(), mapped);
    }
}

/// localKey -> result[resultKey], skipping keys the result lacks
pub fn map_output(node: &CompositionNode, result: &Value) -> Map<String, Value> {
    let mut mapped = Map::new();
    for (local, result_key) in &node.output_mapping {
        if let Some(value) = lookup_path(result, result_key) {
            mapped.insert(local.clone(), value.clone());
        }
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentRole;
    use serde_json::json;

    fn ok(result: Value) -> StepResult {
        StepResult {
            success: true,
            result,
            error: None,
            cost: 0.0,
            duration_ms: 0,
            attempts: 1,
            skipped: false,
        }
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_step_input_merges_layers() {
        let step = WorkflowStep::new("coach", "ai-coach", "personalized_coaching")
            .with_input(payload(json!({"mode": "realtime", "exercise": "default"})))
            .depends_on(["sensor", "failed"]);
        let mut results = BTreeMap::new();
        results.insert("sensor".to_string(), ok(json!({"score": 0.8})));
        results.insert(
            "failed".to_string(),
            StepResult {
                success: false,
                ..ok(Value::Null)
            },
        );

        let input = payload(json!({"exercise": "plank"}));
        let ctx = json!({"user_id": "u1"});
        let built = step_input(&step, &input, Some(&ctx), &results);

        assert_eq!(built["mode"], json!("realtime"));
        assert_eq!(built["exercise"], json!("plank"));
        assert_eq!(built["sensor_result"], json!({"score": 0.8}));
        assert!(!built.contains_key("failed_result"));
        assert_eq!(built[USER_CONTEXT_KEY], ctx);
    }

    #[test]
    fn test_node_input_prefers_mapped_outputs() {
        let sensor = CompositionNode::new("sensor", "fabric", AgentRole::Primary)
            .map_output("muscle_data", "muscle_zones");
        let coach = CompositionNode::new("coach", "ai-coach", AgentRole::Aggregator)
            .map_input("muscle_data", "sensor.muscle_data")
            .map_input("raw", "sensor.recommendations")
            .map_input("current_exercise", "user_exercise")
            .map_input("missing", "sensor.nothing");

        let mut ctx = CompositionContext::new(payload(json!({"user_exercise": "bridge"})));
        let mut results = BTreeMap::new();
        let sensor_result = ok(json!({"muscle_zones": {"core": 0.7}, "recommendations": ["brace"]}));
        ctx.record_output(&sensor, &sensor_result);
        results.insert("sensor".to_string(), sensor_result);

        let input = ctx.node_input(&coach, &results);
        assert_eq!(input["muscle_data"], json!({"core": 0.7}));
        assert_eq!(input["raw"], json!(["brace"]));
        assert_eq!(input["current_exercise"], json!("bridge"));
        assert!(!input.contains_key("missing"));
        assert_eq!(ctx.data["muscle_data"], json!({"core": 0.7}));
    }

    #[test]
    fn test_failed_source_is_omitted() {
        let coach = CompositionNode::new("coach", "ai-coach", AgentRole::Aggregator)
            .map_input("muscle_data", "sensor.muscle_zones");
        let mut results = BTreeMap::new();
        results.insert("sensor".to_string(), StepResult::skipped("not needed"));

        let input = CompositionContext::default().node_input(&coach, &results);
        assert!(input.is_empty());
    }
}
