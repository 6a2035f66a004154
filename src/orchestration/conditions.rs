//! Step conditions evaluated against results accumulated so far

use std::collections::BTreeMap;

use rhai::{Dynamic, Engine as RhaiEngine, Scope};
use serde_json::{json, Value};

use crate::domain::{Payload, StepConditions, StepResult};

pub struct ConditionEvaluator {
    rhai_engine: RhaiEngine,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let mut rhai_engine = RhaiEngine::new();
        rhai_engine.set_max_expr_depths(64, 64);
        rhai_engine.set_max_operations(100_000);
        Self { rhai_engine }
    }

    /// Conjunction of every clause. `Err` carries the reason an expression
    /// could not be evaluated; callers treat it like a false predicate.
    pub fn evaluate(
        &self,
        conditions: &StepConditions,
        input: &Payload,
        results: &BTreeMap<String, StepResult>,
    ) -> Result<bool, String> {
        for step_id in &conditions.require_success {
            match results.get(step_id) {
                Some(r) if r.success && !r.skipped => {}
                _ => return Ok(false),
            }
        }

        for (step_id, expected) in &conditions.require_value {
            let actual = results
                .get(step_id)
                .filter(|r| r.success)
                .and_then(|r| lookup_path(&r.result, &expected.field));
            if actual != Some(&expected.value) {
                return Ok(false);
            }
        }

        if let Some(expression) = &conditions.expression {
            return self.evaluate_expression(expression, input, results);
        }

        Ok(true)
    }

    /// Compile without running, for registration-time checks
    pub fn check_expression(&self, expression: &str) -> Result<(), String> {
        self.rhai_engine
            .compile_expression(expression)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn evaluate_expression(
        &self,
        expression: &str,
        input: &Payload,
        results: &BTreeMap<String, StepResult>,
    ) -> Result<bool, String> {
        let steps: serde_json::Map<String, Value> = results
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    json!({"success": r.success, "skipped": r.skipped, "result": r.result}),
                )
            })
            .collect();

        let mut scope = Scope::new();
        scope.push("input", json_to_dynamic(&Value::Object(input.clone())));
        scope.push("steps", json_to_dynamic(&Value::Object(steps)));

        let result: Dynamic = self
            .rhai_engine
            .eval_expression_with_scope(&mut scope, expression)
            .map_err(|e| format!("condition evaluation failed: {}", e))?;

        result
            .as_bool()
            .map_err(|_| "condition must evaluate to boolean".to_string())
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a dotted path such as `analysis.score` inside a JSON value
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let map: rhai::Map = obj
                .iter()
                .map(|(k, v)| (k.clone().into(), json_to_dynamic(v)))
                .collect();
            Dynamic::from(map)
        }
    }
}
