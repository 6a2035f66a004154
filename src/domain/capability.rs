//! Capability interfaces and the typed payload shapes agents declare

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped key/value payload exchanged with agents
pub type Payload = Map<String, Value>;

/// Declared type of a single payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any JSON value is accepted
    #[default]
    Any,
}

impl FieldKind {
    /// Whether a JSON value is acceptable for this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        };
        write!(f, "{}", name)
    }
}

/// Specification of one field inside a [`Shape`]
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct FieldSpec {
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            description: None,
        }
    }

    pub fn required(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            description: None,
        }
    }
}

/// Declared input or output shape of a capability.
///
/// Known fields are typed; `open` shapes additionally tolerate fields they
/// do not declare, and `extensions` carries agent-specific metadata that the
/// engine never interprets.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Shape {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub open: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Shape {
    /// Shape accepting any field
    pub fn open() -> Self {
        Self {
            open: true,
            ..Default::default()
        }
    }

    /// Builder-style field declaration
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Whether `name` may appear in a payload of this shape
    pub fn declares(&self, name: &str) -> bool {
        self.open || self.fields.contains_key(name)
    }

    /// Check a payload against this shape, collecting every violation
    pub fn validate(&self, payload: &Payload) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, spec) in &self.fields {
            match payload.get(name) {
                None | Some(Value::Null) if spec.required => {
                    errors.push(format!("missing required field '{}'", name));
                }
                Some(value) if !value.is_null() && !spec.kind.accepts(value) => {
                    errors.push(format!("field '{}' should be of type {}", name, spec.kind));
                }
                _ => {}
            }
        }

        if !self.open {
            for name in payload.keys() {
                if !self.fields.contains_key(name) {
                    errors.push(format!("undeclared field '{}'", name));
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

/// Standardized interface an agent publishes to the capability directory
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CapabilityInterface {
    pub agent_id: String,
    #[serde(default = "Shape::open")]
    pub input_shape: Shape,
    #[serde(default = "Shape::open")]
    pub output_shape: Shape,
    /// Capability names; the first entry is the agent's primary capability
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub compatibility_tags: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl CapabilityInterface {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Capability used when a caller does not name one explicitly
    pub fn primary_capability(&self) -> Option<&str> {
        self.capabilities.first().map(String::as_str)
    }

    /// True when at least one of `tags` is among this agent's compatibility tags
    pub fn shares_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.compatibility_tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sensor_shape() -> Shape {
        Shape::default()
            .field("exercise", FieldSpec::required(FieldKind::String))
            .field("stability_score", FieldSpec::required(FieldKind::Number))
            .field("duration", FieldSpec::new(FieldKind::Number))
    }

    #[test]
    fn test_shape_accepts_valid_payload() {
        let payload = json!({"exercise": "plank", "stability_score": 0.8});
        assert!(sensor_shape().validate(payload.as_object().unwrap()).is_ok());
    }

    #[test]
    fn test_shape_reports_every_violation() {
        let payload = json!({"exercise": 3, "heart_rate": 120});
        let errors = sensor_shape()
            .validate(payload.as_object().unwrap())
            .unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("stability_score")));
        assert!(errors.iter().any(|e| e.contains("heart_rate")));
    }

    #[test]
    fn test_open_shape_tolerates_extra_fields() {
        let mut shape = sensor_shape();
        shape.open = true;
        let payload = json!({"exercise": "bridge", "stability_score": 1, "extra": true});
        assert!(shape.validate(payload.as_object().unwrap()).is_ok());
        assert!(shape.declares("anything"));
    }

    #[test]
    fn test_interface_deserializes_with_defaults() {
        let interface: CapabilityInterface = serde_json::from_value(json!({
            "agent_id": "physiotherapy-assistant",
            "capabilities": ["injury_assessment", "recovery_planning"]
        }))
        .unwrap();

        assert_eq!(interface.primary_capability(), Some("injury_assessment"));
        assert!(interface.input_shape.open);
        assert_eq!(interface.version, "1.0.0");
    }
}
