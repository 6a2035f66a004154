//! Messages exchanged across the invocation gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::capability::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// What a caller asks of an agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapabilityRequest {
    pub capability: String,
    pub input: Payload,
    /// Milliseconds to wait for the correlated response
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: MessagePriority,
}

impl CapabilityRequest {
    pub fn new(capability: impl Into<String>, input: Payload, timeout_ms: u64) -> Self {
        Self {
            capability: capability.into(),
            input,
            timeout_ms,
            priority: MessagePriority::Normal,
        }
    }
}

/// What the caller gets back, whether the agent answered, failed or timed out
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CapabilityResponse {
    pub success: bool,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cost: f64,
    pub duration_ms: u64,
}

impl CapabilityResponse {
    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            cost: 0.0,
            duration_ms,
        }
    }
}

/// Request message carried to the target agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvocationRequest {
    pub message_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub capability: String,
    pub payload: Payload,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub priority: MessagePriority,
    pub timestamp: DateTime<Utc>,
}

impl InvocationRequest {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        request: CapabilityRequest,
        session_id: Option<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            capability: request.capability,
            payload: request.input,
            correlation_id: Uuid::new_v4().to_string(),
            session_id,
            priority: request.priority,
            timestamp: Utc::now(),
        }
    }
}

/// Response message routed back to the waiting caller by correlation id
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvocationResponse {
    pub message_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub response: CapabilityResponse,
    pub timestamp: DateTime<Utc>,
}

impl InvocationResponse {
    /// Reply addressed to the sender of `request`
    pub fn reply_to(request: &InvocationRequest, response: CapabilityResponse) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            from_agent: request.to_agent.clone(),
            to_agent: request.from_agent.clone(),
            correlation_id: request.correlation_id.clone(),
            session_id: request.session_id.clone(),
            response,
            timestamp: Utc::now(),
        }
    }
}
