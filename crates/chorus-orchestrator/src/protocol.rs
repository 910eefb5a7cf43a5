//! Coordination protocol between sub-agents
//!
//! A closed catalog of message types, each with a payload schema. Messages
//! can only be built from payloads that pass validation.

use chorus_core::{AgentId, AgentRole, ChorusError, Result, PROTOCOL_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

/// Kinds of coordination messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    DataAvailable,
    HelpNeeded,
    StatusUpdate,
    Heartbeat,
}

impl MessageType {
    pub const ALL: [MessageType; 10] = [
        Self::AgentStarted,
        Self::AgentCompleted,
        Self::AgentFailed,
        Self::PhaseStarted,
        Self::PhaseCompleted,
        Self::PhaseFailed,
        Self::DataAvailable,
        Self::HelpNeeded,
        Self::StatusUpdate,
        Self::Heartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentStarted => "AgentStarted",
            Self::AgentCompleted => "AgentCompleted",
            Self::AgentFailed => "AgentFailed",
            Self::PhaseStarted => "PhaseStarted",
            Self::PhaseCompleted => "PhaseCompleted",
            Self::PhaseFailed => "PhaseFailed",
            Self::DataAvailable => "DataAvailable",
            Self::HelpNeeded => "HelpNeeded",
            Self::StatusUpdate => "StatusUpdate",
            Self::Heartbeat => "Heartbeat",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = ChorusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ChorusError::UnknownMessageType(s.to_string()))
    }
}

/// JSON shape a payload field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    /// Any JSON number
    Float,
    Bool,
    List,
    Map,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::List => write!(f, "list"),
            Self::Map => write!(f, "map"),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Payload schema of one message type
#[derive(Debug, Clone, Copy)]
pub struct MessageSchema {
    pub message_type: MessageType,
    pub required_fields: &'static [&'static str],
    pub optional_fields: &'static [&'static str],
    pub field_types: &'static [(&'static str, FieldType)],
    pub description: &'static str,
}

impl MessageSchema {
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.field_types
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, ty)| *ty)
    }

    pub fn knows(&self, field: &str) -> bool {
        self.required_fields.contains(&field) || self.optional_fields.contains(&field)
    }
}

use FieldType as F;

static SCHEMAS: [MessageSchema; 10] = [
    MessageSchema {
        message_type: MessageType::AgentStarted,
        required_fields: &["agent_id", "agent_name", "timestamp"],
        optional_fields: &["role", "capabilities"],
        field_types: &[
            ("agent_id", F::String),
            ("agent_name", F::String),
            ("timestamp", F::String),
            ("role", F::String),
            ("capabilities", F::List),
        ],
        description: "Sent when agent starts execution",
    },
    MessageSchema {
        message_type: MessageType::AgentCompleted,
        required_fields: &["agent_id", "timestamp", "status"],
        optional_fields: &["result", "metrics", "outputs"],
        field_types: &[
            ("agent_id", F::String),
            ("timestamp", F::String),
            ("status", F::String),
            ("result", F::String),
            ("metrics", F::Map),
            ("outputs", F::Map),
        ],
        description: "Sent when agent completes successfully",
    },
    MessageSchema {
        message_type: MessageType::AgentFailed,
        required_fields: &["agent_id", "timestamp", "error"],
        optional_fields: &["error_details", "recovery_possible"],
        field_types: &[
            ("agent_id", F::String),
            ("timestamp", F::String),
            ("error", F::String),
            ("error_details", F::Map),
            ("recovery_possible", F::Bool),
        ],
        description: "Sent when agent encounters unrecoverable error",
    },
    MessageSchema {
        message_type: MessageType::PhaseStarted,
        required_fields: &["agent_id", "phase_name", "timestamp"],
        optional_fields: &["phase_index", "total_phases"],
        field_types: &[
            ("agent_id", F::String),
            ("phase_name", F::String),
            ("timestamp", F::String),
            ("phase_index", F::Integer),
            ("total_phases", F::Integer),
        ],
        description: "Sent when phase begins execution",
    },
    MessageSchema {
        message_type: MessageType::PhaseCompleted,
        required_fields: &["agent_id", "phase_name", "timestamp", "success"],
        optional_fields: &["outputs", "duration_seconds", "metrics"],
        field_types: &[
            ("agent_id", F::String),
            ("phase_name", F::String),
            ("timestamp", F::String),
            ("success", F::Bool),
            ("outputs", F::Map),
            ("duration_seconds", F::Float),
            ("metrics", F::Map),
        ],
        description: "Sent when phase completes",
    },
    MessageSchema {
        message_type: MessageType::PhaseFailed,
        required_fields: &["agent_id", "phase_name", "timestamp", "error"],
        optional_fields: &["retry_count", "will_retry"],
        field_types: &[
            ("agent_id", F::String),
            ("phase_name", F::String),
            ("timestamp", F::String),
            ("error", F::String),
            ("retry_count", F::Integer),
            ("will_retry", F::Bool),
        ],
        description: "Sent when phase fails",
    },
    MessageSchema {
        message_type: MessageType::DataAvailable,
        required_fields: &["agent_id", "data_key", "timestamp"],
        optional_fields: &["data_type", "data_size", "metadata"],
        field_types: &[
            ("agent_id", F::String),
            ("data_key", F::String),
            ("timestamp", F::String),
            ("data_type", F::String),
            ("data_size", F::Integer),
            ("metadata", F::Map),
        ],
        description: "Sent when data is available for other agents",
    },
    MessageSchema {
        message_type: MessageType::HelpNeeded,
        required_fields: &["agent_id", "problem", "timestamp"],
        optional_fields: &["severity", "context", "suggested_resolution"],
        field_types: &[
            ("agent_id", F::String),
            ("problem", F::String),
            ("timestamp", F::String),
            ("severity", F::String),
            ("context", F::Map),
            ("suggested_resolution", F::String),
        ],
        description: "Sent when agent needs assistance",
    },
    MessageSchema {
        message_type: MessageType::StatusUpdate,
        required_fields: &["agent_id", "status", "timestamp"],
        optional_fields: &["progress_percentage", "current_activity", "eta"],
        field_types: &[
            ("agent_id", F::String),
            ("status", F::String),
            ("timestamp", F::String),
            ("progress_percentage", F::Float),
            ("current_activity", F::String),
            ("eta", F::String),
        ],
        description: "Sent periodically to update status",
    },
    MessageSchema {
        message_type: MessageType::Heartbeat,
        required_fields: &["agent_id", "timestamp"],
        optional_fields: &["health_status"],
        field_types: &[
            ("agent_id", F::String),
            ("timestamp", F::String),
            ("health_status", F::String),
        ],
        description: "Sent periodically to indicate agent is alive",
    },
];

/// Outcome of checking a payload against its schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Unknown fields; never invalidate a payload
    pub warnings: Vec<String>,
}

/// Severity attached to a HelpNeeded message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Final status reported in AgentCompleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    #[default]
    Success,
    Failed,
    Partial,
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// A validated message between agents
///
/// Built only by `CoordinationProtocol`; `to` of `None` is a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationMessage {
    id: Uuid,
    from: AgentId,
    to: Option<AgentId>,
    #[serde(rename = "type")]
    message_type: MessageType,
    payload: Map<String, Value>,
    timestamp: DateTime<Utc>,
    protocol_version: String,
}

impl CoordinationMessage {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn from(&self) -> AgentId {
        self.from
    }

    pub fn to(&self) -> Option<AgentId> {
        self.to
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// True for broadcasts and messages addressed to `agent`
    pub fn is_for(&self, agent: &AgentId) -> bool {
        self.to.map_or(true, |to| to == *agent)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }
}

fn now() -> Value {
    json!(Utc::now().to_rfc3339())
}

/// Base payload shared by every message type
fn base_payload(agent_id: AgentId) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("agent_id".to_string(), json!(agent_id.to_string()));
    payload.insert("timestamp".to_string(), now());
    payload
}

fn insert_opt(payload: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        payload.insert(key.to_string(), value);
    }
}

/// Message catalog, validator and constructors
pub struct CoordinationProtocol;

impl CoordinationProtocol {
    pub fn schema(message_type: MessageType) -> &'static MessageSchema {
        // SCHEMAS is declared in MessageType::ALL order.
        &SCHEMAS[message_type as usize]
    }

    pub fn message_types() -> &'static [MessageType] {
        &MessageType::ALL
    }

    /// Check a payload against the schema of `message_type`
    pub fn validate_payload(message_type: MessageType, payload: &Map<String, Value>) -> ValidationReport {
        let schema = Self::schema(message_type);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for field in schema.required_fields {
            if !payload.contains_key(*field) {
                errors.push(format!("Missing required field: {}", field));
            }
        }

        for (field, value) in payload {
            if let Some(expected) = schema.field_type(field) {
                if !expected.matches(value) {
                    errors.push(format!(
                        "Field '{}' has wrong type: expected {}, got {}",
                        field,
                        expected,
                        json_type_name(value)
                    ));
                }
            }
            if !schema.knows(field) {
                warnings.push(format!("Unknown field: {}", field));
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Re-check an existing message, including its protocol version
    pub fn validate_message(message: &CoordinationMessage) -> ValidationReport {
        let mut report = Self::validate_payload(message.message_type, &message.payload);
        if message.protocol_version != PROTOCOL_VERSION {
            report.errors.push(format!(
                "Unsupported protocol version: {}",
                message.protocol_version
            ));
            report.valid = false;
        }
        report
    }

    /// Build a message from a payload that must pass validation
    pub fn create_message(
        message_type: MessageType,
        from: AgentId,
        payload: Map<String, Value>,
        to: Option<AgentId>,
    ) -> Result<CoordinationMessage> {
        let report = Self::validate_payload(message_type, &payload);
        if !report.valid {
            return Err(ChorusError::Validation {
                message_type: message_type.to_string(),
                errors: report.errors,
            });
        }
        for warning in &report.warnings {
            warn!(message_type = %message_type, "{}", warning);
        }

        let message = CoordinationMessage {
            id: Uuid::new_v4(),
            from,
            to,
            message_type,
            payload,
            timestamp: Utc::now(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        };
        debug!(id = %message.id, from = %from, message_type = %message_type, "Created message");
        Ok(message)
    }

    pub fn agent_started(
        agent_id: AgentId,
        agent_name: &str,
        role: Option<AgentRole>,
        capabilities: &[String],
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("agent_name".to_string(), json!(agent_name));
        insert_opt(&mut payload, "role", role.map(|r| json!(r.to_string())));
        if !capabilities.is_empty() {
            payload.insert("capabilities".to_string(), json!(capabilities));
        }
        Self::create_message(MessageType::AgentStarted, agent_id, payload, None)
    }

    pub fn agent_completed(
        agent_id: AgentId,
        status: CompletionStatus,
        result: Option<&str>,
        outputs: Option<Map<String, Value>>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("status".to_string(), json!(status.to_string()));
        insert_opt(&mut payload, "result", result.map(|r| json!(r)));
        insert_opt(&mut payload, "outputs", outputs.map(Value::Object));
        Self::create_message(MessageType::AgentCompleted, agent_id, payload, None)
    }

    pub fn agent_failed(
        agent_id: AgentId,
        error: &str,
        error_details: Option<Map<String, Value>>,
        recovery_possible: Option<bool>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("error".to_string(), json!(error));
        insert_opt(&mut payload, "error_details", error_details.map(Value::Object));
        insert_opt(&mut payload, "recovery_possible", recovery_possible.map(Value::Bool));
        Self::create_message(MessageType::AgentFailed, agent_id, payload, None)
    }

    pub fn phase_started(
        agent_id: AgentId,
        phase_name: &str,
        phase_index: Option<usize>,
        total_phases: Option<usize>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("phase_name".to_string(), json!(phase_name));
        insert_opt(&mut payload, "phase_index", phase_index.map(|i| json!(i)));
        insert_opt(&mut payload, "total_phases", total_phases.map(|n| json!(n)));
        Self::create_message(MessageType::PhaseStarted, agent_id, payload, None)
    }

    pub fn phase_completed(
        agent_id: AgentId,
        phase_name: &str,
        success: bool,
        outputs: Option<Map<String, Value>>,
        duration_seconds: Option<f64>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("phase_name".to_string(), json!(phase_name));
        payload.insert("success".to_string(), json!(success));
        insert_opt(&mut payload, "outputs", outputs.map(Value::Object));
        insert_opt(&mut payload, "duration_seconds", duration_seconds.map(|d| json!(d)));
        Self::create_message(MessageType::PhaseCompleted, agent_id, payload, None)
    }

    pub fn phase_failed(
        agent_id: AgentId,
        phase_name: &str,
        error: &str,
        retry_count: Option<u32>,
        will_retry: Option<bool>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("phase_name".to_string(), json!(phase_name));
        payload.insert("error".to_string(), json!(error));
        insert_opt(&mut payload, "retry_count", retry_count.map(|n| json!(n)));
        insert_opt(&mut payload, "will_retry", will_retry.map(Value::Bool));
        Self::create_message(MessageType::PhaseFailed, agent_id, payload, None)
    }

    pub fn data_available(
        agent_id: AgentId,
        data_key: &str,
        data_type: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("data_key".to_string(), json!(data_key));
        insert_opt(&mut payload, "data_type", data_type.map(|t| json!(t)));
        insert_opt(&mut payload, "metadata", metadata.map(Value::Object));
        Self::create_message(MessageType::DataAvailable, agent_id, payload, None)
    }

    pub fn help_needed(
        agent_id: AgentId,
        problem: &str,
        severity: Severity,
        context: Option<Map<String, Value>>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("problem".to_string(), json!(problem));
        payload.insert("severity".to_string(), json!(severity.to_string()));
        insert_opt(&mut payload, "context", context.map(Value::Object));
        Self::create_message(MessageType::HelpNeeded, agent_id, payload, None)
    }

    pub fn status_update(
        agent_id: AgentId,
        status: &str,
        progress_percentage: Option<f64>,
        current_activity: Option<&str>,
    ) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        payload.insert("status".to_string(), json!(status));
        insert_opt(&mut payload, "progress_percentage", progress_percentage.map(|p| json!(p)));
        insert_opt(&mut payload, "current_activity", current_activity.map(|a| json!(a)));
        Self::create_message(MessageType::StatusUpdate, agent_id, payload, None)
    }

    pub fn heartbeat(agent_id: AgentId, health_status: Option<&str>) -> Result<CoordinationMessage> {
        let mut payload = base_payload(agent_id);
        insert_opt(&mut payload, "health_status", health_status.map(|h| json!(h)));
        Self::create_message(MessageType::Heartbeat, agent_id, payload, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_schema_catalog_order() {
        for message_type in MessageType::ALL {
            assert_eq!(CoordinationProtocol::schema(message_type).message_type, message_type);
        }
        assert_eq!(CoordinationProtocol::message_types().len(), 10);
    }

    #[test]
    fn test_message_type_parsing() {
        assert_eq!("PhaseCompleted".parse::<MessageType>().unwrap(), MessageType::PhaseCompleted);
        assert_eq!("heartbeat".parse::<MessageType>().unwrap(), MessageType::Heartbeat);
        assert!(matches!(
            "Gossip".parse::<MessageType>(),
            Err(ChorusError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn test_phase_completed_requires_success() {
        let agent = Uuid::new_v4();
        let p = payload(json!({
            "agent_id": agent.to_string(),
            "phase_name": "analyze",
            "timestamp": "2024-01-01T00:00:00Z",
        }));

        let report = CoordinationProtocol::validate_payload(MessageType::PhaseCompleted, &p);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Missing required field: success"]);

        let err = CoordinationProtocol::create_message(MessageType::PhaseCompleted, agent, p, None)
            .unwrap_err();
        assert!(matches!(err, ChorusError::Validation { .. }));
    }

    #[test]
    fn test_valid_message_revalidates() {
        let agent = Uuid::new_v4();
        let msg = CoordinationProtocol::phase_completed(agent, "analyze", true, None, Some(1.5))
            .unwrap();
        assert_eq!(msg.message_type(), MessageType::PhaseCompleted);
        assert_eq!(msg.protocol_version(), "v1");
        assert!(msg.is_broadcast());

        let report = CoordinationProtocol::validate_message(&msg);
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_wrong_type_is_error() {
        let p = payload(json!({
            "agent_id": "a",
            "phase_name": "analyze",
            "timestamp": "t",
            "success": "yes",
        }));
        let report = CoordinationProtocol::validate_payload(MessageType::PhaseCompleted, &p);
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec!["Field 'success' has wrong type: expected bool, got string"]
        );
    }

    #[test]
    fn test_unknown_field_is_warning_only() {
        let p = payload(json!({
            "agent_id": "a",
            "timestamp": "t",
            "mood": "cheerful",
        }));
        let report = CoordinationProtocol::validate_payload(MessageType::Heartbeat, &p);
        assert!(report.valid);
        assert_eq!(report.warnings, vec!["Unknown field: mood"]);
    }

    #[test]
    fn test_float_accepts_integers() {
        let p = payload(json!({
            "agent_id": "a",
            "status": "running",
            "timestamp": "t",
            "progress_percentage": 50,
        }));
        assert!(CoordinationProtocol::validate_payload(MessageType::StatusUpdate, &p).valid);

        let p = payload(json!({
            "agent_id": "a",
            "phase_name": "p",
            "timestamp": "t",
            "phase_index": 1.5,
        }));
        assert!(!CoordinationProtocol::validate_payload(MessageType::PhaseStarted, &p).valid);
    }

    #[test]
    fn test_convenience_constructors_validate() {
        let agent = Uuid::new_v4();
        let messages = vec![
            CoordinationProtocol::agent_started(agent, "agent-1-data", Some(AgentRole::Leader), &["data-read".to_string()]),
            CoordinationProtocol::agent_completed(agent, CompletionStatus::Success, Some("done"), Some(Map::new())),
            CoordinationProtocol::agent_failed(agent, "boom", None, Some(false)),
            CoordinationProtocol::phase_started(agent, "fetch", Some(0), Some(2)),
            CoordinationProtocol::phase_failed(agent, "fetch", "timeout", Some(0), Some(false)),
            CoordinationProtocol::data_available(agent, "phase.fetch.output", Some("dict"), None),
            CoordinationProtocol::help_needed(agent, "no db", Severity::High, None),
            CoordinationProtocol::status_update(agent, "running", Some(0.5), Some("fetch")),
            CoordinationProtocol::heartbeat(agent, Some("ok")),
        ];
        for msg in messages {
            let msg = msg.unwrap();
            assert!(CoordinationProtocol::validate_message(&msg).valid);
            assert_eq!(msg.from(), agent);
            assert_eq!(msg.payload()["agent_id"], json!(agent.to_string()));
        }
    }

    #[test]
    fn test_wire_shape() {
        let from = Uuid::new_v4();
        let msg = CoordinationProtocol::heartbeat(from, None).unwrap();
        let wire = serde_json::to_value(&msg).unwrap();

        assert_eq!(wire["type"], json!("Heartbeat"));
        assert_eq!(wire["from"], json!(from.to_string()));
        assert_eq!(wire["to"], Value::Null);
        assert_eq!(wire["protocol_version"], json!("v1"));

        let back: CoordinationMessage = serde_json::from_value(wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_version_mismatch_fails_revalidation() {
        let msg = CoordinationProtocol::heartbeat(Uuid::new_v4(), None).unwrap();
        let mut wire = serde_json::to_value(&msg).unwrap();
        wire["protocol_version"] = json!("v0");
        let old: CoordinationMessage = serde_json::from_value(wire).unwrap();

        let report = CoordinationProtocol::validate_message(&old);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Unsupported protocol version: v0"]);
    }
}
