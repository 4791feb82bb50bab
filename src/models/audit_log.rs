use serde::{Deserialize, Serialize};

/// Actor recorded when the system itself changes state.
pub const SYSTEM_ACTOR: &str = "system";

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl AuditEntry {
    pub fn new(action: &str, entity: &str, entity_id: &str, actor: &str, timestamp: i64) -> Self {
        Self {
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            reason: None,
            metadata: None,
            timestamp,
        }
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(String::from);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
