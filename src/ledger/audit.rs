use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Known access-log event kinds
///
/// Kept as a closed tag so every consumer can rely on the fields it reads;
/// anything event-specific goes into the record's extension map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessAction {
    UserRegistered,
    ConsentGranted,
    ConsentRevoked,
    VoteCast,
    StakeSet,
    DelegatesSelected,
    GenesisCreated,
    BlockAdded,
    ChainRepaired,
    RewardCredited,
    RewardDistributed,
    RecordWrite,
}

/// One entry of the audit trail
///
/// The core produces these for every mutating operation; external reporting
/// tools consume them, the core never interprets them further.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessRecord {
    /// Unique record id
    pub id: String,

    /// When the event happened
    #[schema(value_type = String, example = "2024-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Acting user id, or "system"
    pub actor: String,

    /// What happened
    pub action: AccessAction,

    /// Target id (record id, block index, user id, ...)
    pub target: String,

    /// Whether the action succeeded
    pub success: bool,

    /// Failure reason, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Open string-keyed extension fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schema(value_type = Object)]
    pub meta: BTreeMap<String, String>,
}

impl AccessRecord {
    pub fn new(actor: &str, action: AccessAction, target: &str, success: bool) -> Self {
        AccessRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            target: target.to_string(),
            success,
            reason: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }
}
