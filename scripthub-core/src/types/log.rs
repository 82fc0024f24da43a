//! Execution audit log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One delivery attempt (`script_executions` collection).
///
/// Append-only. The only mutation ever applied is filling in
/// `executor_hwid` when the fingerprint is reported after the fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLog {
    pub id: String,
    pub script_id: String,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub executor_ip: Option<String>,
    #[serde(default)]
    pub executor_hwid: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub success: bool,
    /// Deny reason, `None` on grant
    #[serde(default)]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(script_id: impl Into<String>, success: bool, executed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            script_id: script_id.into(),
            key_id: None,
            executor_ip: None,
            executor_hwid: None,
            user_agent: None,
            success,
            error_message: None,
            executed_at,
        }
    }
}
