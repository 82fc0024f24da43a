//! Record store integration
//!
//! All durable state lives in an external relational store. This trait is the
//! narrow query surface the decision engine and the console need. The two
//! key mutations the engine performs, binding a device fingerprint and
//! consuming a use, are conditional updates so concurrent deliveries cannot
//! both observe an unbound or under-limit key and both succeed.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    BlacklistEntry, ExecutionLog, HwidBinding, Script, ScriptKey, UseOutcome, WhitelistEntry,
};

/// Errors raised by a record store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    // Scripts

    async fn get_script(&self, id: &str) -> StoreResult<Option<Script>>;

    /// Scripts owned by `owner`, newest first
    async fn list_scripts(&self, owner: &str) -> StoreResult<Vec<Script>>;

    async fn insert_script(&self, script: Script) -> StoreResult<Script>;

    /// Replace a script record, `NotFound` when it does not exist
    async fn update_script(&self, script: &Script) -> StoreResult<()>;

    /// Delete a script and everything scoped to it
    async fn delete_script(&self, id: &str) -> StoreResult<()>;

    // Keys

    async fn get_key(&self, id: &str) -> StoreResult<Option<ScriptKey>>;

    /// Active key with the given value for a script
    async fn find_active_key(&self, script_id: &str, key_value: &str) -> StoreResult<Option<ScriptKey>>;

    async fn list_keys(&self, script_id: &str) -> StoreResult<Vec<ScriptKey>>;

    /// Insert a key, `Conflict` when the value is already used in that script
    async fn insert_key(&self, key: ScriptKey) -> StoreResult<ScriptKey>;

    async fn set_key_active(&self, id: &str, active: bool) -> StoreResult<()>;

    async fn delete_key(&self, id: &str) -> StoreResult<()>;

    /// Set the bound fingerprint only if none is bound yet
    async fn bind_hwid(&self, key_id: &str, hwid: &str) -> StoreResult<HwidBinding>;

    /// Clear the bound fingerprint
    async fn reset_hwid(&self, key_id: &str) -> StoreResult<()>;

    /// Increment `current_uses` and stamp `last_used_at` only if the key is
    /// active and below `max_uses`
    async fn consume_use(&self, key_id: &str, now: DateTime<Utc>) -> StoreResult<UseOutcome>;

    // Whitelist

    async fn list_whitelist(&self, script_id: &str) -> StoreResult<Vec<WhitelistEntry>>;

    async fn insert_whitelist(&self, entry: WhitelistEntry) -> StoreResult<WhitelistEntry>;

    async fn delete_whitelist(&self, script_id: &str, id: &str) -> StoreResult<()>;

    /// Whether an active entry of the script equals any candidate
    async fn whitelist_contains(&self, script_id: &str, candidates: &[&str]) -> StoreResult<bool>;

    // Blacklist

    async fn list_blacklist(&self, owner: &str) -> StoreResult<Vec<BlacklistEntry>>;

    async fn insert_blacklist(&self, entry: BlacklistEntry) -> StoreResult<BlacklistEntry>;

    async fn delete_blacklist(&self, owner: &str, id: &str) -> StoreResult<()>;

    /// Whether any candidate is blacklisted for the script, either by an
    /// entry scoped to it or by a global entry of its owner
    async fn blacklist_matches(
        &self,
        owner: &str,
        script_id: &str,
        candidates: &[&str],
    ) -> StoreResult<bool>;

    // Execution logs

    async fn append_log(&self, log: ExecutionLog) -> StoreResult<()>;

    /// Logs of a script, newest first
    async fn list_logs(&self, script_id: &str, limit: usize) -> StoreResult<Vec<ExecutionLog>>;

    /// Fill in the fingerprint of the most recent log row for this script and
    /// address that has none. Returns whether a row was updated.
    async fn backfill_hwid(&self, script_id: &str, client_ip: &str, hwid: &str) -> StoreResult<bool>;
}
