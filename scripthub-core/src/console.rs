//! Management console operations
//!
//! Every operation is scoped to the calling owner. Records that exist but
//! belong to someone else are reported as not found.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::keygen::generate_key_value;
use crate::store::{RecordStore, StoreError};
use crate::transform::CodeTransform;
use crate::types::{
    BlacklistEntry, ExecutionLog, IdentifierKind, ProtectionMode, Script, ScriptKey,
    TransformOptions, WhitelistEntry,
};

/// Attempts at a fresh key value before giving up on collisions
const KEY_GENERATION_ATTEMPTS: usize = 5;

/// Default and maximum page size for log listings
pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const MAX_LOG_LIMIT: usize = 1000;

/// Log rows considered when computing statistics
const STATS_WINDOW: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("Transform failed: {0}")]
    Transform(String),
}

impl From<StoreError> for ConsoleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ConsoleError::NotFound,
            other => ConsoleError::Store(other),
        }
    }
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Fields for a new script
#[derive(Debug, Clone, Deserialize)]
pub struct NewScript {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "original_code")]
    pub source: String,
    #[serde(default)]
    pub protection_mode: ProtectionMode,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub anti_tamper: Option<bool>,
    #[serde(default)]
    pub anti_dump: Option<bool>,
    #[serde(default)]
    pub anti_hook: Option<bool>,
}

/// Partial script update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "original_code")]
    pub source: Option<String>,
    pub protection_mode: Option<ProtectionMode>,
    pub is_active: Option<bool>,
    pub is_premium: Option<bool>,
    pub anti_tamper: Option<bool>,
    pub anti_dump: Option<bool>,
    pub anti_hook: Option<bool>,
}

/// Key generation parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewKey {
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub max_uses: Option<i64>,
    /// Absolute expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative expiry, from now
    #[serde(default)]
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub hwid_lock: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWhitelistEntry {
    pub identifier: String,
    #[serde(default)]
    pub identifier_type: IdentifierKind,
    #[serde(default)]
    pub note: Option<String>,
}

/// Blacklist entry; global unless `script_id` is set
#[derive(Debug, Clone, Deserialize)]
pub struct NewBlacklistEntry {
    pub identifier: String,
    #[serde(default)]
    pub identifier_type: IdentifierKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub script_id: Option<String>,
}

/// Execution statistics for one script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptStats {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    /// Percentage in `[0, 100]`, zero when nothing ran yet
    pub success_rate: f64,
    pub unique_hwids: usize,
    pub active_keys: usize,
}

/// Counts across all scripts of an owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnerOverview {
    pub total_scripts: usize,
    pub active_scripts: usize,
    pub key_scripts: usize,
    pub whitelist_scripts: usize,
    pub keyless_scripts: usize,
}

pub struct Console {
    store: Arc<dyn RecordStore>,
    transform: Arc<dyn CodeTransform>,
    clock: Arc<dyn Clock>,
}

fn require_text(field: &str, value: &str) -> ConsoleResult<()> {
    if value.trim().is_empty() {
        return Err(ConsoleError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

impl Console {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transform: Arc<dyn CodeTransform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transform,
            clock,
        }
    }

    async fn transformed(&self, source: &str, options: &TransformOptions) -> ConsoleResult<String> {
        let output = self.transform.transform(source, options).await;
        if output.code.trim().is_empty() {
            return Err(ConsoleError::Transform("transform produced no output".to_string()));
        }
        if output.fallback {
            tracing::warn!("Stored script text produced by the local transform");
        }
        Ok(output.code)
    }

    async fn owned_script(&self, owner: &str, script_id: &str) -> ConsoleResult<Script> {
        match self.store.get_script(script_id).await? {
            Some(script) if script.owner == owner => Ok(script),
            _ => Err(ConsoleError::NotFound),
        }
    }

    async fn owned_key(&self, owner: &str, key_id: &str) -> ConsoleResult<ScriptKey> {
        let key = self.store.get_key(key_id).await?.ok_or(ConsoleError::NotFound)?;
        self.owned_script(owner, &key.script_id).await?;
        Ok(key)
    }

    // Scripts

    pub async fn create_script(&self, owner: &str, new: NewScript) -> ConsoleResult<Script> {
        require_text("name", &new.name)?;
        require_text("source", &new.source)?;

        let now = self.clock.now_utc();
        let mut script = Script::new(owner, new.name.trim(), new.source, new.protection_mode, now);
        script.description = new.description;
        script.is_premium = new.is_premium;
        let defaults = TransformOptions::default();
        script.set_transform_options(TransformOptions {
            anti_tamper: new.anti_tamper.unwrap_or(defaults.anti_tamper),
            anti_dump: new.anti_dump.unwrap_or(defaults.anti_dump),
            anti_hook: new.anti_hook.unwrap_or(defaults.anti_hook),
        });
        script.obfuscated_code = Some(
            self.transformed(&script.original_code, &script.transform_options())
                .await?,
        );

        let script = self.store.insert_script(script).await?;
        tracing::info!("Created script {} ({}) for {}", script.id, script.name, owner);
        Ok(script)
    }

    pub async fn update_script(
        &self,
        owner: &str,
        script_id: &str,
        update: ScriptUpdate,
    ) -> ConsoleResult<Script> {
        let mut script = self.owned_script(owner, script_id).await?;

        if let Some(name) = update.name {
            require_text("name", &name)?;
            script.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            script.description = Some(description);
        }
        if let Some(mode) = update.protection_mode {
            script.protection_mode = mode;
        }
        if let Some(active) = update.is_active {
            script.is_active = active;
        }
        if let Some(premium) = update.is_premium {
            script.is_premium = premium;
        }

        let old_options = script.transform_options();
        let new_options = TransformOptions {
            anti_tamper: update.anti_tamper.unwrap_or(old_options.anti_tamper),
            anti_dump: update.anti_dump.unwrap_or(old_options.anti_dump),
            anti_hook: update.anti_hook.unwrap_or(old_options.anti_hook),
        };
        let source_changed = match update.source {
            Some(source) if source != script.original_code => {
                require_text("source", &source)?;
                script.original_code = source;
                true
            }
            _ => false,
        };

        if source_changed || new_options != old_options {
            script.set_transform_options(new_options);
            script.obfuscated_code = Some(
                self.transformed(&script.original_code, &new_options)
                    .await?,
            );
            script.version += 1;
        }
        script.updated_at = self.clock.now_utc();

        self.store.update_script(&script).await?;
        tracing::info!("Updated script {} (version {})", script.id, script.version);
        Ok(script)
    }

    pub async fn delete_script(&self, owner: &str, script_id: &str) -> ConsoleResult<()> {
        self.owned_script(owner, script_id).await?;
        self.store.delete_script(script_id).await?;
        tracing::info!("Deleted script {}", script_id);
        Ok(())
    }

    pub async fn get_script(&self, owner: &str, script_id: &str) -> ConsoleResult<Script> {
        self.owned_script(owner, script_id).await
    }

    pub async fn list_scripts(&self, owner: &str) -> ConsoleResult<Vec<Script>> {
        Ok(self.store.list_scripts(owner).await?)
    }

    // Keys

    pub async fn generate_key(
        &self,
        owner: &str,
        script_id: &str,
        params: NewKey,
    ) -> ConsoleResult<ScriptKey> {
        self.owned_script(owner, script_id).await?;

        if matches!(params.max_uses, Some(n) if n < 1) {
            return Err(ConsoleError::Invalid("max_uses must be at least 1".to_string()));
        }
        let now = self.clock.now_utc();
        let expires_at = match (params.expires_at, params.expires_in_days) {
            (Some(_), Some(_)) => {
                return Err(ConsoleError::Invalid(
                    "give either expires_at or expires_in_days".to_string(),
                ))
            }
            (Some(at), None) => Some(at),
            (None, Some(days)) if days > 0 => {
                let at = Duration::try_days(days).and_then(|d| now.checked_add_signed(d));
                Some(at.ok_or_else(|| {
                    ConsoleError::Invalid("expires_in_days is out of range".to_string())
                })?)
            }
            (None, Some(_)) => {
                return Err(ConsoleError::Invalid(
                    "expires_in_days must be positive".to_string(),
                ))
            }
            (None, None) => None,
        };

        for attempt in 1..=KEY_GENERATION_ATTEMPTS {
            let mut key = ScriptKey::new(script_id, generate_key_value(now), now);
            key.is_premium = params.is_premium;
            key.max_uses = params.max_uses;
            key.expires_at = expires_at;
            key.hwid_lock_enabled = params.hwid_lock;

            match self.store.insert_key(key).await {
                Ok(key) => {
                    tracing::info!("Generated key {} for script {}", key.id, script_id);
                    return Ok(key);
                }
                Err(StoreError::Conflict(msg)) => {
                    tracing::debug!("Key collision on attempt {}: {}", attempt, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ConsoleError::Store(StoreError::Conflict(
            "could not generate a unique key".to_string(),
        )))
    }

    pub async fn list_keys(&self, owner: &str, script_id: &str) -> ConsoleResult<Vec<ScriptKey>> {
        self.owned_script(owner, script_id).await?;
        Ok(self.store.list_keys(script_id).await?)
    }

    pub async fn revoke_key(&self, owner: &str, key_id: &str) -> ConsoleResult<()> {
        self.owned_key(owner, key_id).await?;
        self.store.set_key_active(key_id, false).await?;
        tracing::info!("Revoked key {}", key_id);
        Ok(())
    }

    pub async fn delete_key(&self, owner: &str, key_id: &str) -> ConsoleResult<()> {
        self.owned_key(owner, key_id).await?;
        self.store.delete_key(key_id).await?;
        Ok(())
    }

    /// Clear a key's bound fingerprint
    pub async fn reset_hwid(&self, owner: &str, key_id: &str) -> ConsoleResult<()> {
        self.owned_key(owner, key_id).await?;
        self.store.reset_hwid(key_id).await?;
        tracing::info!("Reset device binding of key {}", key_id);
        Ok(())
    }

    // Whitelist

    pub async fn add_whitelist(
        &self,
        owner: &str,
        script_id: &str,
        new: NewWhitelistEntry,
    ) -> ConsoleResult<WhitelistEntry> {
        self.owned_script(owner, script_id).await?;
        require_text("identifier", &new.identifier)?;

        let mut entry = WhitelistEntry::new(
            script_id,
            new.identifier.trim(),
            new.identifier_type,
            self.clock.now_utc(),
        );
        entry.note = new.note;
        Ok(self.store.insert_whitelist(entry).await?)
    }

    pub async fn remove_whitelist(
        &self,
        owner: &str,
        script_id: &str,
        entry_id: &str,
    ) -> ConsoleResult<()> {
        self.owned_script(owner, script_id).await?;
        self.store.delete_whitelist(script_id, entry_id).await?;
        Ok(())
    }

    pub async fn list_whitelist(
        &self,
        owner: &str,
        script_id: &str,
    ) -> ConsoleResult<Vec<WhitelistEntry>> {
        self.owned_script(owner, script_id).await?;
        Ok(self.store.list_whitelist(script_id).await?)
    }

    // Blacklist

    pub async fn add_blacklist(
        &self,
        owner: &str,
        new: NewBlacklistEntry,
    ) -> ConsoleResult<BlacklistEntry> {
        require_text("identifier", &new.identifier)?;
        let now = self.clock.now_utc();
        let identifier = new.identifier.trim();

        let mut entry = match new.script_id.as_deref() {
            Some(script_id) => {
                self.owned_script(owner, script_id).await?;
                BlacklistEntry::scoped(owner, script_id, identifier, new.identifier_type, now)
            }
            None => BlacklistEntry::global(owner, identifier, new.identifier_type, now),
        };
        entry.reason = new.reason;
        Ok(self.store.insert_blacklist(entry).await?)
    }

    pub async fn remove_blacklist(&self, owner: &str, entry_id: &str) -> ConsoleResult<()> {
        self.store.delete_blacklist(owner, entry_id).await?;
        Ok(())
    }

    pub async fn list_blacklist(&self, owner: &str) -> ConsoleResult<Vec<BlacklistEntry>> {
        Ok(self.store.list_blacklist(owner).await?)
    }

    // Logs and statistics

    pub async fn list_logs(
        &self,
        owner: &str,
        script_id: &str,
        limit: Option<usize>,
    ) -> ConsoleResult<Vec<ExecutionLog>> {
        self.owned_script(owner, script_id).await?;
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
        Ok(self.store.list_logs(script_id, limit).await?)
    }

    pub async fn script_stats(&self, owner: &str, script_id: &str) -> ConsoleResult<ScriptStats> {
        self.owned_script(owner, script_id).await?;
        let logs = self.store.list_logs(script_id, STATS_WINDOW).await?;
        let keys = self.store.list_keys(script_id).await?;

        let total = logs.len();
        let successful = logs.iter().filter(|l| l.success).count();
        let unique_hwids = logs
            .iter()
            .filter_map(|l| l.executor_hwid.as_deref())
            .filter(|h| !h.is_empty())
            .collect::<HashSet<_>>()
            .len();
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 * 100.0 / total as f64
        };

        Ok(ScriptStats {
            total_executions: total,
            successful_executions: successful,
            failed_executions: total - successful,
            success_rate,
            unique_hwids,
            active_keys: keys.iter().filter(|k| k.is_active).count(),
        })
    }

    pub async fn owner_overview(&self, owner: &str) -> ConsoleResult<OwnerOverview> {
        let scripts = self.store.list_scripts(owner).await?;
        let mut overview = OwnerOverview {
            total_scripts: scripts.len(),
            ..Default::default()
        };
        for script in &scripts {
            if script.is_active {
                overview.active_scripts += 1;
            }
            match script.protection_mode {
                ProtectionMode::Key => overview.key_scripts += 1,
                ProtectionMode::Whitelist => overview.whitelist_scripts += 1,
                ProtectionMode::Keyless => overview.keyless_scripts += 1,
            }
        }
        Ok(overview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::engine::{AccessEngine, DeliveryRequest, EngineConfig};
    use crate::obfuscator::ObfuscatorConfig;
    use crate::store::MemoryStore;
    use crate::transform::LocalTransform;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<MockClock>,
        console: Console,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::from_rfc3339("2025-03-01T10:00:00Z"));
        let transform = Arc::new(LocalTransform::new(ObfuscatorConfig::default(), "ScriptHub"));
        let console = Console::new(store.clone(), transform, clock.clone());
        Fixture {
            store,
            clock,
            console,
        }
    }

    fn new_script(mode: ProtectionMode) -> NewScript {
        NewScript {
            name: "Aimbot".to_string(),
            description: None,
            source: "local target = 1\nprint(target)".to_string(),
            protection_mode: mode,
            is_premium: false,
            anti_tamper: None,
            anti_dump: None,
            anti_hook: None,
        }
    }

    #[tokio::test]
    async fn test_create_script_stores_transformed_text() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();

        assert_eq!(script.version, 1);
        let code = script.obfuscated_code.as_deref().unwrap();
        assert!(code.starts_with("-- ScriptHub Protected"));
        assert!(!code.contains("target"));
        assert!(f.store.get_script(&script.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_script_rejects_empty_fields() {
        let f = fixture();
        let mut new = new_script(ProtectionMode::Key);
        new.source = "   ".to_string();
        let err = f.console.create_script("owner-1", new).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version_only_on_source_changes() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();

        let renamed = f
            .console
            .update_script(
                "owner-1",
                &script.id,
                ScriptUpdate {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.version, 1);
        assert_eq!(renamed.obfuscated_code, script.obfuscated_code);

        let edited = f
            .console
            .update_script(
                "owner-1",
                &script.id,
                ScriptUpdate {
                    source: Some("print('v2')".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.version, 2);
        assert_ne!(edited.obfuscated_code, script.obfuscated_code);

        let toggled = f
            .console
            .update_script(
                "owner-1",
                &script.id,
                ScriptUpdate {
                    anti_dump: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(toggled.version, 3);
        assert!(!toggled.anti_dump);
    }

    #[tokio::test]
    async fn test_foreign_script_is_not_found() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();

        let err = f.console.get_script("owner-2", &script.id).await.unwrap_err();
        assert!(matches!(err, ConsoleError::NotFound));
        let err = f
            .console
            .generate_key("owner-2", &script.id, NewKey::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::NotFound));
        let err = f.console.delete_script("owner-2", &script.id).await.unwrap_err();
        assert!(matches!(err, ConsoleError::NotFound));
    }

    #[tokio::test]
    async fn test_generate_key_with_relative_expiry() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();

        let key = f
            .console
            .generate_key(
                "owner-1",
                &script.id,
                NewKey {
                    max_uses: Some(10),
                    expires_in_days: Some(7),
                    hwid_lock: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(key.key_value.starts_with("SH-"));
        assert_eq!(key.max_uses, Some(10));
        assert!(key.hwid_lock_enabled);
        assert_eq!(key.expires_at, Some(f.clock.now_utc() + Duration::days(7)));

        let err = f
            .console
            .generate_key(
                "owner-1",
                &script.id,
                NewKey {
                    max_uses: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_generate_key_rejects_out_of_range_expiry() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();

        for days in [100_000_000, 1_000_000_000_000, i64::MAX] {
            let err = f
                .console
                .generate_key(
                    "owner-1",
                    &script.id,
                    NewKey {
                        expires_in_days: Some(days),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ConsoleError::Invalid(_)), "{days}: {err:?}");
        }
        assert!(f.console.list_keys("owner-1", &script.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_lifecycle() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();
        let key = f
            .console
            .generate_key(
                "owner-1",
                &script.id,
                NewKey {
                    hwid_lock: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        f.store.bind_hwid(&key.id, "F1").await.unwrap();

        f.console.reset_hwid("owner-1", &key.id).await.unwrap();
        let stored = f.store.get_key(&key.id).await.unwrap().unwrap();
        assert!(stored.hwid_locked.is_none());

        let err = f.console.revoke_key("owner-2", &key.id).await.unwrap_err();
        assert!(matches!(err, ConsoleError::NotFound));

        f.console.revoke_key("owner-1", &key.id).await.unwrap();
        let keys = f.console.list_keys("owner-1", &script.id).await.unwrap();
        assert!(!keys[0].is_active);

        f.console.delete_key("owner-1", &key.id).await.unwrap();
        assert!(f.console.list_keys("owner-1", &script.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blacklist_scope_requires_ownership() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Keyless))
            .await
            .unwrap();

        let err = f
            .console
            .add_blacklist(
                "owner-2",
                NewBlacklistEntry {
                    identifier: "BAD".to_string(),
                    identifier_type: IdentifierKind::Hwid,
                    reason: None,
                    script_id: Some(script.id.clone()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::NotFound));

        let entry = f
            .console
            .add_blacklist(
                "owner-1",
                NewBlacklistEntry {
                    identifier: " BAD ".to_string(),
                    identifier_type: IdentifierKind::Hwid,
                    reason: Some("chargeback".to_string()),
                    script_id: None,
                },
            )
            .await
            .unwrap();
        assert!(entry.is_global);
        assert_eq!(entry.identifier, "BAD");

        assert!(f.console.list_blacklist("owner-2").await.unwrap().is_empty());
        let err = f.console.remove_blacklist("owner-2", &entry.id).await.unwrap_err();
        assert!(matches!(err, ConsoleError::NotFound));
        f.console.remove_blacklist("owner-1", &entry.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_whitelist_management() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Whitelist))
            .await
            .unwrap();

        let entry = f
            .console
            .add_whitelist(
                "owner-1",
                &script.id,
                NewWhitelistEntry {
                    identifier: "12345".to_string(),
                    identifier_type: IdentifierKind::RobloxId,
                    note: Some("tester".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(f.console.list_whitelist("owner-1", &script.id).await.unwrap().len(), 1);

        f.console
            .remove_whitelist("owner-1", &script.id, &entry.id)
            .await
            .unwrap();
        assert!(f.console.list_whitelist("owner-1", &script.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_overview() {
        let f = fixture();
        let script = f
            .console
            .create_script("owner-1", new_script(ProtectionMode::Keyless))
            .await
            .unwrap();
        f.console
            .create_script("owner-1", new_script(ProtectionMode::Key))
            .await
            .unwrap();

        let engine = AccessEngine::new(
            f.store.clone(),
            Arc::new(LocalTransform::new(ObfuscatorConfig::default(), "ScriptHub")),
            f.clock.clone(),
            EngineConfig::default(),
        );
        engine
            .deliver(&DeliveryRequest::new(&script.id).with_hwid("F1"))
            .await;
        engine
            .deliver(&DeliveryRequest::new(&script.id).with_hwid("F2"))
            .await;
        engine
            .deliver(&DeliveryRequest::new(&script.id).with_hwid("F1"))
            .await;

        let stats = f.console.script_stats("owner-1", &script.id).await.unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.successful_executions, 3);
        assert_eq!(stats.failed_executions, 0);
        assert_eq!(stats.unique_hwids, 2);
        assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);

        let logs = f.console.list_logs("owner-1", &script.id, Some(2)).await.unwrap();
        assert_eq!(logs.len(), 2);

        let overview = f.console.owner_overview("owner-1").await.unwrap();
        assert_eq!(
            overview,
            OwnerOverview {
                total_scripts: 2,
                active_scripts: 2,
                key_scripts: 1,
                whitelist_scripts: 0,
                keyless_scripts: 1,
            }
        );
    }
}
