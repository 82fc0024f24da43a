//! In-process record store
//!
//! Used by the development server and by tests. Every conditional update runs
//! under one write guard, which makes it atomic with respect to other callers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{RecordStore, StoreError, StoreResult};
use crate::types::{
    BlacklistEntry, ExecutionLog, HwidBinding, Script, ScriptKey, UseOutcome, WhitelistEntry,
};

#[derive(Default)]
struct Tables {
    scripts: HashMap<String, Script>,
    keys: HashMap<String, ScriptKey>,
    whitelist: HashMap<String, WhitelistEntry>,
    blacklist: HashMap<String, BlacklistEntry>,
    /// Insertion order is execution order
    logs: Vec<ExecutionLog>,
}

/// Record store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(mut rows: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    rows
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_script(&self, id: &str) -> StoreResult<Option<Script>> {
        Ok(self.tables.read().await.scripts.get(id).cloned())
    }

    async fn list_scripts(&self, owner: &str) -> StoreResult<Vec<Script>> {
        let tables = self.tables.read().await;
        let rows = tables
            .scripts
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        Ok(newest_first(rows, |s: &Script| s.created_at))
    }

    async fn insert_script(&self, script: Script) -> StoreResult<Script> {
        let mut tables = self.tables.write().await;
        if tables.scripts.contains_key(&script.id) {
            return Err(StoreError::Conflict(format!("script {}", script.id)));
        }
        tables.scripts.insert(script.id.clone(), script.clone());
        Ok(script)
    }

    async fn update_script(&self, script: &Script) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let slot = tables.scripts.get_mut(&script.id).ok_or(StoreError::NotFound)?;
        *slot = script.clone();
        Ok(())
    }

    async fn delete_script(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.scripts.remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.keys.retain(|_, k| k.script_id != id);
        tables.whitelist.retain(|_, w| w.script_id != id);
        tables.blacklist.retain(|_, b| b.script_id.as_deref() != Some(id));
        tables.logs.retain(|l| l.script_id != id);
        Ok(())
    }

    async fn get_key(&self, id: &str) -> StoreResult<Option<ScriptKey>> {
        Ok(self.tables.read().await.keys.get(id).cloned())
    }

    async fn find_active_key(&self, script_id: &str, key_value: &str) -> StoreResult<Option<ScriptKey>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .values()
            .find(|k| k.script_id == script_id && k.key_value == key_value && k.is_active)
            .cloned())
    }

    async fn list_keys(&self, script_id: &str) -> StoreResult<Vec<ScriptKey>> {
        let tables = self.tables.read().await;
        let rows = tables
            .keys
            .values()
            .filter(|k| k.script_id == script_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |k: &ScriptKey| k.created_at))
    }

    async fn insert_key(&self, key: ScriptKey) -> StoreResult<ScriptKey> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .keys
            .values()
            .any(|k| k.script_id == key.script_id && k.key_value == key.key_value);
        if duplicate {
            return Err(StoreError::Conflict(format!("key value already used in script {}", key.script_id)));
        }
        tables.keys.insert(key.id.clone(), key.clone());
        Ok(key)
    }

    async fn set_key_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let key = tables.keys.get_mut(id).ok_or(StoreError::NotFound)?;
        key.is_active = active;
        Ok(())
    }

    async fn delete_key(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.keys.remove(id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn bind_hwid(&self, key_id: &str, hwid: &str) -> StoreResult<HwidBinding> {
        let mut tables = self.tables.write().await;
        let key = tables.keys.get_mut(key_id).ok_or(StoreError::NotFound)?;
        match &key.hwid_locked {
            Some(existing) => Ok(HwidBinding::AlreadyBound(existing.clone())),
            None => {
                key.hwid_locked = Some(hwid.to_string());
                Ok(HwidBinding::Bound)
            }
        }
    }

    async fn reset_hwid(&self, key_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let key = tables.keys.get_mut(key_id).ok_or(StoreError::NotFound)?;
        key.hwid_locked = None;
        Ok(())
    }

    async fn consume_use(&self, key_id: &str, now: DateTime<Utc>) -> StoreResult<UseOutcome> {
        let mut tables = self.tables.write().await;
        let Some(key) = tables.keys.get_mut(key_id) else {
            return Ok(UseOutcome::Unavailable);
        };
        if !key.is_active {
            return Ok(UseOutcome::Unavailable);
        }
        if key.uses_exhausted() {
            return Ok(UseOutcome::LimitReached);
        }
        key.current_uses += 1;
        key.last_used_at = Some(now);
        Ok(UseOutcome::Consumed(key.current_uses))
    }

    async fn list_whitelist(&self, script_id: &str) -> StoreResult<Vec<WhitelistEntry>> {
        let tables = self.tables.read().await;
        let rows = tables
            .whitelist
            .values()
            .filter(|w| w.script_id == script_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |w: &WhitelistEntry| w.created_at))
    }

    async fn insert_whitelist(&self, entry: WhitelistEntry) -> StoreResult<WhitelistEntry> {
        let mut tables = self.tables.write().await;
        tables.whitelist.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn delete_whitelist(&self, script_id: &str, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.whitelist.get(id) {
            Some(entry) if entry.script_id == script_id => {
                tables.whitelist.remove(id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn whitelist_contains(&self, script_id: &str, candidates: &[&str]) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.whitelist.values().any(|w| {
            w.script_id == script_id && w.is_active && candidates.contains(&w.identifier.as_str())
        }))
    }

    async fn list_blacklist(&self, owner: &str) -> StoreResult<Vec<BlacklistEntry>> {
        let tables = self.tables.read().await;
        let rows = tables
            .blacklist
            .values()
            .filter(|b| b.created_by == owner)
            .cloned()
            .collect();
        Ok(newest_first(rows, |b: &BlacklistEntry| b.created_at))
    }

    async fn insert_blacklist(&self, entry: BlacklistEntry) -> StoreResult<BlacklistEntry> {
        let mut tables = self.tables.write().await;
        tables.blacklist.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn delete_blacklist(&self, owner: &str, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.blacklist.get(id) {
            Some(entry) if entry.created_by == owner => {
                tables.blacklist.remove(id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn blacklist_matches(
        &self,
        owner: &str,
        script_id: &str,
        candidates: &[&str],
    ) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.blacklist.values().any(|b| {
            b.applies_to(owner, script_id) && candidates.contains(&b.identifier.as_str())
        }))
    }

    async fn append_log(&self, log: ExecutionLog) -> StoreResult<()> {
        self.tables.write().await.logs.push(log);
        Ok(())
    }

    async fn list_logs(&self, script_id: &str, limit: usize) -> StoreResult<Vec<ExecutionLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .iter()
            .rev()
            .filter(|l| l.script_id == script_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn backfill_hwid(&self, script_id: &str, client_ip: &str, hwid: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let row = tables.logs.iter_mut().rev().find(|l| {
            l.script_id == script_id
                && l.executor_ip.as_deref() == Some(client_ip)
                && l.executor_hwid.is_none()
        });
        match row {
            Some(log) => {
                log.executor_hwid = Some(hwid.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IdentifierKind, ProtectionMode};
    use std::sync::Arc;

    fn script(owner: &str) -> Script {
        Script::new(owner, "Test", "print('hi')", ProtectionMode::Key, Utc::now())
    }

    #[tokio::test]
    async fn test_duplicate_key_value_rejected_within_script() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_key(ScriptKey::new("s1", "SH-DUP", now)).await.unwrap();

        let err = store.insert_key(ScriptKey::new("s1", "SH-DUP", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same value in another script is fine
        store.insert_key(ScriptKey::new("s2", "SH-DUP", now)).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_hwid_only_once() {
        let store = MemoryStore::new();
        let key = store.insert_key(ScriptKey::new("s1", "SH-A", Utc::now())).await.unwrap();

        assert_eq!(store.bind_hwid(&key.id, "F1").await.unwrap(), HwidBinding::Bound);
        assert_eq!(
            store.bind_hwid(&key.id, "F2").await.unwrap(),
            HwidBinding::AlreadyBound("F1".to_string())
        );

        store.reset_hwid(&key.id).await.unwrap();
        assert_eq!(store.get_key(&key.id).await.unwrap().unwrap().hwid_locked, None);
        assert_eq!(store.bind_hwid(&key.id, "F2").await.unwrap(), HwidBinding::Bound);
    }

    #[tokio::test]
    async fn test_consume_use_never_exceeds_limit_under_contention() {
        let store = Arc::new(MemoryStore::new());
        let mut key = ScriptKey::new("s1", "SH-LIMIT", Utc::now());
        key.max_uses = Some(5);
        let key = store.insert_key(key).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let id = key.id.clone();
            handles.push(tokio::spawn(async move { store.consume_use(&id, Utc::now()).await.unwrap() }));
        }

        let mut consumed = 0;
        for handle in handles {
            if let UseOutcome::Consumed(_) = handle.await.unwrap() {
                consumed += 1;
            }
        }

        assert_eq!(consumed, 5);
        assert_eq!(store.get_key(&key.id).await.unwrap().unwrap().current_uses, 5);
    }

    #[tokio::test]
    async fn test_consume_use_on_revoked_key() {
        let store = MemoryStore::new();
        let key = store.insert_key(ScriptKey::new("s1", "SH-R", Utc::now())).await.unwrap();
        store.set_key_active(&key.id, false).await.unwrap();

        assert_eq!(store.consume_use(&key.id, Utc::now()).await.unwrap(), UseOutcome::Unavailable);
        assert_eq!(store.consume_use("missing", Utc::now()).await.unwrap(), UseOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_delete_script_cascades() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let s = store.insert_script(script("owner")).await.unwrap();
        store.insert_key(ScriptKey::new(&s.id, "SH-A", now)).await.unwrap();
        store
            .insert_whitelist(WhitelistEntry::new(&s.id, "U1", IdentifierKind::RobloxId, now))
            .await
            .unwrap();
        store.append_log(ExecutionLog::new(&s.id, true, now)).await.unwrap();

        store.delete_script(&s.id).await.unwrap();

        assert!(store.list_keys(&s.id).await.unwrap().is_empty());
        assert!(store.list_whitelist(&s.id).await.unwrap().is_empty());
        assert!(store.list_logs(&s.id, 10).await.unwrap().is_empty());
        assert!(matches!(store.delete_script(&s.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_backfill_targets_most_recent_unfilled_row() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut first = ExecutionLog::new("s1", true, now);
        first.executor_ip = Some("1.2.3.4".to_string());
        let mut second = ExecutionLog::new("s1", true, now);
        second.executor_ip = Some("1.2.3.4".to_string());
        let second_id = second.id.clone();
        store.append_log(first).await.unwrap();
        store.append_log(second).await.unwrap();

        assert!(store.backfill_hwid("s1", "1.2.3.4", "F1").await.unwrap());

        let logs = store.list_logs("s1", 10).await.unwrap();
        assert_eq!(logs[0].id, second_id);
        assert_eq!(logs[0].executor_hwid.as_deref(), Some("F1"));
        assert_eq!(logs[1].executor_hwid, None);

        assert!(!store.backfill_hwid("s1", "9.9.9.9", "F1").await.unwrap());
    }

    #[tokio::test]
    async fn test_whitelist_ignores_inactive_entries() {
        let store = MemoryStore::new();
        let mut entry = WhitelistEntry::new("s1", "U1", IdentifierKind::RobloxId, Utc::now());
        entry.is_active = false;
        store.insert_whitelist(entry).await.unwrap();

        assert!(!store.whitelist_contains("s1", &["U1"]).await.unwrap());
    }
}
