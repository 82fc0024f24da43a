//! PostgREST-backed record store
//!
//! Every table lives under `{url}/rest/v1/<table>`. A plain column filter
//! takes everything after its operator as the value, so `eq.` values are sent
//! raw. Values inside `in.(...)` lists and `or=(...)` trees are double-quoted,
//! so caller-supplied strings cannot change filter syntax there. reqwest
//! URL-encodes the resulting query.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use scripthub_core::store::{RecordStore, StoreError, StoreResult};
use scripthub_core::{
    BlacklistEntry, ExecutionLog, HwidBinding, Script, ScriptKey, UseOutcome, WhitelistEntry,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

const SCRIPTS: &str = "scripts";
const KEYS: &str = "script_keys";
const WHITELIST: &str = "script_whitelist";
const BLACKLIST: &str = "user_blacklist";
const EXECUTIONS: &str = "script_executions";

/// Compare-and-set rounds before a contended update gives up
const CAS_ATTEMPTS: usize = 8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Quote a value for use inside an `in.(...)` list or a logic tree
pub fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// `eq.` filter on a plain column
pub fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// `in.` filter over quoted values
pub fn in_list(values: &[&str]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("in.({})", quoted.join(","))
}

/// Filter selecting blacklist entries that cover a script: scoped to it, or
/// global and created by its owner
pub fn blacklist_scope(owner: &str, script_id: &str) -> String {
    format!(
        "(script_id.eq.{},and(is_global.is.true,created_by.eq.{}))",
        quote(script_id),
        quote(owner)
    )
}

type Query = Vec<(&'static str, String)>;

pub struct RestStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl RestStore {
    pub fn new(url: &str, service_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Backend(format!("Failed to create client: {}", e)))?;
        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            service_key: service_key.to_string(),
        })
    }

    fn request(&self, method: Method, table: &str, query: &Query) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "return=representation")
            .query(query)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<Vec<T>> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("Request failed: {}", e)))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Conflict(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("Status {}: {}", status, body)));
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("Malformed response: {}", e)))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: Query) -> StoreResult<Vec<T>> {
        self.send(self.request(Method::GET, table, &query)).await
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, mut query: Query) -> StoreResult<Option<T>> {
        query.push(("limit", "1".to_string()));
        Ok(self.select(table, query).await?.into_iter().next())
    }

    async fn exists(&self, table: &str, mut query: Query) -> StoreResult<bool> {
        query.push(("select", "id".to_string()));
        let row: Option<serde_json::Value> = self.select_one(table, query).await?;
        Ok(row.is_some())
    }

    async fn insert<T: Serialize + DeserializeOwned>(&self, table: &str, row: &T) -> StoreResult<T> {
        let rows: Vec<T> = self
            .send(self.request(Method::POST, table, &Vec::new()).json(row))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend(format!("insert into {} returned nothing", table)))
    }

    /// PATCH matching rows, returning how many changed
    async fn update<B: Serialize + ?Sized>(&self, table: &str, query: Query, body: &B) -> StoreResult<usize> {
        let rows: Vec<serde_json::Value> = self
            .send(self.request(Method::PATCH, table, &query).json(body))
            .await?;
        Ok(rows.len())
    }

    async fn delete(&self, table: &str, query: Query) -> StoreResult<usize> {
        let rows: Vec<serde_json::Value> = self.send(self.request(Method::DELETE, table, &query)).await?;
        Ok(rows.len())
    }

    fn found(changed: usize) -> StoreResult<()> {
        if changed == 0 {
            Err(StoreError::NotFound)
        } else {
            Ok(())
        }
    }
}

fn newest_first() -> (&'static str, String) {
    ("order", "created_at.desc".to_string())
}

#[async_trait]
impl RecordStore for RestStore {
    async fn get_script(&self, id: &str) -> StoreResult<Option<Script>> {
        self.select_one(SCRIPTS, vec![("id", eq(id))]).await
    }

    async fn list_scripts(&self, owner: &str) -> StoreResult<Vec<Script>> {
        self.select(SCRIPTS, vec![("user_id", eq(owner)), newest_first()]).await
    }

    async fn insert_script(&self, script: Script) -> StoreResult<Script> {
        self.insert(SCRIPTS, &script).await
    }

    async fn update_script(&self, script: &Script) -> StoreResult<()> {
        Self::found(self.update(SCRIPTS, vec![("id", eq(&script.id))], script).await?)
    }

    async fn delete_script(&self, id: &str) -> StoreResult<()> {
        self.delete(EXECUTIONS, vec![("script_id", eq(id))]).await?;
        self.delete(WHITELIST, vec![("script_id", eq(id))]).await?;
        self.delete(BLACKLIST, vec![("script_id", eq(id))]).await?;
        self.delete(KEYS, vec![("script_id", eq(id))]).await?;
        Self::found(self.delete(SCRIPTS, vec![("id", eq(id))]).await?)
    }

    async fn get_key(&self, id: &str) -> StoreResult<Option<ScriptKey>> {
        self.select_one(KEYS, vec![("id", eq(id))]).await
    }

    async fn find_active_key(&self, script_id: &str, key_value: &str) -> StoreResult<Option<ScriptKey>> {
        self.select_one(
            KEYS,
            vec![
                ("script_id", eq(script_id)),
                ("key_value", eq(key_value)),
                ("is_active", "is.true".to_string()),
            ],
        )
        .await
    }

    async fn list_keys(&self, script_id: &str) -> StoreResult<Vec<ScriptKey>> {
        self.select(KEYS, vec![("script_id", eq(script_id)), newest_first()]).await
    }

    async fn insert_key(&self, key: ScriptKey) -> StoreResult<ScriptKey> {
        let taken = self
            .exists(
                KEYS,
                vec![("script_id", eq(&key.script_id)), ("key_value", eq(&key.key_value))],
            )
            .await?;
        if taken {
            return Err(StoreError::Conflict(format!(
                "key value already used in script {}",
                key.script_id
            )));
        }
        self.insert(KEYS, &key).await
    }

    async fn set_key_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let body = serde_json::json!({ "is_active": active });
        Self::found(self.update(KEYS, vec![("id", eq(id))], &body).await?)
    }

    async fn delete_key(&self, id: &str) -> StoreResult<()> {
        Self::found(self.delete(KEYS, vec![("id", eq(id))]).await?)
    }

    async fn bind_hwid(&self, key_id: &str, hwid: &str) -> StoreResult<HwidBinding> {
        let body = serde_json::json!({ "hwid_locked": hwid });
        for _ in 0..CAS_ATTEMPTS {
            let changed = self
                .update(
                    KEYS,
                    vec![("id", eq(key_id)), ("hwid_locked", "is.null".to_string())],
                    &body,
                )
                .await?;
            if changed > 0 {
                return Ok(HwidBinding::Bound);
            }
            let key = self.get_key(key_id).await?.ok_or(StoreError::NotFound)?;
            if let Some(bound) = key.hwid_locked {
                return Ok(HwidBinding::AlreadyBound(bound));
            }
            // Reset between our update and read; try again
        }
        Err(StoreError::Backend(format!("bind of key {} kept contending", key_id)))
    }

    async fn reset_hwid(&self, key_id: &str) -> StoreResult<()> {
        let body = serde_json::json!({ "hwid_locked": null });
        Self::found(self.update(KEYS, vec![("id", eq(key_id))], &body).await?)
    }

    async fn consume_use(&self, key_id: &str, now: DateTime<Utc>) -> StoreResult<UseOutcome> {
        for _ in 0..CAS_ATTEMPTS {
            let key = match self.get_key(key_id).await? {
                Some(key) if key.is_active => key,
                _ => return Ok(UseOutcome::Unavailable),
            };
            if key.uses_exhausted() {
                return Ok(UseOutcome::LimitReached);
            }

            let next = key.current_uses + 1;
            let body = serde_json::json!({ "current_uses": next, "last_used_at": now });
            let changed = self
                .update(
                    KEYS,
                    vec![
                        ("id", eq(key_id)),
                        ("is_active", "is.true".to_string()),
                        ("current_uses", format!("eq.{}", key.current_uses)),
                    ],
                    &body,
                )
                .await?;
            if changed > 0 {
                return Ok(UseOutcome::Consumed(next));
            }
        }
        Err(StoreError::Backend(format!("use counter of key {} kept contending", key_id)))
    }

    async fn list_whitelist(&self, script_id: &str) -> StoreResult<Vec<WhitelistEntry>> {
        self.select(WHITELIST, vec![("script_id", eq(script_id)), newest_first()]).await
    }

    async fn insert_whitelist(&self, entry: WhitelistEntry) -> StoreResult<WhitelistEntry> {
        self.insert(WHITELIST, &entry).await
    }

    async fn delete_whitelist(&self, script_id: &str, id: &str) -> StoreResult<()> {
        Self::found(
            self.delete(WHITELIST, vec![("id", eq(id)), ("script_id", eq(script_id))])
                .await?,
        )
    }

    async fn whitelist_contains(&self, script_id: &str, candidates: &[&str]) -> StoreResult<bool> {
        if candidates.is_empty() {
            return Ok(false);
        }
        self.exists(
            WHITELIST,
            vec![
                ("script_id", eq(script_id)),
                ("is_active", "is.true".to_string()),
                ("identifier", in_list(candidates)),
            ],
        )
        .await
    }

    async fn list_blacklist(&self, owner: &str) -> StoreResult<Vec<BlacklistEntry>> {
        self.select(BLACKLIST, vec![("created_by", eq(owner)), newest_first()]).await
    }

    async fn insert_blacklist(&self, entry: BlacklistEntry) -> StoreResult<BlacklistEntry> {
        self.insert(BLACKLIST, &entry).await
    }

    async fn delete_blacklist(&self, owner: &str, id: &str) -> StoreResult<()> {
        Self::found(
            self.delete(BLACKLIST, vec![("id", eq(id)), ("created_by", eq(owner))])
                .await?,
        )
    }

    async fn blacklist_matches(
        &self,
        owner: &str,
        script_id: &str,
        candidates: &[&str],
    ) -> StoreResult<bool> {
        if candidates.is_empty() {
            return Ok(false);
        }
        self.exists(
            BLACKLIST,
            vec![
                ("identifier", in_list(candidates)),
                ("or", blacklist_scope(owner, script_id)),
            ],
        )
        .await
    }

    async fn append_log(&self, log: ExecutionLog) -> StoreResult<()> {
        self.insert(EXECUTIONS, &log).await.map(|_| ())
    }

    async fn list_logs(&self, script_id: &str, limit: usize) -> StoreResult<Vec<ExecutionLog>> {
        self.select(
            EXECUTIONS,
            vec![
                ("script_id", eq(script_id)),
                ("order", "executed_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn backfill_hwid(&self, script_id: &str, client_ip: &str, hwid: &str) -> StoreResult<bool> {
        let latest: Option<ExecutionLog> = self
            .select_one(
                EXECUTIONS,
                vec![
                    ("script_id", eq(script_id)),
                    ("executor_ip", eq(client_ip)),
                    ("executor_hwid", "is.null".to_string()),
                    ("order", "executed_at.desc".to_string()),
                ],
            )
            .await?;
        let Some(log) = latest else {
            return Ok(false);
        };

        let body = serde_json::json!({ "executor_hwid": hwid });
        let changed = self
            .update(
                EXECUTIONS,
                vec![("id", eq(&log.id)), ("executor_hwid", "is.null".to_string())],
                &body,
            )
            .await?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use scripthub_core::ProtectionMode;

    type Seen = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

    /// Fake PostgREST; records decoded query params per request and answers
    /// with `rows` only when the `id` filter equals `eq.abc`
    async fn spawn_postgrest(rows: serde_json::Value) -> (RestStore, Seen) {
        let seen: Seen = Arc::default();
        let recorded = seen.clone();
        let router = Router::new().route(
            "/rest/v1/:table",
            get(
                move |Path(table): Path<String>, Query(params): Query<HashMap<String, String>>| {
                    let recorded = recorded.clone();
                    let rows = rows.clone();
                    async move {
                        let matched = params.get("id").map(String::as_str) == Some("eq.abc");
                        recorded.lock().unwrap().push((table, params));
                        if matched {
                            Json(rows)
                        } else {
                            Json(serde_json::json!([]))
                        }
                    }
                },
            ),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let store = RestStore::new(&format!("http://{}", addr), "service").unwrap();
        (store, seen)
    }

    #[tokio::test]
    async fn test_get_script_sends_raw_eq_value() {
        let mut script = Script::new("owner", "Demo", "print(1)", ProtectionMode::Keyless, Utc::now());
        script.id = "abc".to_string();
        let (store, seen) = spawn_postgrest(serde_json::json!([script])).await;

        let found = store.get_script("abc").await.unwrap();
        assert_eq!(found.map(|s| s.id).as_deref(), Some("abc"));

        let seen = seen.lock().unwrap();
        let (table, params) = &seen[0];
        assert_eq!(table, SCRIPTS);
        assert_eq!(params["id"], "eq.abc");
        assert_eq!(params["limit"], "1");
    }

    #[tokio::test]
    async fn test_key_lookup_filters_received() {
        let (store, seen) = spawn_postgrest(serde_json::json!([])).await;

        let found = store.find_active_key("s1", "SH-A,B\"C&d=1").await.unwrap();
        assert!(found.is_none());

        let seen = seen.lock().unwrap();
        let (table, params) = &seen[0];
        assert_eq!(table, KEYS);
        assert_eq!(params["script_id"], "eq.s1");
        assert_eq!(params["key_value"], "eq.SH-A,B\"C&d=1");
        assert_eq!(params["is_active"], "is.true");
        assert!(!params.contains_key("d"));
    }

    #[tokio::test]
    async fn test_blacklist_lookup_quotes_list_values() {
        let (store, seen) = spawn_postgrest(serde_json::json!([])).await;

        let hit = store
            .blacklist_matches("owner-1", "script-1", &["F1", "1.2.3.4"])
            .await
            .unwrap();
        assert!(!hit);

        let seen = seen.lock().unwrap();
        let (table, params) = &seen[0];
        assert_eq!(table, BLACKLIST);
        assert_eq!(params["identifier"], "in.(\"F1\",\"1.2.3.4\")");
        assert_eq!(
            params["or"],
            "(script_id.eq.\"script-1\",and(is_global.is.true,created_by.eq.\"owner-1\"))"
        );
    }

    #[test]
    fn test_quote_escapes_filter_syntax() {
        assert_eq!(quote("abc"), "\"abc\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
        assert_eq!(eq("x,or(id.neq.0)"), "eq.x,or(id.neq.0)");
    }

    #[test]
    fn test_in_list() {
        assert_eq!(in_list(&["F1", "1.2.3.4"]), "in.(\"F1\",\"1.2.3.4\")");
    }

    #[test]
    fn test_blacklist_scope() {
        assert_eq!(
            blacklist_scope("owner-1", "script-1"),
            "(script_id.eq.\"script-1\",and(is_global.is.true,created_by.eq.\"owner-1\"))"
        );
    }

    #[test]
    fn test_base_url_normalized() {
        let store = RestStore::new("https://project.example/", "service").unwrap();
        assert_eq!(store.base_url, "https://project.example/rest/v1");
    }
}
