//! Access decision engine
//!
//! Decides whether one delivery request receives the script payload. The
//! order of checks is fixed: resolve the script, veto on blacklist, then
//! dispatch on the protection mode. Every verdict writes exactly one
//! execution log row.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::store::{RecordStore, StoreError};
use crate::transform::CodeTransform;
use crate::types::{ExecutionLog, HwidBinding, ProtectionMode, Script, ScriptKey, UseOutcome};

/// Key value loaders send when the script needs none
pub const KEYLESS_SENTINEL: &str = "KEYLESS";

/// Literal address used when no forwarded address is available
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Engine settings injected at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name shown in wrappers and diagnostics
    pub brand: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            brand: "ScriptHub".to_string(),
        }
    }
}

/// Inputs already extracted from the transport
#[derive(Debug, Clone, Default)]
pub struct DeliveryRequest {
    pub script_id: String,
    pub key: Option<String>,
    pub hwid: Option<String>,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

impl DeliveryRequest {
    pub fn new(script_id: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            client_ip: UNKNOWN_ADDRESS.to_string(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_hwid(mut self, hwid: impl Into<String>) -> Self {
        self.hwid = Some(hwid.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    fn hwid(&self) -> Option<&str> {
        self.hwid.as_deref().filter(|h| !h.is_empty())
    }

    fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Why a delivery was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    ScriptNotFound,
    Blacklisted,
    NotWhitelisted,
    KeyRequired,
    InvalidKey,
    KeyExpired,
    MaxUsesReached,
    HwidRequired,
    HwidMismatch,
    InternalError,
}

impl DenyReason {
    /// Short caller-visible message
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ScriptNotFound => "script not found or inactive",
            DenyReason::Blacklisted => "blacklisted",
            DenyReason::NotWhitelisted => "not whitelisted",
            DenyReason::KeyRequired => "key required",
            DenyReason::InvalidKey => "invalid key",
            DenyReason::KeyExpired => "expired",
            DenyReason::MaxUsesReached => "max uses reached",
            DenyReason::HwidRequired => "hwid required",
            DenyReason::HwidMismatch => "hwid mismatch",
            DenyReason::InternalError => "internal error, try again later",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Grant {
        code: String,
        key_id: Option<String>,
    },
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_grant(&self) -> bool {
        matches!(self, Verdict::Grant { .. })
    }
}

/// Result of a standalone fingerprint check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Locked,
    Invalid,
}

impl VerifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyOutcome::Ok => "ok",
            VerifyOutcome::Locked => "locked",
            VerifyOutcome::Invalid => "invalid",
        }
    }
}

/// Verdict plus the key it was decided against, for the log row
struct Decision {
    verdict: Verdict,
    key_id: Option<String>,
}

impl Decision {
    fn deny(reason: DenyReason) -> Self {
        Self {
            verdict: Verdict::Deny(reason),
            key_id: None,
        }
    }

    fn deny_with_key(reason: DenyReason, key: &ScriptKey) -> Self {
        Self {
            verdict: Verdict::Deny(reason),
            key_id: Some(key.id.clone()),
        }
    }
}

/// Key checks passed; grant carries this key id
enum KeyCheck {
    Passed(String),
    Denied(Decision),
}

pub struct AccessEngine {
    store: Arc<dyn RecordStore>,
    transform: Arc<dyn CodeTransform>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AccessEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transform: Arc<dyn CodeTransform>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            transform,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Decide one delivery and record it
    pub async fn deliver(&self, request: &DeliveryRequest) -> Verdict {
        let now = self.clock.now_utc();

        let decision = match self.decide(request, now).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!("Delivery of script {} failed: {}", request.script_id, e);
                Decision::deny(DenyReason::InternalError)
            }
        };

        match &decision.verdict {
            Verdict::Grant { .. } => {
                tracing::info!("Granted script {} to {}", request.script_id, request.client_ip)
            }
            Verdict::Deny(reason) => tracing::debug!(
                "Denied script {} to {}: {}",
                request.script_id,
                request.client_ip,
                reason
            ),
        }

        self.record(request, &decision, now).await;
        decision.verdict
    }

    async fn decide(
        &self,
        request: &DeliveryRequest,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        let script = match self.store.get_script(&request.script_id).await? {
            Some(script) if script.is_active => script,
            _ => return Ok(Decision::deny(DenyReason::ScriptNotFound)),
        };

        let mut blacklist_candidates: Vec<&str> = Vec::with_capacity(2);
        if let Some(hwid) = request.hwid() {
            blacklist_candidates.push(hwid);
        }
        if !request.client_ip.is_empty() && request.client_ip != UNKNOWN_ADDRESS {
            blacklist_candidates.push(&request.client_ip);
        }
        if !blacklist_candidates.is_empty()
            && self
                .store
                .blacklist_matches(&script.owner, &script.id, &blacklist_candidates)
                .await?
        {
            return Ok(Decision::deny(DenyReason::Blacklisted));
        }

        let key_id = match script.protection_mode {
            ProtectionMode::Keyless => None,
            ProtectionMode::Whitelist => {
                let candidates: Vec<&str> =
                    [request.hwid(), request.key()].into_iter().flatten().collect();
                if candidates.is_empty()
                    || !self.store.whitelist_contains(&script.id, &candidates).await?
                {
                    return Ok(Decision::deny(DenyReason::NotWhitelisted));
                }
                None
            }
            ProtectionMode::Key => match self.check_key(&script, request, now).await? {
                KeyCheck::Passed(id) => Some(id),
                KeyCheck::Denied(decision) => return Ok(decision),
            },
        };

        let code = self.select_payload(&script).await;
        Ok(Decision {
            verdict: Verdict::Grant {
                code,
                key_id: key_id.clone(),
            },
            key_id,
        })
    }

    async fn check_key(
        &self,
        script: &Script,
        request: &DeliveryRequest,
        now: DateTime<Utc>,
    ) -> Result<KeyCheck, StoreError> {
        let presented = match request.key() {
            Some(k) if k != KEYLESS_SENTINEL => k,
            _ => return Ok(KeyCheck::Denied(Decision::deny(DenyReason::KeyRequired))),
        };

        let key = match self.store.find_active_key(&script.id, presented).await? {
            Some(key) => key,
            None => return Ok(KeyCheck::Denied(Decision::deny(DenyReason::InvalidKey))),
        };

        if key.is_expired(now) {
            return Ok(KeyCheck::Denied(Decision::deny_with_key(DenyReason::KeyExpired, &key)));
        }
        if key.uses_exhausted() {
            return Ok(KeyCheck::Denied(Decision::deny_with_key(
                DenyReason::MaxUsesReached,
                &key,
            )));
        }

        if key.hwid_lock_enabled {
            let hwid = match request.hwid() {
                Some(h) => h,
                None => {
                    return Ok(KeyCheck::Denied(Decision::deny_with_key(
                        DenyReason::HwidRequired,
                        &key,
                    )))
                }
            };
            match key.hwid_locked.as_deref() {
                Some(bound) if bound != hwid => {
                    return Ok(KeyCheck::Denied(Decision::deny_with_key(
                        DenyReason::HwidMismatch,
                        &key,
                    )));
                }
                Some(_) => {}
                None => {
                    // A concurrent first use may have bound another device
                    if let HwidBinding::AlreadyBound(bound) =
                        self.store.bind_hwid(&key.id, hwid).await?
                    {
                        if bound != hwid {
                            return Ok(KeyCheck::Denied(Decision::deny_with_key(
                                DenyReason::HwidMismatch,
                                &key,
                            )));
                        }
                    }
                }
            }
        }

        match self.store.consume_use(&key.id, now).await? {
            UseOutcome::Consumed(_) => Ok(KeyCheck::Passed(key.id)),
            UseOutcome::LimitReached => Ok(KeyCheck::Denied(Decision::deny_with_key(
                DenyReason::MaxUsesReached,
                &key,
            ))),
            UseOutcome::Unavailable => Ok(KeyCheck::Denied(Decision::deny_with_key(
                DenyReason::InvalidKey,
                &key,
            ))),
        }
    }

    /// Precomputed text if present, otherwise transform now
    async fn select_payload(&self, script: &Script) -> String {
        if let Some(code) = script.obfuscated_code.as_deref().filter(|c| !c.is_empty()) {
            return code.to_string();
        }
        let output = self
            .transform
            .transform(&script.original_code, &script.transform_options())
            .await;
        if output.fallback {
            tracing::debug!("Script {} served with the local transform", script.id);
        }
        output.code
    }

    async fn record(&self, request: &DeliveryRequest, decision: &Decision, now: DateTime<Utc>) {
        let success = decision.verdict.is_grant();
        let mut log = ExecutionLog::new(&request.script_id, success, now);
        log.key_id = decision.key_id.clone();
        log.executor_ip = Some(request.client_ip.clone());
        log.executor_hwid = request.hwid().map(str::to_string);
        log.user_agent = request.user_agent.clone();
        if let Verdict::Deny(reason) = &decision.verdict {
            log.error_message = Some(reason.as_str().to_string());
        }

        if let Err(e) = self.store.append_log(log).await {
            tracing::error!("Failed to record execution of {}: {}", request.script_id, e);
        }
    }

    /// Check a fingerprint against a key of an active script, binding it on
    /// first use.
    ///
    /// Does not consume a use and writes no log row.
    pub async fn verify(&self, script_id: &str, key: &str, hwid: &str) -> VerifyOutcome {
        match self.try_verify(script_id, key, hwid).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Verify against script {} failed: {}", script_id, e);
                VerifyOutcome::Invalid
            }
        }
    }

    async fn try_verify(
        &self,
        script_id: &str,
        key: &str,
        hwid: &str,
    ) -> Result<VerifyOutcome, StoreError> {
        if key.is_empty() || hwid.is_empty() {
            return Ok(VerifyOutcome::Invalid);
        }
        if !matches!(self.store.get_script(script_id).await?, Some(script) if script.is_active) {
            return Ok(VerifyOutcome::Invalid);
        }
        let key = match self.store.find_active_key(script_id, key).await? {
            Some(key) if !key.is_expired(self.clock.now_utc()) => key,
            _ => return Ok(VerifyOutcome::Invalid),
        };
        if !key.hwid_lock_enabled {
            return Ok(VerifyOutcome::Ok);
        }

        let bound = match key.hwid_locked {
            Some(bound) => bound,
            None => match self.store.bind_hwid(&key.id, hwid).await? {
                HwidBinding::Bound => return Ok(VerifyOutcome::Ok),
                HwidBinding::AlreadyBound(bound) => bound,
            },
        };
        Ok(if bound == hwid {
            VerifyOutcome::Ok
        } else {
            VerifyOutcome::Locked
        })
    }

    /// Best-effort fingerprint backfill of the caller's latest log row
    pub async fn report(&self, script_id: &str, client_ip: &str, hwid: &str) {
        if hwid.is_empty() {
            return;
        }
        match self.store.backfill_hwid(script_id, client_ip, hwid).await {
            Ok(true) => tracing::debug!("Backfilled fingerprint for script {}", script_id),
            Ok(false) => tracing::debug!("No log row to backfill for script {}", script_id),
            Err(e) => tracing::debug!("Fingerprint backfill for {} failed: {}", script_id, e),
        }
    }
}
