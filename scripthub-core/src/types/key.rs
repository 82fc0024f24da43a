//! Script keys
//!
//! Keys grant timed and counted access to a script running under
//! [`ProtectionMode::Key`](super::ProtectionMode::Key). A key may be bound to
//! a single device fingerprint on first use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A key issued for one script (`script_keys` collection)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptKey {
    pub id: String,
    pub script_id: String,

    /// Opaque key string, unique within the owning script
    pub key_value: String,

    /// Revoked keys never grant access
    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub is_premium: bool,

    #[serde(default)]
    pub max_uses: Option<i64>,

    #[serde(default)]
    pub current_uses: i64,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub hwid_lock_enabled: bool,

    /// Device fingerprint bound on first locked use
    #[serde(default)]
    pub hwid_locked: Option<String>,

    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ScriptKey {
    pub fn new(script_id: impl Into<String>, key_value: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            script_id: script_id.into(),
            key_value: key_value.into(),
            is_active: true,
            is_premium: false,
            max_uses: None,
            current_uses: 0,
            expires_at: None,
            hwid_lock_enabled: false,
            hwid_locked: None,
            last_used_at: None,
            created_at: now,
        }
    }

    /// True once `expires_at` lies strictly before `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if expires < now)
    }

    /// True when a usage bound is set and already reached
    pub fn uses_exhausted(&self) -> bool {
        matches!(self.max_uses, Some(max) if self.current_uses >= max)
    }

    /// Uses left before the bound, `None` when unbounded
    pub fn remaining_uses(&self) -> Option<i64> {
        self.max_uses.map(|max| (max - self.current_uses).max(0))
    }
}

/// Outcome of a bind-if-unbound update on a key's device fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwidBinding {
    /// The key was unbound and now carries the presented fingerprint
    Bound,
    /// The key already carried a fingerprint, which is returned unchanged
    AlreadyBound(String),
}

/// Outcome of a consume-if-under-limit update on a key's usage counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseOutcome {
    /// Counter incremented; holds the new value
    Consumed(i64),
    /// `max_uses` already reached, nothing changed
    LimitReached,
    /// Key missing or revoked, nothing changed
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let mut key = ScriptKey::new("s", "SH-A", now);
        assert!(!key.is_expired(now));

        key.expires_at = Some(now);
        assert!(!key.is_expired(now));

        key.expires_at = Some(now - Duration::seconds(1));
        assert!(key.is_expired(now));
    }

    #[test]
    fn test_uses_exhausted() {
        let mut key = ScriptKey::new("s", "SH-A", Utc::now());
        assert!(!key.uses_exhausted());
        assert_eq!(key.remaining_uses(), None);

        key.max_uses = Some(1);
        assert!(!key.uses_exhausted());
        key.current_uses = 1;
        assert!(key.uses_exhausted());
        assert_eq!(key.remaining_uses(), Some(0));
    }
}
