//! Whitelist and blacklist entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an identifier value denotes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// Numeric Roblox account id
    RobloxId,
    /// Roblox account name
    Username,
    /// Device fingerprint
    #[default]
    Hwid,
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKind::RobloxId => write!(f, "roblox_id"),
            IdentifierKind::Username => write!(f, "username"),
            IdentifierKind::Hwid => write!(f, "hwid"),
        }
    }
}

/// Grants access under whitelist mode (`script_whitelist` collection)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhitelistEntry {
    pub id: String,
    pub script_id: String,
    pub identifier: String,
    pub identifier_type: IdentifierKind,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl WhitelistEntry {
    pub fn new(
        script_id: impl Into<String>,
        identifier: impl Into<String>,
        identifier_type: IdentifierKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            script_id: script_id.into(),
            identifier: identifier.into(),
            identifier_type,
            is_active: true,
            note: None,
            created_at: now,
        }
    }
}

/// Vetoes access for an identifier (`user_blacklist` collection)
///
/// A global entry applies to every script owned by `created_by`; otherwise it
/// applies only to `script_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlacklistEntry {
    pub id: String,
    /// Owner who created the entry
    pub created_by: String,
    pub identifier: String,
    pub identifier_type: IdentifierKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub script_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BlacklistEntry {
    /// Entry covering all of `owner`'s scripts
    pub fn global(
        owner: impl Into<String>,
        identifier: impl Into<String>,
        identifier_type: IdentifierKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_by: owner.into(),
            identifier: identifier.into(),
            identifier_type,
            reason: None,
            is_global: true,
            script_id: None,
            created_at: now,
        }
    }

    /// Entry covering a single script
    pub fn scoped(
        owner: impl Into<String>,
        script_id: impl Into<String>,
        identifier: impl Into<String>,
        identifier_type: IdentifierKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_by: owner.into(),
            identifier: identifier.into(),
            identifier_type,
            reason: None,
            is_global: false,
            script_id: Some(script_id.into()),
            created_at: now,
        }
    }

    /// Whether this entry covers `script_id` owned by `owner`
    pub fn applies_to(&self, owner: &str, script_id: &str) -> bool {
        if self.is_global {
            self.created_by == owner
        } else {
            self.script_id.as_deref() == Some(script_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_kind_wire_names() {
        let kind: IdentifierKind = serde_json::from_str("\"roblox_id\"").unwrap();
        assert_eq!(kind, IdentifierKind::RobloxId);
        assert_eq!(IdentifierKind::Username.to_string(), "username");
    }

    #[test]
    fn test_blacklist_scope() {
        let now = Utc::now();
        let global = BlacklistEntry::global("owner-a", "BAD1", IdentifierKind::Hwid, now);
        assert!(global.applies_to("owner-a", "any-script"));
        assert!(!global.applies_to("owner-b", "any-script"));

        let scoped = BlacklistEntry::scoped("owner-a", "s1", "BAD1", IdentifierKind::Hwid, now);
        assert!(scoped.applies_to("owner-a", "s1"));
        assert!(!scoped.applies_to("owner-a", "s2"));
    }
}
