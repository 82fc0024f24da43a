//! Script records
//!
//! A script is the unit of delivery: the owner's original Lua source, its
//! pre-computed transformed text, and the protection mode that governs who
//! may receive it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which access check governs delivery of a script
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionMode {
    /// Caller must present a valid key
    #[default]
    Key,

    /// Caller's fingerprint (or key field) must be on the script's whitelist
    Whitelist,

    /// Anyone not blacklisted may load the script
    Keyless,
}

impl std::fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionMode::Key => write!(f, "key"),
            ProtectionMode::Whitelist => write!(f, "whitelist"),
            ProtectionMode::Keyless => write!(f, "keyless"),
        }
    }
}

/// Protection toggles handed to the transform.
///
/// These are informational: the decision engine never enforces them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformOptions {
    #[serde(default = "default_true")]
    pub anti_tamper: bool,
    #[serde(default = "default_true")]
    pub anti_dump: bool,
    #[serde(default = "default_true")]
    pub anti_hook: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            anti_tamper: true,
            anti_dump: true,
            anti_hook: true,
        }
    }
}

impl TransformOptions {
    /// All toggles off
    pub fn none() -> Self {
        Self {
            anti_tamper: false,
            anti_dump: false,
            anti_hook: false,
        }
    }
}

/// A hosted script (`scripts` collection)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Script {
    pub id: String,

    /// Owning account id
    #[serde(rename = "user_id")]
    pub owner: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Source text as written by the owner
    pub original_code: String,

    /// Transformed text computed when the source was last saved
    #[serde(default)]
    pub obfuscated_code: Option<String>,

    pub protection_mode: ProtectionMode,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub is_premium: bool,

    /// Bumped exactly once per source-affecting update
    #[serde(default = "default_version")]
    pub version: i64,

    #[serde(default = "default_true")]
    pub anti_tamper: bool,
    #[serde(default = "default_true")]
    pub anti_dump: bool,
    #[serde(default = "default_true")]
    pub anti_hook: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> i64 {
    1
}

impl Script {
    /// Create a fresh, active script at version 1
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        original_code: impl Into<String>,
        protection_mode: ProtectionMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            name: name.into(),
            description: None,
            original_code: original_code.into(),
            obfuscated_code: None,
            protection_mode,
            is_active: true,
            is_premium: false,
            version: 1,
            anti_tamper: true,
            anti_dump: true,
            anti_hook: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            anti_tamper: self.anti_tamper,
            anti_dump: self.anti_dump,
            anti_hook: self.anti_hook,
        }
    }

    pub fn set_transform_options(&mut self, options: TransformOptions) {
        self.anti_tamper = options.anti_tamper;
        self.anti_dump = options.anti_dump;
        self.anti_hook = options.anti_hook;
    }
}
