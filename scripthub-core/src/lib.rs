//! ScriptHub Core Library
//!
//! This crate provides the core functionality for ScriptHub:
//! - Script, key, access list and execution log records
//! - The record store seam with an in-memory implementation
//! - The access decision engine that gates script delivery
//! - Luau source transforms (local obfuscation and protected-call wrapping)
//! - Owner-scoped management console operations

pub mod clock;
pub mod console;
pub mod engine;
pub mod keygen;
pub mod obfuscator;
pub mod payload;
pub mod store;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use console::{
    Console, ConsoleError, ConsoleResult, NewBlacklistEntry, NewKey, NewScript,
    NewWhitelistEntry, OwnerOverview, ScriptStats, ScriptUpdate,
};
pub use engine::{
    AccessEngine, DeliveryRequest, DenyReason, EngineConfig, Verdict, VerifyOutcome,
    KEYLESS_SENTINEL, UNKNOWN_ADDRESS,
};
pub use obfuscator::{wrap_protected, LocalObfuscator, ObfuscationResult, ObfuscatorConfig};
pub use store::{MemoryStore, RecordStore, StoreError, StoreResult};
pub use transform::{CodeTransform, LocalTransform, TransformOutput};
pub use types::{
    BlacklistEntry, ExecutionLog, HwidBinding, IdentifierKind, ProtectionMode, Script, ScriptKey,
    TransformOptions, UseOutcome, WhitelistEntry,
};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
