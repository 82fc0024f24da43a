//! Source-to-source transform seam
//!
//! The engine and console only see [`CodeTransform`]. The server plugs in a
//! remote obfuscation client; everything falls back to [`LocalTransform`].

use async_trait::async_trait;

use crate::obfuscator::{wrap_protected, LocalObfuscator, ObfuscatorConfig};
use crate::types::TransformOptions;

/// Transformed text ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// Wrapped, transformed code
    pub code: String,
    /// True when the local fallback produced the code
    pub fallback: bool,
}

#[async_trait]
pub trait CodeTransform: Send + Sync {
    /// Transform `source`. Implementations must not fail: any remote error
    /// degrades to the local fallback, and the output is always wrapped.
    async fn transform(&self, source: &str, options: &TransformOptions) -> TransformOutput;
}

/// Local fallback transform: rename, add prologues, wrap
pub struct LocalTransform {
    obfuscator: LocalObfuscator,
    brand: String,
}

impl LocalTransform {
    pub fn new(config: ObfuscatorConfig, brand: impl Into<String>) -> Self {
        Self {
            obfuscator: LocalObfuscator::new(config),
            brand: brand.into(),
        }
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// Synchronous form, used by the CLI and the remote adapter's fallback
    pub fn apply(&self, source: &str, options: &TransformOptions) -> TransformOutput {
        let result = self.obfuscator.obfuscate(source, options);
        tracing::debug!(
            "Local transform applied {} rewrites ({} identifiers renamed)",
            result.total_transforms(),
            result.identifiers_renamed
        );
        TransformOutput {
            code: wrap_protected(&result.source, &self.brand),
            fallback: true,
        }
    }

    /// Wrap already-transformed text without touching it
    pub fn wrap(&self, code: &str) -> String {
        wrap_protected(code, &self.brand)
    }
}

#[async_trait]
impl CodeTransform for LocalTransform {
    async fn transform(&self, source: &str, options: &TransformOptions) -> TransformOutput {
        self.apply(source, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_transform_always_wraps() {
        let transform = LocalTransform::new(ObfuscatorConfig::default(), "ScriptHub");
        let output = transform
            .transform("local x = 1 print(x)", &TransformOptions::none())
            .await;

        assert!(output.fallback);
        assert!(output.code.starts_with("-- ScriptHub Protected\n"));
        assert!(output.code.contains("pcall(function()"));
        assert!(!output.code.contains("local x "));
    }
}
