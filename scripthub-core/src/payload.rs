//! Delivery body rendering
//!
//! The caller is a script runtime, so failures travel in-band: a denied
//! delivery is a short Lua chunk that prints the reason and returns.

use crate::engine::Verdict;

/// Body for a verdict: the code on grant, a diagnostic on deny
pub fn render(brand: &str, verdict: &Verdict) -> String {
    match verdict {
        Verdict::Grant { code, .. } => code.clone(),
        Verdict::Deny(reason) => diagnostic(brand, reason.as_str()),
    }
}

/// Diagnostic chunk carrying a human-readable message
pub fn diagnostic(brand: &str, message: &str) -> String {
    let escaped = message
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ");
    format!("-- {brand} Protection\nwarn(\"[{brand}] {escaped}\")\nreturn")
}
