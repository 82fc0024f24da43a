//! Persisted record types
//!
//! Field names match the columns of the hosted record store so the same
//! types serialize straight into REST requests.

mod access;
mod key;
mod log;
mod script;

pub use access::*;
pub use key::*;
pub use log::*;
pub use script::*;
