//! Utility modules: token estimation, usage ledger, timeout.

pub mod timeout;
pub mod tokens;
pub mod usage;
