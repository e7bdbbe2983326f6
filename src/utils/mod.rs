//! Shared helpers for the binary and the services.

pub mod bootstrap;
pub mod retry;
