//! Cucumber step definitions for interface tests.

pub mod phase;
pub mod settlement;
