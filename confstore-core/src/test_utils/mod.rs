//! Test utilities shared by unit and integration tests
//!
//! Deterministic accounts, signed transactions, sample records and
//! ready-to-start engines wired over an in-process transport.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
