//! # neo-tests
//!
//! Integration tests for the NEO Rust Node.
//!
//! This crate provides cross-crate testing including:
//! - Sync scenarios against scripted in-memory peers
//! - Connection pool admission and replacement
//! - End-to-end sync over TCP against a scripted remote node
//! - Property-based tests for selection and bookkeeping invariants

pub mod generators;
pub mod harness;

#[cfg(test)]
mod sync_tests;


#[cfg(test)]
mod network_tests;

#[cfg(test)]
mod api_tests;

#[cfg(test)]
mod property_tests;

pub use generators::*;
pub use harness::*;
