//! Shared utilities for the Havoc machine builder.
//!
//! This crate provides the cross-cutting concerns used by the other
//! Havoc crates: the unified error type and the randomization helper
//! behind vulnerability selection and resolver tie-breaking.

pub mod errors;
pub mod rng;
