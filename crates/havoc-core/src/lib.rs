//! Core data types for the Havoc machine builder.
//!
//! This crate defines the fundamental types that represent a Havoc
//! catalog: application versions and version ranges, vulnerabilities
//! with their capabilities and dependencies, restrictions, modules
//! with their selection state, OS matching, and the module catalog.
//!
//! Resolution logic lives in `havoc-resolver`; this crate is free of
//! any payload or system-mutation code.

pub mod catalog;
pub mod difficulty;
pub mod module;
pub mod os;
pub mod restriction;
pub mod version;
pub mod vuln;
