//! Randomized constraint resolver for vulnerability modules.
//!
//! Given a catalog of modules, the resolver picks vulnerability
//! variants for each requested module, walks their capability
//! requirements to pull in providers, propagates version restrictions
//! both ways, and finally orders the surviving modules so that anything
//! modifying a command runs before anything relying on it.

pub mod fault;
pub mod graph;
pub mod resolver;

mod order;

pub use fault::{Fault, FaultKey, FaultReport};
pub use graph::{ModuleGraph, ModuleNode};
pub use resolver::{Outcome, Resolver};
