//! Fault collection for failed resolutions.
//!
//! When a resolution cannot be completed the resolver records which
//! module or capability it was stuck on and why. Only the first fault
//! per key is kept, so the report points at the original obstacle
//! rather than the cascade behind it.

use std::fmt;

/// What a fault is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKey {
    /// A named module that could not be resolved.
    Module(String),
    /// An abstract capability no module could provide.
    Capability(String),
}

impl fmt::Display for FaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKey::Module(name) => write!(f, "module '{name}'"),
            FaultKey::Capability(name) => write!(f, "capability '{name}'"),
        }
    }
}

/// A single recorded resolution failure.
#[derive(Debug, Clone)]
pub struct Fault {
    pub key: FaultKey,
    pub reason: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// All faults gathered over a resolution, first-per-key wins.
#[derive(Debug, Default)]
pub struct FaultReport {
    faults: Vec<Fault>,
}

impl FaultReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fault unless one already exists for the same key.
    pub fn record(&mut self, key: FaultKey, reason: impl Into<String>) {
        if self.faults.iter().any(|f| f.key == key) {
            return;
        }
        self.faults.push(Fault {
            key,
            reason: reason.into(),
        });
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn clear(&mut self) {
        self.faults.clear();
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.faults.is_empty() {
            return write!(f, "No resolution faults.");
        }
        writeln!(f, "Resolution faults ({}):", self.faults.len())?;
        for fault in &self.faults {
            writeln!(f, "  {fault}")?;
        }
        Ok(())
    }
}
