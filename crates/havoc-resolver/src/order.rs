//! Install ordering for resolved modules.
//!
//! Providers install before the modules that pulled them in, and a
//! module that modifies a command installs before any sibling whose
//! subtree uses that command. Within a sibling group each module lands
//! after every placed sibling whose subtree modifies something it uses
//! and before the first placed sibling that uses something it
//! modifies; when those two bounds cross, ordering fails.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::trace;

/// Two modules whose command constraints point in opposite directions.
#[derive(Debug, Clone)]
pub(crate) struct OrderingCollision {
    pub first: String,
    pub second: String,
    pub commands: Vec<String>,
}

/// Aggregate command footprint of a module's whole subtree.
#[derive(Debug, Clone, Default)]
struct Footprint {
    used: BTreeSet<String>,
    modified: BTreeSet<String>,
}

pub(crate) struct OrderContext<'a> {
    /// Module name to the providers it pulled in.
    children: &'a HashMap<String, Vec<String>>,
    /// Per-module commands used by its selected vulnerabilities.
    used: &'a HashMap<String, Vec<String>>,
    /// Per-module commands modified by its selected vulnerabilities.
    modified: &'a HashMap<String, Vec<String>>,
}

impl<'a> OrderContext<'a> {
    pub fn new(
        children: &'a HashMap<String, Vec<String>>,
        used: &'a HashMap<String, Vec<String>>,
        modified: &'a HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            children,
            used,
            modified,
        }
    }

    /// Produce the install order for the given roots, children before
    /// parents, each module exactly once.
    pub fn order(&self, roots: &[String]) -> Result<Vec<String>, OrderingCollision> {
        let mut footprints = HashMap::new();
        let mut out = Vec::new();
        let mut emitted = HashSet::new();
        self.order_level(roots, &mut footprints, &mut out, &mut emitted)?;
        Ok(out)
    }

    fn order_level(
        &self,
        siblings: &[String],
        footprints: &mut HashMap<String, Footprint>,
        out: &mut Vec<String>,
        emitted: &mut HashSet<String>,
    ) -> Result<(), OrderingCollision> {
        let placed = self.place_siblings(siblings, footprints)?;
        for name in placed {
            if emitted.contains(&name) {
                continue;
            }
            if let Some(children) = self.children.get(&name) {
                if !children.is_empty() {
                    self.order_level(children, footprints, out, emitted)?;
                }
            }
            // A child level may have emitted this module already.
            if emitted.insert(name.clone()) {
                out.push(name);
            }
        }
        Ok(())
    }

    /// Order one sibling group by command constraints.
    ///
    /// Each module must land after every placed sibling whose subtree
    /// modifies a command it uses (lower bound) and before the first
    /// placed sibling whose subtree uses a command it modifies (upper
    /// bound). Crossing bounds cannot be satisfied.
    fn place_siblings(
        &self,
        siblings: &[String],
        footprints: &mut HashMap<String, Footprint>,
    ) -> Result<Vec<String>, OrderingCollision> {
        let mut placed: Vec<String> = Vec::with_capacity(siblings.len());
        for name in siblings {
            if placed.contains(name) {
                continue;
            }
            let footprint = self.footprint(name, footprints);

            let mut lower = 0;
            let mut upper = placed.len();
            for (i, other) in placed.iter().enumerate() {
                let other_fp = &footprints[other];
                if other_fp.modified.intersection(&footprint.used).next().is_some() {
                    lower = i + 1;
                }
                if i < upper
                    && other_fp.used.intersection(&footprint.modified).next().is_some()
                {
                    upper = i;
                }
            }

            if lower > upper {
                let blocker = &placed[upper];
                let clash: Vec<String> = footprints[blocker]
                    .used
                    .intersection(&footprint.modified)
                    .cloned()
                    .collect();
                return Err(OrderingCollision {
                    first: blocker.clone(),
                    second: name.clone(),
                    commands: clash,
                });
            }

            trace!(module = %name, position = upper, "placing module");
            placed.insert(upper, name.clone());
        }
        Ok(placed)
    }

    /// Compute (and cache) the aggregate footprint of a subtree.
    fn footprint(&self, name: &str, footprints: &mut HashMap<String, Footprint>) -> Footprint {
        if let Some(fp) = footprints.get(name) {
            return fp.clone();
        }
        let mut stack = vec![name.to_string()];
        let mut visited = HashSet::new();
        let mut fp = Footprint::default();
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(used) = self.used.get(&current) {
                fp.used.extend(used.iter().cloned());
            }
            if let Some(modified) = self.modified.get(&current) {
                fp.modified.extend(modified.iter().cloned());
            }
            if let Some(children) = self.children.get(&current) {
                stack.extend(children.iter().cloned());
            }
        }
        footprints.insert(name.to_string(), fp.clone());
        fp
    }
}
