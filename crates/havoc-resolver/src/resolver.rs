//! The resolution engine.
//!
//! Resolution is a randomized depth-first walk: each requested module
//! selects vulnerability variants, every capability those variants
//! require is bound to a providing module (loading new modules from
//! the catalog as needed), and restrictions flow onto providers so
//! their own selections stay compatible. Conflicts trigger targeted
//! backtracking (exclude a variant, try another provider) or, when two
//! committed parents disagree over a shared provider, a negate-and-
//! restart of the whole session.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use havoc_core::catalog::ModuleCatalog;
use havoc_core::difficulty::Difficulty;
use havoc_core::module::Module;
use havoc_core::os::OsInfo;
use havoc_core::restriction::{DependencyRestriction, VersionRestriction};
use havoc_core::version::VersionRange;
use havoc_core::vuln::{DepChoice, Vulnerability};
use havoc_util::errors::HavocError;
use havoc_util::rng::HavocRng;

use crate::fault::{FaultKey, FaultReport};
use crate::graph::{CapabilityEdge, ModuleGraph, ModuleNode};
use crate::order::OrderContext;

/// Recursion ceiling for dependency chains.
pub const MAX_DEPTH: usize = 25;

/// Ceiling on whole-session restarts before resolution is abandoned.
/// The negate-and-restart heuristic is not guaranteed to converge.
const MAX_RESTARTS: usize = 100;

/// Result of one recursive resolution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The module and everything beneath it is committed.
    Resolved,
    /// The step cannot succeed under the current constraints.
    Failed,
    /// A committed selection was negated; the whole session must
    /// restart from the first module with processed state cleared.
    Restart,
}

/// One resolution session over a catalog. State is not reusable after
/// a failed resolve; construct a fresh resolver to retry.
pub struct Resolver<C: ModuleCatalog> {
    catalog: C,
    rng: HavocRng,
    /// Loaded modules by name. `None` is a tombstone for a module
    /// discarded during backtracking; purged between cursor steps.
    modules: HashMap<String, Option<Module>>,
    /// Insertion order of loaded modules, for deterministic iteration.
    load_order: Vec<String>,
    /// Child module to the parents that depend on it.
    parents: HashMap<String, Vec<String>>,
    /// (parent, child, capability) edges for the reported graph.
    edges: Vec<(String, String, String)>,
    /// Capability name to the module currently bound to provide it.
    provides: HashMap<String, String>,
    /// Variants committed per module.
    selected: HashMap<String, Vec<Vulnerability>>,
    /// Modules added by the caller, never auto-discarded.
    requested: Vec<String>,
    processed: Vec<String>,
    faults: FaultReport,
    difficulty: Option<Difficulty>,
    os_info: Option<OsInfo>,
    resolved: bool,
}

impl<C: ModuleCatalog> Resolver<C> {
    pub fn new(catalog: C) -> Self {
        Self::with_rng(catalog, HavocRng::new())
    }

    /// A resolver with injected randomness, for reproducible runs.
    pub fn with_rng(catalog: C, rng: HavocRng) -> Self {
        Self {
            catalog,
            rng,
            modules: HashMap::new(),
            load_order: Vec::new(),
            parents: HashMap::new(),
            edges: Vec::new(),
            provides: HashMap::new(),
            selected: HashMap::new(),
            requested: Vec::new(),
            processed: Vec::new(),
            faults: FaultReport::new(),
            difficulty: None,
            os_info: None,
            resolved: false,
        }
    }

    /// Difficulty ceiling applied to every module in the session.
    pub fn set_difficulty(&mut self, limit: Option<Difficulty>) {
        self.difficulty = limit;
        for module in self.modules.values_mut().flatten() {
            module.set_difficulty_limit(limit);
        }
    }

    /// Target-system identity applied to every module in the session.
    pub fn set_os_info(&mut self, info: OsInfo) {
        for module in self.modules.values_mut().flatten() {
            module.set_os_info(info.clone());
        }
        self.os_info = Some(info);
    }

    /// Request a module from the catalog as a resolution root.
    pub fn add_module(&mut self, name: &str) -> Result<(), HavocError> {
        self.add_module_forced(name, &[])
    }

    /// Request a module with its variant selection pinned to `forced`.
    pub fn add_module_forced(&mut self, name: &str, forced: &[String]) -> Result<(), HavocError> {
        let module = self.catalog.load(name)?;
        debug!(module = name, "adding requested module");
        self.add_module_instance(module, forced);
        Ok(())
    }

    /// Register an already-built module as a resolution root.
    pub fn add_module_instance(&mut self, module: Module, forced: &[String]) {
        let name = module.name().to_string();
        self.insert_module(module);
        if !self.requested.contains(&name) {
            self.requested.push(name.clone());
        }
        if !forced.is_empty() {
            if let Some(Some(module)) = self.modules.get_mut(&name) {
                module.set_forced(forced, &mut self.rng);
            }
        }
    }

    fn insert_module(&mut self, mut module: Module) {
        module.set_difficulty_limit(self.difficulty);
        if let Some(info) = &self.os_info {
            module.set_os_info(info.clone());
        }
        let name = module.name().to_string();
        if !self.load_order.contains(&name) {
            self.load_order.push(name.clone());
        }
        self.modules.insert(name, Some(module));
    }

    /// Names of modules currently live in the session.
    fn live_modules(&self) -> Vec<String> {
        self.load_order
            .iter()
            .filter(|name| matches!(self.modules.get(*name), Some(Some(_))))
            .cloned()
            .collect()
    }

    /// Run the resolution to completion.
    ///
    /// On failure the fault report names the modules and capabilities
    /// that blocked it; the session is not reusable afterwards.
    pub fn resolve(&mut self) -> Result<(), HavocError> {
        if self.load_order.is_empty() {
            return Err(HavocError::Resolution {
                message: "no modules added".to_string(),
            });
        }

        let mut pos = 0;
        let mut restarts = 0;
        loop {
            let names = self.live_modules();
            if pos >= names.len() {
                self.faults.record(
                    FaultKey::Module(names.last().cloned().unwrap_or_default()),
                    "cursor ran past the loaded module list",
                );
                return Err(self.failure());
            }

            let before = names.len();
            let current = names[pos].clone();
            trace!(module = %current, position = pos, "resolving at cursor");

            let outcome = self.resolve_module(&current, 1, &[], &[]);
            self.purge_tombstones();
            let after = self.live_modules();

            match outcome {
                Outcome::Failed => return Err(self.failure()),
                Outcome::Restart => {
                    restarts += 1;
                    if restarts > MAX_RESTARTS {
                        self.faults.record(
                            FaultKey::Module(current),
                            "restart limit exceeded without converging",
                        );
                        return Err(self.failure());
                    }
                    debug!(restarts, "full restart");
                    // Bindings and edges are rebuilt from scratch;
                    // committed restrictions and exclusions survive so
                    // the negated selection is not repeated.
                    self.processed.clear();
                    self.provides.clear();
                    self.parents.clear();
                    self.edges.clear();
                    self.selected.clear();
                    pos = 0;
                }
                Outcome::Resolved => {
                    if after.len() != before {
                        // The module set changed underneath us.
                        pos = 0;
                    } else if self.processed.len() < after.len() {
                        pos += 1;
                    } else if after.iter().all(|name| self.processed.contains(name)) {
                        debug!(modules = after.len(), "resolution complete");
                        self.resolved = true;
                        return Ok(());
                    } else {
                        self.faults.record(
                            FaultKey::Module(current),
                            "processed count matches but modules remain unprocessed",
                        );
                        return Err(self.failure());
                    }
                }
            }
        }
    }

    fn failure(&self) -> HavocError {
        HavocError::Resolution {
            message: format!("resolution failed\n{}", self.faults),
        }
    }

    fn resolve_module(
        &mut self,
        name: &str,
        depth: usize,
        ver_restrictions: &[VersionRestriction],
        dep_restrictions: &[DependencyRestriction],
    ) -> Outcome {
        if depth + 1 >= MAX_DEPTH {
            self.faults
                .record(FaultKey::Module(name.to_string()), "maximum dependency depth exceeded");
            return Outcome::Failed;
        }

        // Inherited restrictions attach before anything else so the
        // selection below already honors them.
        if let Some(Some(module)) = self.modules.get_mut(name) {
            for restriction in ver_restrictions {
                if module.has_provides(restriction.provides()) {
                    module.add_version_restriction(restriction.clone());
                }
            }
            for restriction in dep_restrictions {
                module.add_dependency_restriction(restriction.clone());
            }
        } else {
            self.faults
                .record(FaultKey::Module(name.to_string()), "module vanished during resolution");
            return Outcome::Failed;
        }

        if self.processed.iter().any(|n| n == name) {
            trace!(module = name, depth, "already processed");
            return Outcome::Resolved;
        }

        loop {
            let vulns = match self.modules.get_mut(name) {
                Some(Some(module)) => module.select_vulnerabilities(true, &mut self.rng),
                _ => return Outcome::Failed,
            };

            if vulns.is_empty() {
                // Providers being probed fail over to another module;
                // only a root running dry is worth reporting.
                if depth == 1 {
                    self.faults.record(
                        FaultKey::Module(name.to_string()),
                        "no valid vulnerabilities remain",
                    );
                }
                debug!(module = name, depth, "candidate pool exhausted");
                return Outcome::Failed;
            }

            debug!(
                module = name,
                depth,
                selected = vulns.len(),
                "selected vulnerabilities"
            );
            self.selected.insert(name.to_string(), vulns.clone());

            let mut all_ok = true;
            for vuln in &vulns {
                match self.resolve_vuln(name, depth, vuln, ver_restrictions, dep_restrictions) {
                    Outcome::Resolved => {}
                    Outcome::Restart => return Outcome::Restart,
                    Outcome::Failed => {
                        trace!(module = name, vuln = vuln.name(), "excluding failed vulnerability");
                        if let Some(Some(module)) = self.modules.get_mut(name) {
                            module.add_exclusion(vuln.name().to_string());
                        }
                        all_ok = false;
                    }
                }
            }

            if all_ok {
                self.processed.push(name.to_string());
                return Outcome::Resolved;
            }
            trace!(module = name, "retrying selection after failures");
        }
    }

    fn resolve_vuln(
        &mut self,
        parent: &str,
        depth: usize,
        vuln: &Vulnerability,
        ver_restrictions: &[VersionRestriction],
        dep_restrictions: &[DependencyRestriction],
    ) -> Outcome {
        for dep in vuln.dependencies() {
            let mut failed_caps: Vec<String> = Vec::new();

            'dependency: loop {
                let working: Vec<DepChoice> = dep
                    .choices()
                    .iter()
                    .filter(|c| !failed_caps.iter().any(|f| f == c.provides()))
                    .cloned()
                    .collect();
                if working.is_empty() {
                    return Outcome::Failed;
                }

                // Prefer a capability already bound in this session.
                let choice = working
                    .iter()
                    .find(|c| self.provides.contains_key(c.provides()))
                    .cloned()
                    .unwrap_or_else(|| {
                        if dep.is_or() {
                            self.rng
                                .pick(&working)
                                .cloned()
                                .unwrap_or_else(|| working[0].clone())
                        } else {
                            working[0].clone()
                        }
                    });
                let cap = choice.provides().to_string();
                let range = choice.range().clone();
                trace!(module = parent, capability = %cap, range = %range, "resolving dependency");

                if let Some(provider) = self.provides.get(&cap).cloned() {
                    match self.bind_existing(parent, depth, vuln, &provider, &cap, &range) {
                        Outcome::Resolved => break 'dependency,
                        other => return other,
                    }
                }

                // No binding yet: hunt the catalog for a provider.
                let mut failed_modules: Vec<String> = Vec::new();
                loop {
                    let Some(provider) = self.load_provider(&cap, &range, &failed_modules) else {
                        if dep.is_or() {
                            failed_caps.push(cap.clone());
                            continue 'dependency;
                        }
                        self.faults.record(
                            FaultKey::Capability(cap.clone()),
                            format!("no module provides '{cap}' within {range}"),
                        );
                        return Outcome::Failed;
                    };

                    self.add_parent(parent, &provider, &cap);
                    let inherited_deps = {
                        let mut list = dep_restrictions.to_vec();
                        if let Some(Some(module)) = self.modules.get(parent) {
                            list.extend(module.dependency_restrictions().iter().cloned());
                        }
                        list
                    };
                    if let Some(Some(module)) = self.modules.get_mut(&provider) {
                        module.add_version_restriction(VersionRestriction::new(
                            cap.clone(),
                            range.clone(),
                        ));
                    }

                    match self.resolve_module(&provider, depth + 1, ver_restrictions, &inherited_deps)
                    {
                        Outcome::Resolved => {
                            debug!(module = parent, provider = %provider, capability = %cap, "bound provider");
                            break 'dependency;
                        }
                        Outcome::Restart => return Outcome::Restart,
                        Outcome::Failed => {
                            warn!(provider = %provider, capability = %cap, "provider failed to resolve");
                            if !failed_modules.contains(&provider) {
                                failed_modules.push(provider.clone());
                            }
                            self.remove_subtree(&provider);
                            if let Some(Some(module)) = self.modules.get_mut(&provider) {
                                module.clear_restrictions();
                            }
                        }
                    }
                }
            }
        }
        Outcome::Resolved
    }

    /// A provider for `cap` is already bound; make sure it satisfies
    /// this requirement too.
    fn bind_existing(
        &mut self,
        parent: &str,
        depth: usize,
        vuln: &Vulnerability,
        provider: &str,
        cap: &str,
        range: &VersionRange,
    ) -> Outcome {
        if self.in_ancestor_path(parent, provider) {
            self.faults.record(
                FaultKey::Module(parent.to_string()),
                format!("circular dependency through '{provider}'"),
            );
            return Outcome::Failed;
        }

        if !self.processed.iter().any(|n| n == provider) {
            self.faults.record(
                FaultKey::Module(provider.to_string()),
                format!("'{cap}' is bound but its provider was never resolved"),
            );
            return Outcome::Failed;
        }

        // Probe with temporary restrictions first; nothing commits
        // unless the provider's current selection survives.
        let still_valid = match self.modules.get_mut(provider) {
            Some(Some(module)) => {
                module.add_temp_version_restriction(VersionRestriction::new(
                    cap.to_string(),
                    range.clone(),
                ));
                for dep in vuln.dependencies() {
                    for choice in dep.choices() {
                        if choice.provides() == cap {
                            module.add_temp_dependency_restriction(DependencyRestriction::new(
                                cap.to_string(),
                                choice.range().clone(),
                            ));
                        }
                    }
                }
                module.still_valid()
            }
            _ => return Outcome::Failed,
        };

        if still_valid {
            if let Some(Some(module)) = self.modules.get_mut(provider) {
                module.commit_temp_restrictions();
            }
            self.add_parent(parent, provider, cap);
            return Outcome::Resolved;
        }

        debug!(provider, capability = cap, "bound provider invalidated by new restriction");

        if !self.has_other_parents(provider, parent) {
            // Sole dependent: commit the restriction, drop the
            // provider's subtree and resolve it again from scratch.
            if let Some(Some(module)) = self.modules.get_mut(provider) {
                module.commit_temp_restrictions();
            }
            self.detach_children(provider);
            self.processed.retain(|n| n != provider);
            self.add_parent(parent, provider, cap);
            return match self.resolve_module(provider, depth + 1, &[], &[]) {
                Outcome::Resolved => Outcome::Resolved,
                other => other,
            };
        }

        // Multiple committed parents disagree. Negate one side at
        // random and restart the session; best effort, not complete.
        if let Some(Some(module)) = self.modules.get_mut(provider) {
            module.clear_temp_restrictions();
        }
        let mut candidates: Vec<String> = self
            .parents
            .get(provider)
            .cloned()
            .unwrap_or_default();
        candidates.push(parent.to_string());
        if let Some(chosen) = self.rng.pick(&candidates).cloned() {
            debug!(module = %chosen, "negating selections and restarting");
            if let Some(Some(module)) = self.modules.get_mut(&chosen) {
                module.negate_selections();
            }
        }
        Outcome::Restart
    }

    /// Find or load a live module able to provide `cap` within `range`,
    /// binding the capability on success. Already-loaded modules win
    /// over fresh catalog loads; fresh candidates are picked at random.
    fn load_provider(
        &mut self,
        cap: &str,
        range: &VersionRange,
        failed: &[String],
    ) -> Option<String> {
        let mut candidates = Vec::new();
        for name in self.catalog.list() {
            if failed.contains(&name) {
                continue;
            }
            if let Some(Some(module)) = self.modules.get(&name) {
                if module.can_provide(cap, range) {
                    self.provides.insert(cap.to_string(), name.clone());
                    return Some(name);
                }
                continue;
            }
            match self.catalog.load(&name) {
                Ok(module) => {
                    if module.can_provide(cap, range) {
                        candidates.push(module);
                    }
                }
                Err(e) => warn!(module = %name, error = %e, "skipping unloadable module"),
            }
        }

        let chosen = self.rng.pick(&candidates)?.name().to_string();
        let module = candidates.into_iter().find(|m| m.name() == chosen)?;
        self.provides.insert(cap.to_string(), chosen.clone());
        self.insert_module(module);
        debug!(module = %chosen, capability = cap, "loaded provider from catalog");
        Some(chosen)
    }

    fn add_parent(&mut self, parent: &str, child: &str, cap: &str) {
        let entry = self.parents.entry(child.to_string()).or_default();
        if !entry.iter().any(|p| p == parent) {
            entry.push(parent.to_string());
        }
        let edge = (parent.to_string(), child.to_string(), cap.to_string());
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    fn has_other_parents(&self, child: &str, besides: &str) -> bool {
        self.parents
            .get(child)
            .map_or(false, |ps| ps.iter().any(|p| p != besides))
    }

    /// Whether `search` lies on the ancestor path of `start`.
    fn in_ancestor_path(&self, start: &str, search: &str) -> bool {
        let mut stack: Vec<&str> = match self.parents.get(start) {
            Some(ps) => ps.iter().map(String::as_str).collect(),
            None => return false,
        };
        let mut visited: Vec<&str> = vec![start];
        while let Some(current) = stack.pop() {
            if current == search {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            if let Some(ps) = self.parents.get(current) {
                stack.extend(ps.iter().map(String::as_str));
            }
        }
        false
    }

    /// Drop a module from the session: unprocess it, tombstone it
    /// unless the caller requested it, unbind its capabilities and
    /// recursively drop children left with no other parent.
    fn remove_subtree(&mut self, name: &str) {
        trace!(module = name, "removing subtree");
        self.processed.retain(|n| n != name);
        self.selected.remove(name);
        self.provides.retain(|_, provider| provider != name);
        if !self.requested.iter().any(|n| n == name) {
            if let Some(slot) = self.modules.get_mut(name) {
                *slot = None;
            }
        }
        self.detach_children(name);
    }

    /// Detach every child edge of `name`, removing children for which
    /// it was the sole resolving path.
    fn detach_children(&mut self, name: &str) {
        let children: Vec<String> = self
            .parents
            .iter()
            .filter(|(_, ps)| ps.iter().any(|p| p == name))
            .map(|(child, _)| child.clone())
            .collect();
        for child in children {
            let orphaned = match self.parents.get_mut(&child) {
                Some(ps) => {
                    ps.retain(|p| p != name);
                    ps.is_empty()
                }
                None => false,
            };
            self.edges
                .retain(|(p, c, _)| !(p == name && c == &child));
            if orphaned && !self.requested.iter().any(|n| n == &child) {
                self.remove_subtree(&child);
            }
        }
    }

    /// Drop tombstoned entries from every map between cursor steps.
    fn purge_tombstones(&mut self) {
        let dead: Vec<String> = self
            .modules
            .iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in dead {
            trace!(module = %name, "purging tombstone");
            self.modules.remove(&name);
            self.load_order.retain(|n| n != &name);
            self.parents.remove(&name);
            self.edges.retain(|(p, c, _)| p != &name && c != &name);
        }
    }

    /// The linear install order, children before parents, command
    /// modifiers before command users. Valid only after a successful
    /// [`resolve`](Self::resolve).
    pub fn install_order(&mut self) -> Result<Vec<String>, HavocError> {
        if !self.resolved {
            return Err(HavocError::Resolution {
                message: "install order requested before a successful resolve".to_string(),
            });
        }

        let live = self.live_modules();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for (parent, child, _) in &self.edges {
            let entry = children.entry(parent.clone()).or_default();
            if !entry.contains(child) {
                entry.push(child.clone());
            }
        }

        let mut used: HashMap<String, Vec<String>> = HashMap::new();
        let mut modified: HashMap<String, Vec<String>> = HashMap::new();
        for name in &live {
            if let Some(vulns) = self.selected.get(name) {
                let u = used.entry(name.clone()).or_default();
                let m = modified.entry(name.clone()).or_default();
                for vuln in vulns {
                    u.extend(vuln.cmd_uses().iter().cloned());
                    m.extend(vuln.cmd_modifies().iter().cloned());
                }
            }
        }

        let roots: Vec<String> = live
            .iter()
            .filter(|name| {
                self.parents
                    .get(*name)
                    .map_or(true, |ps| ps.is_empty())
            })
            .cloned()
            .collect();

        let order = {
            let ctx = OrderContext::new(&children, &used, &modified);
            ctx.order(&roots)
        };
        match order {
            Ok(order) => Ok(order),
            Err(collision) => {
                self.faults.record(
                    FaultKey::Module(collision.second.clone()),
                    format!(
                        "ordering collision with '{}' over commands [{}]",
                        collision.first,
                        collision.commands.join(", ")
                    ),
                );
                Err(self.failure())
            }
        }
    }

    /// Order-preserving lookup of resolved modules by name.
    pub fn install_modules(&self, names: &[String]) -> Vec<&Module> {
        names
            .iter()
            .filter_map(|name| match self.modules.get(name) {
                Some(Some(module)) => Some(module),
                _ => None,
            })
            .collect()
    }

    /// The resolved dependency graph with capability-labeled edges.
    pub fn dependency_graph(&self) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for name in self.live_modules() {
            let vulnerabilities = self
                .selected
                .get(&name)
                .map(|vulns| vulns.iter().map(|v| v.name().to_string()).collect())
                .unwrap_or_default();
            graph.add_node(ModuleNode {
                name,
                vulnerabilities,
            });
        }
        for (parent, child, cap) in &self.edges {
            if let (Some(from), Some(to)) = (graph.find(parent), graph.find(child)) {
                graph.add_edge(
                    from,
                    to,
                    CapabilityEdge {
                        provides: cap.clone(),
                    },
                );
            }
        }
        graph
    }

    /// Variants committed for a module by the last resolution.
    pub fn selected_vulnerabilities(&self, name: &str) -> Option<&[Vulnerability]> {
        self.selected.get(name).map(Vec::as_slice)
    }

    pub fn faults(&self) -> &FaultReport {
        &self.faults
    }
}
