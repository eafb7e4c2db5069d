//! Modules: named catalog entries offering vulnerability variants.
//!
//! A module owns a set of [`Vulnerability`] candidates plus the local
//! selection state the resolver drives: restrictions (permanent and a
//! clearable temporary overlay), exclusions from failed attempts, a
//! forced-selection list, and the variants currently chosen to run.

use std::collections::BTreeMap;

use havoc_util::rng::HavocRng;
use tracing::trace;

use crate::difficulty::Difficulty;
use crate::os::OsInfo;
use crate::restriction::{DependencyRestriction, VersionRestriction};
use crate::version::VersionRange;
use crate::vuln::{Vulnerability, NONE_VULN};

#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    vulns: BTreeMap<String, Vulnerability>,
    multi_vuln: bool,
    difficulty_limit: Option<Difficulty>,
    os_info: Option<OsInfo>,
    version_restrictions: Vec<VersionRestriction>,
    dependency_restrictions: Vec<DependencyRestriction>,
    temp_version_restrictions: Vec<VersionRestriction>,
    temp_dependency_restrictions: Vec<DependencyRestriction>,
    excluded: Vec<String>,
    forced: Vec<String>,
    running: Vec<Vulnerability>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vulns: BTreeMap::new(),
            multi_vuln: false,
            difficulty_limit: None,
            os_info: None,
            version_restrictions: Vec::new(),
            dependency_restrictions: Vec::new(),
            temp_version_restrictions: Vec::new(),
            temp_dependency_restrictions: Vec::new(),
            excluded: Vec::new(),
            forced: Vec::new(),
            running: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a candidate variant. Re-registering a name replaces the
    /// earlier definition.
    pub fn add_vulnerability(&mut self, vuln: Vulnerability) {
        self.vulns.insert(vuln.name().to_string(), vuln);
    }

    pub fn vulnerability(&self, name: &str) -> Option<&Vulnerability> {
        self.vulns.get(name)
    }

    pub fn vulnerabilities(&self) -> impl Iterator<Item = &Vulnerability> {
        self.vulns.values()
    }

    /// Allow several variants to be selected and run together.
    pub fn set_multi_vuln(&mut self, multi: bool) {
        self.multi_vuln = multi;
    }

    pub fn multi_vuln(&self) -> bool {
        self.multi_vuln
    }

    /// Cap selection at the given tier; `None` lifts the cap.
    pub fn set_difficulty_limit(&mut self, limit: Option<Difficulty>) {
        self.difficulty_limit = limit;
    }

    pub fn difficulty_limit(&self) -> Option<Difficulty> {
        self.difficulty_limit
    }

    /// Target-system identity candidates are filtered against. Without
    /// one, OS support is not checked.
    pub fn set_os_info(&mut self, info: OsInfo) {
        self.os_info = Some(info);
    }

    /// Whether any candidate provides the named capability.
    pub fn has_provides(&self, provides: &str) -> bool {
        self.vulns.values().any(|v| v.provides() == Some(provides))
    }

    /// Whether any candidate sits at or below the given tier. Untagged
    /// candidates count at every tier.
    pub fn has_difficulty(&self, limit: Difficulty) -> bool {
        self.vulns
            .values()
            .any(|v| v.difficulty().map_or(true, |d| d <= limit))
    }

    pub fn add_version_restriction(&mut self, restriction: VersionRestriction) {
        if !self.version_restrictions.contains(&restriction) {
            self.version_restrictions.push(restriction);
        }
    }

    pub fn add_dependency_restriction(&mut self, restriction: DependencyRestriction) {
        if !self.dependency_restrictions.contains(&restriction) {
            self.dependency_restrictions.push(restriction);
        }
    }

    pub fn add_temp_version_restriction(&mut self, restriction: VersionRestriction) {
        if !self.temp_version_restrictions.contains(&restriction) {
            self.temp_version_restrictions.push(restriction);
        }
    }

    pub fn add_temp_dependency_restriction(&mut self, restriction: DependencyRestriction) {
        if !self.temp_dependency_restrictions.contains(&restriction) {
            self.temp_dependency_restrictions.push(restriction);
        }
    }

    /// Promote the temporary overlay into the permanent lists.
    pub fn commit_temp_restrictions(&mut self) {
        for restriction in std::mem::take(&mut self.temp_version_restrictions) {
            self.add_version_restriction(restriction);
        }
        for restriction in std::mem::take(&mut self.temp_dependency_restrictions) {
            self.add_dependency_restriction(restriction);
        }
    }

    /// Discard the temporary overlay.
    pub fn clear_temp_restrictions(&mut self) {
        self.temp_version_restrictions.clear();
        self.temp_dependency_restrictions.clear();
    }

    /// Discard every restriction, permanent and temporary.
    pub fn clear_restrictions(&mut self) {
        self.version_restrictions.clear();
        self.dependency_restrictions.clear();
        self.clear_temp_restrictions();
    }

    pub fn version_restrictions(&self) -> &[VersionRestriction] {
        &self.version_restrictions
    }

    pub fn dependency_restrictions(&self) -> &[DependencyRestriction] {
        &self.dependency_restrictions
    }

    /// Permanently exclude a variant by name.
    pub fn add_exclusion(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.excluded.contains(&name) {
            self.excluded.push(name);
        }
    }

    pub fn exclusions(&self) -> &[String] {
        &self.excluded
    }

    /// Pin selection to the named variants. Names with no matching
    /// candidate are dropped, and a single-select module keeps one of
    /// the survivors at random. The selection pool still filters the
    /// pinned variants, so a forced variant can fail restrictions.
    pub fn set_forced(&mut self, names: &[String], rng: &mut HavocRng) {
        let forced: Vec<String> = names
            .iter()
            .filter(|n| self.vulns.contains_key(*n))
            .cloned()
            .collect();
        self.forced = if !self.multi_vuln && forced.len() > 1 {
            rng.pick(&forced).cloned().into_iter().collect()
        } else {
            forced
        };
    }

    pub fn forced(&self) -> &[String] {
        &self.forced
    }

    /// The candidates that survive every active filter, with dependency
    /// choice groups pruned against the dependency restrictions.
    ///
    /// A candidate is dropped when it is excluded, over the difficulty
    /// cap, unsupported on the target OS, fails a version restriction,
    /// or has a requirement left with no viable choice after pruning.
    pub fn restricted_list(&self) -> Vec<Vulnerability> {
        let version_restrictions: Vec<&VersionRestriction> = self
            .version_restrictions
            .iter()
            .chain(&self.temp_version_restrictions)
            .collect();
        let dependency_restrictions: Vec<&DependencyRestriction> = self
            .dependency_restrictions
            .iter()
            .chain(&self.temp_dependency_restrictions)
            .collect();

        let mut survivors = Vec::new();
        'candidates: for vuln in self.vulns.values() {
            if self.excluded.iter().any(|name| name == vuln.name()) {
                continue;
            }
            if let (Some(limit), Some(difficulty)) = (self.difficulty_limit, vuln.difficulty()) {
                if difficulty > limit {
                    continue;
                }
            }
            if let Some(info) = &self.os_info {
                if !vuln.supports_os(info) {
                    continue;
                }
            }
            if !version_restrictions
                .iter()
                .all(|r| r.version_pass(vuln.provides(), vuln.version()))
            {
                continue;
            }

            let mut vuln = vuln.clone();
            for dep in vuln.dependencies_mut() {
                dep.retain_choices(|choice| {
                    dependency_restrictions
                        .iter()
                        .filter(|r| r.applies_to(choice.provides()))
                        .all(|r| r.range_pass(choice.provides(), choice.range()))
                });
                if dep.is_empty() {
                    // A requirement with no viable choice sinks the
                    // whole candidate.
                    continue 'candidates;
                }
            }
            survivors.push(vuln);
        }
        survivors
    }

    /// The variants the module will run, regenerating the selection
    /// when `force` is set or no selection exists yet. The running set
    /// is otherwise stable across calls.
    pub fn select_vulnerabilities(&mut self, force: bool, rng: &mut HavocRng) -> Vec<Vulnerability> {
        if force || self.running.is_empty() {
            self.running = self.generate_selection(rng);
        }
        self.running.clone()
    }

    fn generate_selection(&self, rng: &mut HavocRng) -> Vec<Vulnerability> {
        let mut pool = self.restricted_list();
        trace!(module = %self.name, pool = pool.len(), "generating selection");

        if pool.is_empty() {
            return Vec::new();
        }

        if let Some(idx) = pool.iter().position(|v| v.name() == NONE_VULN) {
            if pool.len() == 1 {
                return pool;
            }
            // Keeping the sentinel takes two coin flips in a row, so a
            // quarter of selections leave the module dormant.
            if rng.will_do() && rng.will_do() {
                return vec![pool.swap_remove(idx)];
            }
            pool.remove(idx);
        }

        if !self.forced.is_empty() {
            self.select_forced(&pool, rng)
        } else if self.multi_vuln {
            self.select_multi(&pool, rng)
        } else {
            rng.pick(&pool).cloned().into_iter().collect()
        }
    }

    fn select_forced(&self, pool: &[Vulnerability], rng: &mut HavocRng) -> Vec<Vulnerability> {
        if !self.multi_vuln {
            // set_forced already pinned single-select to one name.
            let target = self.forced.first().map(String::as_str);
            return pool
                .iter()
                .find(|v| Some(v.name()) == target)
                .cloned()
                .into_iter()
                .collect();
        }
        let mut selected = Vec::new();
        for forced in &self.forced {
            match pool.iter().find(|v| v.name() == forced) {
                Some(vuln) => selected.push(vuln.clone()),
                // Every forced variant must have survived the filters.
                None => return Vec::new(),
            }
        }
        for vuln in pool {
            if self.forced.iter().any(|name| name == vuln.name()) {
                continue;
            }
            if rng.will_do() {
                selected.push(vuln.clone());
            }
        }
        selected
    }

    fn select_multi(&self, pool: &[Vulnerability], rng: &mut HavocRng) -> Vec<Vulnerability> {
        loop {
            let selected: Vec<Vulnerability> = pool
                .iter()
                .filter(|_| rng.will_do())
                .cloned()
                .collect();
            if !selected.is_empty() {
                return selected;
            }
        }
    }

    /// The variants chosen by the last selection.
    pub fn running_vulnerabilities(&self) -> &[Vulnerability] {
        &self.running
    }

    /// Whether every running variant still survives the active filters.
    pub fn still_valid(&self) -> bool {
        let pool = self.restricted_list();
        self.running
            .iter()
            .all(|running| pool.iter().any(|v| v.name() == running.name()))
    }

    /// Invert the last selection: exclude everything that ran and
    /// clear the running set, so the next attempt explores the rest of
    /// the pool.
    pub fn negate_selections(&mut self) {
        for vuln in std::mem::take(&mut self.running) {
            self.add_exclusion(vuln.name().to_string());
        }
    }

    /// Whether any surviving candidate provides `provides` inside
    /// `range`. Used when probing a module as a potential provider.
    /// A candidate with no declared version matches every range, the
    /// same way version restrictions treat unversioned candidates.
    pub fn can_provide(&self, provides: &str, range: &VersionRange) -> bool {
        self.restricted_list().iter().any(|v| {
            v.provides() == Some(provides)
                && v.version().map_or(true, |version| range.in_range(version))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn provider(name: &str, provides: &str, version: &str) -> Vulnerability {
        let mut vuln = Vulnerability::new(name, "");
        vuln.set_provides(provides, Some(version)).unwrap();
        vuln
    }

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn version_restriction_filters_pool() {
        let mut module = Module::new("web");
        module.add_vulnerability(provider("OLD", "apache", "2.2"));
        module.add_vulnerability(provider("NEW", "apache", "2.4.1"));
        module.add_version_restriction(VersionRestriction::new("apache", range(">=2.4")));

        let pool = module.restricted_list();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].name(), "NEW");
    }

    #[test]
    fn dependency_restriction_prunes_choices() {
        let mut module = Module::new("app");
        let mut vuln = Vulnerability::new("SQLI", "");
        vuln.add_dependency_any(&[("mysql", "<5.0"), ("postgres", "*")])
            .unwrap();
        module.add_vulnerability(vuln);
        module.add_dependency_restriction(DependencyRestriction::new("mysql", range(">=5.5")));

        let pool = module.restricted_list();
        assert_eq!(pool.len(), 1);
        let dep = &pool[0].dependencies()[0];
        assert_eq!(dep.choices().len(), 1);
        assert_eq!(dep.choices()[0].provides(), "postgres");
    }

    #[test]
    fn dependency_restriction_can_sink_candidate() {
        let mut module = Module::new("app");
        let mut vuln = Vulnerability::new("SQLI", "");
        vuln.add_dependency("mysql", "<5.0").unwrap();
        module.add_vulnerability(vuln);
        module.add_dependency_restriction(DependencyRestriction::new("mysql", range(">=5.5")));
        assert!(module.restricted_list().is_empty());
    }

    #[test]
    fn temp_restrictions_overlay_and_clear() {
        let mut module = Module::new("web");
        module.add_vulnerability(provider("OLD", "apache", "2.2"));
        module.add_temp_version_restriction(VersionRestriction::new("apache", range(">=2.4")));
        assert!(module.restricted_list().is_empty());

        module.clear_temp_restrictions();
        assert_eq!(module.restricted_list().len(), 1);
    }

    #[test]
    fn temp_restrictions_commit_without_duplicates() {
        let mut module = Module::new("web");
        let restriction = VersionRestriction::new("apache", range(">=2.4"));
        module.add_version_restriction(restriction.clone());
        module.add_temp_version_restriction(restriction);
        module.commit_temp_restrictions();
        assert_eq!(module.version_restrictions().len(), 1);
    }

    #[test]
    fn difficulty_cap_keeps_untagged() {
        let mut module = Module::new("m");
        let mut hard = provider("HARD", "x", "1.0");
        hard.set_difficulty(Difficulty::Hard);
        module.add_vulnerability(hard);
        module.add_vulnerability(provider("PLAIN", "x", "1.0"));
        module.set_difficulty_limit(Some(Difficulty::Easy));

        let pool = module.restricted_list();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].name(), "PLAIN");
    }

    #[test]
    fn forced_missing_from_pool_selects_nothing() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("A", "x", "1.0"));
        module.add_vulnerability(provider("B", "x", "2.0"));

        let mut rng = HavocRng::seeded(1);
        module.set_forced(&["B".to_string()], &mut rng);
        module.add_exclusion("B");
        assert!(module.select_vulnerabilities(false, &mut rng).is_empty());
    }

    #[test]
    fn forced_single_selects_the_pin() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("A", "x", "1.0"));
        module.add_vulnerability(provider("B", "x", "2.0"));

        let mut rng = HavocRng::seeded(1);
        module.set_forced(&["B".to_string()], &mut rng);
        let selected = module.select_vulnerabilities(false, &mut rng);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "B");
        assert_eq!(module.running_vulnerabilities().len(), 1);
    }

    #[test]
    fn forced_unknown_names_are_dropped() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("A", "x", "1.0"));
        let mut rng = HavocRng::seeded(1);
        module.set_forced(&["GHOST".to_string(), "A".to_string()], &mut rng);
        assert_eq!(module.forced(), ["A"]);
    }

    #[test]
    fn forced_pair_on_single_select_pins_one_at_random() {
        let mut seen_a = false;
        let mut seen_b = false;
        for seed in 0..50 {
            let mut module = Module::new("m");
            module.add_vulnerability(provider("A", "x", "1.0"));
            module.add_vulnerability(provider("B", "x", "2.0"));

            let mut rng = HavocRng::seeded(seed);
            module.set_forced(&["A".to_string(), "B".to_string()], &mut rng);
            assert_eq!(module.forced().len(), 1);

            let selected = module.select_vulnerabilities(false, &mut rng);
            assert_eq!(selected.len(), 1);
            match selected[0].name() {
                "A" => seen_a = true,
                "B" => seen_b = true,
                other => panic!("unexpected selection '{other}'"),
            }
        }
        assert!(seen_a, "variant A never pinned");
        assert!(seen_b, "variant B never pinned");
    }

    #[test]
    fn multi_selection_is_never_empty() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("A", "x", "1.0"));
        module.add_vulnerability(provider("B", "y", "1.0"));
        module.set_multi_vuln(true);

        for seed in 0..50 {
            let mut rng = HavocRng::seeded(seed);
            assert!(!module.select_vulnerabilities(true, &mut rng).is_empty());
        }
    }

    #[test]
    fn sentinel_survives_roughly_a_quarter_of_runs() {
        let mut dormant = 0;
        for seed in 0..400 {
            let mut module = Module::new("m");
            module.add_vulnerability(Vulnerability::new(NONE_VULN, "do nothing"));
            module.add_vulnerability(provider("A", "x", "1.0"));
            let mut rng = HavocRng::seeded(seed);
            let selected = module.select_vulnerabilities(false, &mut rng);
            assert_eq!(selected.len(), 1);
            if selected[0].name() == NONE_VULN {
                dormant += 1;
            }
        }
        // Two coin flips keep the sentinel, expect near 100 of 400.
        assert!((60..160).contains(&dormant), "dormant = {dormant}");
    }

    #[test]
    fn selection_is_cached_until_forced() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("A", "x", "1.0"));
        module.add_vulnerability(provider("B", "x", "2.0"));
        module.add_vulnerability(provider("C", "x", "3.0"));

        let mut rng = HavocRng::seeded(11);
        let first = module.select_vulnerabilities(false, &mut rng);
        for _ in 0..10 {
            let again = module.select_vulnerabilities(false, &mut rng);
            assert_eq!(again[0].name(), first[0].name());
        }

        // Forcing regenerates; over enough attempts another candidate
        // must come up.
        let mut changed = false;
        for _ in 0..64 {
            let regen = module.select_vulnerabilities(true, &mut rng);
            if regen[0].name() != first[0].name() {
                changed = true;
                break;
            }
        }
        assert!(changed);
    }

    #[test]
    fn sole_sentinel_is_selected() {
        let mut module = Module::new("m");
        module.add_vulnerability(Vulnerability::new(NONE_VULN, "do nothing"));
        let mut rng = HavocRng::seeded(7);
        let selected = module.select_vulnerabilities(false, &mut rng);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), NONE_VULN);
    }

    #[test]
    fn negate_excludes_running_set() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("A", "x", "1.0"));
        module.add_vulnerability(provider("B", "x", "2.0"));

        let mut rng = HavocRng::seeded(3);
        let first = module.select_vulnerabilities(false, &mut rng);
        let first_name = first[0].name().to_string();
        module.negate_selections();
        assert!(module.exclusions().contains(&first_name));
        assert!(module.running_vulnerabilities().is_empty());

        let second = module.select_vulnerabilities(false, &mut rng);
        assert_eq!(second.len(), 1);
        assert_ne!(second[0].name(), first_name);
    }

    #[test]
    fn still_valid_tracks_new_restrictions() {
        let mut module = Module::new("m");
        module.add_vulnerability(provider("OLD", "apache", "2.2"));
        let mut rng = HavocRng::seeded(1);
        module.select_vulnerabilities(false, &mut rng);
        assert!(module.still_valid());

        module.add_version_restriction(VersionRestriction::new("apache", range(">=2.4")));
        assert!(!module.still_valid());
    }

    #[test]
    fn can_provide_respects_range_and_filters() {
        let mut module = Module::new("web");
        module.add_vulnerability(provider("OLD", "apache", "2.2"));
        assert!(module.can_provide("apache", &range("<2.4")));
        assert!(!module.can_provide("apache", &range(">=2.4")));
        assert!(!module.can_provide("nginx", &range("*")));

        module.add_exclusion("OLD");
        assert!(!module.can_provide("apache", &range("<2.4")));
    }

    #[test]
    fn unversioned_provider_matches_every_range() {
        let mut module = Module::new("m");
        let mut vuln = Vulnerability::new("V", "");
        vuln.set_provides("tool", None).unwrap();
        module.add_vulnerability(vuln);
        assert!(module.can_provide("tool", &range("*")));
        assert!(module.can_provide("tool", &range(">=1.0")));
        assert!(!module.can_provide("other", &range("*")));
    }

    #[test]
    fn has_provides_and_difficulty() {
        let mut module = Module::new("m");
        let mut hard = provider("HARD", "x", "1.0");
        hard.set_difficulty(Difficulty::Hard);
        module.add_vulnerability(hard);
        assert!(module.has_provides("x"));
        assert!(!module.has_provides("y"));
        assert!(module.has_difficulty(Difficulty::Hard));
        assert!(!module.has_difficulty(Difficulty::Easy));
    }

    #[test]
    fn os_filter_applies_when_info_set() {
        use crate::os::{OsMatch, OsType};

        let mut module = Module::new("m");
        let mut vuln = provider("LINUX_ONLY", "x", "1.0");
        vuln.add_supported_os(OsMatch::new(OsType::Linux, "*", VersionRange::any()));
        module.add_vulnerability(vuln);

        // No OS info: unfiltered.
        assert_eq!(module.restricted_list().len(), 1);

        module.set_os_info(OsInfo::new(OsType::Windows, "unknown", None));
        assert!(module.restricted_list().is_empty());

        module.set_os_info(OsInfo::new(
            OsType::Linux,
            "ubuntu",
            Some(Version::parse("22.04").unwrap()),
        ));
        assert_eq!(module.restricted_list().len(), 1);
    }
}
