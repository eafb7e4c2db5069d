//! Restrictions narrow which vulnerabilities a module may offer.
//!
//! Both kinds bind a capability name to a version range. A version
//! restriction is checked against what a candidate vulnerability
//! itself provides; a dependency restriction is checked against the
//! ranges a vulnerability's dependency choices ask for. Restrictions
//! are immutable values; the temporary flavor lives in a separate,
//! explicitly clearable overlay list on the module.

use crate::version::{Version, VersionRange};

/// Constrains the version a module's vulnerabilities may provide for a
/// capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRestriction {
    provides: String,
    range: VersionRange,
}

impl VersionRestriction {
    pub fn new(provides: impl Into<String>, range: VersionRange) -> Self {
        Self {
            provides: provides.into(),
            range,
        }
    }

    pub fn provides(&self) -> &str {
        &self.provides
    }

    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    /// Whether a candidate passes this restriction.
    ///
    /// The candidate must provide the restricted capability; an
    /// unversioned candidate then always passes, a versioned one must
    /// fall inside the range.
    pub fn version_pass(&self, provides: Option<&str>, version: Option<&Version>) -> bool {
        if provides != Some(self.provides.as_str()) {
            return false;
        }
        match version {
            None => true,
            Some(version) => self.range.in_range(version),
        }
    }
}

/// Constrains the version ranges a vulnerability's dependencies may
/// ask for on a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRestriction {
    provides: String,
    range: VersionRange,
}

impl DependencyRestriction {
    pub fn new(provides: impl Into<String>, range: VersionRange) -> Self {
        Self {
            provides: provides.into(),
            range,
        }
    }

    pub fn provides(&self) -> &str {
        &self.provides
    }

    pub fn range(&self) -> &VersionRange {
        &self.range
    }

    /// Whether this restriction is relevant to a dependency choice on
    /// the named capability.
    pub fn applies_to(&self, provides: &str) -> bool {
        self.provides == provides
    }

    /// Whether a dependency choice passes this restriction: the names
    /// must match and the two ranges must intersect.
    pub fn range_pass(&self, provides: &str, range: &VersionRange) -> bool {
        self.applies_to(provides) && range.intersects(&self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    fn version(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn version_pass_requires_matching_capability() {
        let restriction = VersionRestriction::new("apache", range(">=2.4"));
        assert!(!restriction.version_pass(Some("nginx"), Some(&version("2.4"))));
        assert!(!restriction.version_pass(None, None));
    }

    #[test]
    fn version_pass_checks_range() {
        let restriction = VersionRestriction::new("apache", range(">=2.4"));
        assert!(restriction.version_pass(Some("apache"), Some(&version("2.4.1"))));
        assert!(!restriction.version_pass(Some("apache"), Some(&version("2.2"))));
    }

    #[test]
    fn unversioned_candidate_passes_when_names_match() {
        let restriction = VersionRestriction::new("apache", range(">=2.4"));
        assert!(restriction.version_pass(Some("apache"), None));
    }

    #[test]
    fn range_pass_requires_intersection() {
        let restriction = DependencyRestriction::new("openssl", range(">=1.1"));
        assert!(restriction.range_pass("openssl", &range("<=1.1")));
        assert!(restriction.range_pass("openssl", &range("*")));
        assert!(!restriction.range_pass("openssl", &range("<1.0")));
    }

    #[test]
    fn range_pass_ignores_other_capabilities() {
        let restriction = DependencyRestriction::new("openssl", range(">=1.1"));
        assert!(!restriction.applies_to("zlib"));
        assert!(!restriction.range_pass("zlib", &range("*")));
    }
}
