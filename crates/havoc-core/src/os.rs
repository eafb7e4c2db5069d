//! Operating-system identification and matching.
//!
//! Vulnerabilities can declare which systems they apply to; a module
//! filters its candidates against the identity of the machine being
//! configured. Detection is best-effort and injectable for tests.

use std::fmt;
use std::str::FromStr;

use havoc_util::errors::HavocError;

use crate::version::{RangeOp, Version, VersionRange};

/// Operating-system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    /// Matches every family (only meaningful inside an [`OsMatch`]).
    Any,
    Linux,
    Windows,
    Other,
}

impl FromStr for OsType {
    type Err = HavocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "*" | "any" => Ok(OsType::Any),
            "linux" => Ok(OsType::Linux),
            "windows" => Ok(OsType::Windows),
            "other" => Ok(OsType::Other),
            other => Err(HavocError::Module {
                message: format!("unknown OS type '{other}'"),
            }),
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsType::Any => "any",
            OsType::Linux => "linux",
            OsType::Windows => "windows",
            OsType::Other => "other",
        };
        f.write_str(name)
    }
}

/// Predicate describing a system a vulnerability supports.
#[derive(Debug, Clone)]
pub struct OsMatch {
    os_type: OsType,
    flavor: String,
    version: VersionRange,
}

impl OsMatch {
    /// `flavor` is the distribution identifier (`ubuntu`, `centos`,
    /// ...); `*` matches every flavor.
    pub fn new(os_type: OsType, flavor: impl Into<String>, version: VersionRange) -> Self {
        Self {
            os_type,
            flavor: flavor.into(),
            version,
        }
    }

    /// A predicate matching every system.
    pub fn any() -> Self {
        Self::new(OsType::Any, "*", VersionRange::any())
    }

    pub fn os_type(&self) -> OsType {
        self.os_type
    }

    pub fn flavor(&self) -> &str {
        &self.flavor
    }

    pub fn version(&self) -> &VersionRange {
        &self.version
    }
}

/// The identity of the system being configured.
#[derive(Debug, Clone)]
pub struct OsInfo {
    os_type: OsType,
    flavor: String,
    version: Option<Version>,
}

impl OsInfo {
    pub fn new(os_type: OsType, flavor: impl Into<String>, version: Option<Version>) -> Self {
        Self {
            os_type,
            flavor: flavor.into(),
            version,
        }
    }

    /// Best-effort identification of the running system.
    ///
    /// On Linux the flavor and version come from `/etc/os-release`;
    /// elsewhere only the family is filled in.
    pub fn detect() -> Self {
        let os_type = match std::env::consts::OS {
            "linux" => OsType::Linux,
            "windows" => OsType::Windows,
            _ => OsType::Other,
        };

        let mut flavor = String::from("unknown");
        let mut version = None;
        if os_type == OsType::Linux {
            if let Ok(release) = std::fs::read_to_string("/etc/os-release") {
                for line in release.lines() {
                    if let Some(value) = line.strip_prefix("ID=") {
                        flavor = value.trim_matches('"').to_ascii_lowercase();
                    } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
                        version = Version::parse(value.trim_matches('"')).ok();
                    }
                }
            }
        }

        Self {
            os_type,
            flavor,
            version,
        }
    }

    pub fn os_type(&self) -> OsType {
        self.os_type
    }

    pub fn flavor(&self) -> &str {
        &self.flavor
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Whether this system satisfies the given predicate.
    pub fn matches(&self, predicate: &OsMatch) -> bool {
        if predicate.os_type != OsType::Any && predicate.os_type != self.os_type {
            return false;
        }
        if predicate.flavor != "*" && !predicate.flavor.eq_ignore_ascii_case(&self.flavor) {
            return false;
        }
        match (&self.version, predicate.version.op()) {
            (_, RangeOp::Any) => true,
            (Some(version), _) => predicate.version.in_range(version),
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ubuntu_2204() -> OsInfo {
        OsInfo::new(
            OsType::Linux,
            "ubuntu",
            Some(Version::parse("22.04").unwrap()),
        )
    }

    #[test]
    fn any_matches_everything() {
        assert!(ubuntu_2204().matches(&OsMatch::any()));
        assert!(OsInfo::new(OsType::Windows, "unknown", None).matches(&OsMatch::any()));
    }

    #[test]
    fn family_and_flavor_filtering() {
        let info = ubuntu_2204();
        assert!(info.matches(&OsMatch::new(OsType::Linux, "*", VersionRange::any())));
        assert!(info.matches(&OsMatch::new(OsType::Linux, "Ubuntu", VersionRange::any())));
        assert!(!info.matches(&OsMatch::new(OsType::Windows, "*", VersionRange::any())));
        assert!(!info.matches(&OsMatch::new(OsType::Linux, "centos", VersionRange::any())));
    }

    #[test]
    fn version_range_filtering() {
        let info = ubuntu_2204();
        let at_least_20 = OsMatch::new(OsType::Linux, "*", VersionRange::parse(">=20.04").unwrap());
        let below_20 = OsMatch::new(OsType::Linux, "*", VersionRange::parse("<20.04").unwrap());
        assert!(info.matches(&at_least_20));
        assert!(!info.matches(&below_20));

        // An unversioned system only matches unbounded predicates.
        let no_version = OsInfo::new(OsType::Linux, "ubuntu", None);
        assert!(no_version.matches(&OsMatch::any()));
        assert!(!no_version.matches(&at_least_20));
    }

    #[test]
    fn os_type_parsing() {
        assert_eq!("linux".parse::<OsType>().unwrap(), OsType::Linux);
        assert_eq!("*".parse::<OsType>().unwrap(), OsType::Any);
        assert!("beos".parse::<OsType>().is_err());
    }
}
