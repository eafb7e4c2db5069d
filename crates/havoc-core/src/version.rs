//! Application version parsing, comparison, and range matching.
//!
//! A version is 1-4 dot-separated sections of the form `n` or `nx`,
//! where `n` is an integer and `x` an alphabetic suffix. The first
//! section must be a plain integer, and a bare integer `N` is read as
//! `N.0`. Comparison zero-pads the shorter version, so `1.2` and
//! `1.2.0` are equal while `1.2.0a` sorts after `1.2.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use havoc_util::errors::HavocError;

/// One parsed version section: numeric part plus alphabetic suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Segment {
    number: u64,
    suffix: String,
}

/// A parsed application version with normalized comparison.
#[derive(Debug, Clone)]
pub struct Version {
    original: String,
    segments: Vec<Segment>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, HavocError> {
        let sections: Vec<&str> = input.split('.').collect();
        if sections.len() > 4 {
            return Err(HavocError::Version {
                message: format!("too many sections in '{input}'"),
            });
        }

        let mut segments = Vec::with_capacity(sections.len());
        for (i, section) in sections.iter().enumerate() {
            let segment = split_section(section).ok_or_else(|| HavocError::Version {
                message: format!("invalid section '{section}' in '{input}'"),
            })?;
            if i == 0 && !segment.suffix.is_empty() {
                return Err(HavocError::Version {
                    message: format!("first section of '{input}' must be an integer"),
                });
            }
            segments.push(segment);
        }

        // A bare integer is read as `N.0`.
        if segments.len() == 1 {
            segments.push(Segment {
                number: 0,
                suffix: String::new(),
            });
        }

        Ok(Self {
            original: input.to_string(),
            segments,
        })
    }

    /// The major version number (`Major.Minor.Other`).
    pub fn major(&self) -> u64 {
        self.segments[0].number
    }

    /// The minor version number (`Major.Minor.Other`).
    pub fn minor(&self) -> u64 {
        self.segments[1].number
    }
}

/// Split a section into its numeric part and alphabetic suffix.
/// Anything that is not `<digits>` or `<digits><letters>` is invalid.
fn split_section(section: &str) -> Option<Segment> {
    let split = section
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(section.len());
    if split == 0 {
        return None;
    }
    let (digits, suffix) = section.split_at(split);
    if !suffix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let number = digits.parse::<u64>().ok()?;
    Some(Segment {
        number,
        suffix: suffix.to_string(),
    })
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Normalize: the shorter version is padded with (0, "") pairs.
        let max_len = self.segments.len().max(other.segments.len());
        for i in 0..max_len {
            let a = self
                .segments
                .get(i)
                .map(|s| (s.number, s.suffix.as_str()))
                .unwrap_or((0, ""));
            let b = other
                .segments
                .get(i)
                .map(|s| (s.number, s.suffix.as_str()))
                .unwrap_or((0, ""));
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for Version {
    type Err = HavocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Relational operator of a version range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// `*` — matches every version.
    Any,
    /// `-` — matches no version.
    None,
    Lt,
    Le,
    Gt,
    Ge,
    Exact,
}

/// A version range: a relational operator plus an optional bound.
///
/// The bound is absent only for the `*` and `-` wildcards.
#[derive(Debug, Clone)]
pub struct VersionRange {
    op: RangeOp,
    version: Option<Version>,
    original: String,
}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, HavocError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(HavocError::Range {
                message: "empty range".to_string(),
            });
        }

        if trimmed == "*" || trimmed == "-" {
            let op = if trimmed == "*" {
                RangeOp::Any
            } else {
                RangeOp::None
            };
            return Ok(Self {
                op,
                version: None,
                original: trimmed.to_string(),
            });
        }

        let (op, rest) = if let Some(rest) = trimmed.strip_prefix("<=") {
            (RangeOp::Le, rest)
        } else if let Some(rest) = trimmed.strip_prefix(">=") {
            (RangeOp::Ge, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (RangeOp::Lt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (RangeOp::Gt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (RangeOp::Exact, rest)
        } else {
            return Err(HavocError::Range {
                message: format!("missing operator in '{input}'"),
            });
        };

        let version = Version::parse(rest)?;
        Ok(Self {
            op,
            version: Some(version),
            original: trimmed.to_string(),
        })
    }

    /// A range that matches every version.
    pub fn any() -> Self {
        Self {
            op: RangeOp::Any,
            version: None,
            original: "*".to_string(),
        }
    }

    pub fn op(&self) -> RangeOp {
        self.op
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Whether `check` falls within this range.
    pub fn in_range(&self, check: &Version) -> bool {
        match (self.op, self.version.as_ref()) {
            (RangeOp::Any, _) => true,
            (RangeOp::None, _) => false,
            (RangeOp::Lt, Some(bound)) => check < bound,
            (RangeOp::Le, Some(bound)) => check <= bound,
            (RangeOp::Gt, Some(bound)) => check > bound,
            (RangeOp::Ge, Some(bound)) => check >= bound,
            (RangeOp::Exact, Some(bound)) => check == bound,
            // Unreachable by construction: bounded ops always carry a version.
            (_, None) => false,
        }
    }

    /// Whether the two ranges will at any point intersect.
    ///
    /// The symmetric check: equal bounds require mutual containment,
    /// otherwise either bound falling inside the other suffices. `*`
    /// intersects everything except `-`; `-` intersects nothing.
    pub fn intersects(&self, other: &VersionRange) -> bool {
        if self.op == RangeOp::None || other.op == RangeOp::None {
            return false;
        }
        if self.op == RangeOp::Any || other.op == RangeOp::Any {
            return true;
        }
        let (mine, theirs) = match (self.version.as_ref(), other.version.as_ref()) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if mine == theirs {
            self.in_range(theirs) && other.in_range(mine)
        } else {
            self.in_range(theirs) || other.in_range(mine)
        }
    }
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.version == other.version
    }
}

impl Eq for VersionRange {}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for VersionRange {
    type Err = HavocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn basic_ordering() {
        assert!(v("1.0") < v("2.0"));
        assert!(v("1.0.1") < v("1.1.0"));
        assert!(v("2.4.10") > v("2.4.9"));
    }

    #[test]
    fn bare_integer_reads_as_n_dot_zero() {
        assert_eq!(v("3"), v("3.0"));
        assert_eq!(v("3").minor(), 0);
    }

    #[test]
    fn trailing_zero_sections_equal() {
        assert_eq!(v("1.2"), v("1.2.0"));
        assert_eq!(v("1.2"), v("1.2.0.0"));
        assert_ne!(v("1.2"), v("1.2.1"));
    }

    #[test]
    fn alpha_suffix_sorts_after_bare_number() {
        assert!(v("3.4.1a") > v("3.4.1"));
        assert!(v("3.4.1a") < v("3.4.1b"));
        assert!(v("3.4.1b") < v("3.4.2"));
    }

    #[test]
    fn major_minor_accessors() {
        let version = v("2.4.1a");
        assert_eq!(version.major(), 2);
        assert_eq!(version.minor(), 4);
    }

    #[test]
    fn invalid_versions_rejected() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("a.1").is_err());
        assert!(Version::parse("a").is_err());
        assert!(Version::parse("1.2.3.4.5").is_err());
        assert!(Version::parse("1.!").is_err());
        assert!(Version::parse("1.2a3").is_err());
        assert!(Version::parse("1..2").is_err());
    }

    #[test]
    fn display_round_trips_original() {
        assert_eq!(v("2.4.1a").to_string(), "2.4.1a");
    }

    #[test]
    fn exact_range() {
        assert!(r("=1.2.0").in_range(&v("1.2.0")));
        assert!(r("=1.2.0").in_range(&v("1.2")));
        assert!(!r("=1.2.0").in_range(&v("1.2.0a")));
    }

    #[test]
    fn suffix_in_bounded_range() {
        assert!(!r(">=3.4.1a").in_range(&v("3.4.1")));
        assert!(r(">=3.4.1a").in_range(&v("3.4.1b")));
        assert!(r(">=3.4.1a").in_range(&v("3.4.1a")));
    }

    #[test]
    fn wildcard_ranges() {
        assert!(r("*").in_range(&v("0.1")));
        assert!(!r("-").in_range(&v("0.1")));
    }

    #[test]
    fn relational_ranges() {
        assert!(r("<2.0").in_range(&v("1.9")));
        assert!(!r("<2.0").in_range(&v("2.0")));
        assert!(r("<=2.0").in_range(&v("2.0")));
        assert!(r(">1.0").in_range(&v("1.0.1")));
        assert!(!r(">1.0").in_range(&v("1.0")));
    }

    #[test]
    fn invalid_ranges_rejected() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse("   ").is_err());
        assert!(VersionRange::parse("1.0").is_err());
        assert!(VersionRange::parse("~1.0").is_err());
        assert!(VersionRange::parse(">=").is_err());
    }

    #[test]
    fn range_equality() {
        assert_eq!(r(">=1.0"), r(">=1.0.0"));
        assert_ne!(r(">=1.0"), r(">1.0"));
        assert_ne!(r(">=1.0"), r(">=1.1"));
    }

    #[test]
    fn intersecting_ranges() {
        assert!(r(">=1.0").intersects(&r("<=2.0")));
        assert!(r("<=2.0").intersects(&r(">=1.0")));
        assert!(!r("<1.0").intersects(&r(">2.0")));
        assert!(r("=1.5").intersects(&r(">=1.0")));
        assert!(!r("=1.5").intersects(&r(">=2.0")));
    }

    #[test]
    fn equal_bounds_need_mutual_containment() {
        assert!(r(">=1.0").intersects(&r("<=1.0")));
        assert!(!r(">1.0").intersects(&r("<1.0")));
        assert!(!r(">1.0").intersects(&r("<=1.0")));
    }

    #[test]
    fn wildcards_in_intersection() {
        assert!(r("*").intersects(&r(">=9.9")));
        assert!(!r("-").intersects(&r("*")));
        assert!(!r("-").intersects(&r(">=1.0")));
    }
}
