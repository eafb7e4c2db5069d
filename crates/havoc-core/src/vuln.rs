//! Vulnerabilities: the behavior variants a module can install.
//!
//! A vulnerability may provide an abstract capability at a version and
//! may require capabilities provided by other modules. A requirement
//! is a choice group: one choice is a plain AND-requirement, several
//! choices form a logical OR where satisfying any one is enough.

use havoc_util::errors::HavocError;

use crate::difficulty::Difficulty;
use crate::os::{OsInfo, OsMatch};
use crate::version::{Version, VersionRange};

/// Name of the sentinel vulnerability that installs nothing. A module
/// carrying it can legitimately end up doing no harm at all.
pub const NONE_VULN: &str = "NONE";

/// One alternative within a dependency: a capability at a version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepChoice {
    provides: String,
    range: VersionRange,
}

impl DepChoice {
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
}

/// A requirement of a vulnerability: a non-empty ordered group of
/// capability choices, any one of which satisfies it.
#[derive(Debug, Clone)]
pub struct Dependency {
    choices: Vec<DepChoice>,
}

impl Dependency {
    /// A plain AND-requirement on a single capability.
    pub fn on(provides: impl Into<String>, range: VersionRange) -> Self {
        Self {
            choices: vec![DepChoice::new(provides, range)],
        }
    }

    /// An OR group. Fails on an empty choice list.
    pub fn any_of(choices: Vec<DepChoice>) -> Result<Self, HavocError> {
        if choices.is_empty() {
            return Err(HavocError::Module {
                message: "dependency choice group cannot be empty".to_string(),
            });
        }
        Ok(Self { choices })
    }

    pub fn is_or(&self) -> bool {
        self.choices.len() > 1
    }

    pub fn choices(&self) -> &[DepChoice] {
        &self.choices
    }

    /// Drop choices failing `keep`. Used by the candidate filter to
    /// prune a working copy; the module's originals are never touched.
    pub(crate) fn retain_choices(&mut self, keep: impl Fn(&DepChoice) -> bool) {
        self.choices.retain(|choice| keep(choice));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

/// A single behavior variant offered by a module.
#[derive(Debug, Clone)]
pub struct Vulnerability {
    name: String,
    description: String,
    provides: Option<String>,
    version: Option<Version>,
    dependencies: Vec<Dependency>,
    cmd_uses: Vec<String>,
    cmd_modifies: Vec<String>,
    supported_os: Vec<OsMatch>,
    difficulty: Option<Difficulty>,
    link: Option<String>,
}

impl Vulnerability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            provides: None,
            version: None,
            dependencies: Vec::new(),
            cmd_uses: Vec::new(),
            cmd_modifies: Vec::new(),
            supported_os: Vec::new(),
            difficulty: None,
            link: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declare the capability this vulnerability installs, optionally
    /// at a concrete version.
    pub fn set_provides(
        &mut self,
        provides: impl Into<String>,
        version: Option<&str>,
    ) -> Result<(), HavocError> {
        let provides = provides.into();
        if provides.trim().is_empty() {
            return Err(HavocError::Module {
                message: "provides string cannot be blank".to_string(),
            });
        }
        self.version = match version {
            Some(v) if !v.trim().is_empty() => Some(Version::parse(v)?),
            _ => None,
        };
        self.provides = Some(provides);
        Ok(())
    }

    pub fn provides(&self) -> Option<&str> {
        self.provides.as_deref()
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Whether this vulnerability's provided version falls inside the
    /// given range. Unversioned vulnerabilities never do.
    pub fn is_in_range(&self, range: &VersionRange) -> bool {
        match &self.version {
            Some(version) => range.in_range(version),
            None => false,
        }
    }

    /// Add a plain requirement on a capability.
    pub fn add_dependency(&mut self, provides: &str, range: &str) -> Result<(), HavocError> {
        let range = VersionRange::parse(range)?;
        self.dependencies.push(Dependency::on(provides, range));
        Ok(())
    }

    /// Add an OR requirement satisfiable by any of the given
    /// (capability, range) choices.
    pub fn add_dependency_any(&mut self, choices: &[(&str, &str)]) -> Result<(), HavocError> {
        let mut parsed = Vec::with_capacity(choices.len());
        for (provides, range) in choices {
            parsed.push(DepChoice::new(*provides, VersionRange::parse(range)?));
        }
        self.dependencies.push(Dependency::any_of(parsed)?);
        Ok(())
    }

    /// Add an already-built requirement.
    pub fn add_dependency_choice(&mut self, dependency: Dependency) {
        self.dependencies.push(dependency);
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut [Dependency] {
        &mut self.dependencies
    }

    /// Record a command this vulnerability reads. Duplicates are ignored.
    pub fn add_cmd_uses(&mut self, cmd: impl Into<String>) {
        let cmd = cmd.into();
        if !self.cmd_uses.contains(&cmd) {
            self.cmd_uses.push(cmd);
        }
    }

    /// Record a command this vulnerability replaces or alters.
    /// Duplicates are ignored.
    pub fn add_cmd_modifies(&mut self, cmd: impl Into<String>) {
        let cmd = cmd.into();
        if !self.cmd_modifies.contains(&cmd) {
            self.cmd_modifies.push(cmd);
        }
    }

    pub fn cmd_uses(&self) -> &[String] {
        &self.cmd_uses
    }

    pub fn cmd_modifies(&self) -> &[String] {
        &self.cmd_modifies
    }

    pub fn add_supported_os(&mut self, predicate: OsMatch) {
        self.supported_os.push(predicate);
    }

    /// Whether this vulnerability applies to the given system. An
    /// empty predicate list supports every OS.
    pub fn supports_os(&self, info: &OsInfo) -> bool {
        if self.supported_os.is_empty() {
            return true;
        }
        self.supported_os.iter().any(|p| info.matches(p))
    }

    pub fn set_difficulty(&mut self, difficulty: Difficulty) {
        self.difficulty = Some(difficulty);
    }

    pub fn difficulty(&self) -> Option<Difficulty> {
        self.difficulty
    }

    /// Attach a reference link describing the vulnerability.
    pub fn set_link(&mut self, link: &str) -> Result<(), HavocError> {
        if !link.starts_with("http://") && !link.starts_with("https://") {
            return Err(HavocError::Module {
                message: format!("invalid link '{link}'"),
            });
        }
        self.link = Some(link.to_string());
        Ok(())
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
}
