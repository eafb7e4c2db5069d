//! Module catalogs: where module definitions come from.
//!
//! The resolver is handed a [`ModuleCatalog`] and never touches the
//! filesystem itself. [`DirCatalog`] reads TOML definitions from a
//! directory (with injectable in-memory stubs taking precedence, so
//! tests can shadow real files); [`MemoryCatalog`] holds fully built
//! [`Module`] values directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use havoc_util::errors::HavocError;

use crate::difficulty::Difficulty;
use crate::module::Module;
use crate::os::{OsMatch, OsType};
use crate::version::VersionRange;
use crate::vuln::{DepChoice, Dependency, Vulnerability};

/// Source of module definitions by name.
pub trait ModuleCatalog {
    /// Whether a definition exists for `name`.
    fn exists(&self, name: &str) -> bool;

    /// Load and build the named module.
    fn load(&self, name: &str) -> Result<Module, HavocError>;

    /// Every module name this catalog can load, sorted.
    fn list(&self) -> Vec<String>;
}

/// The parsed representation of a module definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    #[serde(default, rename = "multi-vuln")]
    pub multi_vuln: bool,

    #[serde(default)]
    pub difficulty: Option<String>,

    #[serde(default, rename = "vulnerability")]
    pub vulnerabilities: Vec<VulnSpec>,
}

/// One `[[vulnerability]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct VulnSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub provides: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub difficulty: Option<String>,

    #[serde(default)]
    pub link: Option<String>,

    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencySpec>,

    #[serde(default, rename = "cmd-uses")]
    pub cmd_uses: Vec<String>,

    #[serde(default, rename = "cmd-modifies")]
    pub cmd_modifies: Vec<String>,

    #[serde(default, rename = "os")]
    pub supported_os: Vec<OsSpec>,
}

/// A requirement, either a single capability or an OR choice group.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    Single {
        provides: String,
        #[serde(default = "any_range")]
        range: String,
    },
    AnyOf {
        any: Vec<DepChoiceSpec>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepChoiceSpec {
    pub provides: String,
    #[serde(default = "any_range")]
    pub range: String,
}

/// An `[[vulnerability.os]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct OsSpec {
    #[serde(rename = "type")]
    pub os_type: String,
    #[serde(default = "any_flavor")]
    pub flavor: String,
    #[serde(default = "any_range")]
    pub version: String,
}

fn any_range() -> String {
    "*".to_string()
}

fn any_flavor() -> String {
    "*".to_string()
}

/// Parse a TOML module definition and build the module it describes.
pub fn parse_module(name: &str, content: &str) -> Result<Module, HavocError> {
    let spec: ModuleSpec = toml::from_str(content).map_err(|e| HavocError::Catalog {
        message: format!("failed to parse module '{name}': {e}"),
    })?;
    build_module(name, &spec)
}

fn build_module(name: &str, spec: &ModuleSpec) -> Result<Module, HavocError> {
    let mut module = Module::new(name);
    module.set_multi_vuln(spec.multi_vuln);
    if let Some(difficulty) = &spec.difficulty {
        module.set_difficulty_limit(Some(Difficulty::from_str(difficulty)?));
    }

    for vuln_spec in &spec.vulnerabilities {
        let mut vuln = Vulnerability::new(&vuln_spec.name, &vuln_spec.description);
        if let Some(provides) = &vuln_spec.provides {
            vuln.set_provides(provides, vuln_spec.version.as_deref())?;
        } else if vuln_spec.version.is_some() {
            return Err(HavocError::Catalog {
                message: format!(
                    "vulnerability '{}' in module '{name}' has a version but no provides",
                    vuln_spec.name
                ),
            });
        }
        if let Some(difficulty) = &vuln_spec.difficulty {
            vuln.set_difficulty(Difficulty::from_str(difficulty)?);
        }
        if let Some(link) = &vuln_spec.link {
            vuln.set_link(link)?;
        }
        for dep in &vuln_spec.dependencies {
            match dep {
                DependencySpec::Single { provides, range } => {
                    vuln.add_dependency(provides, range)?;
                }
                DependencySpec::AnyOf { any } => {
                    let mut choices = Vec::with_capacity(any.len());
                    for choice in any {
                        choices
                            .push(DepChoice::new(&choice.provides, VersionRange::parse(&choice.range)?));
                    }
                    vuln.add_dependency_choice(Dependency::any_of(choices)?);
                }
            }
        }
        for cmd in &vuln_spec.cmd_uses {
            vuln.add_cmd_uses(cmd);
        }
        for cmd in &vuln_spec.cmd_modifies {
            vuln.add_cmd_modifies(cmd);
        }
        for os in &vuln_spec.supported_os {
            vuln.add_supported_os(OsMatch::new(
                OsType::from_str(&os.os_type)?,
                &os.flavor,
                VersionRange::parse(&os.version)?,
            ));
        }
        module.add_vulnerability(vuln);
    }

    Ok(module)
}

/// Catalog backed by a directory of `<name>.toml` files, with optional
/// in-memory stub definitions that shadow same-named files.
pub struct DirCatalog {
    root: PathBuf,
    stubs: BTreeMap<String, String>,
}

impl DirCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stubs: BTreeMap::new(),
        }
    }

    /// Register an in-memory definition for `name`. Stubs win over
    /// files of the same name.
    pub fn add_stub(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.stubs.insert(name.into(), content.into());
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.toml"))
    }
}

impl ModuleCatalog for DirCatalog {
    fn exists(&self, name: &str) -> bool {
        self.stubs.contains_key(name) || self.file_for(name).is_file()
    }

    fn load(&self, name: &str) -> Result<Module, HavocError> {
        if let Some(content) = self.stubs.get(name) {
            debug!(module = name, "loading module from stub");
            return parse_module(name, content);
        }
        let path = self.file_for(name);
        debug!(module = name, path = %path.display(), "loading module");
        let content = std::fs::read_to_string(&path).map_err(|e| HavocError::Catalog {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        parse_module(name, &content)
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stubs.keys().cloned().collect();
        if let Ok(entries) = std::fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map_or(false, |ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Catalog holding fully built modules. Loads are clones, so a module
/// handed to the resolver never aliases the catalog's copy.
#[derive(Default)]
pub struct MemoryCatalog {
    modules: BTreeMap<String, Module>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: Module) {
        self.modules.insert(module.name().to_string(), module);
    }
}

impl ModuleCatalog for MemoryCatalog {
    fn exists(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    fn load(&self, name: &str) -> Result<Module, HavocError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| HavocError::Catalog {
                message: format!("unknown module '{name}'"),
            })
    }

    fn list(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

/// Convenience for tests and callers that already have a path.
pub fn load_from_path(path: &Path) -> Result<Module, HavocError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| HavocError::Catalog {
            message: format!("cannot derive module name from {}", path.display()),
        })?;
    let content = std::fs::read_to_string(path).map_err(|e| HavocError::Catalog {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_module(name, &content)
}
