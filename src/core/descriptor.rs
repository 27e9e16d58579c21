//! Package descriptor loading and validation
//!
//! The descriptor is a TOML file naming the distributable unit, its
//! dependencies, its packages and the data files shipped with them.

use crate::core::requirement::Requirement;
use crate::core::specifier::SpecifierSet;
use crate::core::version::Version;
use crate::error::{DistError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$")
        .expect("name pattern is a valid regex")
});

static PACKAGE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)?$")
        .expect("package key pattern is a valid regex")
});

/// Default descriptor file name
pub const DESCRIPTOR_FILE: &str = "package.toml";

/// Declarative description of a distributable unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDescriptor {
    /// Distribution name
    pub name: String,
    /// Release version
    pub version: Version,
    /// One-line summary
    #[serde(default)]
    pub description: String,
    /// Long description, inline
    #[serde(default)]
    pub long_description: String,
    /// Long description read from a file next to the descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description_file: Option<PathBuf>,
    #[serde(default = "default_content_type")]
    pub long_description_content_type: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_email: String,
    /// Canonical source repository location
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub license: String,
    /// Sub-packages to ship, listed or discovered
    #[serde(default)]
    pub packages: PackagesSpec,
    /// Minimum language runtime version
    #[serde(default)]
    pub python_requires: SpecifierSet,
    /// Install-time dependencies, in declaration order
    #[serde(default)]
    pub install_requires: Vec<Requirement>,
    /// Package name to data file glob patterns; `""` applies to every package
    #[serde(default)]
    pub package_data: BTreeMap<String, Vec<String>>,
    /// File listing explicit data paths, one per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_manifest: Option<PathBuf>,
    /// Copy matched data files into the archive
    #[serde(default)]
    pub include_package_data: bool,
    /// Whether the package may run from a compressed archive
    #[serde(default = "default_zip_safe")]
    pub zip_safe: bool,
    /// Directory the descriptor was loaded from
    #[serde(skip)]
    pub project_dir: PathBuf,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

fn default_zip_safe() -> bool {
    true
}

/// How the set of packages is determined
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PackagesSpec {
    /// Dotted package names listed by hand
    Explicit(Vec<String>),
    /// Scan the source tree for importable units
    Find(FindPackages),
}

impl Default for PackagesSpec {
    fn default() -> Self {
        Self::Find(FindPackages::default())
    }
}

/// Options for package discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FindPackages {
    /// Source root, relative to the descriptor
    #[serde(rename = "where", default = "default_where")]
    pub root: PathBuf,
    /// Name patterns to keep
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    /// Name patterns to drop
    #[serde(default)]
    pub exclude: Vec<String>,
    /// File whose presence marks a directory as a package
    #[serde(default = "default_marker")]
    pub marker: String,
}

fn default_where() -> PathBuf {
    PathBuf::from(".")
}

fn default_include() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_marker() -> String {
    "__init__.py".to_string()
}

impl Default for FindPackages {
    fn default() -> Self {
        Self {
            root: default_where(),
            include: default_include(),
            exclude: Vec::new(),
            marker: default_marker(),
        }
    }
}

impl PackageDescriptor {
    /// Load and validate a descriptor file
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading package descriptor: {}", path.display());

        let content = std::fs::read_to_string(path)
            .map_err(|e| DistError::file_system("read", path, e))?;
        let project_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        // Glob and read_dir results must share this prefix
        let project_dir = std::path::absolute(&project_dir)
            .map_err(|e| DistError::file_system("resolve", &project_dir, e))?;

        Self::from_toml(&content, &project_dir).map_err(|e| match e {
            DistError::Descriptor { message, source, .. } => DistError::Descriptor {
                message,
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate descriptor text; relative paths resolve against `project_dir`
    pub fn from_toml(content: &str, project_dir: &Path) -> Result<Self> {
        let mut descriptor: Self = toml::from_str(content).map_err(|e| {
            DistError::descriptor_with_source(
                format!("malformed descriptor: {}", e.message()),
                project_dir,
                e,
            )
        })?;
        descriptor.project_dir = project_dir.to_path_buf();

        if let Some(file) = descriptor.long_description_file.clone() {
            if !descriptor.long_description.is_empty() {
                return Err(DistError::descriptor(
                    "set either long_description or long_description_file, not both",
                    project_dir,
                ));
            }
            let full = project_dir.join(&file);
            descriptor.long_description = std::fs::read_to_string(&full)
                .map_err(|e| DistError::file_system("read", full, e))?;
        }

        descriptor.validate()?;

        debug!(
            "Parsed descriptor: name='{}', version='{}', {} requirement(s)",
            descriptor.name,
            descriptor.version,
            descriptor.install_requires.len()
        );
        Ok(descriptor)
    }

    /// Check the fields serde cannot check on its own
    fn validate(&self) -> Result<()> {
        if !NAME_RE.is_match(&self.name) {
            return Err(DistError::descriptor(
                format!("invalid package name '{}'", self.name),
                &self.project_dir,
            ));
        }

        for (package, patterns) in &self.package_data {
            if !PACKAGE_KEY_RE.is_match(package) {
                return Err(DistError::descriptor(
                    format!("invalid package_data key '{package}'"),
                    &self.project_dir,
                ));
            }
            for pattern in patterns {
                glob::Pattern::new(pattern).map_err(|e| {
                    DistError::descriptor_with_source(
                        format!("invalid package_data pattern '{pattern}' for '{package}'"),
                        &self.project_dir,
                        e,
                    )
                })?;
                if Path::new(pattern).is_absolute() || pattern.split('/').any(|c| c == "..") {
                    return Err(DistError::descriptor(
                        format!("package_data pattern '{pattern}' must stay inside the package"),
                        &self.project_dir,
                    ));
                }
            }
        }

        if let PackagesSpec::Explicit(packages) = &self.packages {
            if let Some(bad) = packages.iter().find(|p| p.is_empty() || !PACKAGE_KEY_RE.is_match(p)) {
                return Err(DistError::descriptor(
                    format!("invalid package name '{bad}' in packages"),
                    &self.project_dir,
                ));
            }
            if packages.is_empty() {
                warn!("packages list is empty; the archive will contain no code");
            }
        }

        Ok(())
    }

    /// `<name>-<version>`, used for archive file and root directory names
    pub fn archive_stem(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Whether data files should be bundled, honoring an external override
    pub fn bundles_data(&self, override_flag: Option<bool>) -> bool {
        override_flag.unwrap_or(self.include_package_data)
    }

    /// Data patterns that apply to `package`, including the `""` wildcard entry
    pub fn data_patterns_for(&self, package: &str) -> Vec<&str> {
        let mut patterns: Vec<&str> = self
            .package_data
            .get("")
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        if !package.is_empty() {
            if let Some(own) = self.package_data.get(package) {
                patterns.extend(own.iter().map(String::as_str));
            }
        }
        patterns
    }
}
