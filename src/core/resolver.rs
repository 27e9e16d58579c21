//! Dependency resolution
//!
//! Resolves `install_requires` against a local package index. Every
//! requirement, direct or transitive, contributes a constraint tagged with
//! the package that introduced it; when a selection is replaced its
//! constraints are withdrawn and the affected packages are revisited.

use crate::core::descriptor::PackageDescriptor;
use crate::core::requirement::{Requirement, normalize_name};
use crate::core::specifier::SpecifierSet;
use crate::core::version::Version;
use crate::error::{DistError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Upper bound on selection passes before giving up
const MAX_ROUNDS: usize = 10_000;

/// One release available in the index
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexRelease {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    #[serde(default)]
    pub requires_python: SpecifierSet,
    #[serde(default)]
    pub yanked: bool,
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    release: Vec<IndexRelease>,
}

/// Local package index, keyed by normalized name
#[derive(Debug, Default)]
pub struct PackageIndex {
    releases: BTreeMap<String, Vec<IndexRelease>>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an index file (`[[release]]` tables)
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DistError::file_system("read", path, e))?;
        let file: IndexFile = toml::from_str(&content).map_err(|e| {
            DistError::config(format!("malformed package index {}: {}", path.display(), e.message()))
        })?;

        let mut index = Self::new();
        for release in file.release {
            index.add(release);
        }
        debug!("Loaded package index with {} distribution(s)", index.releases.len());
        Ok(index)
    }

    /// Register a release
    pub fn add(&mut self, release: IndexRelease) {
        self.releases
            .entry(normalize_name(&release.name))
            .or_default()
            .push(release);
    }

    /// All releases of a normalized name
    pub fn releases(&self, key: &str) -> &[IndexRelease] {
        self.releases.get(key).map_or(&[], Vec::as_slice)
    }

    fn find(&self, key: &str, version: &Version) -> Option<&IndexRelease> {
        self.releases(key).iter().find(|r| &r.version == version)
    }
}

#[derive(Debug, Deserialize)]
struct EnvironmentFile {
    #[serde(default)]
    installed: BTreeMap<String, Version>,
}

/// Versions already present in the target environment
#[derive(Debug, Default)]
pub struct InstalledEnvironment {
    installed: BTreeMap<String, (String, Version)>,
}

impl InstalledEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an `[installed]` table mapping names to versions
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DistError::file_system("read", path, e))?;
        let file: EnvironmentFile = toml::from_str(&content).map_err(|e| {
            DistError::config(format!("malformed environment {}: {}", path.display(), e.message()))
        })?;

        let mut env = Self::new();
        for (name, version) in file.installed {
            env.insert(name, version);
        }
        Ok(env)
    }

    pub fn insert(&mut self, name: impl Into<String>, version: Version) {
        let name = name.into();
        self.installed.insert(normalize_name(&name), (name, version));
    }

    pub fn get(&self, key: &str) -> Option<&Version> {
        self.installed.get(key).map(|(_, v)| v)
    }
}

/// Where a resolved version comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedSource {
    /// Selected from the index, to be installed
    Index,
    /// Already installed and acceptable
    Installed,
}

/// A selected distribution
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: Version,
    pub source: ResolvedSource,
    pub requires: Vec<Requirement>,
    /// Packages (or the root) whose constraints selected this one
    pub required_by: Vec<String>,
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Normalized name to selection
    pub packages: BTreeMap<String, ResolvedPackage>,
}

impl Resolution {
    /// Selected version of a distribution, by any spelling of its name
    pub fn version_of(&self, name: &str) -> Option<&Version> {
        self.packages.get(&normalize_name(name)).map(|p| &p.version)
    }

    /// Names in dependency order: every package follows its requirements
    pub fn install_order(&self) -> Vec<&str> {
        fn visit<'a>(
            key: &'a str,
            resolution: &'a Resolution,
            seen: &mut BTreeSet<&'a str>,
            order: &mut Vec<&'a str>,
        ) {
            if !seen.insert(key) {
                return;
            }
            if let Some(pkg) = resolution.packages.get(key) {
                for req in &pkg.requires {
                    if let Some((dep_key, _)) = resolution.packages.get_key_value(&req.key()) {
                        visit(dep_key, resolution, seen, order);
                    }
                }
                order.push(pkg.name.as_str());
            }
        }

        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        for key in self.packages.keys() {
            visit(key, self, &mut seen, &mut order);
        }
        order
    }

    /// `name==version` lines in dependency order
    pub fn to_pinned_requirements(&self) -> String {
        self.install_order()
            .into_iter()
            .filter_map(|name| {
                self.packages
                    .get(&normalize_name(name))
                    .map(|p| format!("{}=={}\n", p.name, p.version))
            })
            .collect()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.install_order() {
            if let Some(pkg) = self.packages.get(&normalize_name(name)) {
                let marker = match pkg.source {
                    ResolvedSource::Index => "",
                    ResolvedSource::Installed => " (installed)",
                };
                writeln!(f, "{} {}{}", pkg.name, pkg.version, marker)?;
            }
        }
        Ok(())
    }
}

/// A constraint and the package that introduced it
#[derive(Debug, Clone)]
struct Constraint {
    origin: String,
    requirement: Requirement,
}

/// Dependency resolver over a local index
pub struct DependencyResolver<'a> {
    index: &'a PackageIndex,
    installed: Option<&'a InstalledEnvironment>,
    overrides: BTreeMap<String, Requirement>,
    runtime: Option<Version>,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver over `index`
    pub fn new(index: &'a PackageIndex) -> Self {
        Self {
            index,
            installed: None,
            overrides: BTreeMap::new(),
            runtime: None,
        }
    }

    /// Treat installed versions as pins
    pub fn with_installed(mut self, installed: &'a InstalledEnvironment) -> Self {
        self.installed = Some(installed);
        self
    }

    /// Replace every constraint on a name with the given requirement
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = Requirement>) -> Self {
        for req in overrides {
            self.overrides.insert(req.key(), req);
        }
        self
    }

    /// Check `python_requires`/`requires_python` against this runtime version
    pub fn with_runtime_version(mut self, runtime: Version) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Resolve a descriptor's install requirements
    #[instrument(skip(self, descriptor), fields(name = %descriptor.name))]
    pub fn resolve(&self, descriptor: &PackageDescriptor) -> Result<Resolution> {
        if let Some(runtime) = &self.runtime {
            if !descriptor.python_requires.contains(runtime) {
                return Err(DistError::resolution(
                    format!(
                        "{} requires runtime {} but the target runtime is {}",
                        descriptor.name, descriptor.python_requires, runtime
                    ),
                    descriptor.name.clone(),
                    vec![descriptor.python_requires.to_string()],
                ));
            }
        }
        self.resolve_requirements(&descriptor.name, &descriptor.install_requires)
    }

    /// Resolve `requirements` declared by `root`
    #[instrument(skip(self, requirements))]
    pub fn resolve_requirements(&self, root: &str, requirements: &[Requirement]) -> Result<Resolution> {
        info!("Resolving {} requirement(s) for {}", requirements.len(), root);

        let mut constraints: BTreeMap<String, Vec<Constraint>> = BTreeMap::new();
        let mut selected: BTreeMap<String, ResolvedPackage> = BTreeMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let root_keys: BTreeSet<String> = requirements.iter().map(Requirement::key).collect();

        for req in requirements {
            let key = req.key();
            constraints.entry(key.clone()).or_default().push(Constraint {
                origin: root.to_string(),
                requirement: req.clone(),
            });
            queue.push_back(key);
        }

        let mut rounds = 0;
        while let Some(key) = queue.pop_front() {
            rounds += 1;
            if rounds > MAX_ROUNDS {
                return Err(DistError::resolution(
                    format!("resolution did not settle after {MAX_ROUNDS} rounds"),
                    key,
                    Vec::new(),
                ));
            }

            let active = self.active_constraints(&key, &constraints);
            if active.is_empty() {
                if selected.contains_key(&key) {
                    debug!("{} is no longer required, dropping it", key);
                    release_selection(&key, &mut constraints, &mut selected, &mut queue);
                }
                continue;
            }

            if let Some(current) = selected.get(&key) {
                if active.iter().all(|c| c.requirement.specifiers.contains(&current.version)) {
                    continue;
                }
                debug!(
                    "{} {} no longer satisfies its constraints, reselecting",
                    current.name, current.version
                );
                release_selection(&key, &mut constraints, &mut selected, &mut queue);
            }

            let choice = self.select(&key, &active)?;
            debug!("Selected {} {}", choice.name, choice.version);

            for req in &choice.requires {
                let dep_key = req.key();
                constraints.entry(dep_key.clone()).or_default().push(Constraint {
                    origin: key.clone(),
                    requirement: req.clone(),
                });
                queue.push_back(dep_key);
            }
            selected.insert(key, choice);
        }

        // Drop selections nothing requires any more
        let reachable = reachable_keys(&root_keys, &selected);
        selected.retain(|key, _| reachable.contains(key));

        for (key, pkg) in selected.iter_mut() {
            pkg.required_by = constraints
                .get(key)
                .into_iter()
                .flatten()
                .map(|c| c.origin.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
        }

        info!("Resolved {} distribution(s)", selected.len());
        Ok(Resolution { packages: selected })
    }

    fn active_constraints(&self, key: &str, constraints: &BTreeMap<String, Vec<Constraint>>) -> Vec<Constraint> {
        let current = constraints.get(key).cloned().unwrap_or_default();
        match self.overrides.get(key) {
            Some(req) if !current.is_empty() => vec![Constraint {
                origin: "override".to_string(),
                requirement: req.clone(),
            }],
            _ => current,
        }
    }

    /// Pick a version of `key` satisfying every active constraint
    fn select(&self, key: &str, active: &[Constraint]) -> Result<ResolvedPackage> {
        let display_name = active
            .first()
            .map_or_else(|| key.to_string(), |c| c.requirement.name.clone());
        let described: Vec<String> = active.iter().map(|c| c.requirement.to_string()).collect();
        let satisfies = |v: &Version| active.iter().all(|c| c.requirement.specifiers.contains(v));

        if let Some(version) = self.installed.and_then(|env| env.get(key)) {
            if satisfies(version) {
                return Ok(ResolvedPackage {
                    name: display_name,
                    version: version.clone(),
                    source: ResolvedSource::Installed,
                    requires: self
                        .index
                        .find(key, version)
                        .map(|r| r.requires.clone())
                        .unwrap_or_default(),
                    required_by: Vec::new(),
                });
            }
            if !self.overrides.contains_key(key) {
                return Err(DistError::conflict(
                    format!(
                        "installed {} {} does not satisfy {} and no override was given",
                        display_name,
                        version,
                        described.join(", ")
                    ),
                    display_name,
                    described,
                ));
            }
            warn!("Replacing installed {} {} because of an override", display_name, version);
        }

        let releases = self.index.releases(key);
        if releases.is_empty() {
            return Err(DistError::resolution(
                format!("{display_name} is not available in the package index"),
                display_name,
                described,
            ));
        }

        let mut candidates: Vec<&IndexRelease> = releases
            .iter()
            .filter(|r| !r.yanked)
            .filter(|r| match &self.runtime {
                Some(runtime) => r.requires_python.contains(runtime),
                None => true,
            })
            .collect();
        candidates.sort_by(|a, b| b.version.cmp(&a.version));

        if candidates.is_empty() {
            return Err(DistError::resolution(
                format!("no release of {display_name} supports the target runtime"),
                display_name,
                described,
            ));
        }

        let allow_pre = active.iter().any(|c| c.requirement.specifiers.allows_prereleases());
        let matching: Vec<&IndexRelease> =
            candidates.iter().copied().filter(|r| satisfies(&r.version)).collect();

        let chosen = matching
            .iter()
            .find(|r| allow_pre || !r.version.is_prerelease())
            .or_else(|| matching.first());

        match chosen {
            Some(release) => Ok(ResolvedPackage {
                name: release.name.clone(),
                version: release.version.clone(),
                source: ResolvedSource::Index,
                requires: release.requires.clone(),
                required_by: Vec::new(),
            }),
            None => {
                let each_satisfiable = active.len() > 1
                    && active.iter().all(|c| {
                        candidates
                            .iter()
                            .any(|r| c.requirement.specifiers.contains(&r.version))
                    });
                if each_satisfiable {
                    let origins: Vec<String> = active
                        .iter()
                        .map(|c| format!("{} (from {})", c.requirement, c.origin))
                        .collect();
                    Err(DistError::conflict(
                        format!(
                            "requirements on {} are mutually exclusive: {}",
                            display_name,
                            origins.join(", ")
                        ),
                        display_name,
                        described,
                    ))
                } else {
                    Err(DistError::resolution(
                        format!("no version of {} satisfies {}", display_name, described.join(", ")),
                        display_name,
                        described,
                    ))
                }
            }
        }
    }
}

/// Drop the selection of `key` and everything it introduced. Selections left
/// without any constraint go too; the rest are queued for a recheck.
fn release_selection(
    key: &str,
    constraints: &mut BTreeMap<String, Vec<Constraint>>,
    selected: &mut BTreeMap<String, ResolvedPackage>,
    queue: &mut VecDeque<String>,
) {
    selected.remove(key);
    let mut pending = withdraw(key, constraints);
    while let Some(affected) = pending.pop() {
        let orphaned = selected.contains_key(&affected)
            && constraints.get(&affected).is_none_or(Vec::is_empty);
        if orphaned {
            debug!("{} is no longer required, dropping it", affected);
            selected.remove(&affected);
            pending.extend(withdraw(&affected, constraints));
        } else {
            queue.push_back(affected);
        }
    }
}

/// Remove constraints introduced by `origin`, returning the names they constrained
fn withdraw(origin: &str, constraints: &mut BTreeMap<String, Vec<Constraint>>) -> Vec<String> {
    let mut affected = Vec::new();
    for (key, list) in constraints.iter_mut() {
        let before = list.len();
        list.retain(|c| c.origin != origin);
        if list.len() != before {
            affected.push(key.clone());
        }
    }
    affected
}

fn reachable_keys(roots: &BTreeSet<String>, selected: &BTreeMap<String, ResolvedPackage>) -> BTreeSet<String> {
    let mut reachable = BTreeSet::new();
    let mut stack: Vec<String> = roots.iter().cloned().collect();
    while let Some(key) = stack.pop() {
        if !reachable.insert(key.clone()) {
            continue;
        }
        if let Some(pkg) = selected.get(&key) {
            stack.extend(pkg.requires.iter().map(Requirement::key));
        }
    }
    reachable
}
