//! Package discovery
//!
//! Scans a source tree for importable units: directories carrying the marker
//! file. A directory without the marker is skipped together with everything
//! below it.

use crate::core::descriptor::{FindPackages, PackageDescriptor, PackagesSpec};
use crate::error::{DistError, Result};
use glob::Pattern;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Packages selected for a build, keyed by dotted name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPackages {
    /// Directory the dotted names are relative to
    pub source_root: PathBuf,
    /// Dotted name to package directory
    pub packages: BTreeMap<String, PathBuf>,
}

impl DiscoveredPackages {
    /// Dotted package names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.packages.keys().map(String::as_str).collect()
    }

    /// Top-level package names (no dot)
    pub fn top_level(&self) -> Vec<&str> {
        self.packages
            .keys()
            .filter(|name| !name.contains('.'))
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }
}

/// Finds the packages a descriptor ships
#[derive(Debug, Default)]
pub struct PackageDiscovery;

impl PackageDiscovery {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the descriptor's `packages` field into concrete directories
    #[instrument(skip(self, descriptor), fields(name = %descriptor.name))]
    pub fn discover(&self, descriptor: &PackageDescriptor) -> Result<DiscoveredPackages> {
        let discovered = match &descriptor.packages {
            PackagesSpec::Find(options) => {
                let source_root = if options.root == Path::new(".") {
                    descriptor.project_dir.clone()
                } else {
                    descriptor.project_dir.join(&options.root)
                };
                let names = self.find_packages(&source_root, options)?;
                DiscoveredPackages {
                    packages: names
                        .into_iter()
                        .map(|name| {
                            let dir = package_dir(&source_root, &name);
                            (name, dir)
                        })
                        .collect(),
                    source_root,
                }
            }
            PackagesSpec::Explicit(names) => {
                let source_root = descriptor.project_dir.clone();
                let mut packages = BTreeMap::new();
                for name in names {
                    let dir = package_dir(&source_root, name);
                    if !dir.is_dir() {
                        return Err(DistError::validation(format!(
                            "listed package '{}' has no directory at {}",
                            name,
                            dir.display()
                        )));
                    }
                    packages.insert(name.clone(), dir);
                }
                DiscoveredPackages {
                    source_root,
                    packages,
                }
            }
        };

        if discovered.is_empty() {
            warn!("No packages found; the archive will contain no code");
        } else {
            info!("Found {} package(s): {:?}", discovered.packages.len(), discovered.names());
        }

        for key in descriptor.package_data.keys() {
            if !key.is_empty() && !discovered.contains(key) {
                warn!("package_data names '{}' which is not among the discovered packages", key);
            }
        }

        Ok(discovered)
    }

    /// Walk `root` and return the sorted dotted names of every package
    #[instrument(skip(self))]
    pub fn find_packages(&self, root: &Path, options: &FindPackages) -> Result<Vec<String>> {
        if !root.is_dir() {
            return Err(DistError::validation(format!(
                "package source root not found: {}",
                root.display()
            )));
        }

        let include = compile_patterns(&options.include)?;
        let exclude = compile_patterns(&options.exclude)?;

        let mut found = Vec::new();
        self.walk(root, None, &options.marker, &mut found)?;

        let mut selected: Vec<String> = found
            .into_iter()
            .filter(|name| include.iter().any(|p| p.matches(name)))
            .filter(|name| !exclude.iter().any(|p| p.matches(name)))
            .collect();
        selected.sort();

        debug!("Discovery under {} selected {:?}", root.display(), selected);
        Ok(selected)
    }

    fn walk(&self, dir: &Path, prefix: Option<&str>, marker: &str, found: &mut Vec<String>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| DistError::file_system("read_dir", dir, e))?;

        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DistError::file_system("read_dir", dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                debug!("Skipping non UTF-8 directory: {}", path.display());
                continue;
            };
            // Dotted or hidden names cannot be imported
            if name.contains('.') || name.starts_with('.') {
                continue;
            }
            subdirs.push((name, path));
        }
        subdirs.sort();

        for (name, path) in subdirs {
            if !path.join(marker).is_file() {
                debug!("Skipping {} (no {})", path.display(), marker);
                continue;
            }
            let dotted = match prefix {
                Some(parent) => format!("{parent}.{name}"),
                None => name,
            };
            debug!("Found package: {}", dotted);
            found.push(dotted.clone());
            self.walk(&path, Some(&dotted), marker, found)?;
        }
        Ok(())
    }
}

/// Directory of a dotted package name under `source_root`
pub fn package_dir(source_root: &Path, dotted: &str) -> PathBuf {
    dotted
        .split('.')
        .fold(source_root.to_path_buf(), |dir, part| dir.join(part))
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| DistError::validation(format!("invalid package pattern '{p}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn sample_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(&root.join("aiflearn/__init__.py"));
        touch(&root.join("aiflearn/metrics/__init__.py"));
        touch(&root.join("aiflearn/metrics/utils.py"));
        touch(&root.join("aiflearn/data/raw/adult/README.md"));
        touch(&root.join("notebooks/inner/__init__.py"));
        touch(&root.join("tests/__init__.py"));
        touch(&root.join("tests/unit/__init__.py"));
        touch(&root.join(".hidden/__init__.py"));
        touch(&root.join("build.tmp/__init__.py"));
        temp_dir
    }

    #[test]
    fn test_find_packages_skips_unmarked_subtrees() {
        let tree = sample_tree();
        let found = PackageDiscovery::new()
            .find_packages(tree.path(), &FindPackages::default())
            .unwrap();
        assert_eq!(
            found,
            vec!["aiflearn", "aiflearn.metrics", "tests", "tests.unit"]
        );
    }

    #[test]
    fn test_find_packages_is_idempotent() {
        let tree = sample_tree();
        let discovery = PackageDiscovery::new();
        let first = discovery.find_packages(tree.path(), &FindPackages::default()).unwrap();
        let second = discovery.find_packages(tree.path(), &FindPackages::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_find_packages_exclude() {
        let tree = sample_tree();
        let options = FindPackages {
            exclude: vec!["tests".to_string(), "tests.*".to_string()],
            ..FindPackages::default()
        };
        let found = PackageDiscovery::new().find_packages(tree.path(), &options).unwrap();
        assert_eq!(found, vec!["aiflearn", "aiflearn.metrics"]);
    }

    #[test]
    fn test_empty_tree_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let found = PackageDiscovery::new()
            .find_packages(temp_dir.path(), &FindPackages::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_discover_explicit_packages() {
        let tree = sample_tree();
        let mut descriptor =
            PackageDescriptor::from_toml("name = \"x\"\nversion = \"1\"\npackages = [\"aiflearn\"]\n", tree.path())
                .unwrap();
        let discovered = PackageDiscovery::new().discover(&descriptor).unwrap();
        assert_eq!(discovered.names(), vec!["aiflearn"]);
        assert_eq!(discovered.packages["aiflearn"], tree.path().join("aiflearn"));

        descriptor.packages = PackagesSpec::Explicit(vec!["missing".to_string()]);
        assert!(PackageDiscovery::new().discover(&descriptor).is_err());
    }

    #[test]
    fn test_package_dir() {
        assert_eq!(
            package_dir(Path::new("src"), "aiflearn.metrics"),
            PathBuf::from("src/aiflearn/metrics")
        );
    }

    #[test]
    fn test_top_level() {
        let tree = sample_tree();
        let descriptor = PackageDescriptor::from_toml("name = \"x\"\nversion = \"1\"\n", tree.path()).unwrap();
        let discovered = PackageDiscovery::new().discover(&descriptor).unwrap();
        assert_eq!(discovered.top_level(), vec!["aiflearn", "tests"]);
    }
}
