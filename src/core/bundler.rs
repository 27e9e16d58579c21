//! File bundling
//!
//! Gathers the module files of every package and, when the descriptor asks
//! for it, the data files matched by `package_data` patterns or listed in a
//! data manifest.

use crate::{
    config::BuildConfig,
    core::descriptor::PackageDescriptor,
    core::discovery::DiscoveredPackages,
    error::{DistError, Result},
    utils::fs::{FileSystemUtils, to_archive_path, without_cur_dir},
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Why a file is in the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleOrigin {
    /// Source module of a package
    Module,
    /// Matched by a `package_data` pattern
    PackageData,
    /// Listed in the data manifest
    Manifest,
}

/// A file scheduled for the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledFile {
    /// Path on disk
    pub source: PathBuf,
    /// `/`-separated path relative to the archive root
    pub archive_path: String,
    pub origin: BundleOrigin,
}

/// Collects the files a build ships
pub struct FileBundler<'a> {
    descriptor: &'a PackageDescriptor,
    config: &'a BuildConfig,
    fs_utils: FileSystemUtils,
}

impl<'a> FileBundler<'a> {
    /// Create a bundler for `descriptor` using the build settings
    pub fn new(descriptor: &'a PackageDescriptor, config: &'a BuildConfig) -> Self {
        Self {
            descriptor,
            config,
            fs_utils: FileSystemUtils::new(),
        }
    }

    /// Modules and data files, ordered by archive path without duplicates
    #[instrument(skip(self, packages))]
    pub fn collect(&self, packages: &DiscoveredPackages) -> Result<Vec<BundledFile>> {
        let mut files: BTreeMap<String, BundledFile> = BTreeMap::new();

        for file in self.collect_modules(packages)? {
            files.insert(file.archive_path.clone(), file);
        }
        for file in self.collect_data(packages)? {
            files.entry(file.archive_path.clone()).or_insert(file);
        }

        Ok(files.into_values().collect())
    }

    /// Files directly inside each package directory with a source extension
    #[instrument(skip(self, packages))]
    pub fn collect_modules(&self, packages: &DiscoveredPackages) -> Result<Vec<BundledFile>> {
        let mut modules = Vec::new();

        for (name, dir) in &packages.packages {
            let entries = std::fs::read_dir(dir).map_err(|e| DistError::file_system("read_dir", dir, e))?;
            let mut found = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|e| DistError::file_system("read_dir", dir, e))?
                    .path();
                let matches_extension = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| self.config.source_extensions.iter().any(|s| s == ext));
                if path.is_file() && matches_extension {
                    found.push(path);
                }
            }
            found.sort();
            debug!("Package {} has {} module file(s)", name, found.len());

            for path in found {
                modules.push(self.bundled(&packages.source_root, path, BundleOrigin::Module)?);
            }
        }

        Ok(modules)
    }

    /// Data files, honoring `include_package_data` and the build override
    #[instrument(skip(self, packages))]
    pub fn collect_data(&self, packages: &DiscoveredPackages) -> Result<Vec<BundledFile>> {
        if !self.descriptor.bundles_data(self.config.include_package_data) {
            info!(
                "Package data disabled; skipping {} pattern group(s)",
                self.descriptor.package_data.len()
            );
            return Ok(Vec::new());
        }

        let mut data = Vec::new();

        for (name, dir) in &packages.packages {
            for pattern in self.descriptor.data_patterns_for(name) {
                let matched = self.expand_pattern(dir, pattern)?;
                if matched.is_empty() {
                    warn!("Pattern '{}' for package '{}' matched no files", pattern, name);
                }
                for path in matched {
                    data.push(self.bundled(&packages.source_root, path, BundleOrigin::PackageData)?);
                }
            }
        }

        if let Some(manifest) = &self.descriptor.data_manifest {
            data.extend(self.read_manifest(manifest, &packages.source_root)?);
        }

        info!("Collected {} data file(s)", data.len());
        Ok(data)
    }

    /// Regular files matching `pattern` under `package_dir`
    fn expand_pattern(&self, package_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let dir = package_dir
            .to_str()
            .ok_or_else(|| DistError::bundle("package directory is not valid UTF-8", package_dir))?;
        let full_pattern = format!("{}/{}", glob::Pattern::escape(dir), pattern);

        let paths = glob::glob(&full_pattern).map_err(|e| {
            DistError::bundle(format!("invalid pattern '{pattern}': {e}"), package_dir)
        })?;

        let mut files = Vec::new();
        for path_result in paths {
            match path_result {
                Ok(path) if path.is_file() => files.push(path),
                Ok(path) => debug!("Skipping non-file match: {}", path.display()),
                Err(e) => warn!("Error reading path for pattern {}: {}", pattern, e),
            }
        }
        files.sort();
        Ok(files)
    }

    /// Explicit data paths, one per line, relative to the descriptor
    fn read_manifest(&self, manifest: &Path, source_root: &Path) -> Result<Vec<BundledFile>> {
        let manifest_path = self.descriptor.project_dir.join(manifest);
        let content = self
            .fs_utils
            .read_file_to_string(&manifest_path)
            .map_err(|e| DistError::file_system("read", &manifest_path, e))?;

        let mut files = Vec::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let path = self.descriptor.project_dir.join(line);
            if !path.is_file() {
                return Err(DistError::bundle(
                    format!("data manifest entry '{line}' does not exist"),
                    &manifest_path,
                ));
            }
            files.push(self.bundled(source_root, path, BundleOrigin::Manifest)?);
        }
        debug!("Data manifest listed {} file(s)", files.len());
        Ok(files)
    }

    fn bundled(&self, source_root: &Path, path: PathBuf, origin: BundleOrigin) -> Result<BundledFile> {
        let archive_path = without_cur_dir(&path)
            .strip_prefix(without_cur_dir(source_root))
            .ok()
            .and_then(to_archive_path)
            .ok_or_else(|| DistError::bundle("file lies outside the package source root", &path))?;
        Ok(BundledFile {
            source: path,
            archive_path,
            origin,
        })
    }
}

/// Counts of bundled files by origin
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BundleSummary {
    pub total: usize,
    pub modules: usize,
    pub data_files: usize,
}

impl BundleSummary {
    pub fn from_files(files: &[BundledFile]) -> Self {
        let modules = files
            .iter()
            .filter(|f| f.origin == BundleOrigin::Module)
            .count();
        Self {
            total: files.len(),
            modules,
            data_files: files.len() - modules,
        }
    }
}

impl std::fmt::Display for BundleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bundled {} files: {} modules, {} data files",
            self.total, self.modules, self.data_files
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::discovery::PackageDiscovery;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project(include: bool) -> (TempDir, PackageDescriptor) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "aiflearn/__init__.py", "");
        write(root, "aiflearn/metrics/__init__.py", "");
        write(root, "aiflearn/metrics/metric.py", "class Metric: pass\n");
        write(root, "aiflearn/metrics/notes.txt", "not a module");
        write(root, "aiflearn/data/README.md", "level one");
        write(root, "aiflearn/data/raw/README.md", "level two");
        write(root, "aiflearn/data/raw/adult/README.md", "level three");
        write(root, "aiflearn/data/raw/adult/deep/too_deep.csv", "level four");

        let descriptor = PackageDescriptor::from_toml(
            &format!(
                "name = \"aif360-learn\"\nversion = \"0.1.dev1\"\ninclude_package_data = {include}\n\
                 [package_data]\naiflearn = [\"data/*\", \"data/*/*\", \"data/*/*/*\"]\n"
            ),
            root,
        )
        .unwrap();
        (temp_dir, descriptor)
    }

    fn paths(files: &[BundledFile]) -> Vec<&str> {
        files.iter().map(|f| f.archive_path.as_str()).collect()
    }

    #[test]
    fn test_collect_modules() {
        let (_dir, descriptor) = project(true);
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig::default();
        let modules = FileBundler::new(&descriptor, &config).collect_modules(&packages).unwrap();
        assert_eq!(
            paths(&modules),
            vec!["aiflearn/__init__.py", "aiflearn/metrics/__init__.py", "aiflearn/metrics/metric.py"]
        );
    }

    #[test]
    fn test_collect_data_three_levels() {
        let (_dir, descriptor) = project(true);
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig::default();
        let data = FileBundler::new(&descriptor, &config).collect_data(&packages).unwrap();
        assert_eq!(
            paths(&data),
            vec![
                "aiflearn/data/README.md",
                "aiflearn/data/raw/README.md",
                "aiflearn/data/raw/adult/README.md",
            ]
        );
        assert!(data.iter().all(|f| f.origin == BundleOrigin::PackageData));
    }

    #[test]
    fn test_include_flag_disables_data() {
        let (_dir, descriptor) = project(false);
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig::default();
        let bundler = FileBundler::new(&descriptor, &config);
        assert!(bundler.collect_data(&packages).unwrap().is_empty());

        let files = bundler.collect(&packages).unwrap();
        assert_eq!(BundleSummary::from_files(&files).data_files, 0);
    }

    #[test]
    fn test_build_override_wins() {
        let (_dir, descriptor) = project(true);
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig {
            include_package_data: Some(false),
            ..BuildConfig::default()
        };
        let data = FileBundler::new(&descriptor, &config).collect_data(&packages).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_pattern_matching_nothing_is_not_an_error() {
        let (dir, mut descriptor) = project(true);
        fs::remove_dir_all(dir.path().join("aiflearn/data")).unwrap();
        descriptor
            .package_data
            .insert("aiflearn".to_string(), vec!["data/*.csv".to_string()]);
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig::default();
        let data = FileBundler::new(&descriptor, &config).collect_data(&packages).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_data_manifest() {
        let (dir, mut descriptor) = project(true);
        descriptor.package_data.clear();
        write(dir.path(), "MANIFEST", "# explicit data\naiflearn/data/raw/adult/README.md\n\n");
        descriptor.data_manifest = Some(PathBuf::from("MANIFEST"));
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig::default();
        let bundler = FileBundler::new(&descriptor, &config);

        let data = bundler.collect_data(&packages).unwrap();
        assert_eq!(paths(&data), vec!["aiflearn/data/raw/adult/README.md"]);
        assert_eq!(data[0].origin, BundleOrigin::Manifest);

        write(dir.path(), "MANIFEST", "aiflearn/data/missing.csv\n");
        assert!(matches!(bundler.collect_data(&packages), Err(DistError::Bundle { .. })));
    }

    #[test]
    fn test_relative_project_dir() {
        // Unit tests run from the crate root
        let project_dir = Path::new("./demos/aif360-learn");
        let descriptor =
            PackageDescriptor::from_toml(include_str!("../../demos/aif360-learn/package.toml"), project_dir)
                .unwrap();
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let config = BuildConfig::default();
        let files = FileBundler::new(&descriptor, &config).collect(&packages).unwrap();
        assert!(paths(&files).contains(&"aiflearn/data/raw/adult/README.md"));
        assert!(paths(&files).contains(&"aiflearn/metrics/dataset_metric.py"));
    }

    #[test]
    fn test_bundle_summary() {
        let files = vec![
            BundledFile {
                source: PathBuf::from("a/__init__.py"),
                archive_path: "a/__init__.py".to_string(),
                origin: BundleOrigin::Module,
            },
            BundledFile {
                source: PathBuf::from("a/data/x.csv"),
                archive_path: "a/data/x.csv".to_string(),
                origin: BundleOrigin::PackageData,
            },
        ];
        let summary = BundleSummary::from_files(&files);
        assert_eq!(summary.to_string(), "Bundled 2 files: 1 modules, 1 data files");
    }
}
