//! Archive installation
//!
//! Archives marked not zip-safe are always extracted so their data files
//! exist as real filesystem paths. Zip-safe archives are copied unchanged
//! unless extraction is forced. Either way every member is checked against
//! `RECORD` before anything touches the target directory.

use crate::{
    config::InstallConfig,
    core::archive::{ArchiveMember, RecordEntry, read_members},
    core::metadata::{BuildInfo, METADATA_DIR, MetadataWriter, NOT_ZIP_SAFE, PkgInfo, ZIP_SAFE},
    error::{DistError, Result},
    utils::fs::{FileSystemUtils, from_archive_path},
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// How an archive ended up in the target directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Members unpacked onto the filesystem
    Extracted,
    /// Archive copied as a single file
    Archived,
}

/// Outcome of an install
#[derive(Debug)]
pub struct InstallReport {
    pub mode: InstallMode,
    /// `<name>-<version>` root of the archive
    pub distribution: String,
    /// Provenance from `BUILD-INFO`, when the archive has one
    pub build_info: Option<BuildInfo>,
    /// Installed files, or the copied archive
    pub files: Vec<PathBuf>,
}

/// Archive contents that passed verification, relative to the root
struct VerifiedArchive {
    distribution: String,
    zip_safe: bool,
    build_info: Option<BuildInfo>,
    files: Vec<(String, Vec<u8>)>,
}

/// Installs built archives into a target directory
pub struct Installer<'a> {
    config: &'a InstallConfig,
    fs_utils: FileSystemUtils,
    metadata: MetadataWriter,
}

impl<'a> Installer<'a> {
    pub fn new(config: &'a InstallConfig) -> Self {
        Self {
            config,
            fs_utils: FileSystemUtils::new(),
            metadata: MetadataWriter::new(),
        }
    }

    #[instrument(skip(self), fields(target = %self.config.target_dir.display()))]
    pub fn install(&self, archive: &Path) -> Result<InstallReport> {
        if !archive.is_file() {
            return Err(DistError::install("archive not found", archive));
        }

        let verified = self.verify(archive, read_members(archive)?)?;
        if let Some(build) = &verified.build_info {
            debug!("{} was built by {} at {}", verified.distribution, build.build_tool, build.build_date);
        }

        self.fs_utils
            .create_dir_all(&self.config.target_dir)
            .map_err(|e| DistError::file_system("create_dir_all", &self.config.target_dir, e))?;

        if verified.zip_safe && !self.config.always_unzip {
            let file_name = archive
                .file_name()
                .ok_or_else(|| DistError::install("archive path has no file name", archive))?;
            let dest = self.config.target_dir.join(file_name);
            self.fs_utils
                .copy_file(archive, &dest)
                .map_err(|e| DistError::file_system("copy", &dest, e))?;
            info!("Installed {} as an archive at {}", verified.distribution, dest.display());
            return Ok(InstallReport {
                mode: InstallMode::Archived,
                distribution: verified.distribution,
                build_info: verified.build_info,
                files: vec![dest],
            });
        }

        if !verified.zip_safe {
            debug!("{} is not zip-safe; extracting", verified.distribution);
        }
        let files = self.extract(archive, &verified)?;
        info!("Extracted {} file(s) for {}", files.len(), verified.distribution);

        Ok(InstallReport {
            mode: InstallMode::Extracted,
            distribution: verified.distribution,
            build_info: verified.build_info,
            files,
        })
    }

    /// Strip the root and check members against `RECORD` and `PKG-INFO`
    fn verify(&self, archive: &Path, members: Vec<ArchiveMember>) -> Result<VerifiedArchive> {
        let distribution = distribution_root(&members)
            .ok_or_else(|| DistError::install("archive members do not share a single root", archive))?;

        let mut files: Vec<(String, Vec<u8>)> = Vec::with_capacity(members.len());
        let mut seen = BTreeSet::new();
        for member in members {
            let relative = member
                .path
                .strip_prefix(distribution.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .ok_or_else(|| {
                    DistError::install(format!("member '{}' is outside the archive root", member.path), archive)
                })?
                .to_string();
            if !seen.insert(relative.clone()) {
                return Err(DistError::install(format!("member '{relative}' appears twice"), archive));
            }
            files.push((relative, member.contents));
        }

        let record_path = format!("{METADATA_DIR}/RECORD");
        let contents_of = |path: &str| {
            files
                .iter()
                .find(|(relative, _)| relative == path)
                .map(|(_, contents)| contents.as_slice())
        };

        let record_text = contents_of(&record_path)
            .ok_or_else(|| DistError::install("archive has no RECORD", archive))?;
        let mut record: BTreeMap<String, RecordEntry> = String::from_utf8_lossy(record_text)
            .lines()
            .filter_map(RecordEntry::parse)
            .map(|entry| (entry.path.clone(), entry))
            .collect();

        for (relative, contents) in &files {
            if *relative == record_path {
                continue;
            }
            let expected = record
                .remove(relative)
                .ok_or_else(|| DistError::install(format!("'{relative}' is not listed in RECORD"), archive))?;
            let actual = RecordEntry::for_contents(relative.clone(), contents);
            if actual.sha256 != expected.sha256 || actual.size != expected.size {
                return Err(DistError::install(format!("'{relative}' does not match RECORD"), archive));
            }
        }
        if !record.is_empty() {
            let missing: Vec<&str> = record.keys().map(String::as_str).collect();
            return Err(DistError::install(
                format!("RECORD lists files missing from the archive: {}", missing.join(", ")),
                archive,
            ));
        }

        let has = |name: &str| contents_of(&format!("{METADATA_DIR}/{name}")).is_some();
        let zip_safe = match (has(ZIP_SAFE), has(NOT_ZIP_SAFE)) {
            (true, false) => true,
            (false, true) => false,
            _ => {
                return Err(DistError::install(
                    "archive carries no single zip-safety marker",
                    archive,
                ));
            }
        };

        let pkg_info = contents_of(&format!("{METADATA_DIR}/PKG-INFO"))
            .map(|bytes| self.metadata.parse_pkg_info(&String::from_utf8_lossy(bytes)))
            .ok_or_else(|| DistError::install("archive has no PKG-INFO", archive))?;
        check_identity(&pkg_info, &distribution, archive)?;
        debug!("{distribution} requires: {:?}", pkg_info.get_all("Requires-Dist"));

        let build_info = contents_of(&format!("{METADATA_DIR}/BUILD-INFO"))
            .map(|bytes| self.metadata.parse_build_info(&String::from_utf8_lossy(bytes)));
        if let Some(build) = &build_info {
            if build.zip_safe != zip_safe {
                warn!("BUILD-INFO and the zip-safety marker disagree; using the marker");
            }
        }

        Ok(VerifiedArchive {
            distribution,
            zip_safe,
            build_info,
            files,
        })
    }

    /// Write verified members; files already written are removed on failure
    fn extract(&self, archive: &Path, verified: &VerifiedArchive) -> Result<Vec<PathBuf>> {
        let target = &self.config.target_dir;
        let metadata_prefix = format!("{METADATA_DIR}/");
        let metadata_dir = target.join(METADATA_DIR).join(&verified.distribution);

        // Metadata is kept per distribution so installs do not collide
        let mut planned = Vec::with_capacity(verified.files.len());
        for (relative, contents) in &verified.files {
            let dest = match relative.strip_prefix(&metadata_prefix) {
                Some(name) => from_archive_path(&metadata_dir, name),
                None => from_archive_path(target, relative),
            }
            .ok_or_else(|| DistError::install(format!("member '{relative}' escapes the target directory"), archive))?;
            planned.push((dest, contents.as_slice()));
        }

        let mut written = Vec::with_capacity(planned.len() + 1);
        let result = (|| -> Result<()> {
            for (dest, contents) in &planned {
                self.fs_utils
                    .write_file(dest, contents)
                    .map_err(|e| DistError::file_system("write", dest, e))?;
                debug!("Installed {}", dest.display());
                written.push(dest.clone());
            }

            let listing: String = written
                .iter()
                .map(|path| format!("{}\n", path.strip_prefix(target).unwrap_or(path).display()))
                .collect();
            let installed_file = metadata_dir.join("INSTALLED");
            self.fs_utils
                .write_file(&installed_file, listing)
                .map_err(|e| DistError::file_system("write", &installed_file, e))?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(written),
            Err(e) => {
                for path in &written {
                    if let Err(cleanup) = self.fs_utils.remove_file_if_exists(path) {
                        warn!("Could not remove {}: {}", path.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }
}

/// `Name` and `Version` must spell the archive root
fn check_identity(pkg_info: &PkgInfo, distribution: &str, archive: &Path) -> Result<()> {
    let name = pkg_info.get("Name").unwrap_or_default();
    let version = pkg_info.get("Version").unwrap_or_default();
    let declared = format!("{name}-{version}");
    if declared != distribution {
        return Err(DistError::install(
            format!("PKG-INFO describes '{declared}' but the archive root is '{distribution}'"),
            archive,
        ));
    }
    Ok(())
}

/// Single top-level directory shared by every member
fn distribution_root(members: &[ArchiveMember]) -> Option<String> {
    let mut root: Option<&str> = None;
    for member in members {
        let first = member.path.split('/').next().filter(|part| !part.is_empty())?;
        match root {
            Some(existing) if existing != first => return None,
            Some(_) => {}
            None => root = Some(first),
        }
    }
    root.map(str::to_string)
}

/// Maps package-relative resource names onto an install directory
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    root: PathBuf,
}

impl ResourceLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path of `relative` inside the dotted `package`, if installed
    pub fn locate(&self, package: &str, relative: &str) -> Option<PathBuf> {
        let package_path = package.replace('.', "/");
        let path = from_archive_path(&self.root, &format!("{package_path}/{relative}"))?;
        path.is_file().then_some(path)
    }
}
