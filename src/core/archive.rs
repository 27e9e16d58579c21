//! Archive emission
//!
//! Writes `<name>-<version>.tar.gz` with every bundled file under a single
//! `<name>-<version>/` root plus the metadata directory. The archive is
//! assembled in a `.partial` file and renamed only once complete.

use crate::{
    config::BuildConfig,
    core::bundler::{BundleSummary, BundledFile},
    core::descriptor::PackageDescriptor,
    core::discovery::DiscoveredPackages,
    core::metadata::{METADATA_DIR, MetadataWriter, build_timestamp},
    error::{DistError, Result},
    utils::fs::FileSystemUtils,
};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// One line of the `RECORD` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Path relative to the archive root
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

impl RecordEntry {
    pub fn for_contents(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            sha256: hex::encode(Sha256::digest(bytes)),
            size: bytes.len() as u64,
        }
    }

    /// Parse `path,sha256=<hex>,size`
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.rsplitn(3, ',');
        let size = fields.next()?.parse().ok()?;
        let sha256 = fields.next()?.strip_prefix("sha256=")?.to_string();
        let path = fields.next()?.to_string();
        Some(Self { path, sha256, size })
    }
}

impl std::fmt::Display for RecordEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},sha256={},{}", self.path, self.sha256, self.size)
    }
}

/// A finished archive
#[derive(Debug)]
pub struct BuiltArchive {
    pub path: PathBuf,
    /// Hex SHA-256 of the archive file
    pub sha256: String,
    pub size: u64,
    /// Every member except `RECORD` itself
    pub record: Vec<RecordEntry>,
    pub summary: BundleSummary,
}

/// Builds distribution archives
pub struct ArchiveWriter<'a> {
    descriptor: &'a PackageDescriptor,
    config: &'a BuildConfig,
    fs_utils: FileSystemUtils,
    metadata: MetadataWriter,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(descriptor: &'a PackageDescriptor, config: &'a BuildConfig) -> Self {
        Self {
            descriptor,
            config,
            fs_utils: FileSystemUtils::new(),
            metadata: MetadataWriter::new(),
        }
    }

    /// Final archive path inside the output directory
    pub fn archive_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.tar.gz", self.descriptor.archive_stem()))
    }

    /// Write the archive; nothing is left behind on failure
    #[instrument(skip(self, packages, files), fields(name = %self.descriptor.name))]
    pub fn build(&self, packages: &DiscoveredPackages, files: &[BundledFile]) -> Result<BuiltArchive> {
        let output_dir = &self.config.output_dir;
        self.fs_utils
            .create_dir_all(output_dir)
            .map_err(|e| DistError::file_system("create_dir_all", output_dir, e))?;

        let final_path = self.archive_path();
        let partial_path = PathBuf::from(format!("{}.partial", final_path.display()));

        let record = match self.write_archive(&partial_path, packages, files) {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.fs_utils.remove_file_if_exists(&partial_path) {
                    warn!("Could not remove {}: {}", partial_path.display(), cleanup);
                }
                return Err(e);
            }
        };

        std::fs::rename(&partial_path, &final_path)
            .map_err(|e| DistError::archive_io("failed to finalize archive", &final_path, e))?;

        let (sha256, size) = self
            .fs_utils
            .sha256_file(&final_path)
            .map_err(|e| DistError::file_system("read", &final_path, e))?;

        let summary = BundleSummary::from_files(files);
        info!("Wrote {} ({} bytes). {}", final_path.display(), size, summary);

        Ok(BuiltArchive {
            path: final_path,
            sha256,
            size,
            record,
            summary,
        })
    }

    fn write_archive(
        &self,
        partial_path: &Path,
        packages: &DiscoveredPackages,
        files: &[BundledFile],
    ) -> Result<Vec<RecordEntry>> {
        let io_err = |e: std::io::Error| DistError::archive_io("failed to write archive", partial_path, e);

        let file = File::create(partial_path).map_err(io_err)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let root = self.descriptor.archive_stem();
        let mtime = build_timestamp().timestamp().max(0) as u64;
        let mut record = Vec::new();

        for bundled in files {
            let mut contents = Vec::new();
            File::open(&bundled.source)
                .and_then(|mut f| f.read_to_end(&mut contents))
                .map_err(|e| DistError::file_system("read", &bundled.source, e))?;

            append(&mut builder, &format!("{root}/{}", bundled.archive_path), &contents, mtime)
                .map_err(io_err)?;
            record.push(RecordEntry::for_contents(bundled.archive_path.clone(), &contents));
            debug!("Added {}", bundled.archive_path);
        }

        let build_info = self.metadata.build_info(self.descriptor);
        let metadata_files: Vec<(String, String)> = vec![
            ("PKG-INFO".to_string(), self.metadata.pkg_info(self.descriptor)),
            ("requires.txt".to_string(), self.metadata.requires_txt(self.descriptor)),
            (
                "top_level.txt".to_string(),
                self.metadata.top_level_txt(&packages.top_level()),
            ),
            (
                self.metadata.zip_safety_marker(self.descriptor).to_string(),
                String::new(),
            ),
            ("BUILD-INFO".to_string(), self.metadata.format_build_info(&build_info)),
        ];

        for (name, contents) in &metadata_files {
            let member = format!("{METADATA_DIR}/{name}");
            append(&mut builder, &format!("{root}/{member}"), contents.as_bytes(), mtime)
                .map_err(io_err)?;
            record.push(RecordEntry::for_contents(member, contents.as_bytes()));
        }

        let mut record_text: String = record.iter().map(|entry| format!("{entry}\n")).collect();
        record_text.push_str(&format!("{METADATA_DIR}/RECORD,,\n"));
        append(
            &mut builder,
            &format!("{root}/{METADATA_DIR}/RECORD"),
            record_text.as_bytes(),
            mtime,
        )
        .map_err(io_err)?;

        let encoder = builder.into_inner().map_err(io_err)?;
        let mut file = encoder.finish().map_err(io_err)?;
        file.flush().map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        Ok(record)
    }
}

fn append<W: Write>(builder: &mut tar::Builder<W>, path: &str, contents: &[u8], mtime: u64) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, contents)
}

/// A regular file read out of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// `/`-separated path including the archive root
    pub path: String,
    pub contents: Vec<u8>,
}

/// Every regular file of a `.tar.gz` archive, in stored order
#[instrument]
pub fn read_members(archive: &Path) -> Result<Vec<ArchiveMember>> {
    let file = File::open(archive).map_err(|e| DistError::file_system("open", archive, e))?;
    let mut reader = tar::Archive::new(GzDecoder::new(file));
    let mut members = Vec::new();

    let entries = reader
        .entries()
        .map_err(|e| DistError::archive_io("failed to read archive", archive, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| DistError::archive_io("failed to read entry", archive, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| DistError::archive_io("invalid entry path", archive, e))?
            .to_string_lossy()
            .replace('\\', "/");
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| DistError::archive_io(format!("failed to read {path}"), archive, e))?;
        members.push(ArchiveMember { path, contents });
    }

    debug!("Read {} member(s) from {}", members.len(), archive.display());
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bundler::FileBundler;
    use crate::core::discovery::PackageDiscovery;
    use crate::core::metadata::NOT_ZIP_SAFE;
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
        write(root, "aiflearn/__init__.py", "__version__ = '0.1.dev1'\n");
        write(root, "aiflearn/metrics/__init__.py", "");
        write(root, "aiflearn/data/README.md", "data");
        write(root, "aiflearn/data/raw/adult/README.md", "adult");
        let descriptor = PackageDescriptor::from_toml(
            &format!(
                "name = \"aif360-learn\"\nversion = \"0.1.dev1\"\nzip_safe = false\n\
                 install_requires = [\"pandas==0.23.3\"]\ninclude_package_data = {include}\n\
                 [package_data]\naiflearn = [\"data/*\", \"data/*/*\", \"data/*/*/*\"]\n"
            ),
            root,
        )
        .unwrap();
        (temp_dir, descriptor)
    }

    fn member<'a>(members: &'a [ArchiveMember], path: &str) -> Option<&'a [u8]> {
        members
            .iter()
            .find(|m| m.path == path)
            .map(|m| m.contents.as_slice())
    }

    fn build(descriptor: &PackageDescriptor, out: &Path) -> BuiltArchive {
        let config = BuildConfig {
            output_dir: out.to_path_buf(),
            ..BuildConfig::default()
        };
        let packages = PackageDiscovery::new().discover(descriptor).unwrap();
        let files = FileBundler::new(descriptor, &config).collect(&packages).unwrap();
        ArchiveWriter::new(descriptor, &config).build(&packages, &files).unwrap()
    }

    #[test]
    fn test_build_archive_layout() {
        let (dir, descriptor) = project(true);
        let out = dir.path().join("dist");
        let built = build(&descriptor, &out);

        assert_eq!(built.path, out.join("aif360-learn-0.1.dev1.tar.gz"));
        assert!(!out.join("aif360-learn-0.1.dev1.tar.gz.partial").exists());
        assert_eq!(built.summary.modules, 2);
        assert_eq!(built.summary.data_files, 2);

        let members = read_members(&built.path).unwrap();
        for expected in [
            "aif360-learn-0.1.dev1/aiflearn/__init__.py",
            "aif360-learn-0.1.dev1/aiflearn/metrics/__init__.py",
            "aif360-learn-0.1.dev1/aiflearn/data/README.md",
            "aif360-learn-0.1.dev1/aiflearn/data/raw/adult/README.md",
            "aif360-learn-0.1.dev1/.distpack/PKG-INFO",
            "aif360-learn-0.1.dev1/.distpack/requires.txt",
            "aif360-learn-0.1.dev1/.distpack/top_level.txt",
            "aif360-learn-0.1.dev1/.distpack/not-zip-safe",
            "aif360-learn-0.1.dev1/.distpack/BUILD-INFO",
            "aif360-learn-0.1.dev1/.distpack/RECORD",
        ] {
            assert!(member(&members, expected).is_some(), "missing {expected}");
        }
        assert!(!members.iter().any(|m| m.path.ends_with("/zip-safe")));
    }

    #[test]
    fn test_build_without_package_data() {
        let (dir, descriptor) = project(false);
        let built = build(&descriptor, &dir.path().join("dist"));

        let members = read_members(&built.path).unwrap();
        assert!(!members.iter().any(|m| m.path.contains("/aiflearn/data/")));
        assert_eq!(built.summary.data_files, 0);
    }

    #[test]
    fn test_record_matches_contents() {
        let (dir, descriptor) = project(true);
        let built = build(&descriptor, &dir.path().join("dist"));

        let members = read_members(&built.path).unwrap();
        let record = member(&members, "aif360-learn-0.1.dev1/.distpack/RECORD").unwrap();
        let record = String::from_utf8(record.to_vec()).unwrap();
        let entries: Vec<RecordEntry> = record.lines().filter_map(RecordEntry::parse).collect();
        assert_eq!(entries, built.record);

        let init = entries
            .iter()
            .find(|e| e.path == "aiflearn/__init__.py")
            .unwrap();
        assert_eq!(init.size, 25);
        assert!(record.ends_with(".distpack/RECORD,,\n"));

        let marker = member(&members, &format!("aif360-learn-0.1.dev1/.distpack/{NOT_ZIP_SAFE}"));
        assert_eq!(marker, Some(&[][..]));
        assert!(member(&members, "nope").is_none());
    }

    #[test]
    fn test_failed_build_leaves_nothing() {
        let (dir, descriptor) = project(true);
        let out = dir.path().join("dist");
        let config = BuildConfig {
            output_dir: out.clone(),
            ..BuildConfig::default()
        };
        let packages = PackageDiscovery::new().discover(&descriptor).unwrap();
        let files = vec![BundledFile {
            source: dir.path().join("vanished.py"),
            archive_path: "aiflearn/vanished.py".to_string(),
            origin: crate::core::bundler::BundleOrigin::Module,
        }];

        let result = ArchiveWriter::new(&descriptor, &config).build(&packages, &files);
        assert!(result.is_err());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_record_entry_parse() {
        let entry = RecordEntry::parse("a,b/c.py,sha256=abc,12").unwrap();
        assert_eq!(entry.path, "a,b/c.py");
        assert_eq!(entry.sha256, "abc");
        assert_eq!(entry.size, 12);
        assert!(RecordEntry::parse(".distpack/RECORD,,").is_none());
    }
}
