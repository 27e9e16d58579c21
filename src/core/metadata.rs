//! Distribution metadata files
//!
//! Renders the files stored under the archive's metadata directory:
//! `PKG-INFO`, `requires.txt`, `top_level.txt`, the zip-safety marker and
//! `BUILD-INFO`.

use crate::{
    core::descriptor::PackageDescriptor,
    error::{DistError, Result},
    utils::fs::FileSystemUtils,
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, env, path::Path};
use tracing::{debug, info, instrument};

/// Directory inside the archive root holding metadata files
pub const METADATA_DIR: &str = ".distpack";
/// Marker written when the package may run from an archive
pub const ZIP_SAFE: &str = "zip-safe";
/// Marker written when installers must extract the package
pub const NOT_ZIP_SAFE: &str = "not-zip-safe";

/// Build provenance written to `BUILD-INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub package_name: String,
    pub version: String,
    pub zip_safe: bool,
    /// Tool name and version that produced the archive
    pub build_tool: String,
    /// Build timestamp in RFC3339 format
    pub build_date: String,
}

/// Fields read back from a `PKG-INFO` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgInfo {
    pub headers: Vec<(String, String)>,
    pub description: String,
}

impl PkgInfo {
    /// First value of a header
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated header
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Renders and writes metadata files
#[derive(Debug)]
pub struct MetadataWriter {
    fs_utils: FileSystemUtils,
}

impl MetadataWriter {
    pub fn new() -> Self {
        Self {
            fs_utils: FileSystemUtils::new(),
        }
    }

    /// Write a standalone `PKG-INFO` file
    #[instrument(skip(self, descriptor, output_file))]
    pub fn generate<P: AsRef<Path>>(&self, descriptor: &PackageDescriptor, output_file: P) -> Result<String> {
        let output_file = output_file.as_ref();
        info!("Writing package metadata to: {}", output_file.display());

        let content = self.pkg_info(descriptor);
        self.fs_utils
            .write_file(output_file, content.as_bytes())
            .map_err(|e| DistError::file_system("write", output_file, e))?;

        Ok(content)
    }

    /// Core metadata in `Key: value` form followed by the long description
    pub fn pkg_info(&self, descriptor: &PackageDescriptor) -> String {
        let mut out = String::new();
        let mut header = |key: &str, value: &str| {
            if !value.is_empty() {
                out.push_str(&format!("{key}: {value}\n"));
            }
        };

        header("Metadata-Version", "2.1");
        header("Name", &descriptor.name);
        header("Version", &descriptor.version.to_string());
        header("Summary", &descriptor.description);
        header("Home-page", &descriptor.url);
        header("Author", &descriptor.author);
        header("Author-email", &descriptor.author_email);
        header("License", &descriptor.license);
        header("Requires-Python", &descriptor.python_requires.to_string());
        header("Description-Content-Type", &descriptor.long_description_content_type);
        for req in &descriptor.install_requires {
            header("Requires-Dist", &req.to_string());
        }

        out.push('\n');
        out.push_str(&descriptor.long_description);
        if !descriptor.long_description.is_empty() && !descriptor.long_description.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    /// One requirement per line, in declaration order
    pub fn requires_txt(&self, descriptor: &PackageDescriptor) -> String {
        descriptor
            .install_requires
            .iter()
            .map(|req| format!("{req}\n"))
            .collect()
    }

    /// Top-level package names, one per line
    pub fn top_level_txt(&self, top_level: &[&str]) -> String {
        top_level.iter().map(|name| format!("{name}\n")).collect()
    }

    /// Name of the zip-safety marker file for a descriptor
    pub fn zip_safety_marker(&self, descriptor: &PackageDescriptor) -> &'static str {
        if descriptor.zip_safe { ZIP_SAFE } else { NOT_ZIP_SAFE }
    }

    /// Build provenance; `SOURCE_DATE_EPOCH` pins the timestamp
    pub fn build_info(&self, descriptor: &PackageDescriptor) -> BuildInfo {
        BuildInfo {
            package_name: descriptor.name.clone(),
            version: descriptor.version.to_string(),
            zip_safe: descriptor.zip_safe,
            build_tool: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            build_date: build_timestamp().to_rfc3339(),
        }
    }

    /// Format build info as an environment file
    pub fn format_build_info(&self, info: &BuildInfo) -> String {
        format!(
            r#"PACKAGE_NAME={}
VERSION={}
ZIP_SAFE={}
BUILD_TOOL="{}"
BUILD_DATE={}
"#,
            info.package_name, info.version, info.zip_safe, info.build_tool, info.build_date
        )
    }

    /// Parse `BUILD-INFO` content
    pub fn parse_build_info(&self, content: &str) -> BuildInfo {
        let mut vars = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                vars.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
            }
        }

        let get = |key: &str, default: &str| vars.get(key).cloned().unwrap_or_else(|| default.to_string());
        BuildInfo {
            package_name: get("PACKAGE_NAME", "unknown"),
            version: get("VERSION", "unknown"),
            zip_safe: get("ZIP_SAFE", "true") == "true",
            build_tool: get("BUILD_TOOL", "unknown"),
            build_date: get("BUILD_DATE", "unknown"),
        }
    }

    /// Parse `PKG-INFO` content
    pub fn parse_pkg_info(&self, content: &str) -> PkgInfo {
        let mut info = PkgInfo::default();
        let mut lines = content.lines();

        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                info.headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        let body: Vec<&str> = lines.collect();
        info.description = body.join("\n");
        debug!("Parsed {} metadata header(s)", info.headers.len());
        info
    }
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time, or `SOURCE_DATE_EPOCH` when set for reproducible builds
pub fn build_timestamp() -> DateTime<Utc> {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}
