//! Configuration management for the distribution builder
//!
//! Centralizes configuration options and provides validation.

use crate::{
    cli::{Args, Command},
    core::descriptor::DESCRIPTOR_FILE,
    error::DistError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enable debug logging
    pub debug: bool,
    /// Working directory for operations
    pub work_dir: PathBuf,
    /// Package descriptor path
    pub descriptor_path: PathBuf,
    /// Dependency resolution configuration
    pub resolve: ResolveConfig,
    /// Build configuration
    pub build: BuildConfig,
    /// Install configuration
    pub install: InstallConfig,
}

/// Dependency resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Package index file
    pub index_path: PathBuf,
    /// Already-installed environment file
    pub installed_path: Option<PathBuf>,
    /// Requirements that replace every constraint on their package
    pub overrides: Vec<String>,
    /// Runtime language version checked against `python_requires`
    pub python_version: Option<String>,
    /// Emit `name==version` lines
    pub pinned: bool,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Output directory for archives
    pub output_dir: PathBuf,
    /// Module file extensions, without the dot
    pub source_extensions: Vec<String>,
    /// Forces package data on or off regardless of the descriptor
    pub include_package_data: Option<bool>,
}

/// Install configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Directory packages are installed into
    pub target_dir: PathBuf,
    /// Extract even zip-safe archives
    pub always_unzip: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            work_dir: PathBuf::from("."),
            descriptor_path: PathBuf::from(DESCRIPTOR_FILE),
            resolve: ResolveConfig::default(),
            build: BuildConfig::default(),
            install: InstallConfig::default(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dist"),
            source_extensions: vec!["py".to_string()],
            include_package_data: None,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("site-packages"),
            always_unzip: false,
        }
    }
}

impl Config {
    /// Create configuration from command line arguments
    pub fn from_args(args: &Args) -> Result<Self, DistError> {
        let mut config = Self {
            debug: args.debug,
            ..Self::default()
        };

        if let Some(descriptor) = &args.descriptor {
            config.descriptor_path = descriptor.clone();
        }
        config.work_dir = config
            .descriptor_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        // Override with command-specific options
        match &args.command {
            Command::Resolve {
                index,
                installed,
                overrides,
                python_version,
                pinned,
            } => {
                config.resolve = ResolveConfig {
                    index_path: index.clone(),
                    installed_path: installed.clone(),
                    overrides: overrides.clone(),
                    python_version: python_version.clone(),
                    pinned: *pinned,
                };
            }
            Command::Build {
                output_dir,
                no_package_data,
            } => {
                config.build.output_dir = output_dir.clone();
                if *no_package_data {
                    config.build.include_package_data = Some(false);
                }
            }
            Command::Install {
                target,
                always_unzip,
                ..
            } => {
                config.install.target_dir = target.clone();
                config.install.always_unzip = *always_unzip;
            }
            _ => {}
        }

        if args.command.needs_descriptor() {
            config.validate()?;
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), DistError> {
        if !self.descriptor_path.is_file() {
            return Err(DistError::validation(format!(
                "package descriptor not found: {}",
                self.descriptor_path.display()
            )));
        }

        if !self.work_dir.exists() {
            return Err(DistError::validation(format!(
                "Working directory not found: {}",
                self.work_dir.display()
            )));
        }

        if self.build.source_extensions.is_empty() {
            return Err(DistError::config("at least one source extension is required"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.descriptor_path, PathBuf::from("package.toml"));
        assert_eq!(config.build.output_dir, PathBuf::from("dist"));
        assert_eq!(config.build.source_extensions, vec!["py"]);
        assert_eq!(config.build.include_package_data, None);
        assert!(!config.install.always_unzip);
    }

    #[test]
    fn test_missing_descriptor_fails_validation() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = temp_dir.path().join("package.toml");
        let args = Args::try_parse_from(["distpack", "--descriptor", descriptor.to_str().unwrap(), "check"]).unwrap();
        assert!(matches!(Config::from_args(&args), Err(DistError::Validation { .. })));
    }

    #[test]
    fn test_build_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let descriptor = temp_dir.path().join("package.toml");
        std::fs::write(&descriptor, "name = \"x\"\nversion = \"1\"\n").unwrap();

        let args = Args::try_parse_from([
            "distpack",
            "--descriptor",
            descriptor.to_str().unwrap(),
            "build",
            "-o",
            "out",
            "--no-package-data",
        ])
        .unwrap();
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.work_dir, temp_dir.path());
        assert_eq!(config.build.output_dir, PathBuf::from("out"));
        assert_eq!(config.build.include_package_data, Some(false));
    }

    #[test]
    fn test_install_skips_descriptor_check() {
        let args = Args::try_parse_from([
            "distpack",
            "--descriptor",
            "/nonexistent/package.toml",
            "install",
            "pkg.tar.gz",
            "--target",
            "site",
            "--always-unzip",
        ])
        .unwrap();
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.install.target_dir, PathBuf::from("site"));
        assert!(config.install.always_unzip);
    }
}
