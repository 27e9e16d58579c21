//! Command-line argument parsing and validation

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// distpack - builds and installs source distributions from a package descriptor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "distpack")]
pub struct Args {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Package descriptor to use [default: package.toml]
    #[arg(long, global = true)]
    pub descriptor: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate the package descriptor
    Check,

    /// List the packages the descriptor ships
    Packages,

    /// Resolve install requirements against a package index
    Resolve {
        /// Package index file
        #[arg(long)]
        index: PathBuf,

        /// Already-installed packages
        #[arg(long)]
        installed: Option<PathBuf>,

        /// Requirement replacing every constraint on its package
        #[arg(long = "override", value_name = "REQ")]
        overrides: Vec<String>,

        /// Runtime version checked against python_requires
        #[arg(long = "python-version", value_name = "V")]
        python_version: Option<String>,

        /// Print `name==version` lines instead of the annotated listing
        #[arg(long)]
        pinned: bool,
    },

    /// Build the distribution archive
    Build {
        /// Output directory for the archive
        #[arg(short = 'o', long = "output-dir", default_value = "dist")]
        output_dir: PathBuf,

        /// Leave package data out regardless of the descriptor
        #[arg(long)]
        no_package_data: bool,
    },

    /// Install a built archive
    Install {
        /// Archive to install
        archive: PathBuf,

        /// Installation directory
        #[arg(long, default_value = "site-packages")]
        target: PathBuf,

        /// Extract even zip-safe archives
        #[arg(long)]
        always_unzip: bool,
    },

    /// Write package metadata (PKG-INFO)
    Metadata {
        /// Output file for the metadata
        #[arg(short = 'o', long = "output-file", default_value = "PKG-INFO")]
        output_file: PathBuf,
    },
}

impl Command {
    /// Whether the command reads the package descriptor
    pub fn needs_descriptor(&self) -> bool {
        !matches!(self, Command::Install { .. })
    }
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_args() {
        let args = Args::try_parse_from(["distpack", "check"]).unwrap();
        assert!(!args.debug);
        assert!(args.descriptor.is_none());
        assert!(matches!(args.command, Command::Check));
    }

    #[test]
    fn test_parse_debug_flag() {
        let args = Args::try_parse_from(["distpack", "packages", "--debug"]).unwrap();
        assert!(args.debug);
    }

    #[test]
    fn test_parse_resolve_with_overrides() {
        let args = Args::try_parse_from([
            "distpack",
            "resolve",
            "--index",
            "index.toml",
            "--override",
            "pandas==0.23.4",
            "--override",
            "numpy<1.16",
            "--python-version",
            "3.6",
            "--pinned",
        ])
        .unwrap();
        match args.command {
            Command::Resolve {
                index,
                installed,
                overrides,
                python_version,
                pinned,
            } => {
                assert!(pinned);
                assert_eq!(index, PathBuf::from("index.toml"));
                assert!(installed.is_none());
                assert_eq!(overrides, vec!["pandas==0.23.4", "numpy<1.16"]);
                assert_eq!(python_version.as_deref(), Some("3.6"));
            }
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_resolve_requires_index() {
        assert!(Args::try_parse_from(["distpack", "resolve"]).is_err());
    }

    #[test]
    fn test_parse_build_defaults() {
        let args = Args::try_parse_from(["distpack", "build"]).unwrap();
        match args.command {
            Command::Build {
                output_dir,
                no_package_data,
            } => {
                assert_eq!(output_dir, PathBuf::from("dist"));
                assert!(!no_package_data);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_install_does_not_need_descriptor() {
        let args = Args::try_parse_from(["distpack", "install", "a.tar.gz"]).unwrap();
        assert!(!args.command.needs_descriptor());
        assert!(Command::Check.needs_descriptor());
    }
}
