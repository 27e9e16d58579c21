//! # distpack
//!
//! Builds source distributions from a declarative package descriptor.
//! This library loads `package.toml`, discovers the packages of a source
//! tree, resolves install requirements against a local index, bundles
//! modules and data files into a `.tar.gz` archive and installs it.
//!
//! ## Features
//!
//! - Descriptor validation with PEP 440 style versions and specifiers
//! - Marker-file package discovery with include/exclude filters
//! - Dependency resolution with pins, overrides and installed packages
//! - Reproducible archives with a hashed `RECORD`
//! - Zip-safety aware installation
//!
//! ## Example
//!
//! ```no_run
//! use distpack::core::{PackageDescriptor, PackageDiscovery};
//!
//! let descriptor = PackageDescriptor::load("package.toml".as_ref())?;
//! let packages = PackageDiscovery::new().discover(&descriptor)?;
//! println!("{}: {:?}", descriptor.archive_stem(), packages.names());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod utils;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging with appropriate verbosity
pub fn setup_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
