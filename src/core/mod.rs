//! Core functionality for building distributions
//!
//! Contains descriptor loading, package discovery, dependency resolution,
//! file bundling, archive emission and installation.

pub mod archive;
pub mod bundler;
pub mod descriptor;
pub mod discovery;
pub mod installer;
pub mod metadata;
pub mod requirement;
pub mod resolver;
pub mod specifier;
pub mod version;

pub use archive::{ArchiveWriter, BuiltArchive, RecordEntry};
pub use bundler::{BundleSummary, BundledFile, FileBundler};
pub use descriptor::{DESCRIPTOR_FILE, PackageDescriptor};
pub use discovery::{DiscoveredPackages, PackageDiscovery};
pub use installer::{InstallMode, InstallReport, Installer, ResourceLocator};
pub use metadata::MetadataWriter;
pub use requirement::Requirement;
pub use resolver::{DependencyResolver, InstalledEnvironment, PackageIndex, Resolution};
pub use specifier::SpecifierSet;
pub use version::Version;
