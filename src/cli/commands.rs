//! Command implementations for the CLI

use crate::{
    cli::Command,
    config::Config,
    core::{
        archive::ArchiveWriter,
        bundler::FileBundler,
        descriptor::PackageDescriptor,
        discovery::PackageDiscovery,
        installer::{InstallMode, Installer},
        metadata::MetadataWriter,
        requirement::Requirement,
        resolver::{DependencyResolver, InstalledEnvironment, PackageIndex},
        version::Version,
    },
};
use anyhow::Context;
use tracing::{info, instrument, warn};

/// Execute the appropriate command based on CLI arguments
#[instrument(skip(config))]
pub fn execute_command(config: &Config, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Check => execute_check_command(config),
        Command::Packages => execute_packages_command(config),
        Command::Resolve { .. } => execute_resolve_command(config),
        Command::Build { .. } => execute_build_command(config),
        Command::Install { archive, .. } => execute_install_command(config, archive),
        Command::Metadata { output_file } => execute_metadata_command(config, output_file),
    }
}

fn load_descriptor(config: &Config) -> anyhow::Result<PackageDescriptor> {
    PackageDescriptor::load(&config.descriptor_path).with_context(|| {
        format!(
            "Failed to load package descriptor {}",
            config.descriptor_path.display()
        )
    })
}

/// Execute the check command
#[instrument(skip(config))]
fn execute_check_command(config: &Config) -> anyhow::Result<()> {
    let descriptor = load_descriptor(config)?;
    let packages = PackageDiscovery::new()
        .discover(&descriptor)
        .context("Failed to discover packages")?;

    info!(
        "Descriptor is valid: {} {} with {} package(s) and {} requirement(s)",
        descriptor.name,
        descriptor.version,
        packages.packages.len(),
        descriptor.install_requires.len()
    );
    println!("{} {} OK", descriptor.name, descriptor.version);
    Ok(())
}

/// Execute the packages command
#[instrument(skip(config))]
fn execute_packages_command(config: &Config) -> anyhow::Result<()> {
    let descriptor = load_descriptor(config)?;
    let packages = PackageDiscovery::new()
        .discover(&descriptor)
        .context("Failed to discover packages")?;

    for name in packages.names() {
        println!("{name}");
    }
    Ok(())
}

/// Execute the resolve command
#[instrument(skip(config))]
fn execute_resolve_command(config: &Config) -> anyhow::Result<()> {
    let descriptor = load_descriptor(config)?;
    let settings = &config.resolve;

    let index = PackageIndex::load(&settings.index_path)
        .with_context(|| format!("Failed to load package index {}", settings.index_path.display()))?;

    let installed = match &settings.installed_path {
        Some(path) => Some(
            InstalledEnvironment::load(path)
                .with_context(|| format!("Failed to load installed packages {}", path.display()))?,
        ),
        None => None,
    };

    let overrides = settings
        .overrides
        .iter()
        .map(|raw| Requirement::parse(raw).with_context(|| format!("Invalid override '{raw}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut resolver = DependencyResolver::new(&index).with_overrides(overrides);
    if let Some(installed) = &installed {
        resolver = resolver.with_installed(installed);
    }
    if let Some(raw) = &settings.python_version {
        let runtime = Version::parse(raw).with_context(|| format!("Invalid runtime version '{raw}'"))?;
        resolver = resolver.with_runtime_version(runtime);
    }

    let resolution = resolver
        .resolve(&descriptor)
        .context("Failed to resolve install requirements")?;

    info!("Resolved {} package(s)", resolution.packages.len());
    if settings.pinned {
        print!("{}", resolution.to_pinned_requirements());
    } else {
        print!("{resolution}");
    }
    Ok(())
}

/// Execute the build command
#[instrument(skip(config))]
fn execute_build_command(config: &Config) -> anyhow::Result<()> {
    let descriptor = load_descriptor(config)?;
    info!("Building {}...", descriptor.archive_stem());

    let packages = PackageDiscovery::new()
        .discover(&descriptor)
        .context("Failed to discover packages")?;

    let files = FileBundler::new(&descriptor, &config.build)
        .collect(&packages)
        .context("Failed to collect package files")?;

    let archive = ArchiveWriter::new(&descriptor, &config.build)
        .build(&packages, &files)
        .context("Failed to write distribution archive")?;

    info!(
        "Build completed successfully. {} (sha256 {})",
        archive.summary, archive.sha256
    );
    println!("{}", archive.path.display());
    Ok(())
}

/// Execute the install command
#[instrument(skip(config))]
fn execute_install_command(config: &Config, archive: &std::path::Path) -> anyhow::Result<()> {
    let report = Installer::new(&config.install)
        .install(archive)
        .with_context(|| format!("Failed to install {}", archive.display()))?;

    if let Some(build) = &report.build_info {
        info!("{} was built by {}", report.distribution, build.build_tool);
    }
    match report.mode {
        InstallMode::Extracted => info!(
            "Installed {} ({} files extracted to {})",
            report.distribution,
            report.files.len(),
            config.install.target_dir.display()
        ),
        InstallMode::Archived => {
            warn!(
                "{} is zip-safe and was installed as an archive; its data files are not plain paths",
                report.distribution
            );
        }
    }
    println!("{}", report.distribution);
    Ok(())
}

/// Execute the metadata command
#[instrument(skip(config))]
fn execute_metadata_command(config: &Config, output_file: &std::path::Path) -> anyhow::Result<()> {
    let descriptor = load_descriptor(config)?;

    MetadataWriter::new()
        .generate(&descriptor, output_file)
        .context("Failed to write package metadata")?;

    info!("Package metadata written to {}", output_file.display());
    Ok(())
}
