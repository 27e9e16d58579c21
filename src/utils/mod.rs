//! Utility modules for common functionality
//!
//! Provides file operations and archive path handling.

pub mod fs;

pub use fs::FileSystemUtils;
