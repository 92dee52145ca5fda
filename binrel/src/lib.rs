//! A library for resolving, downloading, and installing pre-built binaries from GitHub releases.
//!
//! Given a repository and a tag, `binrel` finds the release asset built for the platform it is
//! running on (or one you name), downloads it, unpacks it into a per-release directory, and
//! registers the directory holding the binaries on the executable search path. Installed releases
//! can be kept in a cache so that later runs skip the download entirely.
//!
//! This project also ships a CLI tool named `binrel`, which installs every release listed in a
//! YAML config file.
//!
//! The main entry point for programmatic use is the [`BinrelBuilder`] struct. Here is an example
//! of its usage:
//!
//! ```ignore
//! use binrel::{BinrelBuilder, DirCacheStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let binrel = BinrelBuilder::new()
//!         .project("aquasecurity/tfsec")
//!         .tag("v1.18.0")
//!         .tool_root("/opt/tools")
//!         .cache_store(Box::new(DirCacheStore::new("/var/cache/binrel")))
//!         .build()?;
//!
//!     let report = binrel.install().await?;
//!     println!("installed into {}", report.bin_dir.display());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Where Releases Are Installed
//!
//! Every release is installed into its own directory,
//! `<tool root>/<owner>/<repo>/<tag>/<platform>-<arch>`, so installing the same release twice
//! always ends up in the same place. The directory is emptied before a fresh download is unpacked
//! into it.
//!
//! Archives (`.tar.gz`, `.tgz`, `.tar.xz`, `.tar.bz2`, and `.zip`) are unpacked completely. Every
//! regular file found below the binaries location (the install directory itself, or a
//! subdirectory you name with [`BinrelBuilder::binaries_location`]) is copied up into that
//! location, so binaries nested in a versioned top-level directory end up in one place. Any other
//! file is treated as a bare binary and moved into the install directory as is.
//!
//! ## How `binrel` Finds the Right Release Asset
//!
//! Each asset name is lowercased and checked against these criteria, all of which must hold:
//!
//! - If you've provided a [`BinrelBuilder::matching`] string, the name contains it.
//! - The name contains one of the names for the CPU architecture. `x64` is also known as `x86_64`
//!   and `amd64`, and `arm64` as `aarch64`.
//! - The name contains one of the names for the OS: `linux`, `darwin`/`macos`/`osx`, or
//!   `windows`/`win64`/`win32`.
//! - The name ends with `.tar.gz`, `.tar.xz`, `.zip`, or `.tgz`, unless you have set your own
//!   extension pattern or turned extension matching off.
//!
//! The first asset, in the order the API lists them, that meets every criterion is installed.
//! There is no attempt to rank the remaining candidates.
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by `reqwest`:
//!
#![doc = document_features::document_features!()]

mod archive;
mod binrel;
mod builder;
mod cache;
mod config;
mod error;
mod extension;
mod github;
mod installer;
mod matcher;
mod paths;
mod platform;
mod release;
#[cfg(test)]
mod test;

pub use crate::{
    binrel::{Binrel, InstallReport},
    builder::BinrelBuilder,
    cache::{CacheError, CacheStore, DirCacheStore},
    config::{parse_config, ConfigEntry, EntrySettings, InstallRequest},
    error::{InstallError, InstallWarning, ReleaseError},
    extension::{classify, ArchiveKind, TarCompression},
    github::{GitHub, ReleaseSource},
    installer::{ChmodMode, ChmodModeError, InstallPlan},
    matcher::{ExtensionMatch, MatchCriteria},
    paths::{GitHubPathFile, PathRegistry, StdoutPaths},
    platform::{PlatformDescriptor, TargetOs},
    release::{Asset, Download, Release, ReleaseSpec, LATEST},
};

// The version of the `binrel` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the sake of the
/// `binrel` binary, but it lives in the library crate so that test code can also enable logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // This is very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
}
