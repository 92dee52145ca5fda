use crate::cache::CacheError;
use itertools::Itertools;
use std::{fmt, io, path::PathBuf};
use thiserror::Error;
use url::Url;

/// The fatal ways a single installation can fail. Each of these stops the installation it occurs
/// in. Conditions that should not stop an installation are reported as [`InstallWarning`]s.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unsupported platform `{0}`, only linux, darwin, and windows are supported")]
    UnsupportedPlatform(String),

    #[error("could not fetch release information: {0:#}")]
    ReleaseLookup(#[source] anyhow::Error),

    #[error(
        "could not find a release asset matching this platform from {}",
        attempted_list(attempted)
    )]
    NoMatchingAsset { attempted: Vec<String> },

    #[error("failed to download {asset} from {url}: {source:#}")]
    Download {
        asset: String,
        url: Url,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to extract {}: {source:#}", path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("no binaries were found in {}", location.display())]
    NoBinariesFound { location: PathBuf },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache entry could not be saved: {0}")]
    CacheSaveValidation(#[source] CacheError),

    #[error("failed to add {} to the executable search path: {source}", path.display())]
    PathRegistration {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The error returned from [`Binrel::install`](crate::Binrel::install). It wraps an
/// [`InstallError`] with the release and asset the installation was working on so the message
/// stands on its own.
#[derive(Debug, Error)]
#[error("failed to install {project}@{tag}{}: {kind}", asset_suffix(asset.as_deref()))]
pub struct ReleaseError {
    pub project: String,
    pub tag: String,
    pub asset: Option<String>,
    #[source]
    pub kind: InstallError,
}

fn attempted_list(attempted: &[String]) -> String {
    if attempted.is_empty() {
        return String::from("an empty asset list");
    }
    attempted.iter().join(", ")
}

fn asset_suffix(asset: Option<&str>) -> String {
    asset.map(|a| format!(" (asset {a})")).unwrap_or_default()
}

/// Problems that are recorded during an installation without stopping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallWarning {
    /// A rename was requested but the archive contained more than one binary.
    RenameIgnored { rename_to: String, file_count: usize },
    ChmodFailed {
        path: PathBuf,
        mode: String,
        error: String,
    },
    /// Another writer already owns this cache key.
    CacheSaveConflict { key: String },
    CacheSaveFailed { key: String, error: String },
    CacheRestoreFailed { key: String, error: String },
}

impl fmt::Display for InstallWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallWarning::RenameIgnored {
                rename_to,
                file_count,
            } => write!(
                f,
                "ignoring rename to {rename_to} because {file_count} binaries were found"
            ),
            InstallWarning::ChmodFailed { path, mode, error } => {
                write!(f, "could not chmod {} to {mode}: {error}", path.display())
            }
            InstallWarning::CacheSaveConflict { key } => {
                write!(f, "cache entry {key} is already being saved elsewhere")
            }
            InstallWarning::CacheSaveFailed { key, error } => {
                write!(f, "could not save cache entry {key}: {error}")
            }
            InstallWarning::CacheRestoreFailed { key, error } => {
                write!(f, "could not restore cache entry {key}: {error}")
            }
        }
    }
}
