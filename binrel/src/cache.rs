use crate::{
    error::{InstallError, InstallWarning},
    platform::PlatformDescriptor,
    release::ReleaseSpec,
};
use log::{debug, info, warn};
use std::{
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache entry `{key}`: {reason}")]
    Validation { key: String, reason: String },

    #[error("cache entry `{key}` is reserved by another writer")]
    Reserved { key: String },

    #[error("cache entry `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Persistent storage for installed release directories.
pub trait CacheStore: Debug + Send + Sync {
    /// Copies the entry for `key` into `dest`. Returns `false` when there is no such entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the entry cannot be copied.
    fn restore(&self, key: &str, dest: &Path) -> Result<bool, CacheError>;

    /// Stores the contents of `source` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Validation`] for an invalid key or an empty source,
    /// [`CacheError::Reserved`] when the entry is already present or being written, and
    /// [`CacheError::Io`] for anything else.
    fn save(&self, key: &str, source: &Path) -> Result<(), CacheError>;
}

/// A [`CacheStore`] that keeps each entry as a directory below `root`.
#[derive(Debug, Clone)]
pub struct DirCacheStore {
    root: PathBuf,
}

impl DirCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

impl CacheStore for DirCacheStore {
    fn restore(&self, key: &str, dest: &Path) -> Result<bool, CacheError> {
        let entry = self.entry_path(key)?;
        if !entry.is_dir() {
            debug!("no cache entry at {}", entry.display());
            return Ok(false);
        }

        debug!("restoring {} into {}", entry.display(), dest.display());
        copy_tree(&entry, dest).map_err(|source| CacheError::Io {
            key: key.to_string(),
            source,
        })?;
        Ok(true)
    }

    fn save(&self, key: &str, source: &Path) -> Result<(), CacheError> {
        let entry = self.entry_path(key)?;
        if !dir_has_entries(source) {
            return Err(CacheError::Validation {
                key: key.to_string(),
                reason: format!("{} is missing or empty", source.display()),
            });
        }
        if entry.exists() {
            return Err(CacheError::Reserved {
                key: key.to_string(),
            });
        }

        let io_err = |source| CacheError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut partial = entry.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        match fs::create_dir(&partial) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(CacheError::Reserved {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(io_err(e)),
        }

        debug!("saving {} into {}", source.display(), partial.display());
        let res = copy_tree(source, &partial).and_then(|()| fs::rename(&partial, &entry));
        if let Err(e) = res {
            if let Err(rm) = fs::remove_dir_all(&partial) {
                debug!("could not remove {}: {rm}", partial.display());
            }
            return Err(io_err(e));
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    let reason = if key.is_empty() {
        Some("the key is empty")
    } else if key.starts_with('/') || Path::new(key).is_absolute() {
        Some("the key must be a relative path")
    } else if key.contains('\\') {
        Some("the key cannot contain a backslash")
    } else if key.split('/').any(str::is_empty) {
        Some("the key cannot contain an empty path segment")
    } else if key.split('/').any(|s| s == "..") {
        Some("the key cannot contain `..`")
    } else {
        None
    };

    match reason {
        Some(r) => Err(CacheError::Validation {
            key: key.to_string(),
            reason: r.to_string(),
        }),
        None => Ok(()),
    }
}

fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

/// Copies every directory and regular file under `from` into `to`, creating `to` if needed.
pub(crate) fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            debug!("not copying {}, it is not a regular file", entry.path().display());
        }
    }
    Ok(())
}

/// Decides whether an installation can be served from the cache and stores finished ones.
#[derive(Debug)]
pub(crate) struct CacheManager {
    store: Option<Box<dyn CacheStore>>,
}

impl CacheManager {
    pub(crate) fn new(store: Option<Box<dyn CacheStore>>) -> Self {
        Self { store }
    }

    /// The cache key for a release on a platform. Releases asked for as `latest` are never
    /// cached.
    pub(crate) fn key(spec: &ReleaseSpec, platform: &PlatformDescriptor) -> Option<String> {
        if spec.is_latest() {
            return None;
        }
        Some(format!(
            "{}/{}/{}/{}-{}",
            spec.owner,
            spec.project,
            spec.tag,
            platform.os(),
            platform.arch(),
        ))
    }

    /// Returns whether the entry was restored into `dest`. Failures are recorded as warnings and
    /// count as a miss.
    pub(crate) fn restore(
        &self,
        key: Option<&str>,
        dest: &Path,
        warnings: &mut Vec<InstallWarning>,
    ) -> bool {
        let (Some(store), Some(key)) = (&self.store, key) else {
            return false;
        };

        match store.restore(key, dest) {
            Ok(true) => {
                info!("Restored {key} from the cache into {}", dest.display());
                true
            }
            Ok(false) => {
                debug!("cache miss for {key}");
                false
            }
            Err(e) => {
                let warning = InstallWarning::CacheRestoreFailed {
                    key: key.to_string(),
                    error: e.to_string(),
                };
                warn!("{warning}");
                warnings.push(warning);
                false
            }
        }
    }

    /// Saves `source` under `key`. Only an invalid entry is an error. Other failures are returned
    /// as a warning.
    pub(crate) fn save(
        &self,
        key: Option<&str>,
        source: &Path,
    ) -> Result<Option<InstallWarning>, InstallError> {
        let (Some(store), Some(key)) = (&self.store, key) else {
            return Ok(None);
        };

        let warning = match store.save(key, source) {
            Ok(()) => {
                info!("Saved {} to the cache as {key}", source.display());
                return Ok(None);
            }
            Err(e @ CacheError::Validation { .. }) => {
                return Err(InstallError::CacheSaveValidation(e));
            }
            Err(CacheError::Reserved { key }) => InstallWarning::CacheSaveConflict { key },
            Err(e @ CacheError::Io { .. }) => InstallWarning::CacheSaveFailed {
                key: key.to_string(),
                error: e.to_string(),
            },
        };
        warn!("{warning}");
        Ok(Some(warning))
    }
}
