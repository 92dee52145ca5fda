use crate::error::{InstallError, InstallWarning};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    ffi::OsString,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use walkdir::WalkDir;

#[cfg(target_family = "unix")]
use std::fs::{set_permissions, Permissions};
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;

/// A file mode to apply to installed binaries, written in octal like `755`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChmodMode(u32);

#[derive(Debug, Error)]
#[error("`{0}` is not a valid octal file mode")]
pub struct ChmodModeError(String);

impl ChmodMode {
    pub fn new(mode: u32) -> Self {
        Self(mode)
    }

    pub fn mode(self) -> u32 {
        self.0
    }
}

impl FromStr for ChmodMode {
    type Err = ChmodModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 4 {
            return Err(ChmodModeError(s.to_string()));
        }
        u32::from_str_radix(digits, 8)
            .map(ChmodMode)
            .map_err(|_| ChmodModeError(s.to_string()))
    }
}

impl fmt::Display for ChmodMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

/// Where and how the files from one release are installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallPlan {
    pub destination_root: PathBuf,
    /// A directory inside an extracted archive that holds the binaries.
    pub binaries_subpath: Option<PathBuf>,
    pub rename_to: Option<String>,
    pub chmod: Option<ChmodMode>,
    /// Only files whose name contains this are installed from an archive.
    pub binary_filter: Option<String>,
}

impl InstallPlan {
    pub fn new(destination_root: PathBuf) -> Self {
        Self {
            destination_root,
            binaries_subpath: None,
            rename_to: None,
            chmod: None,
            binary_filter: None,
        }
    }

    /// The directory that binaries from an archive end up in.
    pub fn archive_bin_dir(&self) -> PathBuf {
        match &self.binaries_subpath {
            Some(sub) => self.destination_root.join(sub),
            None => self.destination_root.clone(),
        }
    }

    /// The binaries directory of a release restored from the cache. An archive install with a
    /// binaries location always leaves that directory behind, while an opaque install only ever
    /// writes a single file into the destination root.
    pub fn restored_bin_dir(&self) -> PathBuf {
        let archive_dir = self.archive_bin_dir();
        if archive_dir.is_dir() {
            archive_dir
        } else {
            self.destination_root.clone()
        }
    }
}

/// What an installation put on disk.
#[derive(Debug, Default)]
pub(crate) struct Installed {
    pub(crate) bin_dir: PathBuf,
    pub(crate) files: Vec<PathBuf>,
    pub(crate) warnings: Vec<InstallWarning>,
}

/// Collects the binaries of an extracted archive into one directory.
pub(crate) fn finalize_archive(plan: &InstallPlan) -> Result<Installed, InstallError> {
    let bin_dir = plan.archive_bin_dir();
    debug!("looking for binaries under {}", bin_dir.display());

    let found = find_binaries(&bin_dir, plan.binary_filter.as_deref());
    if found.is_empty() {
        return Err(InstallError::NoBinariesFound { location: bin_dir });
    }

    let mut warnings = vec![];
    let rename_to = match (&plan.rename_to, found.len()) {
        (Some(name), 1) => Some(name.as_str()),
        (Some(name), n) => {
            let warning = InstallWarning::RenameIgnored {
                rename_to: name.clone(),
                file_count: n,
            };
            warn!("{warning}");
            warnings.push(warning);
            None
        }
        (None, _) => None,
    };

    let mut targets: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut moves = vec![];
    for path in found {
        let file_name: OsString = match rename_to {
            Some(name) => name.into(),
            None => path.file_name().map(ToOwned::to_owned).unwrap_or_default(),
        };
        let target = bin_dir.join(file_name);
        if let Some(first) = targets.insert(target.clone(), path.clone()) {
            return Err(InstallError::CopyFailed {
                from: path,
                to: target,
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} has the same file name", first.display()),
                ),
            });
        }
        moves.push((path, target));
    }

    let mut files = vec![];
    for (path, target) in moves {
        if path != target {
            debug!("copying {} to {}", path.display(), target.display());
            fs::copy(&path, &target).map_err(|source| InstallError::CopyFailed {
                from: path.clone(),
                to: target.clone(),
                source,
            })?;
        }
        files.push(target);
    }

    if let Some(mode) = plan.chmod {
        warnings.extend(chmod_all(&files, mode));
    }

    info!("Installed {} binaries into {}", files.len(), bin_dir.display());
    Ok(Installed {
        bin_dir,
        files,
        warnings,
    })
}

/// Places a downloaded file that is not an archive into the destination root.
pub(crate) fn finalize_opaque(
    downloaded_file: &Path,
    plan: &InstallPlan,
) -> Result<Installed, InstallError> {
    let root = &plan.destination_root;
    fs::create_dir_all(root).map_err(|source| InstallError::CreateDir {
        path: root.clone(),
        source,
    })?;

    let file_name: OsString = match &plan.rename_to {
        Some(name) => name.into(),
        None => downloaded_file
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_default(),
    };
    let output_path = root.join(file_name);
    move_file(downloaded_file, &output_path)?;

    let mut warnings = vec![];
    if let Some(mode) = plan.chmod {
        warnings.extend(chmod_all(std::slice::from_ref(&output_path), mode));
    }

    info!("Installed binary into {}", output_path.display());
    Ok(Installed {
        bin_dir: root.clone(),
        files: vec![output_path],
        warnings,
    })
}

// Sorted so that the order of installation, and therefore of any warnings, doesn't depend on the
// filesystem.
fn find_binaries(bin_dir: &Path, filter: Option<&str>) -> Vec<PathBuf> {
    WalkDir::new(bin_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            filter.is_none_or(|f| {
                e.file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&f.to_lowercase())
            })
        })
        .map(walkdir::DirEntry::into_path)
        .collect()
}

fn move_file(from: &Path, to: &Path) -> Result<(), InstallError> {
    move_file_with(from, to, |f, t| fs::rename(f, t))
}

/// Moves a file with `rename`, falling back to copying and then deleting the source when the
/// two paths are on different devices.
fn move_file_with<R>(from: &Path, to: &Path, rename: R) -> Result<(), InstallError>
where
    R: Fn(&Path, &Path) -> io::Result<()>,
{
    debug!("moving {} to {}", from.display(), to.display());
    match rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("cannot rename across devices, copying instead: {e}");
            fs::copy(from, to).map_err(|source| InstallError::MoveFailed {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })?;
            fs::remove_file(from).map_err(|source| InstallError::MoveFailed {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })
        }
        Err(source) => Err(InstallError::MoveFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        }),
    }
}

fn chmod_all(files: &[PathBuf], mode: ChmodMode) -> Vec<InstallWarning> {
    files
        .iter()
        .filter_map(|path| match set_mode(path, mode) {
            Ok(()) => None,
            Err(e) => {
                let warning = InstallWarning::ChmodFailed {
                    path: path.clone(),
                    mode: mode.to_string(),
                    error: e.to_string(),
                };
                warn!("{warning}");
                Some(warning)
            }
        })
        .collect()
}

#[cfg(target_family = "unix")]
fn set_mode(path: &Path, mode: ChmodMode) -> io::Result<()> {
    debug!("setting mode of {} to {mode}", path.display());
    set_permissions(path, Permissions::from_mode(mode.mode()))
}

#[cfg(not(target_family = "unix"))]
fn set_mode(path: &Path, mode: ChmodMode) -> io::Result<()> {
    debug!(
        "not setting mode of {} to {mode}, file modes are not supported on this platform",
        path.display()
    );
    Ok(())
}
