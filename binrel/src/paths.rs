use log::debug;
use std::{
    fmt::Debug,
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Somewhere to record directories that should be on the executable search path.
pub trait PathRegistry: Debug + Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the directory cannot be recorded.
    fn register(&self, dir: &Path) -> io::Result<()>;
}

/// Appends each directory as a line to a file, the way GitHub Actions reads `GITHUB_PATH`.
#[derive(Debug, Clone)]
pub struct GitHubPathFile {
    path: PathBuf,
}

impl GitHubPathFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PathRegistry for GitHubPathFile {
    fn register(&self, dir: &Path) -> io::Result<()> {
        debug!("adding {} to {}", dir.display(), self.path.display());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", dir.display())
    }
}

/// Prints each directory on its own line to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutPaths;

impl PathRegistry for StdoutPaths {
    fn register(&self, dir: &Path) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", dir.display())
    }
}
