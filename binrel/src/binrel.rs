use crate::{
    archive,
    cache::CacheManager,
    error::{InstallError, InstallWarning, ReleaseError},
    extension::{classify, ArchiveKind},
    github::{resolve_release, ReleaseSource},
    installer::{finalize_archive, finalize_opaque, InstallPlan, Installed},
    matcher::AssetMatcher,
    paths::PathRegistry,
    platform::PlatformDescriptor,
    release::{Asset, ReleaseSpec},
};
use log::{debug, info};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// `Binrel` is the core of this library, and is used to install one release. Use the
/// [`BinrelBuilder`](crate::BinrelBuilder) struct to create a new `Binrel` instance.
#[derive(Debug)]
pub struct Binrel {
    spec: ReleaseSpec,
    platform: PlatformDescriptor,
    matcher: AssetMatcher,
    plan: InstallPlan,
    cache: CacheManager,
    source: Box<dyn ReleaseSource>,
    paths: Box<dyn PathRegistry>,
}

/// The outcome of a successful installation.
#[derive(Debug)]
pub struct InstallReport {
    /// The directory that was added to the executable search path.
    pub bin_dir: PathBuf,
    /// The installed files. This is empty when the release came from the cache.
    pub installed: Vec<PathBuf>,
    pub warnings: Vec<InstallWarning>,
    pub cache_hit: bool,
    /// The name of the downloaded asset. This is `None` when the release came from the cache.
    pub asset: Option<String>,
}

impl Binrel {
    pub(crate) fn new(
        spec: ReleaseSpec,
        platform: PlatformDescriptor,
        matcher: AssetMatcher,
        plan: InstallPlan,
        cache: CacheManager,
        source: Box<dyn ReleaseSource>,
        paths: Box<dyn PathRegistry>,
    ) -> Binrel {
        Binrel {
            spec,
            platform,
            matcher,
            plan,
            cache,
            source,
            paths,
        }
    }

    /// The directory this release is installed into.
    pub fn destination_root(&self) -> &Path {
        &self.plan.destination_root
    }

    /// Install the release. If it is in the cache it is restored from there. Otherwise the release
    /// is looked up, the asset matching the platform is downloaded and unpacked, and the result is
    /// saved to the cache. Either way, the directory holding the binaries is registered on the
    /// executable search path.
    ///
    /// # Errors
    ///
    /// There are a number of cases where an error can be returned:
    ///
    /// * Network errors on requests to GitHub, or the release not existing.
    /// * No asset in the release matching the platform.
    /// * Unable to download, extract, or move the asset.
    /// * No binaries in the extracted archive.
    /// * A cache entry that cannot be saved because it is invalid.
    /// * Unable to register the binaries directory.
    pub async fn install(&self) -> Result<InstallReport, ReleaseError> {
        let mut warnings = vec![];
        let key = CacheManager::key(&self.spec, &self.platform);

        if self
            .cache
            .restore(key.as_deref(), &self.plan.destination_root, &mut warnings)
        {
            let bin_dir = self.plan.restored_bin_dir();
            self.register(&bin_dir, None)?;
            return Ok(InstallReport {
                bin_dir,
                installed: vec![],
                warnings,
                cache_hit: true,
                asset: None,
            });
        }

        let release = resolve_release(self.source.as_ref(), &self.spec)
            .await
            .map_err(|e| self.error(None, InstallError::ReleaseLookup(e)))?;
        let asset = self
            .matcher
            .pick_asset(&release.assets)
            .map_err(|e| self.error(None, e))?;
        info!("Installing {} from {}", asset.name, self.spec.full_name());

        let installed = self
            .download_and_install(asset)
            .await
            .map_err(|e| self.error(Some(asset.name.as_str()), e))?;
        warnings.extend(installed.warnings);

        if let Some(w) = self
            .cache
            .save(key.as_deref(), &self.plan.destination_root)
            .map_err(|e| self.error(Some(asset.name.as_str()), e))?
        {
            warnings.push(w);
        }

        self.register(&installed.bin_dir, Some(asset.name.as_str()))?;

        Ok(InstallReport {
            bin_dir: installed.bin_dir,
            installed: installed.files,
            warnings,
            cache_hit: false,
            asset: Some(asset.name.clone()),
        })
    }

    async fn download_and_install(&self, asset: &Asset) -> Result<Installed, InstallError> {
        let download = self
            .source
            .download(asset)
            .await
            .map_err(|source| InstallError::Download {
                asset: asset.name.clone(),
                url: asset.url.clone(),
                source,
            })?;

        self.clear_destination()?;

        let kind = classify(&asset.name);
        match kind {
            ArchiveKind::Opaque => finalize_opaque(download.path(), &self.plan),
            ArchiveKind::Tar(_) | ArchiveKind::Zip => {
                archive::extract(download.path(), kind, &self.plan.destination_root).map_err(
                    |source| InstallError::Extract {
                        path: download.path().to_path_buf(),
                        source,
                    },
                )?;
                finalize_archive(&self.plan)
            }
        }
    }

    // Files left from an earlier install of the same release would otherwise be picked up as
    // binaries of this one.
    fn clear_destination(&self) -> Result<(), InstallError> {
        let root = &self.plan.destination_root;
        match fs::remove_dir_all(root) {
            Ok(()) => {
                debug!("removed existing directory {}", root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(InstallError::CreateDir {
                path: root.clone(),
                source,
            }),
        }
    }

    fn register(&self, bin_dir: &Path, asset: Option<&str>) -> Result<(), ReleaseError> {
        self.paths.register(bin_dir).map_err(|source| {
            self.error(
                asset,
                InstallError::PathRegistration {
                    path: bin_dir.to_path_buf(),
                    source,
                },
            )
        })?;
        info!("Added {} to the executable search path", bin_dir.display());
        Ok(())
    }

    fn error(&self, asset: Option<&str>, kind: InstallError) -> ReleaseError {
        ReleaseError {
            project: self.spec.full_name(),
            tag: self.spec.tag.clone(),
            asset: asset.map(String::from),
            kind,
        }
    }
}
