/// The `builder` module contains the `BinrelBuilder` struct which is used to create a `Binrel`
/// instance.
use crate::{
    binrel::Binrel,
    cache::{CacheManager, CacheStore},
    config::InstallRequest,
    github::GitHub,
    installer::{ChmodMode, InstallPlan},
    matcher::{AssetMatcher, ExtensionMatch, MatchCriteria},
    paths::{PathRegistry, StdoutPaths},
    platform::PlatformDescriptor,
    release::{ReleaseSpec, LATEST},
};
use anyhow::{anyhow, Context, Result};
use log::debug;
use std::path::{Component, Path, PathBuf};

/// `BinrelBuilder` is used to create a [`Binrel`] instance.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct BinrelBuilder<'a> {
    project: Option<String>,
    tag: Option<&'a str>,
    prerelease: bool,
    platform: Option<&'a str>,
    arch: Option<&'a str>,
    matching: Option<&'a str>,
    disable_extension_matching: bool,
    extension: Option<&'a str>,
    rename_to: Option<&'a str>,
    chmod: Option<ChmodMode>,
    binaries_location: Option<&'a Path>,
    tool_root: Option<PathBuf>,
    cache_store: Option<Box<dyn CacheStore>>,
    disable_cache: bool,
    token: Option<&'a str>,
    api_base_url: Option<&'a str>,
    path_registry: Option<Box<dyn PathRegistry>>,
}

impl<'a> BinrelBuilder<'a> {
    /// Returns a new empty `BinrelBuilder`.
    #[must_use]
    pub fn new() -> Self {
        BinrelBuilder::default()
    }

    /// Returns a builder with every setting from an [`InstallRequest`] applied. The tool root,
    /// cache store, token, API base URL, and path registry still need to be set separately. A
    /// request with caching turned off never uses the cache store.
    #[must_use]
    pub fn from_request(req: &'a InstallRequest) -> Self {
        let mut builder = Self::new()
            .project(&req.full_name())
            .tag(&req.tag)
            .prerelease(req.prerelease);
        builder.platform = req.platform.as_deref();
        builder.arch = req.arch.as_deref();
        builder.matching = req.asset_name.as_deref();
        builder.disable_extension_matching = !req.extension_matching;
        builder.extension = req.extension.as_deref();
        builder.rename_to = req.rename_to.as_deref();
        builder.chmod = req.chmod;
        builder.binaries_location = req.binaries_location.as_deref();
        builder.disable_cache = !req.cache;
        builder
    }

    /// Set the project to install, in `owner/repo` form, like `aquasecurity/tfsec`.
    ///
    /// You must set this.
    #[must_use]
    pub fn project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    /// Set the tag to install. By default the most recent release is installed, which is also
    /// what the tag `latest` asks for.
    #[must_use]
    pub fn tag(mut self, tag: &'a str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// When installing the latest release, install the newest prerelease instead of the newest
    /// full release. This has no effect when a tag is set.
    #[must_use]
    pub fn prerelease(mut self, prerelease: bool) -> Self {
        self.prerelease = prerelease;
        self
    }

    /// Set the platform to install for, one of `linux`, `darwin`, or `windows`. If not set it is
    /// the platform this crate was compiled for.
    #[must_use]
    pub fn platform(mut self, platform: &'a str) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the CPU architecture to install for, like `x64`, `amd64`, or `arm64`. If not set it is
    /// the architecture this crate was compiled for.
    #[must_use]
    pub fn arch(mut self, arch: &'a str) -> Self {
        self.arch = Some(arch);
        self
    }

    /// Set a string that the asset name must contain. This is also used to pick which files are
    /// installed from an archive.
    #[must_use]
    pub fn matching(mut self, matching: &'a str) -> Self {
        self.matching = Some(matching);
        self
    }

    /// Accept assets with any extension, including bare executables and packages.
    #[must_use]
    pub fn disable_extension_matching(mut self) -> Self {
        self.disable_extension_matching = true;
        self
    }

    /// Set a regex that asset names must end with instead of the default archive extensions.
    ///
    /// You cannot set this if you call `disable_extension_matching`.
    #[must_use]
    pub fn extension(mut self, extension: &'a str) -> Self {
        self.extension = Some(extension);
        self
    }

    /// The name to install the binary as. This is ignored, with a warning, when an archive
    /// contains more than one file.
    #[must_use]
    pub fn rename_to(mut self, name: &'a str) -> Self {
        self.rename_to = Some(name);
        self
    }

    /// Set the file mode for every installed binary.
    #[must_use]
    pub fn chmod(mut self, mode: ChmodMode) -> Self {
        self.chmod = Some(mode);
        self
    }

    /// Set the directory inside an archive that holds the binaries, like `dist/bin`.
    #[must_use]
    pub fn binaries_location(mut self, location: &'a Path) -> Self {
        self.binaries_location = Some(location);
        self
    }

    /// Set the directory that every release is installed under. Each release gets its own
    /// directory at `<tool root>/<owner>/<repo>/<tag>/<platform>-<arch>`.
    ///
    /// You must set this.
    #[must_use]
    pub fn tool_root<P: AsRef<Path>>(mut self, tool_root: P) -> Self {
        self.tool_root = Some(tool_root.as_ref().to_path_buf());
        self
    }

    /// Set the store used to cache installed releases. Without one nothing is cached.
    #[must_use]
    pub fn cache_store(mut self, store: Box<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Never read from or write to the cache store.
    #[must_use]
    pub fn disable_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// Set a token to use for API requests and downloads.
    #[must_use]
    pub fn token(mut self, token: &'a str) -> Self {
        self.token = Some(token);
        self
    }

    /// Set the base URL for the GitHub API. This is useful for testing or for GitHub Enterprise,
    /// where it looks like `https://github.my-corp.example.com/api/v3`.
    #[must_use]
    pub fn api_base_url(mut self, api_base_url: &'a str) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Set where the directory holding the installed binaries is recorded. By default it is
    /// printed to stdout.
    #[must_use]
    pub fn path_registry(mut self, registry: Box<dyn PathRegistry>) -> Self {
        self.path_registry = Some(registry);
        self
    }

    /// Builds a new [`Binrel`] instance and returns it.
    ///
    /// # Errors
    ///
    /// If you have not set a required option (`project` and `tool_root`), have set incompatible
    /// options, or have set a platform that is not supported, this method will return an error.
    pub fn build(self) -> Result<Binrel> {
        let Some(project) = self.project.as_deref() else {
            return Err(anyhow!("You must set a project"));
        };
        let Some(tool_root) = self.tool_root.as_deref() else {
            return Err(anyhow!("You must set a tool root"));
        };
        if self.disable_extension_matching && self.extension.is_some() {
            return Err(anyhow!(
                "You cannot set an extension pattern and disable extension matching"
            ));
        }
        if let Some(name) = self.rename_to {
            check_file_name(name)?;
        }
        if let Some(location) = self.binaries_location {
            check_relative_path(location)?;
        }

        let spec = self.release_spec(project)?;
        let platform = PlatformDescriptor::build(self.platform, self.arch)?;
        let matcher = AssetMatcher::new(
            MatchCriteria::for_platform(&platform)
                .name_filter(self.matching)
                .extension(self.extension_match()?),
        );
        let plan = self.install_plan(tool_root, &spec, &platform);
        let source = GitHub::new(self.api_base_url, self.token)?;

        Ok(Binrel::new(
            spec,
            platform,
            matcher,
            plan,
            CacheManager::new(if self.disable_cache {
                None
            } else {
                self.cache_store
            }),
            Box::new(source),
            self.path_registry.unwrap_or_else(|| Box::new(StdoutPaths)),
        ))
    }

    fn release_spec(&self, project: &str) -> Result<ReleaseSpec> {
        let (owner, repo) = project
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| anyhow!("could not parse owner and repo name from {project}"))?;

        let tag = self
            .tag
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(LATEST);
        check_relative_path(Path::new(tag)).context("invalid tag")?;
        debug!("Parsed {project} = {owner} / {repo}, tag = {tag}");

        Ok(ReleaseSpec {
            owner: owner.to_string(),
            project: repo.to_string(),
            tag: tag.to_string(),
            prerelease: self.prerelease,
        })
    }

    fn extension_match(&self) -> Result<ExtensionMatch> {
        if self.disable_extension_matching {
            return Ok(ExtensionMatch::Disabled);
        }
        match self.extension {
            Some(pattern) => ExtensionMatch::pattern(pattern)
                .with_context(|| format!("invalid extension pattern `{pattern}`")),
            None => Ok(ExtensionMatch::Default),
        }
    }

    fn install_plan(
        &self,
        tool_root: &Path,
        spec: &ReleaseSpec,
        platform: &PlatformDescriptor,
    ) -> InstallPlan {
        let destination_root = tool_root
            .join(&spec.owner)
            .join(&spec.project)
            .join(&spec.tag)
            .join(format!("{}-{}", platform.os(), platform.arch()));
        debug!("destination root = {}", destination_root.display());

        InstallPlan {
            destination_root,
            binaries_subpath: self.binaries_location.map(Path::to_path_buf),
            rename_to: self.rename_to.map(String::from),
            chmod: self.chmod,
            binary_filter: self.matching.map(String::from),
        }
    }
}

fn check_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(anyhow!("`{name}` is not a plain file name")),
    }
}

fn check_relative_path(path: &Path) -> Result<()> {
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(())
    } else {
        Err(anyhow!(
            "`{}` must be a relative path without `..`",
            path.display()
        ))
    }
}
