use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tempfile::TempDir;
use url::Url;

/// The tag name that asks for the most recent release instead of a fixed one.
pub const LATEST: &str = "latest";

/// Identifies one release of one repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub owner: String,
    pub project: String,
    /// A tag name or [`LATEST`].
    pub tag: String,
    /// Only consulted when `tag` is [`LATEST`].
    pub prerelease: bool,
}

impl ReleaseSpec {
    pub fn is_latest(&self) -> bool {
        self.tag == LATEST
    }

    /// `owner/project`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.project)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub assets: Vec<Asset>,
}

/// A file attached to a release.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(try_from = "AssetHelper")]
pub struct Asset {
    pub name: String,
    pub url: Url,
}

#[derive(Debug, Deserialize)]
struct AssetHelper {
    name: String,
    url: Option<Url>,
    browser_download_url: Option<Url>,
}

impl TryFrom<AssetHelper> for Asset {
    type Error = anyhow::Error;

    fn try_from(helper: AssetHelper) -> Result<Self, Self::Error> {
        // prefer `url` (API endpoint) over `browser_download_url` because the API endpoint
        // works for both public and private repos with proper authentication headers, while
        // the browser download URL only works for public repos.
        let url = helper.url.or(helper.browser_download_url).ok_or(anyhow!(
            "an asset in the response did not have a `url` or `browser_download_url` field"
        ))?;

        Ok(Asset {
            name: helper.name,
            url,
        })
    }
}

/// A downloaded asset.
#[derive(Debug)]
pub struct Download {
    // We need to keep the temp dir around so that it's not deleted before
    // we're done with it.
    pub(crate) _temp_dir: TempDir,
    pub(crate) archive_path: PathBuf,
}

impl Download {
    pub fn new(temp_dir: TempDir, archive_path: PathBuf) -> Self {
        Self {
            _temp_dir: temp_dir,
            archive_path,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.archive_path
    }
}
