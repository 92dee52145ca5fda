use crate::release::{Asset, Download, Release, ReleaseSpec};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, RequestBuilder, StatusCode,
};
use std::{fs::File, io::Write};
use tempfile::tempdir;
use url::Url;

pub(crate) const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// How many releases to ask for per page when scanning for a prerelease.
const RELEASES_PER_PAGE: u32 = 100;

/// The source of release metadata and asset contents.
#[async_trait]
pub trait ReleaseSource: std::fmt::Debug + Send + Sync {
    async fn latest_release(&self, owner: &str, repo: &str) -> Result<Release>;

    async fn release_by_tag(&self, owner: &str, repo: &str, tag: &str) -> Result<Release>;

    /// One page of releases, newest first. `page` starts at 1.
    async fn list_releases(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Release>>;

    /// Downloads an asset into a new temporary directory.
    async fn download(&self, asset: &Asset) -> Result<Download>;
}

/// Finds the release a [`ReleaseSpec`] refers to. A concrete tag is looked up directly. For `latest`, the
/// latest published release is used unless prereleases are wanted, in which case the newest
/// prerelease is found by paging through the release list.
pub(crate) async fn resolve_release(
    source: &dyn ReleaseSource,
    spec: &ReleaseSpec,
) -> Result<Release> {
    if !spec.is_latest() {
        debug!("looking up release {} of {}", spec.tag, spec.full_name());
        return source
            .release_by_tag(&spec.owner, &spec.project, &spec.tag)
            .await;
    }

    if !spec.prerelease {
        debug!("looking up the latest release of {}", spec.full_name());
        return source.latest_release(&spec.owner, &spec.project).await;
    }

    debug!("scanning releases of {} for the newest prerelease", spec.full_name());
    let mut page = 1;
    loop {
        let releases = source
            .list_releases(&spec.owner, &spec.project, page, RELEASES_PER_PAGE)
            .await?;
        if releases.is_empty() {
            return Err(anyhow!(
                "{} does not have any prereleases",
                spec.full_name()
            ));
        }
        if let Some(release) = releases.into_iter().find(|r| r.prerelease && !r.draft) {
            debug!("found prerelease {}", release.tag_name);
            return Ok(release);
        }
        page += 1;
    }
}

/// Talks to the GitHub REST API, or anything that speaks it, like GitHub Enterprise or Forgejo.
#[derive(Debug)]
pub struct GitHub {
    api_base_url: Url,
    token: Option<String>,
    client: Client,
}

impl GitHub {
    /// # Errors
    ///
    /// Returns an error if `api_base_url` is not a valid URL or the HTTP client cannot be built.
    pub fn new(api_base_url: Option<&str>, token: Option<&str>) -> Result<Self> {
        let api_base_url = Url::parse(api_base_url.unwrap_or(DEFAULT_API_BASE_URL))
            .context("invalid API base URL")?;
        Ok(Self {
            api_base_url,
            token: token.map(String::from),
            client: reqwest_client()?,
        })
    }

    fn releases_url(&self, owner: &str, repo: &str, rest: &[&str]) -> Result<Url> {
        let mut url = self.api_base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("{} cannot be used as a base URL", self.api_base_url))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "releases"])
            .extend(rest);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("Getting release info from `{url}`");
        let req_builder = self
            .client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_str("application/json")?);
        let req = self.maybe_add_token_header(req_builder)?.build()?;
        let resp = self.client.execute(req).await?;

        if let Err(e) = resp.error_for_status_ref() {
            return Err(anyhow::Error::new(e));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("could not parse the response from {url}"))
    }

    fn maybe_add_token_header(&self, mut req_builder: RequestBuilder) -> Result<RequestBuilder> {
        if let Some(token) = self.token.as_deref() {
            debug!("Adding token to GitHub request.");
            let bearer = format!("Bearer {token}");
            let mut auth_val = HeaderValue::from_str(&bearer)?;
            auth_val.set_sensitive(true);
            req_builder = req_builder.header(AUTHORIZATION, auth_val);
        } else {
            debug!("No token given.");
        }
        Ok(req_builder)
    }
}

#[async_trait]
impl ReleaseSource for GitHub {
    async fn latest_release(&self, owner: &str, repo: &str) -> Result<Release> {
        self.get_json(self.releases_url(owner, repo, &["latest"])?)
            .await
    }

    async fn release_by_tag(&self, owner: &str, repo: &str, tag: &str) -> Result<Release> {
        self.get_json(self.releases_url(owner, repo, &["tags", tag])?)
            .await
    }

    async fn list_releases(
        &self,
        owner: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Release>> {
        let mut url = self.releases_url(owner, repo, &[])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        self.get_json(url).await
    }

    async fn download(&self, asset: &Asset) -> Result<Download> {
        debug!("downloading asset from {}", asset.url);

        let mut req_builder = self.client.get(asset.url.clone()).header(
            ACCEPT,
            HeaderValue::from_str("application/octet-stream")
                .context("failed to create header value for Accept header")?,
        );
        req_builder = self.maybe_add_token_header(req_builder)?;
        let req = req_builder
            .build()
            .with_context(|| format!("failed to build HTTP request for {}", asset.url))?;

        let mut resp = self.client.execute(req).await.with_context(|| {
            format!(
                "failed to execute HTTP request to download asset from {}",
                asset.url
            )
        })?;
        if resp.status() != StatusCode::OK {
            let mut msg = format!("error requesting {}: {}", asset.url, resp.status());
            if let Ok(t) = resp.text().await {
                msg.push('\n');
                msg.push_str(&t);
            }
            return Err(anyhow!(msg));
        }

        let td = tempdir().context("failed to create temporary directory for download")?;
        let mut archive_path = td.path().to_path_buf();
        archive_path.push(&asset.name);
        debug!("archive path is {}", archive_path.to_string_lossy());

        {
            let mut downloaded_file = File::create(&archive_path).with_context(|| {
                format!(
                    "failed to create file at {} for downloaded asset",
                    archive_path.display()
                )
            })?;
            while let Some(c) = resp.chunk().await.with_context(|| {
                format!(
                    "failed to read chunk while downloading asset from {}",
                    asset.url
                )
            })? {
                downloaded_file.write_all(c.as_ref()).with_context(|| {
                    format!("failed to write chunk to {}", archive_path.display())
                })?;
            }
        }

        Ok(Download::new(td, archive_path))
    }
}

fn reqwest_client() -> Result<Client> {
    let builder = Client::builder().gzip(true);

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("binrel version {}", crate::VERSION))?,
    );
    Ok(builder.default_headers(headers).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use rstest::rstest;
    use test_log::test;

    fn release_json(tag: &str, prerelease: bool, assets: &[(&str, &str)]) -> serde_json::Value {
        serde_json::json!({
            "tag_name": tag,
            "prerelease": prerelease,
            "draft": false,
            "assets": assets
                .iter()
                .map(|(name, url)| serde_json::json!({"name": name, "url": url}))
                .collect::<Vec<_>>(),
        })
    }

    #[rstest]
    #[case::latest_without_token(None, None, "/repos/owner/tool/releases/latest")]
    #[case::latest_with_token(None, Some("ghp_fakeToken"), "/repos/owner/tool/releases/latest")]
    #[case::by_tag(Some("v1.0.0"), None, "/repos/owner/tool/releases/tags/v1.0.0")]
    #[tokio::test]
    async fn fetch_release(
        #[case] tag: Option<&str>,
        #[case] token: Option<&str>,
        #[case] expect_path: &str,
    ) -> Result<()> {
        let mut server = Server::new_async().await;
        let authorization = match token {
            Some(t) => Matcher::Exact(format!("Bearer {t}")),
            None => Matcher::Missing,
        };
        let m = server
            .mock("GET", expect_path)
            .match_header("Authorization", authorization)
            .match_header("Accept", "application/json")
            .with_status(200)
            .with_body(
                release_json(
                    tag.unwrap_or("v2.0.0"),
                    false,
                    &[("tool-linux-amd64.tar.gz", "https://example.com/assets/1")],
                )
                .to_string(),
            )
            .create_async()
            .await;

        let github = GitHub::new(Some(&server.url()), token)?;
        let release = match tag {
            Some(t) => github.release_by_tag("owner", "tool", t).await?,
            None => github.latest_release("owner", "tool").await?,
        };
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].name, "tool-linux-amd64.tar.gz");

        m.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn missing_release_is_an_error() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/repos/owner/tool/releases/tags/v9.9.9")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let github = GitHub::new(Some(&server.url()), None)?;
        assert!(github
            .release_by_tag("owner", "tool", "v9.9.9")
            .await
            .is_err());

        m.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn prerelease_scan_pages_through_releases() -> Result<()> {
        let mut server = Server::new_async().await;
        let page1 = server
            .mock("GET", "/repos/owner/tool/releases")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("per_page".into(), "100".into()),
            ]))
            .with_status(200)
            .with_body(serde_json::json!([release_json("v2.0.0", false, &[])]).to_string())
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/repos/owner/tool/releases")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "2".into()),
                Matcher::UrlEncoded("per_page".into(), "100".into()),
            ]))
            .with_status(200)
            .with_body(
                serde_json::json!([
                    release_json("v2.1.0-rc.2", true, &[]),
                    release_json("v2.1.0-rc.1", true, &[]),
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let github = GitHub::new(Some(&server.url()), None)?;
        let spec = ReleaseSpec {
            owner: "owner".to_string(),
            project: "tool".to_string(),
            tag: "latest".to_string(),
            prerelease: true,
        };
        let release = resolve_release(&github, &spec).await?;
        assert_eq!(release.tag_name, "v2.1.0-rc.2");

        page1.assert_async().await;
        page2.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn prerelease_scan_ends_on_empty_page() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/repos/owner/tool/releases")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let github = GitHub::new(Some(&server.url()), None)?;
        let spec = ReleaseSpec {
            owner: "owner".to_string(),
            project: "tool".to_string(),
            tag: "latest".to_string(),
            prerelease: true,
        };
        assert!(resolve_release(&github, &spec).await.is_err());

        m.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn download_sends_token_and_accept_header() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/assets/1")
            .match_header("Authorization", "Bearer secret")
            .match_header("Accept", "application/octet-stream")
            .with_status(200)
            .with_body("binary contents")
            .create_async()
            .await;

        let github = GitHub::new(Some(&server.url()), Some("secret"))?;
        let asset = Asset {
            name: "tool".to_string(),
            url: Url::parse(&format!("{}/assets/1", server.url()))?,
        };
        let download = github.download(&asset).await?;
        assert_eq!(std::fs::read_to_string(download.path())?, "binary contents");
        assert!(download.path().ends_with("tool"));

        m.assert_async().await;
        Ok(())
    }

    #[test(tokio::test)]
    async fn download_failure_includes_status() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/assets/1")
            .with_status(404)
            .create_async()
            .await;

        let github = GitHub::new(Some(&server.url()), None)?;
        let asset = Asset {
            name: "tool".to_string(),
            url: Url::parse(&format!("{}/assets/1", server.url()))?,
        };
        let err = github.download(&asset).await.unwrap_err();
        assert!(err.to_string().contains("404"));

        m.assert_async().await;
        Ok(())
    }
}
