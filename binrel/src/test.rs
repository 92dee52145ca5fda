use crate::{
    archive::test_archives::write_archive, BinrelBuilder, ChmodMode, DirCacheStore,
    GitHubPathFile, InstallError, InstallWarning,
};
use anyhow::Result;
use mockito::{Matcher, Mock, Server, ServerGuard};
use reqwest::header::ACCEPT;
use std::{fs, path::Path};
use tempfile::{tempdir, TempDir};
use test_log::test;

const LINUX_ASSETS: &[&str] = &[
    "tool-v1.2.3-darwin-amd64.tar.gz",
    "tool-v1.2.3-linux-arm64.tar.gz",
    "tool-v1.2.3-linux-amd64.tar.gz",
    "tool-v1.2.3-linux-amd64.deb",
    "checksums.txt",
];

fn release_body(server_url: &str, tag: &str, names: &[&str]) -> String {
    serde_json::json!({
        "tag_name": tag,
        "prerelease": false,
        "draft": false,
        "assets": names
            .iter()
            .enumerate()
            .map(|(i, name)| serde_json::json!({
                "name": name,
                "url": format!("{server_url}/assets/{i}"),
            }))
            .collect::<Vec<_>>(),
    })
    .to_string()
}

fn archive_bytes(name: &str, entries: &[(&str, &str)]) -> Result<Vec<u8>> {
    let td = tempdir()?;
    let path = td.path().join(name);
    write_archive(&path, entries)?;
    Ok(fs::read(path)?)
}

async fn release_mock(server: &mut ServerGuard, path: &str, body: String, hits: usize) -> Mock {
    server
        .mock("GET", path)
        .match_header(ACCEPT.as_str(), "application/json")
        .with_status(200)
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

async fn download_mock(server: &mut ServerGuard, index: usize, body: Vec<u8>, hits: usize) -> Mock {
    server
        .mock("GET", format!("/assets/{index}").as_str())
        .match_header(ACCEPT.as_str(), "application/octet-stream")
        .with_status(200)
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

struct Dirs {
    _td: TempDir,
    tool_root: std::path::PathBuf,
    cache: std::path::PathBuf,
    github_path: std::path::PathBuf,
}

fn dirs() -> Result<Dirs> {
    let td = tempdir()?;
    Ok(Dirs {
        tool_root: td.path().join("tools"),
        cache: td.path().join("cache"),
        github_path: td.path().join("github_path"),
        _td: td,
    })
}

fn registered(dirs: &Dirs) -> Result<Vec<String>> {
    Ok(fs::read_to_string(&dirs.github_path)?
        .lines()
        .map(String::from)
        .collect())
}

#[test(tokio::test)]
async fn second_install_of_a_tag_is_served_from_the_cache() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/v1.2.3",
        release_body(&url, "v1.2.3", LINUX_ASSETS),
        1,
    )
    .await;
    let download = download_mock(
        &mut server,
        2,
        archive_bytes(
            "tool.tar.gz",
            &[("tool-v1.2.3/tool", "#!/bin/sh\necho tool\n")],
        )?,
        1,
    )
    .await;

    let dirs = dirs()?;
    let dest = dirs.tool_root.join("owner/tool/v1.2.3/linux-x64");
    for expect_hit in [false, true] {
        let binrel = BinrelBuilder::new()
            .project("owner/tool")
            .tag("v1.2.3")
            .platform("linux")
            .arch("x64")
            .tool_root(&dirs.tool_root)
            .cache_store(Box::new(DirCacheStore::new(&dirs.cache)))
            .api_base_url(&url)
            .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
            .build()?;
        let report = binrel.install().await?;

        assert_eq!(report.cache_hit, expect_hit);
        assert_eq!(report.bin_dir, dest);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(fs::read_to_string(dest.join("tool"))?, "#!/bin/sh\necho tool\n");
        if expect_hit {
            assert_eq!(report.asset, None);
        } else {
            assert_eq!(
                report.asset.as_deref(),
                Some("tool-v1.2.3-linux-amd64.tar.gz")
            );
            assert_eq!(report.installed, vec![dest.join("tool")]);
        }
    }

    assert!(dirs.cache.join("owner/tool/v1.2.3/linux-x64/tool").is_file());
    let dest = dest.to_string_lossy().to_string();
    assert_eq!(registered(&dirs)?, vec![dest.clone(), dest]);

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn latest_release_is_never_cached() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/latest",
        release_body(&url, "v1.2.3", LINUX_ASSETS),
        2,
    )
    .await;
    let download = download_mock(
        &mut server,
        2,
        archive_bytes("tool.tar.gz", &[("tool", "tool")])?,
        2,
    )
    .await;

    let dirs = dirs()?;
    for _ in 0..2 {
        let binrel = BinrelBuilder::new()
            .project("owner/tool")
            .platform("linux")
            .arch("amd64")
            .tool_root(&dirs.tool_root)
            .cache_store(Box::new(DirCacheStore::new(&dirs.cache)))
            .api_base_url(&url)
            .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
            .build()?;
        let report = binrel.install().await?;
        assert!(!report.cache_hit);
        assert_eq!(
            report.bin_dir,
            dirs.tool_root.join("owner/tool/latest/linux-amd64")
        );
    }
    assert!(!dirs.cache.exists());

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn stale_files_are_removed_before_unpacking() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/latest",
        release_body(&url, "v2.0.0", LINUX_ASSETS),
        1,
    )
    .await;
    let download = download_mock(
        &mut server,
        2,
        archive_bytes("tool.tar.gz", &[("tool", "new")])?,
        1,
    )
    .await;

    let dirs = dirs()?;
    let dest = dirs.tool_root.join("owner/tool/latest/linux-x64");
    fs::create_dir_all(&dest)?;
    fs::write(dest.join("old-tool"), "old")?;

    let report = BinrelBuilder::new()
        .project("owner/tool")
        .platform("linux")
        .arch("x64")
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await?;

    assert_eq!(report.installed, vec![dest.join("tool")]);
    assert!(!dest.join("old-tool").exists());

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn bare_binary_is_renamed_and_chmodded() -> Result<()> {
    let names = &["tool-darwin-arm64", "tool-linux-amd64", "tool-linux-arm64"];
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/v0.4.0",
        release_body(&url, "v0.4.0", names),
        1,
    )
    .await;
    let download = download_mock(&mut server, 2, b"\x7fELF binary".to_vec(), 1).await;

    let dirs = dirs()?;
    let report = BinrelBuilder::new()
        .project("owner/tool")
        .tag("v0.4.0")
        .platform("linux")
        .arch("arm64")
        .disable_extension_matching()
        .rename_to("tool")
        .chmod(ChmodMode::new(0o755))
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await?;

    let dest = dirs.tool_root.join("owner/tool/v0.4.0/linux-arm64");
    assert_eq!(report.asset.as_deref(), Some("tool-linux-arm64"));
    assert_eq!(report.bin_dir, dest);
    assert_eq!(report.installed, vec![dest.join("tool")]);
    assert_eq!(fs::read(dest.join("tool"))?, b"\x7fELF binary");
    #[cfg(target_family = "unix")]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(
            dest.join("tool").metadata()?.permissions().mode() & 0o777,
            0o755
        );
    }

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn binaries_location_is_registered() -> Result<()> {
    let names = &["tool-1.0.0-linux-x86_64.zip", "tool-1.0.0-windows-x86_64.zip"];
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/1.0.0",
        release_body(&url, "1.0.0", names),
        1,
    )
    .await;
    let download = download_mock(
        &mut server,
        0,
        archive_bytes(
            "tool.zip",
            &[
                ("tool-1.0.0/bin/tool", "tool"),
                ("tool-1.0.0/bin/tool-helper", "helper"),
                ("tool-1.0.0/LICENSE", "license"),
            ],
        )?,
        1,
    )
    .await;

    let dirs = dirs()?;
    let report = BinrelBuilder::new()
        .project("owner/tool")
        .tag("1.0.0")
        .platform("linux")
        .arch("x64")
        .binaries_location(Path::new("tool-1.0.0/bin"))
        .rename_to("ignored")
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await?;

    let bin_dir = dirs
        .tool_root
        .join("owner/tool/1.0.0/linux-x64/tool-1.0.0/bin");
    assert_eq!(report.bin_dir, bin_dir);
    assert_eq!(
        report.installed,
        vec![bin_dir.join("tool"), bin_dir.join("tool-helper")]
    );
    assert_eq!(
        report.warnings,
        vec![InstallWarning::RenameIgnored {
            rename_to: "ignored".to_string(),
            file_count: 2,
        }]
    );
    assert_eq!(
        registered(&dirs)?,
        vec![bin_dir.to_string_lossy().to_string()]
    );

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn cached_bare_binary_registers_the_same_directory() -> Result<()> {
    let names = &["tool-darwin-amd64", "tool-linux-amd64"];
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/v1.0.0",
        release_body(&url, "v1.0.0", names),
        1,
    )
    .await;
    let download = download_mock(&mut server, 1, b"binary".to_vec(), 1).await;

    let dirs = dirs()?;
    let dest = dirs.tool_root.join("owner/tool/v1.0.0/linux-x64");
    for expect_hit in [false, true] {
        let report = BinrelBuilder::new()
            .project("owner/tool")
            .tag("v1.0.0")
            .platform("linux")
            .arch("x64")
            .disable_extension_matching()
            .binaries_location(Path::new("bin"))
            .tool_root(&dirs.tool_root)
            .cache_store(Box::new(DirCacheStore::new(&dirs.cache)))
            .api_base_url(&url)
            .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
            .build()?
            .install()
            .await?;

        assert_eq!(report.cache_hit, expect_hit);
        assert_eq!(report.bin_dir, dest);
        assert_eq!(fs::read(dest.join("tool-linux-amd64"))?, b"binary");
    }

    let dest = dest.to_string_lossy().to_string();
    assert_eq!(registered(&dirs)?, vec![dest.clone(), dest]);

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn asset_name_filter_ignores_case_for_archive_files() -> Result<()> {
    let names = &["mytool-linux-amd64.tar.gz", "other-linux-amd64.tar.gz"];
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/v1.0.0",
        release_body(&url, "v1.0.0", names),
        1,
    )
    .await;
    let download = download_mock(
        &mut server,
        0,
        archive_bytes(
            "mytool.tar.gz",
            &[("mytool-1.0.0/mytool", "tool"), ("mytool-1.0.0/README.md", "readme")],
        )?,
        1,
    )
    .await;

    let dirs = dirs()?;
    let report = BinrelBuilder::new()
        .project("owner/tool")
        .tag("v1.0.0")
        .platform("linux")
        .arch("x64")
        .matching("MyTool")
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await?;

    let dest = dirs.tool_root.join("owner/tool/v1.0.0/linux-x64");
    assert_eq!(report.asset.as_deref(), Some("mytool-linux-amd64.tar.gz"));
    assert_eq!(report.installed, vec![dest.join("mytool")]);

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn newest_prerelease_is_installed() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let body = format!(
        "[{}, {}]",
        release_body(&url, "v2.0.0", LINUX_ASSETS),
        release_body(&url, "v2.1.0-rc.1", LINUX_ASSETS).replace(
            r#""prerelease":false"#,
            r#""prerelease":true"#
        ),
    );
    let release = server
        .mock("GET", "/repos/owner/tool/releases")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let download = download_mock(
        &mut server,
        2,
        archive_bytes("tool.tar.gz", &[("tool", "rc")])?,
        1,
    )
    .await;

    let dirs = dirs()?;
    let report = BinrelBuilder::new()
        .project("owner/tool")
        .prerelease(true)
        .platform("linux")
        .arch("x64")
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await?;
    assert_eq!(fs::read_to_string(report.bin_dir.join("tool"))?, "rc");

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn no_matching_asset_names_every_candidate() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/v1.2.3",
        release_body(&url, "v1.2.3", &["tool.exe", "tool-linux-amd64.deb"]),
        1,
    )
    .await;

    let dirs = dirs()?;
    let err = BinrelBuilder::new()
        .project("owner/tool")
        .tag("v1.2.3")
        .platform("linux")
        .arch("x64")
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await
        .unwrap_err();

    assert_eq!(err.project, "owner/tool");
    assert_eq!(err.tag, "v1.2.3");
    assert_eq!(err.asset, None);
    assert!(matches!(
        &err.kind,
        InstallError::NoMatchingAsset { attempted } if attempted == &["tool.exe", "tool-linux-amd64.deb"]
    ));
    assert!(!dirs.github_path.exists());

    release.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn failed_download_names_the_asset() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = release_mock(
        &mut server,
        "/repos/owner/tool/releases/tags/v1.2.3",
        release_body(&url, "v1.2.3", LINUX_ASSETS),
        1,
    )
    .await;
    let download = server
        .mock("GET", "/assets/2")
        .with_status(500)
        .create_async()
        .await;

    let dirs = dirs()?;
    let err = BinrelBuilder::new()
        .project("owner/tool")
        .tag("v1.2.3")
        .platform("linux")
        .arch("x64")
        .tool_root(&dirs.tool_root)
        .cache_store(Box::new(DirCacheStore::new(&dirs.cache)))
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await
        .unwrap_err();

    assert_eq!(err.asset.as_deref(), Some("tool-v1.2.3-linux-amd64.tar.gz"));
    assert!(matches!(err.kind, InstallError::Download { .. }));
    assert!(err
        .to_string()
        .starts_with("failed to install owner/tool@v1.2.3 (asset tool-v1.2.3-linux-amd64.tar.gz)"));
    assert!(!dirs.cache.exists());

    release.assert_async().await;
    download.assert_async().await;
    Ok(())
}

#[test(tokio::test)]
async fn missing_release_is_a_lookup_error() -> Result<()> {
    let mut server = Server::new_async().await;
    let url = server.url();
    let release = server
        .mock("GET", "/repos/owner/tool/releases/tags/v9.9.9")
        .with_status(404)
        .create_async()
        .await;

    let dirs = dirs()?;
    let err = BinrelBuilder::new()
        .project("owner/tool")
        .tag("v9.9.9")
        .platform("linux")
        .arch("x64")
        .tool_root(&dirs.tool_root)
        .api_base_url(&url)
        .path_registry(Box::new(GitHubPathFile::new(&dirs.github_path)))
        .build()?
        .install()
        .await
        .unwrap_err();
    assert!(matches!(err.kind, InstallError::ReleaseLookup(_)));

    release.assert_async().await;
    Ok(())
}
