//! Reading install requests from a YAML document.
//!
//! The document maps `owner/repo` keys to one of three entry shapes:
//!
//! ```yaml
//! aquasecurity/tfsec:
//!   tag: v1.18.0
//!   platform: linux
//!   arch: amd64
//! jaxxstorm/connecti:
//! jaxxstorm/change-aws-credentials: v0.4.0
//! ```
//!
//! An empty value installs the latest release with default settings, a string installs that tag,
//! and a mapping sets any of the keys in [`EntrySettings`].

use crate::{installer::ChmodMode, release::LATEST};
use anyhow::{anyhow, Context, Result};
use lazy_regex::regex_is_match;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::path::PathBuf;

/// The value of one entry in the config document.
#[derive(Debug, PartialEq)]
pub enum ConfigEntry {
    Omit,
    TagOnly(String),
    Detailed(EntrySettings),
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct EntrySettings {
    pub tag: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub extension_matching: Option<bool>,
    /// A regex that asset names must end with.
    pub extension: Option<String>,
    pub rename_to: Option<String>,
    #[serde(deserialize_with = "chmod_mode")]
    pub chmod: Option<ChmodMode>,
    pub binaries_location: Option<PathBuf>,
    pub cache: Option<bool>,
    pub asset_name: Option<String>,
    pub prerelease: Option<bool>,
}

/// Everything needed to install one release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallRequest {
    pub owner: String,
    pub repo: String,
    pub tag: String,
    pub prerelease: bool,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub extension_matching: bool,
    pub extension: Option<String>,
    pub rename_to: Option<String>,
    pub chmod: Option<ChmodMode>,
    pub binaries_location: Option<PathBuf>,
    pub cache: bool,
    pub asset_name: Option<String>,
}

impl InstallRequest {
    /// A request for the latest release of `owner/repo` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `full_name` is not in `owner/repo` form.
    pub fn new(full_name: &str) -> Result<Self> {
        let (owner, repo) = split_full_name(full_name)?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag: LATEST.to_string(),
            prerelease: false,
            platform: None,
            arch: None,
            extension_matching: true,
            extension: None,
            rename_to: None,
            chmod: None,
            binaries_location: None,
            cache: true,
            asset_name: None,
        })
    }

    /// `owner/repo`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn from_entry(full_name: &str, entry: ConfigEntry) -> Result<Self> {
        let mut req = Self::new(full_name)?;
        match entry {
            ConfigEntry::Omit => (),
            ConfigEntry::TagOnly(tag) => req.tag = tag,
            ConfigEntry::Detailed(s) => {
                if let Some(tag) = s.tag {
                    req.tag = tag;
                }
                req.prerelease = s.prerelease.unwrap_or(false);
                req.platform = s.platform;
                req.arch = s.arch;
                req.extension_matching = s.extension_matching.unwrap_or(true);
                req.extension = s.extension;
                req.rename_to = s.rename_to;
                req.chmod = s.chmod;
                req.binaries_location = s.binaries_location;
                req.cache = s.cache.unwrap_or(true);
                req.asset_name = s.asset_name;
            }
        }
        Ok(req)
    }
}

/// Parses a config document into install requests, in document order.
///
/// # Errors
///
/// Returns an error if the document is not YAML, is not a mapping, has a key that is not in
/// `owner/repo` form, or has an entry that cannot be parsed.
pub fn parse_config(text: &str) -> Result<Vec<InstallRequest>> {
    let doc: Value = serde_yaml::from_str(text).context("config is not valid YAML")?;
    let Value::Mapping(entries) = doc else {
        return Err(anyhow!("data must be object"));
    };

    entries
        .into_iter()
        .map(|(key, value)| {
            let Value::String(full_name) = key else {
                return Err(anyhow!("config keys must be strings in owner/repo form"));
            };
            let entry = parse_entry(&full_name, value)?;
            InstallRequest::from_entry(&full_name, entry)
        })
        .collect()
}

fn parse_entry(full_name: &str, value: Value) -> Result<ConfigEntry> {
    match value {
        Value::Null => Ok(ConfigEntry::Omit),
        Value::String(tag) if tag.trim().is_empty() => Ok(ConfigEntry::Omit),
        Value::String(tag) => Ok(ConfigEntry::TagOnly(tag)),
        Value::Number(n) if n.is_f64() => Err(anyhow!(
            "the tag `{n}` for {full_name} was read as a number, quote it to keep it as written"
        )),
        Value::Number(n) => Ok(ConfigEntry::TagOnly(n.to_string())),
        v @ Value::Mapping(_) => serde_yaml::from_value(v)
            .map(ConfigEntry::Detailed)
            .with_context(|| format!("invalid settings for {full_name}")),
        Value::Bool(_) | Value::Sequence(_) | Value::Tagged(_) => Err(anyhow!(
            "the entry for {full_name} must be empty, a tag, or a mapping of settings"
        )),
    }
}

fn split_full_name(full_name: &str) -> Result<(&str, &str)> {
    if !regex_is_match!(r"^[\w.-]+/[\w.-]+$", full_name) {
        return Err(anyhow!(
            "`{full_name}` is not a repository name in owner/repo form"
        ));
    }
    full_name
        .split_once('/')
        .ok_or_else(|| anyhow!("`{full_name}` is not a repository name in owner/repo form"))
}

// YAML reads `chmod: 755` as a number, so digits are taken as octal whichever way they are
// written.
fn chmod_mode<'de, D>(deserializer: D) -> Result<Option<ChmodMode>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    let text = match Option::<Raw>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Raw::Number(n)) => n.to_string(),
        Some(Raw::Text(s)) => s,
    };
    text.parse::<ChmodMode>()
        .map(Some)
        .map_err(serde::de::Error::custom)
}
