use crate::{
    error::InstallError, extension::Extension, platform::PlatformDescriptor, release::Asset,
};
use log::debug;
use regex::Regex;
use strum::IntoEnumIterator;

const VENDOR_TOKENS: &[&str] = &["apple", "linux", "pc", "unknown"];
const LIBC_TOKENS: &[&str] = &["gnu", "glibc", "musl"];

/// How the end of an asset name is checked.
#[derive(Clone, Debug, Default)]
pub enum ExtensionMatch {
    /// Any name is accepted.
    Disabled,
    /// The name must end with one of `.tar.gz`, `.tar.xz`, `.zip`, or `.tgz`.
    #[default]
    Default,
    /// The pattern must match at the end of the lowercased name.
    Pattern(Regex),
}

impl ExtensionMatch {
    /// Compiles a user-supplied extension pattern. The pattern is anchored to the end of the
    /// asset name.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid regex.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(ExtensionMatch::Pattern(Regex::new(&format!(
            "(?:{pattern})$"
        ))?))
    }

    fn is_match(&self, name: &str) -> bool {
        match self {
            ExtensionMatch::Disabled => true,
            ExtensionMatch::Default => Extension::iter()
                .filter(|e| e.is_default_match())
                .any(|e| name.ends_with(e.extension())),
            ExtensionMatch::Pattern(re) => re.is_match(name),
        }
    }
}

/// Everything an asset name has to satisfy to be picked.
#[derive(Clone, Debug)]
pub struct MatchCriteria {
    pub platform_tokens: Vec<String>,
    pub arch_tokens: Vec<String>,
    pub name_filter: Option<String>,
    pub extension: ExtensionMatch,
    pub vendor_optional: bool,
    pub libc_optional: bool,
}

impl MatchCriteria {
    /// Criteria for a platform with no name filter, default extension matching, and optional
    /// vendor and libc.
    pub fn for_platform(platform: &PlatformDescriptor) -> Self {
        Self {
            platform_tokens: platform.platform_tokens(),
            arch_tokens: platform.arch_tokens().to_vec(),
            name_filter: None,
            extension: ExtensionMatch::Default,
            vendor_optional: true,
            libc_optional: true,
        }
    }

    #[must_use]
    pub fn name_filter(mut self, filter: Option<&str>) -> Self {
        self.name_filter = filter.map(str::to_lowercase);
        self
    }

    #[must_use]
    pub fn extension(mut self, extension: ExtensionMatch) -> Self {
        self.extension = extension;
        self
    }
}

#[derive(Debug)]
pub(crate) struct AssetMatcher {
    criteria: MatchCriteria,
}

impl AssetMatcher {
    pub(crate) fn new(criteria: MatchCriteria) -> Self {
        Self { criteria }
    }

    /// Returns the first asset, in the order given, that satisfies every criterion. Ties are not
    /// broken any other way, so a release with equally good gnu and musl builds gets whichever
    /// one the API listed first.
    pub(crate) fn pick_asset<'b>(&self, assets: &'b [Asset]) -> Result<&'b Asset, InstallError> {
        // This could all be done much more simply with the iterator's .find()
        // method, but then there's no place to put all the debugging output.
        for asset in assets {
            debug!("matching against asset name = {}", asset.name);
            if self.is_match(&asset.name.to_lowercase()) {
                debug!("picked asset named {}", asset.name);
                return Ok(asset);
            }
        }

        Err(InstallError::NoMatchingAsset {
            attempted: assets.iter().map(|a| a.name.clone()).collect(),
        })
    }

    // Every predicate is evaluated, even after one fails, so the debug log shows the complete
    // picture for each asset.
    fn is_match(&self, name: &str) -> bool {
        let c = &self.criteria;

        let name_ok = c.name_filter.as_deref().is_none_or(|f| name.contains(f));
        debug!("  name filter {:?}: {name_ok}", c.name_filter);

        let arch_ok = any_token(name, &c.arch_tokens);
        debug!("  arch {:?}: {arch_ok}", c.arch_tokens);

        let platform_ok = any_token(name, &c.platform_tokens);
        debug!("  platform {:?}: {platform_ok}", c.platform_tokens);

        let has_vendor = any_token(name, VENDOR_TOKENS);
        let vendor_ok = has_vendor || c.vendor_optional;
        debug!("  vendor present = {has_vendor}, optional = {}: {vendor_ok}", c.vendor_optional);

        let has_libc = any_token(name, LIBC_TOKENS);
        let libc_ok = has_libc || c.libc_optional;
        debug!("  libc present = {has_libc}, optional = {}: {libc_ok}", c.libc_optional);

        let extension_ok = c.extension.is_match(name);
        debug!("  extension {:?}: {extension_ok}", c.extension);

        name_ok && arch_ok && platform_ok && vendor_ok && libc_ok && extension_ok
    }
}

fn any_token<S: AsRef<str>>(name: &str, tokens: &[S]) -> bool {
    tokens.iter().any(|t| name.contains(t.as_ref()))
}
