use itertools::Itertools;
use log::debug;
use strum::{EnumIter, IntoEnumIterator};

/// The archive extensions that are extracted rather than installed as-is.
#[derive(Clone, Copy, Debug, EnumIter, PartialEq, Eq)]
pub(crate) enum Extension {
    TarBz2,
    TarGz,
    TarXz,
    Tgz,
    Zip,
}

/// The compression wrapped around a tarball. The flag is the `tar` option that selects the
/// matching decompressor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TarCompression {
    Gzip,
    Xz,
    Bzip2,
}

impl TarCompression {
    pub fn flag(self) -> Option<&'static str> {
        match self {
            TarCompression::Gzip => None,
            TarCompression::Xz => Some("xJ"),
            TarCompression::Bzip2 => Some("xj"),
        }
    }
}

/// How a downloaded asset is turned into installed files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar(TarCompression),
    Zip,
    /// Anything without a recognized archive extension. It is installed as a single file.
    Opaque,
}

impl Extension {
    pub(crate) fn extension(self) -> &'static str {
        match self {
            Extension::TarBz2 => ".tar.bz2",
            Extension::TarGz => ".tar.gz",
            Extension::TarXz => ".tar.xz",
            Extension::Tgz => ".tgz",
            Extension::Zip => ".zip",
        }
    }

    /// Whether assets with this extension are accepted when extension matching is on and no
    /// custom pattern was given.
    pub(crate) fn is_default_match(self) -> bool {
        match self {
            Extension::TarGz | Extension::TarXz | Extension::Tgz | Extension::Zip => true,
            Extension::TarBz2 => false,
        }
    }

    pub(crate) fn archive_kind(self) -> ArchiveKind {
        match self {
            Extension::TarGz | Extension::Tgz => ArchiveKind::Tar(TarCompression::Gzip),
            Extension::TarXz => ArchiveKind::Tar(TarCompression::Xz),
            Extension::TarBz2 => ArchiveKind::Tar(TarCompression::Bzip2),
            Extension::Zip => ArchiveKind::Zip,
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Extension> {
        let name = name.to_lowercase();
        // All of our extensions are distinct suffixes, but checking the longest first keeps this
        // correct if we ever add one like ".gz".
        Extension::iter()
            .sorted_by(|a, b| Ord::cmp(&a.extension().len(), &b.extension().len()))
            .rev()
            .find(|e| name.ends_with(e.extension()))
    }
}

/// Classifies an asset by the suffix of its name.
pub fn classify(name: &str) -> ArchiveKind {
    let kind = Extension::from_name(name).map_or(ArchiveKind::Opaque, Extension::archive_kind);
    debug!("classified {name} as {kind:?}");
    kind
}
