use crate::extension::{ArchiveKind, TarCompression};
use anyhow::{anyhow, Context, Result};
use binstall_tar::Archive;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use log::debug;
use std::{
    fs::{self, File},
    io::Read,
    path::Path,
};
use xz2::read::XzDecoder;
use zip::ZipArchive;

/// Unpacks every entry of a tarball or zip file into `dest`, creating it if needed.
pub(crate) fn extract(downloaded_file: &Path, kind: ArchiveKind, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create directory {}", dest.display()))?;

    match kind {
        ArchiveKind::Tar(compression) => extract_tarball(downloaded_file, compression, dest),
        ArchiveKind::Zip => extract_zip(downloaded_file, dest),
        ArchiveKind::Opaque => Err(anyhow!(
            "{} is not an archive and cannot be extracted",
            downloaded_file.display()
        )),
    }
}

fn extract_tarball(downloaded_file: &Path, compression: TarCompression, dest: &Path) -> Result<()> {
    debug!(
        "extracting tarball at {} into {} (tar flag {})",
        downloaded_file.display(),
        dest.display(),
        compression.flag().unwrap_or("none"),
    );

    let mut arch = tar_reader_for(downloaded_file, compression)?;
    arch.set_preserve_permissions(true);
    arch.unpack(dest)
        .with_context(|| format!("failed to unpack tarball into {}", dest.display()))
}

fn extract_zip(downloaded_file: &Path, dest: &Path) -> Result<()> {
    debug!(
        "extracting zip file at {} into {}",
        downloaded_file.display(),
        dest.display(),
    );

    let mut zip = ZipArchive::new(open_file(downloaded_file)?)
        .with_context(|| format!("{} is not a valid zip file", downloaded_file.display()))?;
    zip.extract(dest)
        .with_context(|| format!("failed to unpack zip file into {}", dest.display()))
}

fn tar_reader_for(
    downloaded_file: &Path,
    compression: TarCompression,
) -> Result<Archive<Box<dyn Read>>> {
    let file = open_file(downloaded_file)?;

    Ok(match compression {
        TarCompression::Gzip => Archive::new(Box::new(GzDecoder::new(file))),
        TarCompression::Xz => Archive::new(Box::new(XzDecoder::new(file))),
        TarCompression::Bzip2 => Archive::new(Box::new(BzDecoder::new(file))),
    })
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open file at {}", path.to_string_lossy()))
}
