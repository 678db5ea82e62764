use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use arkiv_core::ArchiveError;

use crate::destination::ArchiveFormat;

/// Compress a file into the given archive format next to the original.
///
/// Mirrors the usual archive naming: `<file>.tar`, `<file>.tar.gz`,
/// `<file>.tar.bz2`, `<file>.tar.xz` or `<file>.zip`, each containing the
/// bare file name. The original file is left in place; removal is the
/// caller's decision.
pub fn compress(path: &Path, format: ArchiveFormat) -> Result<PathBuf, ArchiveError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ArchiveError::FileWrite(format!("no file name in {}", path.display())))?;

    let out = match format {
        ArchiveFormat::Tar => {
            let out = suffixed(path, ".tar");
            tar_into(path, file_name.as_ref(), File::create(&out)?)?;
            out
        }
        ArchiveFormat::GzTar => {
            let out = suffixed(path, ".tar.gz");
            let encoder =
                flate2::write::GzEncoder::new(File::create(&out)?, flate2::Compression::default());
            tar_into(path, file_name.as_ref(), encoder)?.finish()?;
            out
        }
        ArchiveFormat::BzTar => {
            let out = suffixed(path, ".tar.bz2");
            let encoder =
                bzip2::write::BzEncoder::new(File::create(&out)?, bzip2::Compression::default());
            tar_into(path, file_name.as_ref(), encoder)?.finish()?;
            out
        }
        ArchiveFormat::XzTar => {
            let out = suffixed(path, ".tar.xz");
            let encoder = xz2::write::XzEncoder::new(File::create(&out)?, 6);
            tar_into(path, file_name.as_ref(), encoder)?.finish()?;
            out
        }
        ArchiveFormat::Zip => {
            let out = suffixed(path, ".zip");
            let mut zip = zip::ZipWriter::new(File::create(&out)?);
            zip.start_file(
                file_name.to_string_lossy().into_owned(),
                zip::write::SimpleFileOptions::default(),
            )
            .map_err(zip_error)?;
            std::io::copy(&mut File::open(path)?, &mut zip)?;
            zip.finish().map_err(zip_error)?;
            out
        }
    };
    Ok(out)
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", path.display(), suffix))
}

fn tar_into<W: Write>(path: &Path, name: &Path, writer: W) -> std::io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.append_path_with_name(path, name)?;
    builder.into_inner()
}

fn zip_error(err: zip::result::ZipError) -> ArchiveError {
    ArchiveError::FileWrite(err.to_string())
}
