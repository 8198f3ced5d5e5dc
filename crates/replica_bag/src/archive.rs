//! Serialization of a bag directory to a single compressed file and back.
//!
//! Archives contain every file of the bag below a single top level directory named after the bag,
//! e.g. `item-42/data/ORIGINAL/1`. Entries are sorted and their timestamps, owners and permissions
//! are normalized so that packaging unchanged content twice yields byte identical archives.

use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use fs_err as fs;
use itertools::sorted;
use zip::read::read_zipfile_from_stream;
use zip::write::SimpleFileOptions;

use crate::{ArchiveFormat, BagError};

/// The modification time written for every archive entry: 1980-01-01T00:00:00Z, the earliest
/// timestamp a zip archive can represent.
pub const NORMALIZED_MTIME: u64 = 315_532_800;

/// Returns all files and directories below `base_path`, relative to it and sorted.
pub fn collect_paths(base_path: &Path) -> Result<Vec<PathBuf>, BagError> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(base_path).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(base_path)
            .map_err(|_| BagError::InvalidPayloadPath(entry.path().display().to_string()))?;
        paths.push(relative.to_path_buf());
    }
    Ok(sorted(paths).collect())
}

/// The archive entry name of `path` below the top level directory `root_name`.
fn entry_name(root_name: &str, path: &Path) -> String {
    let mut name = String::from(root_name);
    for component in path.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

/// Strips the top level directory from an archive entry path and rejects anything that would
/// escape the destination.
fn strip_root(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(_)) => {}
        _ => return None,
    }
    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

fn unsupported_file_type(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("{}: unsupported file type", path.display()),
    )
}

/// Writes the contents of `base_path` to a zip archive.
///
/// # Arguments
///
/// * `writer` - the writer to write the archive to
/// * `base_path` - the directory to archive
/// * `root_name` - the name of the top level directory inside the archive
/// * `paths` - the paths to include, relative to `base_path`, in the order they are written
pub fn write_zip_archive<W: Write + Seek>(
    writer: W,
    base_path: &Path,
    root_name: &str,
    paths: &[PathBuf],
) -> Result<(), BagError> {
    let mut archive = zip::ZipWriter::new(writer);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());
    let directory_options = options.clone().unix_permissions(0o755);
    let file_options = options.unix_permissions(0o644);

    for path in paths {
        let full_path = base_path.join(path);
        let metadata = fs::symlink_metadata(&full_path)?;
        let name = entry_name(root_name, path);
        if metadata.is_dir() {
            archive.add_directory(name, directory_options.clone())?;
        } else if metadata.is_file() {
            archive.start_file(name, file_options.clone())?;
            let mut file = fs::File::open(&full_path)?;
            std::io::copy(&mut file, &mut archive)?;
        } else {
            return Err(unsupported_file_type(&full_path).into());
        }
    }

    archive.finish()?;
    Ok(())
}

/// Writes the contents of `base_path` to a gzip compressed tarball.
///
/// See [`write_zip_archive`] for the meaning of the arguments.
pub fn write_tar_gz_archive<W: Write>(
    writer: W,
    base_path: &Path,
    root_name: &str,
    paths: &[PathBuf],
) -> Result<(), BagError> {
    let mut archive = tar::Builder::new(GzEncoder::new(writer, flate2::Compression::default()));
    archive.follow_symlinks(false);

    for path in paths {
        let full_path = base_path.join(path);
        let metadata = fs::symlink_metadata(&full_path)?;
        let name = entry_name(root_name, path);

        let mut header = tar::Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(NORMALIZED_MTIME);
        if metadata.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            archive.append_data(&mut header, format!("{name}/"), std::io::empty())?;
        } else if metadata.is_file() {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(metadata.len());
            let file = fs::File::open(&full_path)?;
            archive.append_data(&mut header, name, file)?;
        } else {
            return Err(unsupported_file_type(&full_path).into());
        }
    }

    archive.into_inner()?.finish()?;
    Ok(())
}

/// Writes the directory `base_path` as an archive of the given format to `writer`, naming the top
/// level directory `root_name`.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    base_path: &Path,
    root_name: &str,
    format: ArchiveFormat,
) -> Result<(), BagError> {
    let paths = collect_paths(base_path)?;
    match format {
        ArchiveFormat::Zip => write_zip_archive(writer, base_path, root_name, &paths),
        ArchiveFormat::Tgz => write_tar_gz_archive(writer, base_path, root_name, &paths),
    }
}

/// Extracts a zip archive into `destination`, dropping the top level directory of every entry.
pub fn extract_zip(mut reader: impl Read, destination: &Path) -> Result<(), BagError> {
    fs::create_dir_all(destination)?;

    while let Some(mut file) = read_zipfile_from_stream(&mut reader)? {
        let Some(relative) = file.enclosed_name().as_deref().and_then(strip_root) else {
            tracing::debug!("skipping archive entry '{}'", file.name());
            continue;
        };
        let target = destination.join(relative);
        if file.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            std::io::copy(&mut file, &mut out)?;
        }
    }

    Ok(())
}

/// Extracts a gzip compressed tarball into `destination`, dropping the top level directory of
/// every entry.
pub fn extract_tar_gz(reader: impl Read, destination: &Path) -> Result<(), BagError> {
    fs::create_dir_all(destination)?;

    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(relative) = strip_root(&path) else {
            tracing::debug!("skipping archive entry '{}'", path.display());
            continue;
        };
        let target = destination.join(relative);
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
        } else {
            tracing::debug!("skipping unsupported archive entry '{}'", path.display());
        }
    }

    Ok(())
}

/// Extracts an archive of the given format into `destination`.
pub fn extract(
    reader: impl Read,
    format: ArchiveFormat,
    destination: &Path,
) -> Result<(), BagError> {
    match format {
        ArchiveFormat::Zip => extract_zip(reader, destination),
        ArchiveFormat::Tgz => extract_tar_gz(reader, destination),
    }
}

#[cfg(test)]
mod test {
    use super::{entry_name, strip_root};
    use rstest::rstest;
    use std::path::{Path, PathBuf};

    #[rstest]
    #[case("item-42/data/ORIGINAL/1", Some("data/ORIGINAL/1"))]
    #[case("item-42/", None)]
    #[case("item-42/../../etc/passwd", None)]
    #[case("/item-42/data", None)]
    fn test_strip_root(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(strip_root(Path::new(input)), expected.map(PathBuf::from));
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(
            entry_name("item-42", &Path::new("data").join("ORIGINAL")),
            "item-42/data/ORIGINAL"
        );
    }
}
