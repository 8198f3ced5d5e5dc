//! Control files of a bag.
//!
//! The tag manifest records the checksum of the payload manifest, so the payload manifest has to
//! be finalized first. [`TagManifest::close`] takes the [`ClosedManifest`] that only
//! [`PayloadManifest::close`] can produce, which makes the order a compile time property.

use std::io::{BufWriter, Write};
use std::path::Path;

use fs_err::File;
use replica_digest::{HashingWriter, Md5};

use crate::{BagError, DECLARATION_FILE, FETCH_FILE, MANIFEST_FILE, TAG_MANIFEST_FILE};

type Md5Writer = HashingWriter<BufWriter<File>, Md5>;

/// A line oriented control file whose checksum is computed while it is written.
struct ControlFile {
    name: &'static str,
    writer: Md5Writer,
}

impl ControlFile {
    fn create(bag_dir: &Path, name: &'static str) -> std::io::Result<Self> {
        let file = File::create(bag_dir.join(name))?;
        Ok(Self {
            name,
            writer: HashingWriter::new(BufWriter::new(file)),
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")
    }

    fn close(mut self) -> std::io::Result<ClosedFile> {
        self.writer.flush()?;
        let (_, hash) = self.writer.finalize();
        Ok(ClosedFile {
            name: self.name,
            checksum: format!("{hash:x}"),
        })
    }
}

/// A finalized control file and its checksum.
pub(crate) struct ClosedFile {
    name: &'static str,
    checksum: String,
}

/// The payload manifest while it is still accepting entries.
pub(crate) struct PayloadManifest(ControlFile);

/// Proof that the payload manifest has been written completely.
pub(crate) struct ClosedManifest(ClosedFile);

impl PayloadManifest {
    pub fn create(bag_dir: &Path) -> std::io::Result<Self> {
        ControlFile::create(bag_dir, MANIFEST_FILE).map(Self)
    }

    /// Records the checksum of a payload file. `bag_path` is relative to the bag root, e.g.
    /// `data/ORIGINAL/1`.
    pub fn record(&mut self, checksum: &str, bag_path: &str) -> std::io::Result<()> {
        self.0.write_line(&format!("{checksum}  {bag_path}"))
    }

    pub fn close(self) -> std::io::Result<ClosedManifest> {
        self.0.close().map(ClosedManifest)
    }
}

/// The tag manifest while it is still accepting entries.
pub(crate) struct TagManifest(ControlFile);

impl TagManifest {
    pub fn create(bag_dir: &Path) -> std::io::Result<Self> {
        ControlFile::create(bag_dir, TAG_MANIFEST_FILE).map(Self)
    }

    pub fn record(&mut self, file: &ClosedFile) -> std::io::Result<()> {
        self.0
            .write_line(&format!("{}  {}", file.checksum, file.name))
    }

    /// Records the checksum of the payload manifest and finalizes the tag manifest.
    pub fn close(mut self, manifest: ClosedManifest) -> std::io::Result<()> {
        self.record(&manifest.0)?;
        self.0.close().map(|_| ())
    }
}

/// The reference list of a holey bag.
pub(crate) struct FetchList(ControlFile);

impl FetchList {
    pub fn create(bag_dir: &Path) -> std::io::Result<Self> {
        ControlFile::create(bag_dir, FETCH_FILE).map(Self)
    }

    pub fn record(&mut self, url: &str, size: u64, bag_path: &str) -> std::io::Result<()> {
        self.0.write_line(&format!("{url} {size} {bag_path}"))
    }

    pub fn close(self) -> std::io::Result<ClosedFile> {
        self.0.close()
    }
}

/// Writes the bag declaration and returns its checksum.
pub(crate) fn write_declaration(bag_dir: &Path, version: &str) -> std::io::Result<ClosedFile> {
    let mut declaration = ControlFile::create(bag_dir, DECLARATION_FILE)?;
    declaration.write_line(&format!("BagIt-Version: {version}"))?;
    declaration.write_line("Tag-File-Character-Encoding: UTF-8")?;
    declaration.close()
}

/// A single line of `manifest-md5.txt` or `tagmanifest-md5.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Lowercase hex MD5 of the file.
    pub checksum: String,
    /// Path of the file relative to the bag root.
    pub path: String,
}

impl ManifestEntry {
    pub(crate) fn parse(file: &str, line: &str) -> Result<Self, BagError> {
        let (checksum, path) = line
            .split_once(char::is_whitespace)
            .map(|(checksum, path)| (checksum, path.trim_start()))
            .filter(|(_, path)| !path.is_empty())
            .ok_or_else(|| BagError::MalformedLine {
                file: file.to_string(),
                line: line.to_string(),
            })?;
        Ok(Self {
            checksum: checksum.to_ascii_lowercase(),
            path: path.to_string(),
        })
    }
}

/// A single line of `fetch.txt`: a payload file stored by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEntry {
    /// Where the content can be retrieved from.
    pub url: String,
    /// The declared size, `None` when the reference was recorded as `-`.
    pub size: Option<u64>,
    /// Path of the file relative to the bag root.
    pub path: String,
}

impl FetchEntry {
    pub(crate) fn parse(line: &str) -> Result<Self, BagError> {
        let malformed = || BagError::MalformedLine {
            file: FETCH_FILE.to_string(),
            line: line.to_string(),
        };
        let mut parts = line.splitn(3, char::is_whitespace);
        let (Some(url), Some(size), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        let size = match size {
            "-" => None,
            size => Some(size.parse().map_err(|_| malformed())?),
        };
        Ok(Self {
            url: url.to_string(),
            size,
            path: path.trim().to_string(),
        })
    }
}
