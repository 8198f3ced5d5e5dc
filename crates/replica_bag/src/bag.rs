use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use fs_err as fs;
use replica_digest::{HashingReader, Md5};

use crate::manifest::{self, FetchList, PayloadManifest, TagManifest};
use crate::writer::{create_payload_file, manifest_path, payload_relative_path};
use crate::{
    archive, ArchiveFormat, BagError, FetchEntry, FlatReader, FlatWriter, ManifestEntry,
    XmlReader, XmlWriter, BAGIT_VERSION, DATA_DIR, FETCH_FILE, MANIFEST_FILE,
};

/// The open control files of a bag that is still being written.
struct BagWriters {
    manifest: PayloadManifest,
    tags: TagManifest,
    fetch: Option<FetchList>,
}

enum BagState {
    Unfilled(Box<BagWriters>),
    Filled,
}

/// A directory based archival package.
///
/// A bag starts out unfilled: payload can be added through the writer methods until
/// [`Bag::close`] finalizes the manifests. From then on the bag is filled and can only be read,
/// validated or serialized with [`Bag::deflate`]. A bag opened from an existing directory or
/// restored with [`Bag::inflate`] is filled from the start.
///
/// A bag is a staging artifact and is not safe to write from more than one place at a time; the
/// writer handles borrow the bag mutably to enforce this.
pub struct Bag {
    base_dir: PathBuf,
    state: BagState,
}

impl std::fmt::Debug for Bag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bag")
            .field("base_dir", &self.base_dir)
            .field("filled", &self.is_filled())
            .finish()
    }
}

impl Bag {
    /// Opens the bag at `path`.
    ///
    /// * If `path` is an archive file (`.zip` or `.tgz`) it is inflated into a sibling directory
    ///   named after the archive without its extension, and the returned bag is filled.
    /// * If `path` is a directory with a payload subtree, it is opened as a filled bag.
    /// * Otherwise a new, unfilled bag is created at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BagError> {
        let path = path.into();

        if path.is_file() {
            let file_name = path.to_string_lossy().into_owned();
            let (stem, format) = ArchiveFormat::split_str(&file_name)
                .ok_or_else(|| BagError::UnsupportedArchiveType(path.clone()))?;
            let bag_dir = PathBuf::from(stem);
            if bag_dir.exists() {
                fs::remove_dir_all(&bag_dir)?;
            }
            let mut bag = Self::create(bag_dir)?;
            bag.inflate(fs::File::open(&path)?, format)?;
            return Ok(bag);
        }

        if path.join(DATA_DIR).is_dir() {
            return Ok(Self {
                base_dir: path,
                state: BagState::Filled,
            });
        }

        Self::create(path)
    }

    fn create(base_dir: PathBuf) -> Result<Self, BagError> {
        fs::create_dir_all(base_dir.join(DATA_DIR))?;
        let writers = BagWriters {
            manifest: PayloadManifest::create(&base_dir)?,
            tags: TagManifest::create(&base_dir)?,
            fetch: None,
        };
        tracing::debug!("created bag at {}", base_dir.display());
        Ok(Self {
            base_dir,
            state: BagState::Unfilled(Box::new(writers)),
        })
    }

    /// Returns the root directory of the bag.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the name of the bag, which is the name of its root directory.
    pub fn name(&self) -> String {
        self.base_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Returns the payload directory.
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join(DATA_DIR)
    }

    /// Returns `true` once the bag has been closed or restored.
    pub fn is_filled(&self) -> bool {
        matches!(self.state, BagState::Filled)
    }

    fn writers(&mut self) -> Result<&mut BagWriters, BagError> {
        match &mut self.state {
            BagState::Unfilled(writers) => Ok(&mut **writers),
            BagState::Filled => Err(BagError::AlreadyFilled(self.base_dir.clone())),
        }
    }

    fn ensure_filled(&self) -> Result<(), BagError> {
        match self.state {
            BagState::Filled => Ok(()),
            BagState::Unfilled(_) => Err(BagError::NotFilled(self.base_dir.clone())),
        }
    }

    /// Returns a writer for a line oriented payload file called `name`.
    pub fn flat_writer(&mut self, name: &str) -> Result<FlatWriter<'_>, BagError> {
        let data_dir = self.data_dir();
        let writers = self.writers()?;
        FlatWriter::new(&data_dir, name, &mut writers.manifest)
    }

    /// Returns a writer for an XML payload file called `name`.
    pub fn xml_writer(&mut self, name: &str) -> Result<XmlWriter<'_>, BagError> {
        let data_dir = self.data_dir();
        let writers = self.writers()?;
        XmlWriter::new(&data_dir, name, &mut writers.manifest)
    }

    /// Copies `reader` into the payload file `rel_path` and records its checksum. Returns the
    /// number of bytes copied.
    pub fn add_data(&mut self, rel_path: &str, mut reader: impl Read) -> Result<u64, BagError> {
        let data_dir = self.data_dir();
        let writers = self.writers()?;
        let (mut writer, bag_path) = create_payload_file(&data_dir, rel_path)?;
        let size = std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        let (_, hash) = writer.finalize();
        writers.manifest.record(&format!("{hash:x}"), &bag_path)?;
        Ok(size)
    }

    /// Records a payload file that is stored by reference instead of being included in the bag.
    pub fn add_data_ref(&mut self, rel_path: &str, size: u64, url: &str) -> Result<(), BagError> {
        let bag_path = manifest_path(&payload_relative_path(rel_path)?);
        let base_dir = self.base_dir.clone();
        let writers = self.writers()?;
        if writers.fetch.is_none() {
            writers.fetch = Some(FetchList::create(&base_dir)?);
        }
        if let Some(fetch) = writers.fetch.as_mut() {
            fetch.record(url, size, &bag_path)?;
        }
        Ok(())
    }

    /// Finalizes the bag: closes the payload manifest, writes the declaration and the reference
    /// list, and closes the tag manifest which records the checksums of all of them.
    ///
    /// This can only be done once; afterwards the bag is filled.
    pub fn close(&mut self) -> Result<(), BagError> {
        let writers = match std::mem::replace(&mut self.state, BagState::Filled) {
            BagState::Unfilled(writers) => writers,
            BagState::Filled => return Err(BagError::AlreadyFilled(self.base_dir.clone())),
        };
        let BagWriters {
            manifest,
            mut tags,
            fetch,
        } = *writers;

        let closed_manifest = manifest.close()?;
        tags.record(&manifest::write_declaration(&self.base_dir, BAGIT_VERSION)?)?;
        if let Some(fetch) = fetch {
            tags.record(&fetch.close()?)?;
        }
        tags.close(closed_manifest)?;

        tracing::debug!("closed bag at {}", self.base_dir.display());
        Ok(())
    }

    fn payload_file(&self, name: &str) -> Result<Option<PathBuf>, BagError> {
        self.ensure_filled()?;
        let path = self.data_dir().join(payload_relative_path(name)?);
        Ok(path.is_file().then_some(path))
    }

    /// Returns a reader for the line oriented payload file `name`, or `None` if it does not exist.
    pub fn flat_reader(&self, name: &str) -> Result<Option<FlatReader>, BagError> {
        match self.payload_file(name)? {
            Some(path) => Ok(Some(FlatReader::new(fs::File::open(path)?))),
            None => Ok(None),
        }
    }

    /// Returns a reader for the XML payload file `name`, or `None` if it does not exist.
    pub fn xml_reader(&self, name: &str) -> Result<Option<XmlReader>, BagError> {
        match self.payload_file(name)? {
            Some(path) => Ok(Some(XmlReader::new(fs::File::open(path)?))),
            None => Ok(None),
        }
    }

    /// Returns the raw content of the payload file `name`, or `None` if it does not exist.
    pub fn data_stream(&self, name: &str) -> Result<Option<fs::File>, BagError> {
        match self.payload_file(name)? {
            Some(path) => Ok(Some(fs::File::open(path)?)),
            None => Ok(None),
        }
    }

    /// Lists the top level entries of the payload directory, sorted by name.
    pub fn list_data_files(&self) -> Result<Vec<PathBuf>, BagError> {
        self.ensure_filled()?;
        let mut entries = fs::read_dir(self.data_dir())?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort();
        Ok(entries)
    }

    /// Parses the payload manifest.
    pub fn manifest_entries(&self) -> Result<Vec<ManifestEntry>, BagError> {
        self.ensure_filled()?;
        read_lines(&self.base_dir.join(MANIFEST_FILE))?
            .iter()
            .map(|line| ManifestEntry::parse(MANIFEST_FILE, line))
            .collect()
    }

    /// Parses the reference list of a holey bag. A bag without references returns an empty list.
    pub fn fetch_entries(&self) -> Result<Vec<FetchEntry>, BagError> {
        self.ensure_filled()?;
        let path = self.base_dir.join(FETCH_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        read_lines(&path)?
            .iter()
            .map(|line| FetchEntry::parse(line))
            .collect()
    }

    /// Recomputes the checksum of every payload file listed in the manifest and compares it with
    /// the recorded value.
    pub fn validate(&self) -> Result<(), BagError> {
        for entry in self.manifest_entries()? {
            let path = self.base_dir.join(&entry.path);
            if !path.is_file() {
                return Err(BagError::MissingPayload(entry.path));
            }
            let mut reader = HashingReader::<_, Md5>::new(fs::File::open(&path)?);
            std::io::copy(&mut reader, &mut std::io::sink())?;
            let (_, hash) = reader.finalize();
            let actual = format!("{hash:x}");
            if actual != entry.checksum {
                return Err(BagError::ChecksumMismatch {
                    path: entry.path,
                    expected: entry.checksum,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// The size of the payload: the bytes of all included files plus the declared sizes of the
    /// referenced ones.
    pub fn payload_size(&self) -> Result<u64, BagError> {
        let mut size = 0;
        for entry in walkdir::WalkDir::new(self.data_dir()) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                size += entry.metadata().map_err(std::io::Error::from)?.len();
            }
        }
        let referenced: u64 = self
            .fetch_entries()?
            .iter()
            .filter_map(|entry| entry.size)
            .sum();
        Ok(size + referenced)
    }

    /// Serializes the filled bag to `<dest_dir>/<bag name>.<extension>` and returns the path of the
    /// archive.
    pub fn deflate(&self, dest_dir: &Path, format: ArchiveFormat) -> Result<PathBuf, BagError> {
        self.ensure_filled()?;
        fs::create_dir_all(dest_dir)?;
        let name = self.name();
        let archive_path = dest_dir.join(format!("{name}.{}", format.extension()));

        let file = fs::File::create(&archive_path)?;
        archive::write_archive(file, &self.base_dir, &name, format)?;

        tracing::debug!(
            "deflated bag {} to {}",
            self.base_dir.display(),
            archive_path.display()
        );
        Ok(archive_path)
    }

    /// Restores the bag from an archive. The bag must not be filled yet; anything written to it
    /// so far is discarded. Afterwards the bag is filled.
    pub fn inflate(&mut self, reader: impl Read, format: ArchiveFormat) -> Result<(), BagError> {
        self.writers()?;
        self.state = BagState::Filled;

        if self.base_dir.exists() {
            fs::remove_dir_all(&self.base_dir)?;
        }
        archive::extract(reader, format, &self.base_dir)?;
        fs::create_dir_all(self.data_dir())?;

        tracing::debug!("inflated bag into {}", self.base_dir.display());
        Ok(())
    }

    /// Deletes the bag from disk. Any open control files are discarded, so a bag that was not
    /// closed can no longer be written. Calling this on a bag that does not exist is a no-op.
    pub fn empty(&mut self) -> Result<(), BagError> {
        if let BagState::Unfilled(_) = self.state {
            self.state = BagState::Filled;
        }
        if self.base_dir.exists() {
            fs::remove_dir_all(&self.base_dir)?;
        }
        Ok(())
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, BagError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}
