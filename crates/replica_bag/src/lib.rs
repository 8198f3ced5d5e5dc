#![deny(missing_docs)]

//! This crate provides [`Bag`], a directory based archival package with a checksum manifest, and
//! the functions to serialize a bag to a single compressed archive and to restore it again.
//!
//! A bag on disk looks like this:
//!
//! ```text
//! bagit.txt                 # declaration: format version and tag file encoding
//! manifest-md5.txt          # "<md5>  data/<relpath>" per payload file
//! tagmanifest-md5.txt       # "<md5>  <tagfile>" per control file
//! fetch.txt                 # optional: "<url> <size> data/<relpath>" per referenced file
//! data/...                  # payload
//! ```

pub mod archive;
mod bag;
mod format;
mod manifest;
pub mod packer;
pub mod properties;
mod reader;
mod writer;

use std::path::PathBuf;

pub use bag::Bag;
pub use format::ArchiveFormat;
pub use manifest::{FetchEntry, ManifestEntry};
pub use packer::{Packer, SizeMethod};
pub use properties::ObjectProperties;
pub use reader::{FlatReader, XmlReader};
pub use writer::{FlatWriter, XmlWriter};

/// The version written to the `BagIt-Version` line of the declaration file.
pub const BAGIT_VERSION: &str = "0.97";

/// The name of the payload directory inside a bag.
pub const DATA_DIR: &str = "data";

/// The name of the bag declaration file.
pub const DECLARATION_FILE: &str = "bagit.txt";

/// The name of the payload manifest.
pub const MANIFEST_FILE: &str = "manifest-md5.txt";

/// The name of the tag manifest.
pub const TAG_MANIFEST_FILE: &str = "tagmanifest-md5.txt";

/// The name of the reference file of holey bags.
pub const FETCH_FILE: &str = "fetch.txt";

/// An error that can occur while writing, reading or (de)serializing a bag.
#[derive(thiserror::Error, Debug)]
pub enum BagError {
    /// A file system operation failed.
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    /// A zip archive could not be written or read.
    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    /// Structured payload content could not be written or parsed.
    #[error("invalid xml content")]
    XmlError(#[from] quick_xml::Error),

    /// The bag was closed (or restored from an archive) and can no longer be written.
    #[error("the bag at '{0}' is filled and can no longer be written")]
    AlreadyFilled(PathBuf),

    /// The bag is still being written and can not be read or serialized yet.
    #[error("the bag at '{0}' has not been filled yet")]
    NotFilled(PathBuf),

    /// The file name does not end with a known archive extension.
    #[error("unsupported archive format '{0}'")]
    UnsupportedArchiveType(PathBuf),

    /// A payload name was absolute or tried to escape the payload directory.
    #[error("invalid payload path '{0}'")]
    InvalidPayloadPath(String),

    /// A line in a control file could not be parsed.
    #[error("malformed line in {file}: '{line}'")]
    MalformedLine {
        /// The control file that contains the line.
        file: String,
        /// The offending line.
        line: String,
    },

    /// A payload file does not have the checksum recorded in the manifest.
    #[error("checksum mismatch for '{path}': expected {expected}, found {actual}")]
    ChecksumMismatch {
        /// The bag relative path of the payload file.
        path: String,
        /// The checksum recorded in the manifest.
        expected: String,
        /// The checksum of the file on disk.
        actual: String,
    },

    /// A payload file listed in the manifest is missing.
    #[error("payload file '{0}' is listed in the manifest but missing")]
    MissingPayload(String),
}
