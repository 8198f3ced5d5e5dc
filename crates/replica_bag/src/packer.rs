//! The contract between bags and the components that know what goes into them.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::BagError;

/// How [`Packer::size`] should measure the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeMethod {
    /// The number of payload bytes the packed object will hold.
    Bytes,
    /// The number of payload entries the packed object will hold.
    Count,
}

impl FromStr for SizeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(SizeMethod::Bytes),
            "count" => Ok(SizeMethod::Count),
            other => Err(format!("unknown size method '{other}'")),
        }
    }
}

impl Display for SizeMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeMethod::Bytes => f.write_str("bytes"),
            SizeMethod::Count => f.write_str("count"),
        }
    }
}

/// Produces bags from some entity and restores the entity from them.
///
/// Implementations decide what payload to write; the archive they produce is opaque to everything
/// that moves it around.
pub trait Packer {
    /// Writes the entity into a new bag at `bag_dir` and serializes it next to it. Returns the path
    /// of the archive, which is named after `bag_dir`.
    fn pack(&mut self, bag_dir: &Path) -> Result<PathBuf, BagError>;

    /// Restores the entity from an archive produced by [`Packer::pack`].
    fn unpack(&mut self, archive: &Path) -> Result<(), BagError>;

    /// Estimates the size of the packed entity.
    fn size(&self, method: SizeMethod) -> Result<u64, BagError>;

    /// Restricts the content that is included, e.g. to a list of bundle names.
    fn set_content_filter(&mut self, _filter: &str) {}

    /// Selects content that is recorded by reference instead of being included.
    fn set_reference_filter(&mut self, _filter: &str) {}
}
