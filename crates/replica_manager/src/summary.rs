use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use humansize::{format_size, DECIMAL};

/// A byte moving operation of the [`crate::ReplicaManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// An object was downloaded into the staging area.
    Fetch,
    /// A staged file was uploaded.
    Transfer,
    /// An object was deleted.
    Remove,
    /// An object was moved to another group.
    Move,
}

impl Operation {
    fn verb(self) -> &'static str {
        match self {
            Operation::Fetch => "fetched",
            Operation::Transfer => "transferred",
            Operation::Remove => "removed",
            Operation::Move => "moved",
        }
    }
}

/// The outcome of one store operation, returned to the caller and logged by the manager.
///
/// Its [`Display`] form is a human readable report, e.g.
/// `transferred aip_store/item@123456789-99.zip (1.02 kB)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// What was done.
    pub operation: Operation,
    /// The group the object was read from or written to.
    pub group: String,
    /// The storage id of the object.
    pub id: String,
    /// The number of bytes moved, `0` if the object was absent or unchanged.
    pub bytes: u64,
    /// The group a moved object ended up in.
    pub destination_group: Option<String>,
    /// The staged file of a fetch, or the file a transfer uploaded.
    pub path: Option<PathBuf>,
}

impl TransferSummary {
    /// A summary without a destination group or local file.
    pub fn new(operation: Operation, group: &str, id: &str, bytes: u64) -> Self {
        Self {
            operation,
            group: group.to_string(),
            id: id.to_string(),
            bytes,
            destination_group: None,
            path: None,
        }
    }

    pub(crate) fn with_destination_group(mut self, group: &str) -> Self {
        self.destination_group = Some(group.to_string());
        self
    }

    pub(crate) fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    /// Whether the operation found the object. Transfers of unchanged content also report `0`
    /// bytes; for them this means nothing was uploaded.
    pub fn found(&self) -> bool {
        self.bytes > 0
    }
}

impl Display for TransferSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.operation, self.found()) {
            (Operation::Transfer, false) => {
                write!(f, "{}/{} is unchanged", self.group, self.id)
            }
            (_, false) => write!(f, "{}/{} not found", self.group, self.id),
            (operation, true) => {
                write!(f, "{} {}/{}", operation.verb(), self.group, self.id)?;
                if let Some(destination) = &self.destination_group {
                    write!(f, " to {destination}")?;
                }
                write!(f, " ({})", format_size(self.bytes, DECIMAL))
            }
        }
    }
}
