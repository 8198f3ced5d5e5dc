//! The `object.properties` control file that packers write into a bag's payload.
//!
//! The bag itself does not interpret these values; they travel with the payload so that a
//! restore can tell what kind of object a bag holds and where it belongs.

use chrono::{DateTime, Utc};

use crate::{Bag, BagError};

/// The payload name of the object properties file.
pub const OBJECT_PROPERTIES_FILE: &str = "object.properties";

const OTHER_IDS_SEPARATOR: &str = "~";

/// Describes the object packaged in a bag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectProperties {
    /// The kind of bag, e.g. `AIP` for an archival package or `DC` for a deletion catalog.
    pub bag_type: Option<String>,
    /// The repository type of the packaged object.
    pub object_type: Option<String>,
    /// The canonical identifier of the packaged object.
    pub object_id: Option<String>,
    /// The canonical identifier of the owner of the object.
    pub owner_id: Option<String>,
    /// Identifiers of related objects, e.g. the members deleted with the object.
    pub other_ids: Vec<String>,
    /// When the bag was created.
    pub created: Option<DateTime<Utc>>,
    /// Whether the object was withdrawn from the repository.
    pub withdrawn: Option<bool>,
}

impl ObjectProperties {
    /// Returns the `key value` lines of the properties file, skipping unset values.
    pub fn lines(&self) -> Vec<String> {
        let properties = [
            ("bagType", self.bag_type.clone()),
            ("objectType", self.object_type.clone()),
            ("objectId", self.object_id.clone()),
            ("ownerId", self.owner_id.clone()),
            (
                "otherIds",
                (!self.other_ids.is_empty()).then(|| self.other_ids.join(OTHER_IDS_SEPARATOR)),
            ),
            ("created", self.created.map(|created| created.to_rfc3339())),
            ("withdrawn", self.withdrawn.map(|withdrawn| withdrawn.to_string())),
        ];
        properties
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| format!("{key} {value}")))
            .collect()
    }

    /// Writes the properties into the payload of `bag` and returns the checksum of the file.
    pub fn write_to(&self, bag: &mut Bag) -> Result<String, BagError> {
        let mut writer = bag.flat_writer(OBJECT_PROPERTIES_FILE)?;
        for line in self.lines() {
            writer.write_line(&line)?;
        }
        writer.close()
    }

    /// Reads the properties from the payload of a filled bag, or `None` if the bag carries no
    /// properties file. Unknown keys are ignored.
    pub fn read_from(bag: &Bag) -> Result<Option<Self>, BagError> {
        let Some(reader) = bag.flat_reader(OBJECT_PROPERTIES_FILE)? else {
            return Ok(None);
        };

        let mut properties = Self::default();
        for line in reader {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(' ')
                .map(|(key, value)| (key, value.trim()))
                .unwrap_or((line.as_str(), ""));
            let malformed = || BagError::MalformedLine {
                file: OBJECT_PROPERTIES_FILE.to_string(),
                line: line.clone(),
            };
            match key {
                "bagType" => properties.bag_type = Some(value.to_string()),
                "objectType" => properties.object_type = Some(value.to_string()),
                "objectId" => properties.object_id = Some(value.to_string()),
                "ownerId" => properties.owner_id = Some(value.to_string()),
                "otherIds" => {
                    properties.other_ids = value
                        .split(OTHER_IDS_SEPARATOR)
                        .filter(|id| !id.is_empty())
                        .map(ToString::to_string)
                        .collect()
                }
                "created" => {
                    let created = DateTime::parse_from_rfc3339(value).map_err(|_| malformed())?;
                    properties.created = Some(created.with_timezone(&Utc));
                }
                "withdrawn" => {
                    properties.withdrawn = Some(value.parse().map_err(|_| malformed())?)
                }
                other => tracing::debug!("ignoring unknown object property '{other}'"),
            }
        }
        Ok(Some(properties))
    }
}
