//! Storage identifiers: the names under which objects are kept in a store group.
//!
//! A storage id is derived from the canonical repository id of an object, e.g. `123456789/99`
//! becomes `item@123456789-99.zip`. The grammar is `[<TYPE>@]<escaped-id>[.<ext>]` where every `/`
//! of the canonical id is replaced by `-`.
//!
//! The mapping back to the canonical id is ambiguous for canonical ids that themselves contain a
//! `-` or a `.`; those characters are not escaped.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Separates the type prefix from the rest of a storage id.
pub const PREFIX_SEPARATOR: char = '@';

/// The prefix of deletion catalog ids.
pub const DELETION_RECORD_PREFIX: &str = "DELETION-RECORD";

/// The kind of repository object a storage id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// A single deposited object.
    Item,
    /// A set of items.
    Collection,
    /// A set of collections.
    Community,
}

impl ObjectType {
    /// All types, in the order in which they are probed when an object can no longer be resolved.
    pub const ALL: [ObjectType; 3] = [
        ObjectType::Item,
        ObjectType::Collection,
        ObjectType::Community,
    ];

    /// The lowercase name used as storage id prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Item => "item",
            ObjectType::Collection => "collection",
            ObjectType::Community => "community",
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "item" => Ok(ObjectType::Item),
            "collection" => Ok(ObjectType::Collection),
            "community" => Ok(ObjectType::Community),
            other => Err(format!("unknown object type '{other}'")),
        }
    }
}

/// Looks up live repository objects. Implemented by the repository that owns the objects.
pub trait ObjectResolver: Send + Sync {
    /// Returns the type of the object with the given canonical id, or `None` if the repository no
    /// longer holds it.
    fn object_type(&self, canonical_id: &str) -> Option<ObjectType>;
}

impl<F> ObjectResolver for F
where
    F: Fn(&str) -> Option<ObjectType> + Send + Sync,
{
    fn object_type(&self, canonical_id: &str) -> Option<ObjectType> {
        self(canonical_id)
    }
}

/// A resolver that knows no objects. Type prefixes are then found by probing the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl ObjectResolver for NoResolver {
    fn object_type(&self, _canonical_id: &str) -> Option<ObjectType> {
        None
    }
}

/// Escapes a canonical id and appends `.extension` unless the id already ends with it.
pub fn unprefixed_storage_id(canonical_id: &str, extension: Option<&str>) -> String {
    let mut id = canonical_id.replace('/', "-");
    if let Some(extension) = extension {
        let suffix = format!(".{extension}");
        if !id.ends_with(&suffix) {
            id.push_str(&suffix);
        }
    }
    id
}

/// Prepends `prefix@` to a storage id.
pub fn with_prefix(prefix: &str, id: &str) -> String {
    format!("{prefix}{PREFIX_SEPARATOR}{id}")
}

/// Recovers the canonical id from a storage id by dropping the type prefix and the extension and
/// undoing the escaping.
pub fn canonical_id(storage_id: &str) -> String {
    let id = storage_id
        .split_once(PREFIX_SEPARATOR)
        .map_or(storage_id, |(_, id)| id);
    let id = id.rsplit_once('.').map_or(id, |(stem, _)| stem);
    id.replace('-', "/")
}

/// The storage id of the deletion catalog of an object.
pub fn deletion_catalog_id(canonical_id: &str, extension: Option<&str>) -> String {
    with_prefix(
        DELETION_RECORD_PREFIX,
        &unprefixed_storage_id(canonical_id, extension),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("123456789/99", Some("zip"), "123456789-99.zip")]
    #[case("123456789/99", None, "123456789-99")]
    #[case("123456789-99.zip", Some("zip"), "123456789-99.zip")]
    #[case("a/b/c", Some("tgz"), "a-b-c.tgz")]
    fn test_unprefixed_storage_id(
        #[case] canonical: &str,
        #[case] extension: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(unprefixed_storage_id(canonical, extension), expected);
    }

    #[rstest]
    #[case("item@123456789-99.zip", "123456789/99")]
    #[case("123456789-99.zip", "123456789/99")]
    #[case("collection@123456789-1", "123456789/1")]
    #[case("DELETION-RECORD@123456789-99.zip", "123456789/99")]
    fn test_canonical_id(#[case] storage_id: &str, #[case] expected: &str) {
        assert_eq!(canonical_id(storage_id), expected);
    }

    #[rstest]
    fn test_inverse(
        #[values("123456789/99", "10673/7", "handle/1/2/3")] canonical: &str,
        #[values(None, Some("zip"), Some("tgz"))] extension: Option<&str>,
        #[values(None, Some(ObjectType::Item), Some(ObjectType::Community))] object_type: Option<
            ObjectType,
        >,
    ) {
        let id = unprefixed_storage_id(canonical, extension);
        let id = match object_type {
            Some(object_type) => with_prefix(object_type.as_str(), &id),
            None => id,
        };
        assert_eq!(canonical_id(&id), canonical);
    }

    #[test]
    fn test_ambiguous_ids() {
        // Dashes and dots in canonical ids do not survive the round trip.
        let id = unprefixed_storage_id("123456789/my-item", Some("zip"));
        assert_eq!(canonical_id(&id), "123456789/my/item");
        assert_eq!(canonical_id(&unprefixed_storage_id("1.5", None)), "1");
    }

    #[test]
    fn test_deletion_catalog_id() {
        assert_eq!(
            deletion_catalog_id("123456789/99", Some("zip")),
            "DELETION-RECORD@123456789-99.zip"
        );
    }

    #[test]
    fn test_object_type() {
        for object_type in ObjectType::ALL {
            assert_eq!(object_type.as_str().parse::<ObjectType>(), Ok(object_type));
        }
        assert_eq!("ITEM".parse::<ObjectType>(), Ok(ObjectType::Item));
        assert!("bitstream".parse::<ObjectType>().is_err());
    }
}
