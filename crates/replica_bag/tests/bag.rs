use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use quick_xml::events::Event;
use replica_bag::{ArchiveFormat, Bag, BagError, ObjectProperties};
use rstest::rstest;
use walkdir::WalkDir;

fn payload_tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(dir).unwrap().to_path_buf();
            (relative, std::fs::read(entry.path()).unwrap())
        })
        .collect()
}

fn filled_bag(root: &Path, name: &str) -> Bag {
    let mut bag = Bag::open(root.join(name)).unwrap();
    bag.add_data("ORIGINAL/1", &b"0123456789"[..]).unwrap();
    bag.add_data("ORIGINAL/2", &b""[..]).unwrap();

    let mut writer = bag.flat_writer("bitstreams.txt").unwrap();
    writer.write_line("ORIGINAL/1").unwrap();
    writer.write_line("ORIGINAL/2").unwrap();
    writer.close().unwrap();

    bag.close().unwrap();
    bag
}

#[rstest]
#[case(ArchiveFormat::Zip)]
#[case(ArchiveFormat::Tgz)]
fn test_round_trip(#[case] format: ArchiveFormat) {
    let temp = tempfile::tempdir().unwrap();
    let mut bag = filled_bag(temp.path(), "item-42");
    bag.validate().unwrap();

    let archive = bag.deflate(&temp.path().join("out"), format).unwrap();
    assert_eq!(
        archive.file_name().unwrap().to_string_lossy(),
        format!("item-42.{}", format.extension())
    );

    let mut restored = Bag::open(temp.path().join("restored")).unwrap();
    restored
        .inflate(std::fs::File::open(&archive).unwrap(), format)
        .unwrap();
    assert!(restored.is_filled());
    restored.validate().unwrap();

    assert_eq!(
        payload_tree(&bag.data_dir()),
        payload_tree(&restored.data_dir())
    );
    assert_eq!(restored.manifest_entries().unwrap(), bag.manifest_entries().unwrap());

    let one = std::fs::read(restored.data_dir().join("ORIGINAL").join("1")).unwrap();
    assert_eq!(one, b"0123456789");

    bag.empty().unwrap();
    assert!(!temp.path().join("item-42").exists());
}

#[test]
fn test_manifest_lines() {
    let temp = tempfile::tempdir().unwrap();
    let bag = filled_bag(temp.path(), "item-42");

    let manifest = std::fs::read_to_string(bag.base_dir().join("manifest-md5.txt")).unwrap();
    let expected_one = format!(
        "{:x}",
        replica_digest::compute_bytes_digest::<replica_digest::Md5>("0123456789")
    );
    assert!(manifest.contains(&format!("{expected_one}  data/ORIGINAL/1\n")));
    assert!(manifest.contains("d41d8cd98f00b204e9800998ecf8427e  data/ORIGINAL/2\n"));

    let declaration = std::fs::read_to_string(bag.base_dir().join("bagit.txt")).unwrap();
    assert_eq!(
        declaration,
        "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n"
    );

    let tags = std::fs::read_to_string(bag.base_dir().join("tagmanifest-md5.txt")).unwrap();
    let tag_names: Vec<_> = tags
        .lines()
        .map(|line| line.split_whitespace().nth(1).unwrap())
        .collect();
    assert_eq!(tag_names, vec!["bagit.txt", "manifest-md5.txt"]);
}

#[rstest]
#[case(ArchiveFormat::Zip)]
#[case(ArchiveFormat::Tgz)]
fn test_deflate_is_reproducible(#[case] format: ArchiveFormat) {
    let temp = tempfile::tempdir().unwrap();
    let bag = filled_bag(temp.path(), "item-42");
    let first = std::fs::read(bag.deflate(&temp.path().join("a"), format).unwrap()).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    let other = filled_bag(&temp.path().join("again"), "item-42");
    let second = std::fs::read(other.deflate(&temp.path().join("b"), format).unwrap()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_write_after_close_fails() {
    let temp = tempfile::tempdir().unwrap();
    let mut bag = filled_bag(temp.path(), "item-42");

    for _ in 0..2 {
        assert_matches!(bag.flat_writer("late.txt"), Err(BagError::AlreadyFilled(_)));
        assert_matches!(bag.xml_writer("late.xml"), Err(BagError::AlreadyFilled(_)));
        assert_matches!(bag.add_data("late", &b"x"[..]), Err(BagError::AlreadyFilled(_)));
        assert_matches!(
            bag.add_data_ref("late", 1, "https://example.org/late"),
            Err(BagError::AlreadyFilled(_))
        );
        assert_matches!(bag.close(), Err(BagError::AlreadyFilled(_)));
    }
    assert!(!bag.data_dir().join("late.txt").exists());
}

#[test]
fn test_misuse_of_fill_state() {
    let temp = tempfile::tempdir().unwrap();
    let mut unfilled = Bag::open(temp.path().join("unfilled")).unwrap();
    assert_matches!(
        unfilled.deflate(temp.path(), ArchiveFormat::Zip),
        Err(BagError::NotFilled(_))
    );
    assert_matches!(unfilled.flat_reader("x"), Err(BagError::NotFilled(_)));

    let mut filled = filled_bag(temp.path(), "filled");
    let archive = filled.deflate(&temp.path().join("out"), ArchiveFormat::Zip).unwrap();
    assert_matches!(
        filled.inflate(std::fs::File::open(&archive).unwrap(), ArchiveFormat::Zip),
        Err(BagError::AlreadyFilled(_))
    );

    unfilled.empty().unwrap();
    unfilled.empty().unwrap();
}

#[test]
fn test_open_archive_inflates_sibling() {
    let temp = tempfile::tempdir().unwrap();
    let mut bag = filled_bag(temp.path(), "item-42");
    let archive = bag.deflate(&temp.path().join("stage"), ArchiveFormat::Zip).unwrap();
    bag.empty().unwrap();

    let restored = Bag::open(&archive).unwrap();
    assert!(restored.is_filled());
    assert_eq!(restored.base_dir(), temp.path().join("stage").join("item-42"));

    let mut reader = restored.flat_reader("bitstreams.txt").unwrap().unwrap();
    assert_eq!(reader.read_line().unwrap().as_deref(), Some("ORIGINAL/1"));
    assert_eq!(reader.read_line().unwrap().as_deref(), Some("ORIGINAL/2"));
    assert_eq!(reader.read_line().unwrap(), None);

    assert!(restored.flat_reader("missing.txt").unwrap().is_none());
    assert!(restored.data_stream("missing").unwrap().is_none());

    let listed: Vec<_> = restored
        .list_data_files()
        .unwrap()
        .into_iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(listed, vec!["ORIGINAL", "bitstreams.txt"]);
}

#[test]
fn test_open_existing_directory_is_filled() {
    let temp = tempfile::tempdir().unwrap();
    let bag = filled_bag(temp.path(), "item-42");
    drop(bag);

    let mut reopened = Bag::open(temp.path().join("item-42")).unwrap();
    assert!(reopened.is_filled());
    reopened.validate().unwrap();
    assert_matches!(reopened.flat_writer("x"), Err(BagError::AlreadyFilled(_)));
}

#[test]
fn test_open_unknown_archive_type() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("item-42.rar");
    std::fs::write(&path, b"not an archive").unwrap();
    assert_matches!(Bag::open(&path), Err(BagError::UnsupportedArchiveType(_)));
}

#[test]
fn test_validate_detects_tampering() {
    let temp = tempfile::tempdir().unwrap();
    let bag = filled_bag(temp.path(), "item-42");

    std::fs::write(bag.data_dir().join("ORIGINAL").join("1"), b"9876543210").unwrap();
    assert_matches!(
        bag.validate(),
        Err(BagError::ChecksumMismatch { path, .. }) if path == "data/ORIGINAL/1"
    );

    std::fs::remove_file(bag.data_dir().join("ORIGINAL").join("2")).unwrap();
    std::fs::write(bag.data_dir().join("ORIGINAL").join("1"), b"0123456789").unwrap();
    assert_matches!(
        bag.validate(),
        Err(BagError::MissingPayload(path)) if path == "data/ORIGINAL/2"
    );
}

#[test]
fn test_holey_bag() {
    let temp = tempfile::tempdir().unwrap();
    let mut bag = Bag::open(temp.path().join("holey")).unwrap();
    bag.add_data("included", &b"abc"[..]).unwrap();
    bag.add_data_ref("ORIGINAL/big", 1024, "https://example.org/big").unwrap();
    bag.close().unwrap();

    let fetch = std::fs::read_to_string(bag.base_dir().join("fetch.txt")).unwrap();
    assert_eq!(fetch, "https://example.org/big 1024 data/ORIGINAL/big\n");

    let entries = bag.fetch_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size, Some(1024));
    assert_eq!(bag.payload_size().unwrap(), 1027);

    let tags = std::fs::read_to_string(bag.base_dir().join("tagmanifest-md5.txt")).unwrap();
    assert!(tags.contains("  fetch.txt\n"));
    assert!(!bag.data_dir().join("ORIGINAL").join("big").exists());
}

#[test]
fn test_xml_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let mut bag = Bag::open(temp.path().join("xml")).unwrap();
    let mut writer = bag.xml_writer("metadata.xml").unwrap();
    writer.start_element("metadata", &[("schema", "dc")]).unwrap();
    writer.element("title", "Fish & Chips").unwrap();
    writer.element("identifier", "123456789/99").unwrap();
    writer.end_element("metadata").unwrap();
    writer.close().unwrap();
    bag.close().unwrap();
    bag.validate().unwrap();

    let mut reader = bag.xml_reader("metadata.xml").unwrap().unwrap();
    assert_eq!(
        reader.find_element_text("title").unwrap().as_deref(),
        Some("Fish & Chips")
    );
    assert_eq!(
        reader.find_element_text("identifier").unwrap().as_deref(),
        Some("123456789/99")
    );
    assert_eq!(reader.find_element_text("title").unwrap(), None);

    let mut reader = bag.xml_reader("metadata.xml").unwrap().unwrap();
    loop {
        match reader.read_event().unwrap() {
            Event::Start(start) if start.name().as_ref() == b"metadata" => {
                let schema = start.try_get_attribute("schema").unwrap().unwrap();
                assert_eq!(schema.value.as_ref(), b"dc");
                break;
            }
            Event::Eof => panic!("metadata element not found"),
            _ => {}
        }
    }
}

#[test]
fn test_object_properties() {
    let temp = tempfile::tempdir().unwrap();
    let mut bag = Bag::open(temp.path().join("props")).unwrap();
    let properties = ObjectProperties {
        bag_type: Some("AIP".to_string()),
        object_type: Some("item".to_string()),
        object_id: Some("123456789/99".to_string()),
        owner_id: Some("123456789/2".to_string()),
        other_ids: vec!["123456789/3".to_string(), "123456789/4".to_string()],
        created: Some(
            chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        ),
        withdrawn: Some(false),
    };
    properties.write_to(&mut bag).unwrap();
    bag.close().unwrap();

    assert_eq!(
        ObjectProperties::read_from(&bag).unwrap(),
        Some(properties)
    );
}
