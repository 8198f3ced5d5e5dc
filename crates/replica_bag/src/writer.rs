//! Handles that write payload files and record their checksum in the manifest when closed.

use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use fs_err::File;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use replica_digest::{HashingWriter, Md5};

use crate::manifest::PayloadManifest;
use crate::{BagError, DATA_DIR};

type PayloadWriter = HashingWriter<BufWriter<File>, Md5>;

/// Validates a caller supplied payload name and returns it as a relative path.
pub(crate) fn payload_relative_path(name: &str) -> Result<PathBuf, BagError> {
    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(BagError::InvalidPayloadPath(name.to_string())),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(BagError::InvalidPayloadPath(name.to_string()));
    }
    Ok(relative)
}

/// Returns the manifest form of a payload path: forward slashes, prefixed with `data/`.
pub(crate) fn manifest_path(relative: &Path) -> String {
    let mut path = String::from(DATA_DIR);
    for component in relative.components() {
        path.push('/');
        path.push_str(&component.as_os_str().to_string_lossy());
    }
    path
}

/// Creates a payload file (and its parent directories) below `data_dir`.
pub(crate) fn create_payload_file(
    data_dir: &Path,
    name: &str,
) -> Result<(PayloadWriter, String), BagError> {
    let relative = payload_relative_path(name)?;
    let target = data_dir.join(&relative);
    if let Some(parent) = target.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let file = File::create(&target)?;
    Ok((
        HashingWriter::new(BufWriter::new(file)),
        manifest_path(&relative),
    ))
}

/// Flushes a payload writer and records its checksum in the manifest.
fn finish_payload(
    mut writer: PayloadWriter,
    bag_path: &str,
    manifest: &mut PayloadManifest,
) -> Result<String, BagError> {
    writer.flush()?;
    let (_, hash) = writer.finalize();
    let checksum = format!("{hash:x}");
    manifest.record(&checksum, bag_path)?;
    tracing::trace!("recorded payload file {bag_path} ({checksum})");
    Ok(checksum)
}

/// Writes a line oriented text file into the payload of a bag.
///
/// The checksum of the file is only recorded when [`FlatWriter::close`] is called; a writer that is
/// dropped leaves an unlisted file behind.
pub struct FlatWriter<'a> {
    writer: PayloadWriter,
    bag_path: String,
    manifest: &'a mut PayloadManifest,
}

impl<'a> FlatWriter<'a> {
    pub(crate) fn new(
        data_dir: &Path,
        name: &str,
        manifest: &'a mut PayloadManifest,
    ) -> Result<Self, BagError> {
        let (writer, bag_path) = create_payload_file(data_dir, name)?;
        Ok(Self {
            writer,
            bag_path,
            manifest,
        })
    }

    /// Writes a single line, a newline is appended.
    pub fn write_line(&mut self, line: &str) -> Result<(), BagError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Writes text without a trailing newline.
    pub fn write_str(&mut self, text: &str) -> Result<(), BagError> {
        self.writer.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Finishes the file and records it in the manifest. Returns the checksum.
    pub fn close(self) -> Result<String, BagError> {
        finish_payload(self.writer, &self.bag_path, self.manifest)
    }
}

impl std::fmt::Debug for FlatWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatWriter")
            .field("bag_path", &self.bag_path)
            .field("bytes_written", &self.writer.bytes_written())
            .finish_non_exhaustive()
    }
}

impl Write for FlatWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Writes an indented XML document into the payload of a bag.
pub struct XmlWriter<'a> {
    writer: quick_xml::Writer<PayloadWriter>,
    bag_path: String,
    manifest: &'a mut PayloadManifest,
}

impl<'a> XmlWriter<'a> {
    pub(crate) fn new(
        data_dir: &Path,
        name: &str,
        manifest: &'a mut PayloadManifest,
    ) -> Result<Self, BagError> {
        let (writer, bag_path) = create_payload_file(data_dir, name)?;
        let mut writer = quick_xml::Writer::new_with_indent(writer, b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self {
            writer,
            bag_path,
            manifest,
        })
    }

    /// Opens an element with the given attributes.
    pub fn start_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
    ) -> Result<(), BagError> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    /// Writes escaped character data.
    pub fn text(&mut self, text: &str) -> Result<(), BagError> {
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    }

    /// Closes the element opened last with `name`.
    pub fn end_element(&mut self, name: &str) -> Result<(), BagError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Writes `<name>text</name>`.
    pub fn element(&mut self, name: &str, text: &str) -> Result<(), BagError> {
        self.start_element(name, &[])?;
        self.text(text)?;
        self.end_element(name)
    }

    /// Finishes the document and records it in the manifest. Returns the checksum.
    pub fn close(self) -> Result<String, BagError> {
        finish_payload(self.writer.into_inner(), &self.bag_path, self.manifest)
    }
}

impl std::fmt::Debug for XmlWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlWriter")
            .field("bag_path", &self.bag_path)
            .field("bytes_written", &self.writer.get_ref().bytes_written())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::{manifest_path, payload_relative_path};
    use crate::BagError;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use std::path::Path;

    #[rstest]
    #[case("ORIGINAL/1", "data/ORIGINAL/1")]
    #[case("./object.properties", "data/object.properties")]
    fn test_payload_paths(#[case] name: &str, #[case] expected: &str) {
        let relative = payload_relative_path(name).unwrap();
        assert_eq!(manifest_path(&relative), expected);
    }

    #[rstest]
    #[case("../escape")]
    #[case("/etc/passwd")]
    #[case("")]
    fn test_invalid_payload_paths(#[case] name: &str) {
        assert_matches!(
            payload_relative_path(name),
            Err(BagError::InvalidPayloadPath(_))
        );
    }

    #[test]
    fn test_manifest_path_is_forward_slashed() {
        assert_eq!(manifest_path(Path::new("a").join("b").as_path()), "data/a/b");
    }
}
