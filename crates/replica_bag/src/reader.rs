//! Sequential readers over payload files of a filled bag.

use std::io::{BufRead, BufReader};

use fs_err::File;
use quick_xml::events::Event;

use crate::BagError;

/// Reads a line oriented payload file.
#[derive(Debug)]
pub struct FlatReader {
    reader: BufReader<File>,
}

impl FlatReader {
    pub(crate) fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
        }
    }

    /// Returns the next line without its line terminator, or `None` at the end of the file.
    pub fn read_line(&mut self) -> Result<Option<String>, BagError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

impl Iterator for FlatReader {
    type Item = Result<String, BagError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}

/// Reads an XML payload file event by event.
#[derive(Debug)]
pub struct XmlReader {
    reader: quick_xml::Reader<BufReader<File>>,
    buf: Vec<u8>,
}

impl XmlReader {
    pub(crate) fn new(file: File) -> Self {
        let mut reader = quick_xml::Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Returns the next event of the document. [`Event::Eof`] marks the end.
    pub fn read_event(&mut self) -> Result<Event<'static>, BagError> {
        self.buf.clear();
        Ok(self.reader.read_event_into(&mut self.buf)?.into_owned())
    }

    /// Advances to the next element called `name` and returns its text content, or `None` if no
    /// further element with that name exists.
    pub fn find_element_text(&mut self, name: &str) -> Result<Option<String>, BagError> {
        loop {
            match self.read_event()? {
                Event::Start(start) if start.name().as_ref() == name.as_bytes() => break,
                Event::Empty(empty) if empty.name().as_ref() == name.as_bytes() => {
                    return Ok(Some(String::new()))
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }

        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match self.read_event()? {
                Event::Text(t) => text.push_str(&t.unescape()?),
                Event::CData(data) => text.push_str(&String::from_utf8_lossy(&data)),
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => return Ok(Some(text)),
                Event::End(_) => depth -= 1,
                Event::Eof => return Ok(Some(text)),
                _ => {}
            }
        }
    }
}
