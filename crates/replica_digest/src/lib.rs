#![deny(missing_docs)]

//! Checksum helpers shared by the replica crates.
//!
//! Bags record an MD5 checksum for every payload and tag file, and object stores compare
//! checksums to decide whether a transfer can be skipped. Both need to fingerprint content while
//! it streams past, without buffering it. This crate wraps the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) algorithms for that purpose.
//!
//! # Examples
//!
//! ```no_run
//! use replica_digest::{compute_bytes_digest, compute_file_md5_hex, Md5};
//!
//! let md5_result = compute_bytes_digest::<Md5>("Hello, world!");
//! println!("MD5 hash: {:x}", md5_result);
//!
//! let file_result = compute_file_md5_hex("somefile.txt").unwrap();
//! println!("MD5 of file: {file_result}");
//! ```
//!
//! # Available functions
//!
//! - [`compute_file_digest`]: Computes the hash of a file on disk.
//! - [`compute_file_md5_hex`]: The lowercase hex MD5 of a file, the form written to manifests.
//! - [`parse_digest_from_hex`]: Given a hex representation of a digest, parses it to bytes.
//! - [`HashingWriter`]: Wraps a [`Write`] and hashes everything that passes through it.
//! - [`HashingReader`]: Wraps a [`Read`] and hashes everything that is read from it.

pub use digest;

use digest::{Digest, Output};
use std::io::Read;
use std::{fs::File, io::Write, path::Path};

pub use md5::Md5;

/// A type alias for the output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;

    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;

    Ok(hasher.finalize())
}

/// Compute the MD5 of the file at the specified location and return it as lowercase hex.
pub fn compute_file_md5_hex(path: impl AsRef<Path>) -> Result<String, std::io::Error> {
    compute_file_digest::<Md5>(path).map(|hash| format!("{hash:x}"))
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default + Write>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hash hex string to a digest.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// A [`Write`] implementation that forwards to an inner writer and hashes every byte that was
/// accepted by it. Call [`HashingWriter::finalize`] to retrieve both the original writer and the
/// hash.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
    bytes_written: u64,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Default::default(),
            bytes_written: 0,
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Returns the number of bytes that have passed through this writer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Consumes this instance and returns the original writer and the hash of all bytes written to
    /// this instance.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        self.bytes_written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A [`Read`] implementation that hashes every byte read from the inner reader. Call
/// [`HashingReader::finalize`] to retrieve both the original reader and the hash.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
    bytes_read: u64,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Constructs a new instance from a reader and a new (empty) hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Default::default(),
            bytes_read: 0,
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Returns the number of bytes that have been read through this reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consumes this instance and returns the original reader and the hash of all bytes read from
    /// this instance.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        self.bytes_read += bytes_read as u64;
        Ok(bytes_read)
    }
}

#[cfg(test)]
mod test {
    use super::{HashingReader, HashingWriter, Md5};
    use rstest::rstest;
    use std::io::{Read, Write};

    #[rstest]
    #[case("", "d41d8cd98f00b204e9800998ecf8427e")]
    #[case("1234567890", "e807f1fcf82d132f9bb018ca6738a19f")]
    fn test_compute_file_md5_hex(#[case] input: &str, #[case] expected_hash: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test");
        std::fs::write(&file_path, input).unwrap();

        assert_eq!(
            super::compute_file_md5_hex(&file_path).unwrap(),
            expected_hash
        );
    }

    #[rstest]
    #[case("1234567890", "e807f1fcf82d132f9bb018ca6738a19f")]
    #[case("Hello, world!", "6cd3556deb0da54bca060b4c39479839")]
    fn test_hashing_reader_md5(#[case] input: &str, #[case] expected_hash: &str) {
        let mut cursor = HashingReader::<_, Md5>::new(std::io::Cursor::new(input));
        let mut cursor_string = String::new();
        cursor.read_to_string(&mut cursor_string).unwrap();
        assert_eq!(&cursor_string, input);
        assert_eq!(cursor.bytes_read(), input.len() as u64);
        let (_, hash) = cursor.finalize();
        assert_eq!(format!("{hash:x}"), expected_hash);
    }

    #[test]
    fn test_hashing_writer_md5() {
        let mut writer = HashingWriter::<_, Md5>::new(Vec::new());
        writer.write_all(b"12345").unwrap();
        writer.write_all(b"67890").unwrap();
        assert_eq!(writer.bytes_written(), 10);

        let (inner, hash) = writer.finalize();
        assert_eq!(inner, b"1234567890");
        assert_eq!(format!("{hash:x}"), "e807f1fcf82d132f9bb018ca6738a19f");
    }

    #[test]
    fn test_parse_digest_from_hex() {
        let hash = super::parse_digest_from_hex::<Md5>("e807f1fcf82d132f9bb018ca6738a19f");
        assert_eq!(
            hash,
            Some(super::compute_bytes_digest::<Md5>("1234567890"))
        );
        assert_eq!(super::parse_digest_from_hex::<Md5>("not hex"), None);
    }
}
