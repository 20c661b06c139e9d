//! CRC32 checksum calculation for ROM identification
//!
//! Uses the zip/ISO-3309 polynomial so values line up with the CRCs stored in
//! zip and 7z directories and with the `romHashCRC` column of OpenVGDB.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Bytes folded into the running CRC state per read
pub const CHUNK_SIZE: usize = 4096;

/// A 32-bit CRC, rendered as 8 uppercase hex digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(u32);

impl Checksum {
    pub fn new(value: u32) -> Self {
        Checksum(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for Checksum {
    fn from(value: u32) -> Self {
        Checksum(value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Error returned when a string is not an 8-digit hex checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChecksumError(String);

impl fmt::Display for ParseChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not an 8-digit hex checksum: {:?}", self.0)
    }
}

impl std::error::Error for ParseChecksumError {}

impl FromStr for Checksum {
    type Err = ParseChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseChecksumError(s.to_string()));
        }
        u32::from_str_radix(s, 16)
            .map(Checksum)
            .map_err(|_| ParseChecksumError(s.to_string()))
    }
}

impl TryFrom<String> for Checksum {
    type Error = ParseChecksumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

/// Checksum of an in-memory buffer
pub fn checksum_bytes(bytes: &[u8]) -> Checksum {
    let mut hasher = crc32fast::Hasher::new();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        hasher.update(chunk);
    }
    Checksum(hasher.finalize())
}

/// Checksum of everything a reader yields, read in `CHUNK_SIZE` pieces
pub fn checksum_reader<R: Read>(mut reader: R) -> io::Result<Checksum> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut hasher = crc32fast::Hasher::new();

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Checksum(hasher.finalize()))
}

/// Checksum of a whole file on disk
pub fn checksum_file(path: &Path) -> io::Result<Checksum> {
    let file = File::open(path)?;
    checksum_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_standard_vector() {
        assert_eq!(checksum_bytes(b"123456789").to_string(), "CBF43926");
    }

    #[test]
    fn test_empty_input_is_zero_padded() {
        assert_eq!(checksum_bytes(b"").to_string(), "00000000");
        assert_eq!(Checksum::new(0xAB).to_string(), "000000AB");
    }

    #[test]
    fn test_checksum_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"123456789").unwrap();
        file.flush().unwrap();

        let checksum = checksum_file(file.path()).unwrap();
        assert_eq!(checksum, Checksum::new(0xCBF43926));
    }

    #[test]
    fn test_parse() {
        assert_eq!("cbf43926".parse::<Checksum>().unwrap().to_string(), "CBF43926");
        assert!("CBF4392".parse::<Checksum>().is_err());
        assert!("+BF43926".parse::<Checksum>().is_err());
        assert!("XYZ43926".parse::<Checksum>().is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&Checksum::new(0x1234ABCD)).unwrap();
        assert_eq!(json, "\"1234ABCD\"");
        let back: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value(), 0x1234ABCD);
    }

    /// Reader that hands out at most `step` bytes per call
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_checksum(
            data in proptest::collection::vec(any::<u8>(), 0..20_000),
            step in 1usize..9_000,
        ) {
            let whole = checksum_bytes(&data);

            let mut hasher = crc32fast::Hasher::new();
            for chunk in data.chunks(step) {
                hasher.update(chunk);
            }
            prop_assert_eq!(Checksum::new(hasher.finalize()), whole);

            let streamed = checksum_reader(Trickle { data: &data, step }).unwrap();
            prop_assert_eq!(streamed, whole);
        }
    }
}
