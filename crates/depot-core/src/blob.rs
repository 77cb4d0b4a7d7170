//! # File Blobs
//!
//! [`Blob`] is the `File` artifact kind: opaque bytes, stored as-is.
//!
//! Blobs are splittable. Slices join by concatenation, and filtering assumes
//! line-oriented records that begin with an epoch-millisecond timestamp
//! (`1700000000123 some event`). Lines without a leading timestamp are
//! continuation lines and follow the fate of the record before them.

use std::io;
use std::path::Path;

use crate::artifact::{Artifact, Codec};
use crate::error::CodecError;
use crate::temporal::TimeRange;

/// Raw file contents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    /// Wrap bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    /// Write the contents to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, &self.bytes)
    }

    /// The contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for an empty blob.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The contents as UTF-8 text.
    pub fn text(&self) -> Result<&str, CodecError> {
        std::str::from_utf8(&self.bytes).map_err(|e| CodecError::Other(e.to_string()))
    }

    /// Consume, returning the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

/// Identity codec for [`Blob`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Blob> for BytesCodec {
    fn encode(value: &Blob) -> Result<Vec<u8>, CodecError> {
        Ok(value.bytes.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Blob, CodecError> {
        Ok(Blob::new(bytes))
    }
}

impl Artifact for Blob {
    const KIND: &'static str = "File";
    type Codec = BytesCodec;

    fn join(parts: Vec<Self>) -> Result<Self, CodecError> {
        let mut out = Vec::with_capacity(parts.iter().map(Blob::len).sum());
        for part in parts {
            if !out.is_empty() && out.last() != Some(&b'\n') && !part.is_empty() {
                out.push(b'\n');
            }
            out.extend_from_slice(&part.bytes);
        }
        Ok(Self::new(out))
    }

    fn filter(self, range: &TimeRange) -> Result<Self, CodecError> {
        let mut out = Vec::with_capacity(self.bytes.len());
        let mut keep = false;
        for line in self.bytes.split_inclusive(|b| *b == b'\n') {
            if let Some(millis) = leading_millis(line) {
                keep = range.contains_millis(millis);
            }
            if keep {
                out.extend_from_slice(line);
            }
        }
        Ok(Self::new(out))
    }
}

fn leading_millis(line: &[u8]) -> Option<i64> {
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&line[..digits]).ok()?.parse().ok()
}
