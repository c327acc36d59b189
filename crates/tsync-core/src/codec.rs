//! Versioned binary record encoding
//!
//! Records are small big-endian byte strings built from three primitives:
//! a `u8`, an `i64`, and a UTF string written as a `u16` byte length followed
//! by UTF-8 bytes. Each record type leads with its own format tag.

use thiserror::Error;

/// Errors decoding or encoding a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Record truncated: {needed} more byte(s) expected")]
    Truncated { needed: usize },

    #[error("Unsupported format tag {found} (expected {expected})")]
    UnsupportedVersion { found: i64, expected: i64 },

    #[error("Record contains invalid UTF-8")]
    InvalidUtf8,

    #[error("String of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    #[error("Record has {0} unexpected trailing byte(s)")]
    TrailingBytes(usize),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Builds a record
#[derive(Debug, Default)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_utf(&mut self, value: &str) -> Result<&mut Self, CodecError> {
        let bytes = value.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| CodecError::StringTooLong(bytes.len()))?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads a record front to back
#[derive(Debug)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let available = self.data.len() - self.pos;
        if available < len {
            return Err(CodecError::Truncated {
                needed: len - available,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn i64(&mut self) -> Result<i64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(raw))
    }

    pub fn utf(&mut self) -> Result<String, CodecError> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        let len = u16::from_be_bytes(raw) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Everything not read yet
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Fail if any bytes remain unread
    pub fn finish(self) -> Result<(), CodecError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_big_endian() {
        let mut writer = RecordWriter::new();
        writer.put_u8(7).put_i64(1).put_utf("ab").unwrap();
        assert_eq!(
            writer.into_bytes(),
            vec![7, 0, 0, 0, 0, 0, 0, 0, 1, 0, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_truncated_string() {
        let data = [0u8, 5, b'a'];
        let mut reader = RecordReader::new(&data);
        assert_eq!(reader.utf(), Err(CodecError::Truncated { needed: 4 }));
    }

    #[test]
    fn test_string_too_long() {
        let long = "x".repeat(70_000);
        let mut writer = RecordWriter::new();
        assert_eq!(
            writer.put_utf(&long).err(),
            Some(CodecError::StringTooLong(70_000))
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let data = [0u8, 2, 0xff, 0xfe];
        let mut reader = RecordReader::new(&data);
        assert_eq!(reader.utf(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_trailing_bytes() {
        let data = [1u8, 2, 3];
        let mut reader = RecordReader::new(&data);
        reader.u8().unwrap();
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes(2)));
    }

    #[test]
    fn test_multibyte_characters() {
        let mut writer = RecordWriter::new();
        writer.put_utf("räksmörgås ✓").unwrap();
        let bytes = writer.into_bytes();

        let mut reader = RecordReader::new(&bytes);
        assert_eq!(reader.utf().unwrap(), "räksmörgås ✓");
        reader.finish().unwrap();
    }
}
