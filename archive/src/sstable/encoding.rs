//! Binary layout of an sstable blob.
//!
//! ```text
//! | magic "ASST" | version (u8) | record* |
//!
//! record:
//! | key_len (u32 BE) | key (utf-8) | ts (i64 BE) | value_len (u32 BE) | value |
//! ```
//!
//! There is no index or footer; readers scan records front to back.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::model::Record;

const MAGIC: &[u8; 4] = b"ASST";
const VERSION: u8 = 0x01;

/// Size of the blob header in bytes.
pub const HEADER_LEN: usize = MAGIC.len() + 1;

/// Writes the blob header.
pub fn encode_header(buf: &mut BytesMut) {
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
}

/// Appends one record, returning the number of bytes written.
pub fn encode_record(record: &Record, buf: &mut BytesMut) -> Result<usize> {
    let key_len = u32::try_from(record.key.len())
        .map_err(|_| Error::InvalidInput(format!("key too long: {} bytes", record.key.len())))?;
    let value_len = u32::try_from(record.value.len()).map_err(|_| {
        Error::InvalidInput(format!("value too long: {} bytes", record.value.len()))
    })?;

    let start = buf.len();
    buf.put_u32(key_len);
    buf.put_slice(record.key.as_bytes());
    buf.put_i64(record.timestamp_ms);
    buf.put_u32(value_len);
    buf.put_slice(&record.value);
    Ok(buf.len() - start)
}

/// Iterates the records of an encoded blob in stored order.
///
/// Values are zero-copy slices of the blob. After the first error the
/// iterator is exhausted.
pub struct RecordIter {
    buf: Bytes,
    failed: bool,
}

impl RecordIter {
    /// Validates the header and positions the iterator at the first record.
    pub fn new(mut blob: Bytes) -> Result<Self> {
        if blob.len() < HEADER_LEN || &blob[..MAGIC.len()] != MAGIC {
            return Err(Error::Encoding("not an sstable: bad magic".to_string()));
        }
        let version = blob[MAGIC.len()];
        if version != VERSION {
            return Err(Error::Encoding(format!(
                "unsupported sstable version: 0x{:02x}",
                version
            )));
        }
        blob.advance(HEADER_LEN);
        Ok(Self {
            buf: blob,
            failed: false,
        })
    }

    fn take(&mut self, n: usize, what: &str) -> Result<Bytes> {
        if self.buf.remaining() < n {
            return Err(Error::Encoding(format!(
                "truncated sstable record: need {} bytes for {}, have {}",
                n,
                what,
                self.buf.remaining()
            )));
        }
        Ok(self.buf.split_to(n))
    }

    fn decode_next(&mut self) -> Result<Record> {
        let key_len = self.take(4, "key length")?.get_u32() as usize;
        let key = self.take(key_len, "key")?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| Error::Encoding(format!("sstable key is not utf-8: {}", e)))?;
        let timestamp_ms = self.take(8, "timestamp")?.get_i64();
        let value_len = self.take(4, "value length")?.get_u32() as usize;
        let value = self.take(value_len, "value")?;
        Ok(Record {
            key,
            timestamp_ms,
            value,
        })
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.buf.has_remaining() {
            return None;
        }
        let item = self.decode_next();
        self.failed = item.is_err();
        Some(item)
    }
}
