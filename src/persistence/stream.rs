//! Bulk Transfer Stream
//!
//! Layout used by `to_stream`/`from_stream` for state transfer: a big-endian
//! `u64` entry count, then per entry a big-endian `u32` length and the entry's
//! JSON encoding. No other header.

use std::io::{Read, Write};

use crate::cache::CacheEntry;
use crate::error::{StoreError, StoreResult};

/// Writes `entries` to `out`, returning how many were written.
pub fn write_entries(out: &mut dyn Write, entries: &[CacheEntry]) -> StoreResult<usize> {
    out.write_all(&(entries.len() as u64).to_be_bytes())?;
    for entry in entries {
        let bytes = serde_json::to_vec(entry)?;
        let len = u32::try_from(bytes.len()).map_err(|_| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("entry '{}' too large for stream", entry.key),
            ))
        })?;
        out.write_all(&len.to_be_bytes())?;
        out.write_all(&bytes)?;
    }
    out.flush()?;
    Ok(entries.len())
}

/// Reads a full stream produced by [`write_entries`].
///
/// Length prefixes are not trusted: a payload buffer only grows as bytes
/// actually arrive, and a short payload is an `UnexpectedEof` I/O error.
pub fn read_entries(input: &mut dyn Read) -> StoreResult<Vec<CacheEntry>> {
    let mut count_buf = [0u8; 8];
    input.read_exact(&mut count_buf)?;
    let count = u64::from_be_bytes(count_buf);

    let mut entries = Vec::new();
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        input.read_exact(&mut len_buf)?;
        let len = u64::from(u32::from_be_bytes(len_buf));

        let mut bytes = Vec::new();
        (&mut *input).take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("entry payload cut short: {} of {} bytes", bytes.len(), len),
            )));
        }
        entries.push(serde_json::from_slice(&bytes)?);
    }
    Ok(entries)
}
