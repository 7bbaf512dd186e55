//! Codec Module
//!
//! Little-endian primitives and the table framing of the data file:
//!
//! ```text
//! i32      entry_count
//! repeat entry_count times:
//!   string key        (u32 length + UTF-8)
//!   string kind       (u32 length + UTF-8)
//!   <entry>           (kind-specific encoding)
//! ```
//!
//! The format carries no magic number or version.

use std::io::{self, Read, Write};
use std::mem::size_of;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cache::registry::EntryRegistry;
use crate::cache::table::CacheTable;

// == Primitives ==
pub fn write_i32<W: Write + ?Sized>(writer: &mut W, v: i32) -> io::Result<()> {
    writer.write_all(&v.to_le_bytes())
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; size_of::<i32>()];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_u32<W: Write + ?Sized>(writer: &mut W, v: u32) -> io::Result<()> {
    writer.write_all(&v.to_le_bytes())
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; size_of::<u32>()];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_i64<W: Write + ?Sized>(writer: &mut W, v: i64) -> io::Result<()> {
    writer.write_all(&v.to_le_bytes())
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; size_of::<i64>()];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Writes a u32 length prefix followed by the bytes.
pub fn write_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} bytes exceed the u32 length prefix", bytes.len()),
        )
    })?;
    write_u32(writer, len)?;
    writer.write_all(bytes)
}

/// Reads a length-prefixed byte string.
///
/// Allocation grows with the data actually present, so a corrupt length
/// prefix yields `UnexpectedEof` rather than a huge allocation.
pub fn read_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, found {}", len, buf.len()),
        ));
    }
    Ok(buf)
}

pub fn write_string<W: Write + ?Sized>(writer: &mut W, s: &str) -> io::Result<()> {
    write_bytes(writer, s.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    String::from_utf8(read_bytes(reader)?)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Timestamps are microseconds since the Unix epoch.
pub fn write_timestamp<W: Write + ?Sized>(writer: &mut W, at: DateTime<Utc>) -> io::Result<()> {
    write_i64(writer, at.timestamp_micros())
}

pub fn read_timestamp<R: Read + ?Sized>(reader: &mut R) -> io::Result<DateTime<Utc>> {
    let micros = read_i64(reader)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("timestamp {} out of range", micros),
        )
    })
}

// == Table Framing ==
/// Writes the whole table, oldest entry first.
pub(crate) fn encode_table<W: Write>(writer: &mut W, table: &CacheTable) -> io::Result<()> {
    let count = i32::try_from(table.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} entries exceed the i32 entry count", table.len()),
        )
    })?;
    write_i32(writer, count)?;

    for (key, entry) in table.by_age() {
        write_string(writer, key)?;
        write_string(writer, entry.kind())?;
        entry.encode(writer)?;
    }
    Ok(())
}

/// Reads a table, keeping every record parsed before the first failure.
///
/// A truncated or malformed file is not an error: the cache continues with
/// the readable prefix. This favors availability over completeness and can
/// hide real data loss.
pub(crate) fn decode_table<R: Read>(reader: &mut R, registry: &EntryRegistry) -> CacheTable {
    let mut table = CacheTable::new();

    let count = match read_i32(reader) {
        Ok(count) => count,
        Err(err) => {
            warn!("Cache file has no readable entry count: {}", err);
            return table;
        }
    };

    for index in 0..count.max(0) {
        let record = read_string(reader).and_then(|key| {
            let kind = read_string(reader)?;
            let entry = registry.decode(&kind, reader)?;
            Ok((key, entry))
        });

        match record {
            Ok((key, entry)) => table.load(key, entry),
            Err(err) => {
                warn!(
                    "Cache file corrupt at record {} of {}, keeping {} entries: {}",
                    index,
                    count,
                    table.len(),
                    err
                );
                break;
            }
        }
    }

    table
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{BlobEntry, CacheEntry};
    use chrono::Duration;
    use std::io::Cursor;
    use std::sync::Arc;

    fn registry() -> EntryRegistry {
        EntryRegistry::new().register::<BlobEntry>()
    }

    fn sample_table(n: usize) -> CacheTable {
        let base = Utc::now();
        let mut table = CacheTable::new();
        for i in 0..n {
            let entry = BlobEntry::with_created_at(
                vec![i as u8; i + 1],
                base + Duration::milliseconds(i as i64),
            );
            table.replace(&format!("key{}", i), Some(Arc::new(entry)));
        }
        table
    }

    fn blob_payload(table: &CacheTable, key: &str) -> Vec<u8> {
        table
            .get(key)
            .and_then(|e| e.downcast_ref::<BlobEntry>())
            .map(|b| b.payload().to_vec())
            .unwrap()
    }

    #[test]
    fn test_string_codec() {
        let mut buf = Vec::new();
        write_string(&mut buf, "héllo").unwrap();
        assert_eq!(&buf[..4], &6u32.to_le_bytes());
        assert_eq!(read_string(&mut Cursor::new(buf)).unwrap(), "héllo");
    }

    #[test]
    fn test_read_bytes_truncated() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"abcdef").unwrap();
        buf.truncate(buf.len() - 2);

        let err = read_bytes(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_bytes_huge_length_prefix() {
        let buf = u32::MAX.to_le_bytes().to_vec();
        let err = read_bytes(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_string_invalid_utf8() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[0xff, 0xfe]).unwrap();
        let err = read_string(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_table_framing() {
        let table = sample_table(3);
        let mut buf = Vec::new();
        encode_table(&mut buf, &table).unwrap();

        assert_eq!(&buf[..4], &3i32.to_le_bytes());
        // First record key follows the count
        assert_eq!(&buf[4..8], &4u32.to_le_bytes());
        assert_eq!(&buf[8..12], b"key0");

        let decoded = decode_table(&mut Cursor::new(buf), &registry());
        assert_eq!(decoded.len(), 3);
        assert_eq!(blob_payload(&decoded, "key2"), vec![2u8; 3]);
        assert!(!decoded.is_dirty());
    }

    #[test]
    fn test_decode_keeps_prefix_on_truncation() {
        let table = sample_table(3);
        let mut buf = Vec::new();
        encode_table(&mut buf, &table).unwrap();
        buf.truncate(buf.len() - 1);

        let decoded = decode_table(&mut Cursor::new(buf), &registry());
        assert_eq!(decoded.len(), 2);
        assert!(decoded.get("key0").is_some());
        assert!(decoded.get("key1").is_some());
        assert!(decoded.get("key2").is_none());
    }

    #[test]
    fn test_decode_truncated_before_first_record() {
        let table = sample_table(2);
        let mut buf = Vec::new();
        encode_table(&mut buf, &table).unwrap();
        buf.truncate(6);

        let decoded = decode_table(&mut Cursor::new(buf), &registry());
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_empty_and_negative_count() {
        let decoded = decode_table(&mut Cursor::new(Vec::new()), &registry());
        assert!(decoded.is_empty());

        let decoded = decode_table(&mut Cursor::new((-5i32).to_le_bytes().to_vec()), &registry());
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_stops_at_unknown_kind() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 2).unwrap();
        write_string(&mut buf, "good").unwrap();
        write_string(&mut buf, "blob").unwrap();
        BlobEntry::new(b"ok".to_vec()).encode(&mut buf).unwrap();
        write_string(&mut buf, "bad").unwrap();
        write_string(&mut buf, "mystery").unwrap();

        let decoded = decode_table(&mut Cursor::new(buf), &registry());
        assert_eq!(decoded.len(), 1);
        assert_eq!(blob_payload(&decoded, "good"), b"ok".to_vec());
    }

    #[test]
    fn test_decode_count_larger_than_records() {
        let table = sample_table(2);
        let mut buf = Vec::new();
        encode_table(&mut buf, &table).unwrap();
        buf[..4].copy_from_slice(&1000i32.to_le_bytes());

        let decoded = decode_table(&mut Cursor::new(buf), &registry());
        assert_eq!(decoded.len(), 2);
    }
}
