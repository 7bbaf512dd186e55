//! Cache Entry Module
//!
//! Defines the capability set every cached value provides, the expiry policy
//! used by lookups, and the two entry kinds shipped with the crate.

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::marker::PhantomData;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

use crate::cache::codec::{read_bytes, read_timestamp, write_bytes, write_timestamp};

// == Cache Entry ==
/// A value stored in the cache.
///
/// Creation time and size are fixed at construction. Several entry kinds may
/// share one table; each is identified on disk by its [`CacheEntry::kind`]
/// tag and must be registered with the cache's
/// [`EntryRegistry`](crate::cache::EntryRegistry) to be stored.
pub trait CacheEntry: Any + Send + Sync + fmt::Debug {
    /// Tag written before the entry's encoding; selects the decoder on load.
    fn kind(&self) -> &'static str;

    /// When the entry was created.
    fn created_at(&self) -> DateTime<Utc>;

    /// Size counted against the cache's byte budget.
    fn byte_size(&self) -> u64;

    /// Writes the entry's own encoding (everything after the kind tag).
    fn encode(&self, writer: &mut dyn Write) -> io::Result<()>;

    /// Called once after the entry has been removed from the table and the
    /// cache lock has been released.
    fn on_evicted(&self) {}

    fn as_any(&self) -> &dyn Any;
}

impl dyn CacheEntry {
    /// Returns the concrete entry if it is a `T`.
    pub fn downcast_ref<T: CacheEntry>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

// == Decode Entry ==
/// The read half of an entry codec, tied to a fixed kind tag.
pub trait DecodeEntry: CacheEntry + Sized {
    const KIND: &'static str;

    /// Reads one entry previously written by [`CacheEntry::encode`].
    fn decode(reader: &mut dyn Read) -> io::Result<Self>;
}

// == Max Age ==
/// Expiry policy for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    /// Every entry counts as expired
    AlwaysExpired,
    /// No entry ever expires
    Never,
    /// Expired once strictly older than the duration
    After(Duration),
}

impl MaxAge {
    pub fn seconds(secs: i64) -> Self {
        MaxAge::After(Duration::seconds(secs))
    }

    pub fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            MaxAge::AlwaysExpired => true,
            MaxAge::Never => false,
            MaxAge::After(max) => now - created_at > *max,
        }
    }
}

// == Utility Functions ==
/// Current time at the precision the codec stores.
pub fn now_micros() -> DateTime<Utc> {
    truncate_to_micros(Utc::now())
}

pub(crate) fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

// == Blob Entry ==
/// Raw bytes; size is the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl BlobEntry {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            created_at: now_micros(),
        }
    }

    /// Creates an entry with an explicit creation time (e.g. when importing).
    pub fn with_created_at(payload: impl Into<Vec<u8>>, created_at: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            created_at: truncate_to_micros(created_at),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl CacheEntry for BlobEntry {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn byte_size(&self) -> u64 {
        self.payload.len() as u64
    }

    fn encode(&self, writer: &mut dyn Write) -> io::Result<()> {
        write_timestamp(writer, self.created_at)?;
        write_bytes(writer, &self.payload)
    }

    fn on_evicted(&self) {
        trace!("Evicted blob of {} bytes", self.payload.len());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DecodeEntry for BlobEntry {
    const KIND: &'static str = "blob";

    fn decode(reader: &mut dyn Read) -> io::Result<Self> {
        let created_at = read_timestamp(reader)?;
        let payload = read_bytes(reader)?;
        Ok(Self {
            payload,
            created_at,
        })
    }
}

// == Json Entry ==
/// A serde value that can live in the cache as JSON.
pub trait JsonPayload: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Kind tag; must be unique among the kinds registered with one cache.
    const KIND: &'static str;
}

/// A typed value stored as its JSON encoding; size is the encoded length.
pub struct JsonEntry<T> {
    value: T,
    json: Vec<u8>,
    created_at: DateTime<Utc>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: JsonPayload> JsonEntry<T> {
    pub fn new(value: T) -> serde_json::Result<Self> {
        Self::with_created_at(value, Utc::now())
    }

    pub fn with_created_at(value: T, created_at: DateTime<Utc>) -> serde_json::Result<Self> {
        let json = serde_json::to_vec(&value)?;
        Ok(Self {
            value,
            json,
            created_at: truncate_to_micros(created_at),
            _kind: PhantomData,
        })
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for JsonEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonEntry")
            .field("value", &self.value)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl<T: JsonPayload> CacheEntry for JsonEntry<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn byte_size(&self) -> u64 {
        self.json.len() as u64
    }

    fn encode(&self, writer: &mut dyn Write) -> io::Result<()> {
        write_timestamp(writer, self.created_at)?;
        write_bytes(writer, &self.json)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: JsonPayload> DecodeEntry for JsonEntry<T> {
    const KIND: &'static str = T::KIND;

    fn decode(reader: &mut dyn Read) -> io::Result<Self> {
        let created_at = read_timestamp(reader)?;
        let json = read_bytes(reader)?;
        let value = serde_json::from_slice(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self {
            value,
            json,
            created_at,
            _kind: PhantomData,
        })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        karma: i32,
    }

    impl JsonPayload for Profile {
        const KIND: &'static str = "profile";
    }

    #[test]
    fn test_blob_entry_size_is_payload_length() {
        let entry = BlobEntry::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(entry.byte_size(), 5);
        assert_eq!(entry.kind(), "blob");
    }

    #[test]
    fn test_blob_entry_codec() {
        let entry = BlobEntry::new(b"hello".to_vec());
        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();

        let decoded = BlobEntry::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_created_at_is_truncated_to_micros() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let entry = BlobEntry::with_created_at(b"x".to_vec(), at);
        assert_eq!(entry.created_at().timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_json_entry_codec() {
        let profile = Profile {
            name: "ada".to_string(),
            karma: 42,
        };
        let entry = JsonEntry::new(profile.clone()).unwrap();
        assert_eq!(entry.kind(), "profile");
        assert_eq!(entry.byte_size(), serde_json::to_vec(&profile).unwrap().len() as u64);

        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        let decoded = JsonEntry::<Profile>::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.value(), &profile);
        assert_eq!(decoded.created_at(), entry.created_at());
    }

    #[test]
    fn test_json_entry_rejects_bad_json() {
        let mut buf = Vec::new();
        write_timestamp(&mut buf, now_micros()).unwrap();
        write_bytes(&mut buf, b"{not json").unwrap();

        let err = JsonEntry::<Profile>::decode(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_downcast_ref() {
        let entry: Box<dyn CacheEntry> = Box::new(BlobEntry::new(b"abc".to_vec()));
        assert_eq!(entry.downcast_ref::<BlobEntry>().unwrap().payload(), b"abc");
        assert!(entry.downcast_ref::<JsonEntry<Profile>>().is_none());
    }

    #[test]
    fn test_max_age_sentinels() {
        let now = Utc::now();
        let ancient = now - Duration::days(10_000);

        assert!(MaxAge::AlwaysExpired.is_expired(now, now));
        assert!(!MaxAge::Never.is_expired(ancient, now));
    }

    #[test]
    fn test_max_age_boundary() {
        let now = Utc::now();
        let created = now - Duration::seconds(60);

        // Exactly at the limit is still fresh
        assert!(!MaxAge::seconds(60).is_expired(created, now));
        assert!(MaxAge::seconds(59).is_expired(created, now));
    }
}
