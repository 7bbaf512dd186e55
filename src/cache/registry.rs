//! Entry Registry Module
//!
//! Maps the kind tag stored with each record to the decoder for that kind.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use crate::cache::entry::{BlobEntry, DecodeEntry};
use crate::cache::SharedEntry;

type DecodeFn = fn(&mut dyn Read) -> io::Result<SharedEntry>;

fn decode_as<E: DecodeEntry>(reader: &mut dyn Read) -> io::Result<SharedEntry> {
    Ok(Arc::new(E::decode(reader)?))
}

// == Entry Registry ==
/// The closed set of entry kinds one cache can store and load.
#[derive(Clone, Default)]
pub struct EntryRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl EntryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing only [`BlobEntry`].
    pub fn with_blobs() -> Self {
        Self::new().register::<BlobEntry>()
    }

    /// Adds `E`; a later registration of the same tag replaces the earlier one.
    pub fn register<E: DecodeEntry>(mut self) -> Self {
        self.decoders.insert(E::KIND, decode_as::<E>);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered kind tags, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.decoders.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub(crate) fn decode(&self, kind: &str, reader: &mut dyn Read) -> io::Result<SharedEntry> {
        let decode = self.decoders.get(kind).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown entry kind {:?}", kind),
            )
        })?;
        decode(reader)
    }
}

impl fmt::Debug for EntryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
