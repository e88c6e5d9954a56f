use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

/// A value whose encoding can be reused across messages.
///
/// Two fields with the same `identity` must serialize to the same bytes.
pub trait SerializableField: Send + Sync {
    /// Stable identity of the encoded form.
    fn identity(&self) -> u64;

    /// Append the encoded form to `dst`.
    fn serialize(&self, dst: &mut BytesMut);
}

/// Per-connection cache of field encodings, keyed by identity.
///
/// When disabled every lookup re-encodes.
#[derive(Debug, Default)]
pub struct SerializationCache {
    enabled: bool,
    entries: HashMap<u64, Bytes>,
    hits: u64,
    misses: u64,
}

impl SerializationCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The encoded form of `field`, from the cache when possible.
    pub fn encode(&mut self, field: &dyn SerializableField) -> Bytes {
        let identity = field.identity();
        if self.enabled {
            if let Some(bytes) = self.entries.get(&identity) {
                self.hits += 1;
                return bytes.clone();
            }
        }

        self.misses += 1;
        let mut dst = BytesMut::new();
        field.serialize(&mut dst);
        let bytes = dst.freeze();
        if self.enabled {
            self.entries.insert(identity, bytes.clone());
        }
        bytes
    }

    /// Forget one encoding. Returns whether it was cached.
    pub fn invalidate(&mut self, identity: u64) -> bool {
        self.entries.remove(&identity).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::BufMut;

    use super::*;

    struct Field {
        id: u64,
        encodings: AtomicUsize,
    }

    impl Field {
        fn new(id: u64) -> Self {
            Self {
                id,
                encodings: AtomicUsize::new(0),
            }
        }
    }

    impl SerializableField for Field {
        fn identity(&self) -> u64 {
            self.id
        }

        fn serialize(&self, dst: &mut BytesMut) {
            self.encodings.fetch_add(1, Ordering::SeqCst);
            dst.put_u64(self.id);
        }
    }

    #[test]
    fn disabled_cache_always_encodes() {
        let mut cache = SerializationCache::default();
        let field = Field::new(7);

        cache.encode(&field);
        let bytes = cache.encode(&field);

        assert_eq!(bytes.as_ref(), &7u64.to_be_bytes());
        assert_eq!(field.encodings.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn enabled_cache_reuses_until_invalidated() {
        let mut cache = SerializationCache::new(true);
        let field = Field::new(42);

        cache.encode(&field);
        cache.encode(&field);
        assert_eq!(field.encodings.load(Ordering::SeqCst), 1);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        assert!(cache.invalidate(42));
        assert!(!cache.invalidate(42));
        cache.encode(&field);
        assert_eq!(field.encodings.load(Ordering::SeqCst), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
