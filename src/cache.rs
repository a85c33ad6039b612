use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use dashmap::DashMap;
use serde::Serialize;

use crate::core::Hash32;
use crate::io::write_atomic;

/// Identifies one optimization result: the source bytes and the options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content: Hash32,
    pub config: Hash32,
}

impl CacheKey {
    pub fn new<T: Serialize>(content: &[u8], options: &T) -> std::io::Result<Self> {
        Ok(Self {
            content: Hash32::hash(content),
            config: Hash32::hash_cbor(options)?,
        })
    }

    fn file_name(&self) -> String {
        format!("{}.{}", self.content.to_hex(), self.config.to_hex())
    }
}

/// Memoized image optimization results.
///
/// Entries live in a concurrent map and are replaced whole, so a reader sees
/// either the old or the new bytes for a key, never a mix. When a directory
/// is configured every entry is also mirrored to disk and picked up again by
/// later processes. Nothing is ever evicted: a changed file or changed
/// options simply produce a different key.
#[derive(Debug, Default)]
pub struct ImageCache {
    map: DashMap<CacheKey, Arc<[u8]>>,
    dir: Option<Utf8PathBuf>,
}

impl ImageCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            map: DashMap::new(),
            dir: Some(dir.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        if let Some(hit) = self.map.get(key) {
            return Some(hit.value().clone());
        }

        let path = self.dir.as_ref()?.join(key.file_name());
        let data: Arc<[u8]> = fs::read(&path).ok()?.into();
        self.map.insert(*key, data.clone());

        Some(data)
    }

    /// Last write wins.
    pub fn put(&self, key: CacheKey, data: Arc<[u8]>) {
        if let Some(dir) = &self.dir
            && let Err(e) = write_atomic(&dir.join(key.file_name()), &data)
        {
            tracing::warn!("image cache entry not persisted: {e}");
        }

        self.map.insert(key, data);
    }

    /// Returns the cached value for `key`, computing and storing it on a
    /// miss. The flag is true on a hit.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<Vec<u8>, E>,
    ) -> Result<(Arc<[u8]>, bool), E> {
        if let Some(hit) = self.get(&key) {
            return Ok((hit, true));
        }

        let data: Arc<[u8]> = compute()?.into();
        self.put(key, data.clone());

        Ok((data, false))
    }
}
