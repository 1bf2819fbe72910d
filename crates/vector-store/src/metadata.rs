use crate::types::IndexedMetadata;
use std::collections::VecDeque;

/// Bounded, insertion-ordered sequence of [`IndexedMetadata`].
///
/// The store never trims itself on push; the owner asks for [`overflow`]
/// and evicts the same number of entries from the index alongside.
///
/// [`overflow`]: MetadataStore::overflow
#[derive(Debug)]
pub struct MetadataStore {
    entries: VecDeque<IndexedMetadata>,
    max_len: usize,
    evicted: u64,
}

impl MetadataStore {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
            evicted: 0,
        }
    }

    pub fn extend(&mut self, batch: impl IntoIterator<Item = IndexedMetadata>) {
        self.entries.extend(batch);
    }

    /// Number of oldest entries that must go to get back under the limit.
    #[must_use]
    pub fn overflow(&self) -> usize {
        self.entries.len().saturating_sub(self.max_len)
    }

    pub fn evict_oldest(&mut self, n: usize) {
        let n = n.min(self.entries.len());
        self.entries.drain(..n);
        self.evicted += n as u64;
    }

    /// Resolve an index position. Negative and out-of-range positions yield `None`.
    #[must_use]
    pub fn resolve(&self, position: i64) -> Option<(usize, &IndexedMetadata)> {
        let pos = usize::try_from(position).ok()?;
        self.entries.get(pos).map(|entry| (pos, entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedMetadata> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Total entries evicted over the store's lifetime.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::SystemTime;

    fn entry(id: u64) -> IndexedMetadata {
        IndexedMetadata::new(id, format!("line {id}"), SystemTime::now())
    }

    #[test]
    fn overflow_and_eviction_keep_newest() {
        let mut store = MetadataStore::new(3);
        store.extend((0..5).map(entry));
        assert_eq!(store.overflow(), 2);

        store.evict_oldest(store.overflow());
        assert_eq!(store.len(), 3);
        assert_eq!(store.evicted(), 2);
        let ids: Vec<u64> = store.iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn resolve_rejects_sentinels_and_out_of_range() {
        let mut store = MetadataStore::new(10);
        store.extend((0..2).map(entry));

        assert!(store.resolve(-1).is_none());
        assert!(store.resolve(2).is_none());
        let (pos, found) = store.resolve(1).unwrap();
        assert_eq!(pos, 1);
        assert_eq!(found.sequence_id, 1);
    }
}
