use crate::error::{Result, VectorStoreError};
use crate::flat_index::SimilarityIndex;
use crate::metadata::MetadataStore;
use crate::types::{IndexedMetadata, SearchHit, SearchOutcome, StoreSnapshot};
use std::sync::{Mutex, MutexGuard};

/// Result of one [`IndexedLog::append_batch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub appended: usize,
    pub evicted: usize,
    pub len: usize,
}

struct Shelf {
    index: Box<dyn SimilarityIndex>,
    metadata: MetadataStore,
}

/// Similarity index and metadata store behind a single lock.
///
/// Every mutation and every search takes the same mutex, so readers never see
/// a vector count that disagrees with the metadata length. Trimming evicts
/// from both sides in the same critical section.
pub struct IndexedLog {
    shelf: Mutex<Shelf>,
}

impl IndexedLog {
    pub fn new(index: Box<dyn SimilarityIndex>, max_entries: usize) -> Self {
        log::info!(
            "Initializing indexed log (dim {}, max entries {max_entries})",
            index.dimension()
        );
        Self {
            shelf: Mutex::new(Shelf {
                index,
                metadata: MetadataStore::new(max_entries),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shelf>> {
        self.shelf
            .lock()
            .map_err(|_| VectorStoreError::LockPoisoned("indexed log"))
    }

    /// Append `vectors[i]` with `entries[i]` for every `i`, then trim the
    /// oldest pairs down to the configured limit.
    pub fn append_batch(
        &self,
        vectors: &[Vec<f32>],
        entries: Vec<IndexedMetadata>,
    ) -> Result<AppendOutcome> {
        if vectors.len() != entries.len() {
            return Err(VectorStoreError::BatchMismatch {
                vectors: vectors.len(),
                entries: entries.len(),
            });
        }
        if vectors.is_empty() {
            let shelf = self.lock()?;
            return Ok(AppendOutcome {
                appended: 0,
                evicted: 0,
                len: shelf.metadata.len(),
            });
        }

        let mut shelf = self.lock()?;
        shelf.index.add(vectors)?;
        shelf.metadata.extend(entries);

        let evicted = shelf.metadata.overflow();
        if evicted > 0 {
            shelf.index.remove_oldest(evicted);
            shelf.metadata.evict_oldest(evicted);
            log::debug!("Evicted {evicted} oldest entries from indexed log");
        }

        let len = shelf.metadata.len();
        debug_assert_eq!(shelf.index.count(), len, "index/metadata misaligned");

        Ok(AppendOutcome {
            appended: vectors.len(),
            evicted,
            len,
        })
    }

    /// Search with a pre-computed query vector. `k` is clamped to the number
    /// of stored vectors; positions that do not resolve to metadata are skipped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchOutcome> {
        let shelf = self.lock()?;
        let total = shelf.index.count();
        if total == 0 {
            return Ok(SearchOutcome::Empty);
        }

        let k = k.min(total);
        let neighbors = shelf.index.search(query, k)?;

        let mut hits = Vec::with_capacity(k);
        for (distance, position) in neighbors.distances.iter().zip(&neighbors.positions) {
            let Some((pos, entry)) = shelf.metadata.resolve(*position) else {
                continue;
            };
            hits.push(SearchHit {
                position: pos,
                distance: *distance,
                entry: entry.clone(),
            });
        }
        Ok(SearchOutcome::Hits(hits))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.lock()?.index.count())
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let shelf = self.lock()?;
        Ok(StoreSnapshot {
            vectors: shelf.index.count(),
            entries: shelf.metadata.len(),
            max_entries: shelf.metadata.max_len(),
            evicted: shelf.metadata.evicted(),
        })
    }

    /// Clone of the stored metadata in position order.
    pub fn entries(&self) -> Result<Vec<IndexedMetadata>> {
        Ok(self.lock()?.metadata.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat_index::FlatL2Index;
    use pretty_assertions::assert_eq;
    use std::time::SystemTime;

    fn batch(ids: std::ops::Range<u64>) -> (Vec<Vec<f32>>, Vec<IndexedMetadata>) {
        let vectors = ids.clone().map(|id| vec![id as f32, 0.0]).collect();
        let entries = ids
            .map(|id| IndexedMetadata::new(id, format!("entry {id}"), SystemTime::now()))
            .collect();
        (vectors, entries)
    }

    #[test]
    fn append_keeps_index_and_metadata_in_lockstep() {
        let log = IndexedLog::new(Box::new(FlatL2Index::new(2)), 4);

        let (v, e) = batch(0..3);
        let first = log.append_batch(&v, e).unwrap();
        assert_eq!(first, AppendOutcome { appended: 3, evicted: 0, len: 3 });

        let (v, e) = batch(3..6);
        let second = log.append_batch(&v, e).unwrap();
        assert_eq!(second, AppendOutcome { appended: 3, evicted: 2, len: 4 });

        let snap = log.snapshot().unwrap();
        assert!(snap.aligned());
        assert_eq!(snap.evicted, 2);
        let ids: Vec<u64> = log.entries().unwrap().iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn search_after_trim_resolves_to_matching_text() {
        let log = IndexedLog::new(Box::new(FlatL2Index::new(2)), 2);
        let (v, e) = batch(0..5);
        log.append_batch(&v, e).unwrap();

        let SearchOutcome::Hits(hits) = log.search(&[4.0, 0.0], 1).unwrap() else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.text, "entry 4");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn search_clamps_k_and_reports_empty() {
        let log = IndexedLog::new(Box::new(FlatL2Index::new(2)), 10);
        assert!(matches!(log.search(&[0.0, 0.0], 5).unwrap(), SearchOutcome::Empty));

        let (v, e) = batch(0..3);
        log.append_batch(&v, e).unwrap();
        let SearchOutcome::Hits(hits) = log.search(&[0.0, 0.0], 1000).unwrap() else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn mismatched_batch_is_rejected_without_mutation() {
        let log = IndexedLog::new(Box::new(FlatL2Index::new(2)), 10);
        let (v, mut e) = batch(0..3);
        e.pop();
        assert!(log.append_batch(&v, e).is_err());
        assert_eq!(log.count().unwrap(), 0);
    }

    #[test]
    fn failed_index_add_leaves_metadata_untouched() {
        let log = IndexedLog::new(Box::new(FlatL2Index::new(2)), 10);
        let entries = vec![IndexedMetadata::new(0, "bad", SystemTime::now())];
        assert!(log.append_batch(&[vec![1.0]], entries).is_err());
        let snap = log.snapshot().unwrap();
        assert_eq!((snap.vectors, snap.entries), (0, 0));
    }
}
