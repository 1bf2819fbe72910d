use crate::error::{Result, VectorStoreError};
use crate::types::{Neighbors, NO_MATCH};
use std::collections::VecDeque;

/// Positional nearest-neighbor index.
///
/// Vectors receive positions in insertion order starting at zero. Removing the
/// oldest `n` vectors shifts every remaining position down by `n`, which keeps
/// positions aligned with a metadata sequence trimmed the same way.
pub trait SimilarityIndex: Send {
    fn dimension(&self) -> usize;

    /// Append vectors, assigning the next positions in order. Either every
    /// vector is added or none is.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Returns exactly `k` slots ordered by ascending distance; slots beyond
    /// the stored count hold `NO_MATCH`.
    fn search(&self, query: &[f32], k: usize) -> Result<Neighbors>;

    fn count(&self) -> usize;

    /// Drop the `n` oldest vectors (all of them if fewer are stored).
    fn remove_oldest(&mut self, n: usize);
}

/// Exact (brute-force) squared-L2 index.
pub struct FlatL2Index {
    dimension: usize,
    vectors: VecDeque<Vec<f32>>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: VecDeque::new(),
        }
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Squared euclidean distance
    pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }
}

impl SimilarityIndex for FlatL2Index {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for vector in vectors {
            self.check_dimension(vector.len())?;
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(VectorStoreError::IndexError(
                    "vector contains non-finite values".to_string(),
                ));
            }
        }
        self.vectors.extend(vectors.iter().cloned());
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Neighbors> {
        self.check_dimension(query.len())?;

        // Brute-force search (O(n), but simple and exact)
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(pos, vector)| (Self::l2_squared(query, vector), pos))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        let mut out = Neighbors {
            distances: Vec::with_capacity(k),
            positions: Vec::with_capacity(k),
        };
        for (distance, pos) in scored {
            out.distances.push(distance);
            out.positions
                .push(i64::try_from(pos).map_err(|e| VectorStoreError::IndexError(e.to_string()))?);
        }
        while out.positions.len() < k {
            out.distances.push(f32::MAX);
            out.positions.push(NO_MATCH);
        }
        Ok(out)
    }

    fn count(&self) -> usize {
        self.vectors.len()
    }

    fn remove_oldest(&mut self, n: usize) {
        let n = n.min(self.vectors.len());
        self.vectors.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_and_search() {
        let mut index = FlatL2Index::new(3);

        index
            .add(&[
                vec![1.0, 0.0, 0.0],
                vec![0.9, 0.1, 0.0],
                vec![0.0, 1.0, 0.0],
            ])
            .unwrap();

        assert_eq!(index.count(), 3);

        let result = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(result.positions, vec![0, 1]);
        assert!(result.distances[0].abs() < 1e-6);
        assert!(result.distances[0] <= result.distances[1]);
    }

    #[test]
    fn pads_missing_slots_with_sentinel() {
        let mut index = FlatL2Index::new(2);
        index.add(&[vec![0.0, 1.0]]).unwrap();

        let result = index.search(&[0.0, 1.0], 3).unwrap();
        assert_eq!(result.positions, vec![0, NO_MATCH, NO_MATCH]);
        assert_eq!(result.distances.len(), 3);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = FlatL2Index::new(3);
        assert!(index.add(&[vec![1.0, 0.0]]).is_err());

        index.add(&[vec![1.0, 0.0, 0.0]]).unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn rejected_batch_leaves_index_untouched() {
        let mut index = FlatL2Index::new(2);
        index.add(&[vec![1.0, 1.0]]).unwrap();

        let err = index.add(&[vec![0.0, 0.0], vec![0.0]]);
        assert!(err.is_err());
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn remove_oldest_shifts_positions() {
        let mut index = FlatL2Index::new(1);
        index.add(&[vec![0.0], vec![10.0], vec![20.0]]).unwrap();

        index.remove_oldest(1);
        assert_eq!(index.count(), 2);

        // The vector that was at position 2 is now at position 1.
        let result = index.search(&[20.0], 1).unwrap();
        assert_eq!(result.positions, vec![1]);

        index.remove_oldest(10);
        assert_eq!(index.count(), 0);
    }
}
