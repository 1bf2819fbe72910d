use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Descriptor of one indexed vector. Position `p` in the metadata store
/// describes the vector at position `p` in the similarity index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedMetadata {
    pub sequence_id: u64,
    pub text: String,
    #[serde(serialize_with = "serialize_unix_seconds")]
    pub timestamp: SystemTime,
}

impl IndexedMetadata {
    pub fn new(sequence_id: u64, text: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            sequence_id,
            text: text.into(),
            timestamp,
        }
    }

    /// Seconds since the unix epoch, with sub-second precision.
    #[must_use]
    pub fn unix_seconds(&self) -> f64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
    }
}

fn serialize_unix_seconds<S>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let secs = ts
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    serializer.serialize_f64(secs)
}

/// Raw nearest-neighbor answer: parallel arrays sorted by ascending distance.
/// Slots without a neighbor carry `NO_MATCH` as position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub distances: Vec<f32>,
    pub positions: Vec<i64>,
}

pub const NO_MATCH: i64 = -1;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub position: usize,
    pub distance: f32,
    pub entry: IndexedMetadata,
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// The index holds no vectors yet.
    Empty,
    Hits(Vec<SearchHit>),
}

/// Point-in-time view of the index/metadata pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    pub vectors: usize,
    pub entries: usize,
    pub max_entries: usize,
    pub evicted: u64,
}

impl StoreSnapshot {
    #[must_use]
    pub const fn aligned(&self) -> bool {
        self.vectors == self.entries
    }
}
