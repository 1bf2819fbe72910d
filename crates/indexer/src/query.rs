use logsift_vector_store::{Embedder, IndexedLog, SearchHit, SearchOutcome};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const EMPTY_QUERY: &str = "Empty query provided.";
pub const INVALID_K: &str = "Invalid k value. Must be positive.";
pub const EMPTY_INDEX: &str = "No logs indexed yet. Please wait for data to accumulate.";
pub const NO_RESULTS: &str = "No matching results found.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Stored text only.
    Raw,
    /// `<unix ts> | dist=<d> | <text>`
    #[default]
    Pretty,
}

impl DisplayMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Pretty => "pretty",
        }
    }

    fn render(self, hit: &SearchHit) -> String {
        match self {
            Self::Raw => hit.entry.text.clone(),
            Self::Pretty => format!(
                "{:.3} | dist={:.3} | {}",
                hit.entry.unix_seconds(),
                hit.distance,
                hit.entry.text
            ),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown display mode '{other}' (expected raw or pretty)")),
        }
    }
}

/// Read side of the indexed log.
#[derive(Clone)]
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    log: Arc<IndexedLog>,
}

impl QueryEngine {
    pub fn new(embedder: Arc<dyn Embedder>, log: Arc<IndexedLog>) -> Self {
        Self { embedder, log }
    }

    /// Nearest stored records to `query`, rendered for display.
    ///
    /// Never fails: validation problems, an empty index and search errors all
    /// come back as a single human-readable line.
    pub async fn search(&self, query: &str, k: i64, mode: DisplayMode) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() {
            return vec![EMPTY_QUERY.to_string()];
        }
        let Ok(k) = usize::try_from(k) else {
            return vec![INVALID_K.to_string()];
        };
        if k == 0 {
            return vec![INVALID_K.to_string()];
        }

        match self.log.count() {
            Ok(0) => return vec![EMPTY_INDEX.to_string()],
            Ok(_) => {}
            Err(err) => return vec![format!("Search error: {err}")],
        }

        let vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(err) => {
                log::warn!("Query embedding failed: {err}");
                return vec![format!("Search error: {err}")];
            }
        };

        match self.log.search(&vector, k) {
            Ok(SearchOutcome::Empty) => vec![EMPTY_INDEX.to_string()],
            Ok(SearchOutcome::Hits(hits)) if hits.is_empty() => vec![NO_RESULTS.to_string()],
            Ok(SearchOutcome::Hits(hits)) => hits.iter().map(|hit| mode.render(hit)).collect(),
            Err(err) => {
                log::warn!("Similarity search failed: {err}");
                vec![format!("Search error: {err}")]
            }
        }
    }
}
