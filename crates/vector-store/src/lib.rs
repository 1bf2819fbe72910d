//! # Logsift Vector Store
//!
//! Embedding and nearest-neighbor storage for deduplicated log records.
//!
//! ## Architecture
//!
//! ```text
//! texts[]
//!     │
//!     ├──> Embedder (ONNX MiniLM / stub)
//!     │      └─> Vector[384]
//!     │
//!     └──> IndexedLog (one lock)
//!            ├─> SimilarityIndex   position p ─┐
//!            └─> MetadataStore     position p ─┘ same text
//! ```
//!
//! Both halves of the [`IndexedLog`] are bounded together: when the metadata
//! store exceeds its limit, the oldest vectors are removed in the same
//! critical section so positions stay aligned.
//!
//! ## Example
//!
//! ```no_run
//! use logsift_vector_store::{Embedder, EmbeddingModel, FlatL2Index, IndexedLog, IndexedMetadata};
//! use std::time::SystemTime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let model = EmbeddingModel::stub(384);
//!     let log = IndexedLog::new(Box::new(FlatL2Index::new(384)), 100_000);
//!
//!     let texts = vec!["systemd: ollama.service failed".to_string()];
//!     let vectors = model.embed_batch(&texts).await?;
//!     log.append_batch(&vectors, vec![IndexedMetadata::new(0, &texts[0], SystemTime::now())])?;
//!
//!     let query = model.embed("ollama failure").await?;
//!     let outcome = log.search(&query, 5)?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod flat_index;
mod metadata;
mod store;
mod types;

pub use embeddings::{model_dir, Embedder, EmbeddingMode, EmbeddingModel, DEFAULT_MODEL_ID};
pub use error::{Result, VectorStoreError};
pub use flat_index::{FlatL2Index, SimilarityIndex};
pub use metadata::MetadataStore;
pub use store::{AppendOutcome, IndexedLog};
pub use types::{IndexedMetadata, Neighbors, SearchHit, SearchOutcome, StoreSnapshot, NO_MATCH};
