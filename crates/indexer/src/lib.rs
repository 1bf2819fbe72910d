//! # Logsift Indexer
//!
//! Streaming deduplication and semantic indexing of log lines.
//!
//! ## Pipeline
//!
//! ```text
//! Log source (journalctl / stdin / file)
//!     │
//!     ├──> Ingestion: normalize + count
//!     │      └─> RepeatCache (one window)
//!     │
//!     ├──> Window flusher (every flush interval)
//!     │      └─> FlushedRecord, "… repeated Nx" summaries
//!     │
//!     ├──> Batch assembler (batch size / idle timeout)
//!     │      └─> Embedder → IndexedLog (index + metadata, trimmed in lockstep)
//!     │
//!     └──> QueryEngine
//!            └─> nearest records, raw or pretty
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use logsift_indexer::{DisplayMode, Pipeline, PipelineConfig, ReaderSource};
//! use logsift_vector_store::EmbeddingModel;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load(None)?;
//!     let embedder = Arc::new(EmbeddingModel::stub(config.embedding_dim));
//!     let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//!     let pipeline = Pipeline::start(
//!         config,
//!         Box::new(ReaderSource::new("stdin", stdin)),
//!         embedder,
//!     )?;
//!
//!     for line in pipeline.search("disk full", 5, DisplayMode::Pretty).await {
//!         println!("{line}");
//!     }
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

mod assembler;
mod config;
mod error;
mod flusher;
mod health;
mod ingest;
mod normalize;
mod pipeline;
mod query;
mod queue;
mod repeat_cache;
mod source;

pub use config::{
    PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_DIM, DEFAULT_K, DEFAULT_MAX_METADATA_LEN,
};
pub use error::{IndexerError, Result};
pub use flusher::{format_summary, WindowFlusher, SUMMARY_MARKER};
pub use health::PipelineHealth;
pub use normalize::normalize_line;
pub use pipeline::{Pipeline, ShutdownReport, TaskExit};
pub use query::{DisplayMode, QueryEngine, EMPTY_INDEX, EMPTY_QUERY, INVALID_K, NO_RESULTS};
pub use queue::{work_queue, FlushedRecord, WorkReceiver, WorkSender};
pub use repeat_cache::RepeatCache;
pub use source::{CommandSource, LogSource, ReaderSource};
