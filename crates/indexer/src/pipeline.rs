use crate::assembler::BatchAssembler;
use crate::config::PipelineConfig;
use crate::flusher::spawn_window_flusher;
use crate::health::{HealthHandle, PipelineHealth};
use crate::ingest::spawn_ingest;
use crate::query::{DisplayMode, QueryEngine};
use crate::queue::work_queue;
use crate::repeat_cache::RepeatCache;
use crate::source::LogSource;
use crate::{IndexerError, Result};
use log::{info, warn};
use logsift_vector_store::{
    Embedder, FlatL2Index, IndexedLog, SimilarityIndex, StoreSnapshot,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// How a background task ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    Completed,
    /// Still running when its grace period ran out.
    Aborted,
    Panicked,
}

impl fmt::Display for TaskExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted after grace period",
            Self::Panicked => "panicked",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub ingest: TaskExit,
    pub flusher: TaskExit,
    pub assembler: TaskExit,
    pub health: PipelineHealth,
}

impl ShutdownReport {
    #[must_use]
    pub fn clean(&self) -> bool {
        [self.ingest, self.flusher, self.assembler]
            .iter()
            .all(|exit| *exit == TaskExit::Completed)
    }
}

struct Stage {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Stages {
    ingest: Stage,
    flusher: Stage,
    assembler: Stage,
}

impl Stage {
    async fn stop(self, name: &str, grace: Duration) -> TaskExit {
        self.token.cancel();
        let abort = self.handle.abort_handle();
        let exit = match time::timeout(grace, self.handle).await {
            Ok(Ok(())) => TaskExit::Completed,
            Ok(Err(err)) if err.is_panic() => TaskExit::Panicked,
            Ok(Err(_)) => TaskExit::Aborted,
            Err(_) => {
                abort.abort();
                TaskExit::Aborted
            }
        };
        if exit == TaskExit::Completed {
            info!("{name} task {exit}");
        } else {
            warn!("{name} task {exit}");
        }
        exit
    }
}

/// Owns the repeat cache, the indexed log and the three background tasks
/// (ingestion, window flusher, batch assembler).
///
/// Dropping a running pipeline cancels every task without waiting for the
/// final flush; call [`Pipeline::shutdown`] for an orderly stop.
pub struct Pipeline {
    config: PipelineConfig,
    cache: Arc<RepeatCache>,
    log: Arc<IndexedLog>,
    query: QueryEngine,
    health: HealthHandle,
    root: CancellationToken,
    stages: Option<Stages>,
}

impl Pipeline {
    /// Start with an empty in-memory flat L2 index.
    pub fn start(
        config: PipelineConfig,
        source: Box<dyn LogSource>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let index = Box::new(FlatL2Index::new(config.embedding_dim));
        Self::start_with_index(config, source, embedder, index)
    }

    /// Validate the wiring, then spawn the background tasks. Nothing is
    /// spawned when validation fails. Must be called inside a tokio runtime.
    pub fn start_with_index(
        config: PipelineConfig,
        source: Box<dyn LogSource>,
        embedder: Arc<dyn Embedder>,
        index: Box<dyn SimilarityIndex>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.embedding_dim {
            return Err(IndexerError::DimensionMismatch {
                expected: config.embedding_dim,
                actual: embedder.dimension(),
                source_name: "embedder",
            });
        }
        if index.dimension() != config.embedding_dim {
            return Err(IndexerError::DimensionMismatch {
                expected: config.embedding_dim,
                actual: index.dimension(),
                source_name: "similarity index",
            });
        }
        if index.count() != 0 {
            return Err(IndexerError::InvalidConfig(format!(
                "similarity index must start empty, found {} vectors",
                index.count()
            )));
        }

        let health = HealthHandle::new();
        let cache = Arc::new(RepeatCache::new());
        let log = Arc::new(IndexedLog::new(index, config.max_metadata_len));
        let query = QueryEngine::new(embedder.clone(), log.clone());
        let (work_tx, work_rx) = work_queue();

        let root = CancellationToken::new();
        let ingest_token = root.child_token();
        let flusher_token = root.child_token();
        let assembler_token = root.child_token();

        let ingest = Stage {
            handle: spawn_ingest(source, cache.clone(), ingest_token.clone(), health.clone()),
            token: ingest_token,
        };
        let flusher = Stage {
            handle: spawn_window_flusher(
                cache.clone(),
                work_tx,
                config.flush_interval(),
                flusher_token.clone(),
                health.clone(),
            ),
            token: flusher_token,
        };
        let assembler = Stage {
            handle: BatchAssembler::new(
                embedder,
                log.clone(),
                config.batch_size,
                config.idle_timeout(),
                health.clone(),
            )
            .spawn(work_rx, assembler_token.clone()),
            token: assembler_token,
        };

        info!(
            "Pipeline started (dim {}, batch {}, flush every {}ms, keep {} entries)",
            config.embedding_dim,
            config.batch_size,
            config.flush_interval_ms,
            config.max_metadata_len
        );

        Ok(Self {
            config,
            cache,
            log,
            query,
            health,
            root,
            stages: Some(Stages {
                ingest,
                flusher,
                assembler,
            }),
        })
    }

    pub async fn search(&self, query: &str, k: i64, mode: DisplayMode) -> Vec<String> {
        self.query.search(query, k, mode).await
    }

    /// Wait until [`PipelineHealth::settled`] holds or `limit` elapses.
    /// Returns whether the pipeline settled. With no limit this only
    /// returns once a finite source has been fully indexed.
    pub async fn wait_until_settled(&self, limit: Option<Duration>) -> bool {
        let mut health = self.health.subscribe();
        let deadline = async {
            match limit {
                Some(limit) => time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            if health.borrow_and_update().settled() {
                return true;
            }
            tokio::select! {
                () = &mut deadline => return false,
                changed = health.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn health(&self) -> PipelineHealth {
        self.health.snapshot()
    }

    #[must_use]
    pub fn subscribe_health(&self) -> watch::Receiver<PipelineHealth> {
        self.health.subscribe()
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(self.log.snapshot()?)
    }

    /// `(distinct keys, raw lines)` waiting for the next flush.
    pub fn pending_window(&self) -> Result<(usize, usize)> {
        self.cache.pending()
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Parent of every task token. Cancelling it stops all tasks at once,
    /// with no ordering between the final flush and the final batch.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Stop in dependency order: ingestion first, then the flusher (which
    /// drains the cache one last time and closes the queue), then the
    /// assembler (which indexes whatever is left). Each stage gets
    /// `shutdown_grace` before it is aborted.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let grace = self.config.shutdown_grace();
        info!("Shutting down pipeline");

        let (ingest, flusher, assembler) = match self.stages.take() {
            Some(stages) => (
                stages.ingest.stop("ingest", grace).await,
                stages.flusher.stop("flusher", grace).await,
                stages.assembler.stop("assembler", grace).await,
            ),
            None => (TaskExit::Completed, TaskExit::Completed, TaskExit::Completed),
        };
        self.root.cancel();

        let report = ShutdownReport {
            ingest,
            flusher,
            assembler,
            health: self.health.snapshot(),
        };
        info!(
            "Pipeline stopped: {} lines ingested, {} records indexed, {} dropped",
            report.health.lines_ingested, report.health.records_indexed, report.health.records_dropped
        );
        report
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
