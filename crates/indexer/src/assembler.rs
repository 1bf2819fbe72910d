use crate::health::HealthHandle;
use crate::queue::{FlushedRecord, WorkReceiver};
use crate::{IndexerError, Result};
use log::{debug, error, info};
use logsift_vector_store::{AppendOutcome, Embedder, IndexedLog, IndexedMetadata};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct PendingBatch {
    records: Vec<FlushedRecord>,
}

impl PendingBatch {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: FlushedRecord) {
        self.records.push(record);
    }

    fn take(&mut self) -> Vec<FlushedRecord> {
        std::mem::take(&mut self.records)
    }
}

/// Pulls flushed records, embeds them in batches and appends them to the
/// indexed log.
pub(crate) struct BatchAssembler {
    embedder: Arc<dyn Embedder>,
    log: Arc<IndexedLog>,
    batch_size: usize,
    idle_timeout: Duration,
    health: HealthHandle,
}

impl BatchAssembler {
    pub(crate) fn new(
        embedder: Arc<dyn Embedder>,
        log: Arc<IndexedLog>,
        batch_size: usize,
        idle_timeout: Duration,
        health: HealthHandle,
    ) -> Self {
        Self {
            embedder,
            log,
            batch_size: batch_size.max(1),
            idle_timeout,
            health,
        }
    }

    pub(crate) fn spawn(self, rx: WorkReceiver, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(rx, token))
    }

    /// Runs until the queue is closed and empty. Cancellation switches to
    /// draining: partial batches are indexed as soon as the queue is
    /// momentarily empty instead of after the idle timeout.
    async fn run(self, mut rx: WorkReceiver, token: CancellationToken) {
        let mut batch = PendingBatch::default();
        let mut draining = false;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled(), if !draining => {
                    debug!("Batch assembler draining ({} queued)", rx.len());
                    draining = true;
                    if !batch.is_empty() && rx.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
                pulled = time::timeout(self.idle_timeout, rx.recv()) => match pulled {
                    Ok(Some(record)) => {
                        batch.push(record);
                        if batch.len() >= self.batch_size || (draining && rx.is_empty()) {
                            self.flush(&mut batch).await;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        if !batch.is_empty() {
                            debug!("Idle timeout, indexing partial batch of {}", batch.len());
                            self.flush(&mut batch).await;
                        }
                    }
                },
            }
        }

        self.flush(&mut batch).await;
        info!("Batch assembler stopped");
    }

    async fn flush(&self, batch: &mut PendingBatch) {
        if batch.is_empty() {
            return;
        }
        let records = batch.take();
        let size = records.len();
        match self.index_records(records).await {
            Ok(outcome) => {
                self.health.update(|h| {
                    h.batches_indexed += 1;
                    h.records_indexed += outcome.appended as u64;
                    h.entries_evicted += outcome.evicted as u64;
                    h.last_batch = Some(SystemTime::now());
                });
                debug!(
                    "Indexed batch of {} (store {}, evicted {})",
                    outcome.appended, outcome.len, outcome.evicted
                );
            }
            Err(err) => {
                error!("Dropping batch of {size} records: {err}");
                let message = err.to_string();
                self.health.update(|h| {
                    h.batches_failed += 1;
                    h.records_dropped += size as u64;
                    h.last_error = Some(message);
                });
            }
        }
    }

    /// Embed every record in one call, then append vectors and metadata
    /// together.
    pub(crate) async fn index_records(&self, records: Vec<FlushedRecord>) -> Result<AppendOutcome> {
        let texts: Vec<String> = records.iter().map(|r| r.display_text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IndexerError::Other(format!(
                "Embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let entries = records
            .into_iter()
            .map(|r| IndexedMetadata::new(r.sequence_id, r.display_text, r.timestamp))
            .collect();
        Ok(self.log.append_batch(&vectors, entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::work_queue;
    use async_trait::async_trait;
    use logsift_vector_store::{EmbeddingModel, FlatL2Index, VectorStoreError};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        inner: EmbeddingModel,
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl CountingEmbedder {
        fn new(fail_on_call: Option<usize>) -> Self {
            Self {
                inner: EmbeddingModel::stub(8),
                calls: AtomicUsize::new(0),
                fail_on_call,
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> logsift_vector_store::Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(VectorStoreError::EmbeddingError("model unavailable".into()));
            }
            self.inner.embed_batch(texts).await
        }
    }

    fn record(id: u64) -> FlushedRecord {
        FlushedRecord {
            sequence_id: id,
            display_text: format!("line {id}"),
            timestamp: SystemTime::now(),
            repeat_count: 1,
        }
    }

    fn assembler(embedder: Arc<CountingEmbedder>, max: usize) -> (BatchAssembler, Arc<IndexedLog>) {
        let log = Arc::new(IndexedLog::new(Box::new(FlatL2Index::new(8)), max));
        let assembler = BatchAssembler::new(
            embedder,
            log.clone(),
            4,
            Duration::from_secs(2),
            HealthHandle::new(),
        );
        (assembler, log)
    }

    #[tokio::test(start_paused = true)]
    async fn full_batches_embed_once_and_partial_waits_for_idle() {
        let embedder = Arc::new(CountingEmbedder::new(None));
        let (assembler, log) = assembler(embedder.clone(), 100);
        let health = assembler.health.clone();
        let (tx, rx) = work_queue();
        let token = CancellationToken::new();
        let handle = assembler.spawn(rx, token.clone());

        for id in 0..6 {
            tx.push(record(id)).unwrap();
        }
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(log.count().unwrap(), 4);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(log.count().unwrap(), 6);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        drop(tx);
        handle.await.unwrap();
        let snapshot = health.snapshot();
        assert_eq!(snapshot.batches_indexed, 2);
        assert_eq!(snapshot.records_indexed, 6);

        let ids: Vec<u64> = log.entries().unwrap().iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_dropped_and_worker_continues() {
        let embedder = Arc::new(CountingEmbedder::new(Some(0)));
        let (assembler, log) = assembler(embedder.clone(), 100);
        let health = assembler.health.clone();
        let (tx, rx) = work_queue();
        let handle = assembler.spawn(rx, CancellationToken::new());

        for id in 0..4 {
            tx.push(record(id)).unwrap();
        }
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(log.count().unwrap(), 0);

        for id in 4..8 {
            tx.push(record(id)).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let ids: Vec<u64> = log.entries().unwrap().iter().map(|e| e.sequence_id).collect();
        assert_eq!(ids, vec![4, 5, 6, 7]);
        let snapshot = health.snapshot();
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.records_dropped, 4);
        assert!(snapshot.last_error.unwrap().contains("model unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_flushes_partial_batch_without_waiting() {
        let embedder = Arc::new(CountingEmbedder::new(None));
        let (assembler, log) = assembler(embedder, 100);
        let (tx, rx) = work_queue();
        let token = CancellationToken::new();
        let handle = assembler.spawn(rx, token.clone());

        tx.push(record(0)).unwrap();
        tx.push(record(1)).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(log.count().unwrap(), 2);

        tx.push(record(2)).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(log.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn trimming_keeps_newest_entries() {
        let embedder = Arc::new(CountingEmbedder::new(None));
        let (assembler, log) = assembler(embedder, 3);
        let outcome = assembler
            .index_records((0..5).map(record).collect())
            .await
            .unwrap();
        assert_eq!(outcome.evicted, 2);

        let snapshot = log.snapshot().unwrap();
        assert!(snapshot.aligned());
        assert_eq!(snapshot.entries, 3);
        let texts: Vec<String> = log.entries().unwrap().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }
}
