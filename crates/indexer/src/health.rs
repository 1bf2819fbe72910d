use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// Running counters for every pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineHealth {
    pub lines_ingested: u64,
    /// Lines that normalized to an empty key.
    pub lines_skipped: u64,
    pub source_ended: bool,
    pub windows_flushed: u64,
    /// Raw lines drained from the repeat cache.
    pub lines_flushed: u64,
    pub records_flushed: u64,
    /// Records that stand for more than one raw line.
    pub summaries_emitted: u64,
    pub batches_indexed: u64,
    pub records_indexed: u64,
    pub batches_failed: u64,
    pub records_dropped: u64,
    pub entries_evicted: u64,
    pub last_flush: Option<SystemTime>,
    pub last_batch: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl PipelineHealth {
    /// Records handed to the queue but not yet indexed or dropped.
    #[must_use]
    pub const fn in_flight(&self) -> u64 {
        self.records_flushed
            .saturating_sub(self.records_indexed)
            .saturating_sub(self.records_dropped)
    }

    /// The source has ended, every line it produced has left the repeat
    /// cache, and every flushed record has been indexed or dropped.
    #[must_use]
    pub const fn settled(&self) -> bool {
        self.source_ended
            && self.lines_flushed == self.lines_ingested
            && self.records_indexed + self.records_dropped == self.records_flushed
    }
}

/// Shared writer side of the health channel. Cloned into every task.
#[derive(Clone)]
pub(crate) struct HealthHandle {
    tx: Arc<watch::Sender<PipelineHealth>>,
}

impl HealthHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(PipelineHealth::default());
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut PipelineHealth)) {
        self.tx.send_modify(f);
    }

    pub(crate) fn snapshot(&self) -> PipelineHealth {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PipelineHealth> {
        self.tx.subscribe()
    }

    pub(crate) fn record_error(&self, err: impl ToString) {
        let message = err.to_string();
        self.update(|h| h.last_error = Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drained() -> PipelineHealth {
        PipelineHealth {
            lines_ingested: 40,
            source_ended: true,
            lines_flushed: 40,
            records_flushed: 20,
            records_indexed: 18,
            records_dropped: 2,
            ..PipelineHealth::default()
        }
    }

    #[test]
    fn settled_requires_every_stage_to_catch_up() {
        assert!(drained().settled());

        let live = PipelineHealth {
            source_ended: false,
            ..drained()
        };
        assert!(!live.settled());

        let undrained = PipelineHealth {
            lines_flushed: 32,
            ..drained()
        };
        assert!(!undrained.settled());

        let unindexed = PipelineHealth {
            records_indexed: 10,
            ..drained()
        };
        assert!(!unindexed.settled());
        assert_eq!(unindexed.in_flight(), 8);
    }

    #[test]
    fn indexed_ahead_of_flushed_is_not_settled() {
        let health = PipelineHealth {
            records_flushed: 0,
            records_indexed: 16,
            records_dropped: 0,
            ..drained()
        };
        assert_eq!(health.in_flight(), 0);
        assert!(!health.settled());
    }
}
