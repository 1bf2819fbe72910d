//! Hand-off between the window flusher and the batch assembler.
//!
//! The queue is deliberately unbounded: the flusher never blocks and never
//! drops a record, and if the embedder falls behind the backlog grows in
//! memory instead. A bounded queue would have to pick between stalling the
//! flusher (and with it the repeat cache) and discarding records.

use crate::{IndexerError, Result};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// One output record of a flush window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedRecord {
    /// Strictly increasing over the process lifetime; gaps are allowed.
    pub sequence_id: u64,
    pub display_text: String,
    /// Wall-clock time of the flush that produced this record.
    pub timestamp: SystemTime,
    /// Raw lines this record stands for.
    pub repeat_count: usize,
}

#[derive(Clone)]
pub struct WorkSender {
    tx: mpsc::UnboundedSender<FlushedRecord>,
}

pub struct WorkReceiver {
    rx: mpsc::UnboundedReceiver<FlushedRecord>,
}

#[must_use]
pub fn work_queue() -> (WorkSender, WorkReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkSender { tx }, WorkReceiver { rx })
}

impl WorkSender {
    pub fn push(&self, record: FlushedRecord) -> Result<()> {
        self.tx.send(record).map_err(|_| IndexerError::QueueClosed)
    }
}

impl WorkReceiver {
    /// Next record in insertion order; `None` once every sender is gone and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<FlushedRecord> {
        self.rx.recv().await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: u64) -> FlushedRecord {
        FlushedRecord {
            sequence_id: id,
            display_text: format!("r{id}"),
            timestamp: SystemTime::now(),
            repeat_count: 1,
        }
    }

    #[tokio::test]
    async fn preserves_order_and_closes_after_senders_drop() {
        let (tx, mut rx) = work_queue();
        let tx2 = tx.clone();
        tx.push(record(1)).unwrap();
        tx2.push(record(2)).unwrap();
        tx.push(record(3)).unwrap();
        drop(tx);
        drop(tx2);

        assert_eq!(rx.len(), 3);
        let mut ids = Vec::new();
        while let Some(r) = rx.recv().await {
            ids.push(r.sequence_id);
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn push_after_receiver_drop_fails() {
        let (tx, rx) = work_queue();
        drop(rx);
        assert!(matches!(tx.push(record(0)), Err(IndexerError::QueueClosed)));
    }
}
