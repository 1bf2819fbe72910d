use crate::health::HealthHandle;
use crate::queue::{FlushedRecord, WorkSender};
use crate::repeat_cache::RepeatCache;
use crate::Result;
use chrono::{DateTime, Local};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const SUMMARY_MARKER: &str = "⏱";

/// `⏱ 2024-11-04 23:58:33 | "systemd: unit failed" repeated 12x`
#[must_use]
pub fn format_summary(flushed_at: &DateTime<Local>, text: &str, count: usize) -> String {
    format!(
        "{SUMMARY_MARKER} {} | \"{text}\" repeated {count}x",
        flushed_at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Turns drained repeat-cache windows into [`FlushedRecord`]s and owns the
/// sequence counter.
#[derive(Debug, Default)]
pub struct WindowFlusher {
    next_id: u64,
}

impl WindowFlusher {
    #[must_use]
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Convert one drained window. Single occurrences pass through verbatim,
    /// repeats become a summary stamped with `flushed_at`.
    pub fn convert(
        &mut self,
        window: HashMap<String, usize>,
        flushed_at: DateTime<Local>,
    ) -> Vec<FlushedRecord> {
        let timestamp = SystemTime::from(flushed_at);
        let mut records = Vec::with_capacity(window.len());
        for (text, count) in window {
            if text.is_empty() || count == 0 {
                continue;
            }
            let display_text = if count == 1 {
                text
            } else {
                format_summary(&flushed_at, &text, count)
            };
            records.push(FlushedRecord {
                sequence_id: self.next_id,
                display_text,
                timestamp,
                repeat_count: count,
            });
            self.next_id += 1;
        }
        records
    }

    #[must_use]
    pub const fn next_sequence_id(&self) -> u64 {
        self.next_id
    }
}

/// Drain the cache once and push every resulting record. Returns the number
/// of records queued.
fn flush_window(
    flusher: &mut WindowFlusher,
    cache: &RepeatCache,
    queue: &WorkSender,
    health: &HealthHandle,
) -> Result<usize> {
    let window = cache.drain()?;
    if window.is_empty() {
        return Ok(0);
    }

    let lines: usize = window.values().sum();
    let records = flusher.convert(window, Local::now());
    let total = records.len();
    let summaries = records.iter().filter(|r| r.repeat_count > 1).count();

    // Counted before the first push so the assembler can never report
    // more indexed records than were flushed.
    health.update(|h| {
        h.windows_flushed += 1;
        h.lines_flushed += lines as u64;
        h.records_flushed += total as u64;
        h.summaries_emitted += summaries as u64;
        h.last_flush = Some(SystemTime::now());
    });
    for (sent, record) in records.into_iter().enumerate() {
        if let Err(err) = queue.push(record) {
            let lost = (total - sent) as u64;
            health.update(|h| h.records_dropped += lost);
            return Err(err);
        }
    }
    debug!("Flushed window: {total} records ({summaries} summaries)");
    Ok(total)
}

/// Flush every `period` until `token` is cancelled, then flush one last
/// time. The queue sender is dropped when the task ends, which is what lets
/// the batch assembler observe end-of-stream.
pub(crate) fn spawn_window_flusher(
    cache: Arc<RepeatCache>,
    queue: WorkSender,
    period: Duration,
    token: CancellationToken,
    health: HealthHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut flusher = WindowFlusher::new();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = flush_window(&mut flusher, &cache, &queue, &health) {
                        error!("Window flush failed: {err}");
                        health.record_error(format!("flush: {err}"));
                    }
                }
            }
        }

        match flush_window(&mut flusher, &cache, &queue, &health) {
            Ok(n) => info!("Final window flush queued {n} records"),
            Err(err) => {
                error!("Final window flush failed: {err}");
                health.record_error(format!("final flush: {err}"));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::work_queue;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 11, 4, 23, 58, 33).unwrap()
    }

    #[test]
    fn single_occurrence_passes_through() {
        let mut flusher = WindowFlusher::new();
        let window = HashMap::from([("kernel: usb reset".to_string(), 1)]);
        let records = flusher.convert(window, fixed_time());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_text, "kernel: usb reset");
        assert_eq!(records[0].repeat_count, 1);
    }

    #[test]
    fn repeats_become_summary() {
        let mut flusher = WindowFlusher::new();
        let window = HashMap::from([("systemd: ollama.service failed".to_string(), 7)]);
        let records = flusher.convert(window, fixed_time());
        assert_eq!(
            records[0].display_text,
            "⏱ 2024-11-04 23:58:33 | \"systemd: ollama.service failed\" repeated 7x"
        );
        assert_eq!(records[0].timestamp, SystemTime::from(fixed_time()));
    }

    #[test]
    fn sequence_ids_increase_across_windows() {
        let mut flusher = WindowFlusher::new();
        let first = flusher.convert(
            HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]),
            fixed_time(),
        );
        let second = flusher.convert(HashMap::from([("a".to_string(), 3)]), fixed_time());

        let mut ids: Vec<u64> = first.iter().map(|r| r.sequence_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(second[0].sequence_id, 2);
        assert_eq!(flusher.next_sequence_id(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_tick_and_once_more_on_cancel() {
        let cache = Arc::new(RepeatCache::new());
        let (tx, mut rx) = work_queue();
        let token = CancellationToken::new();
        let health = HealthHandle::new();
        let handle = spawn_window_flusher(
            cache.clone(),
            tx,
            Duration::from_secs(10),
            token.clone(),
            health.clone(),
        );

        for _ in 0..3 {
            cache.record_line("Nov 04 23:58:33 arch cron[5]: tick").unwrap();
        }
        time::sleep(Duration::from_secs(11)).await;

        let first = rx.recv().await.unwrap();
        assert!(first.display_text.contains("\"cron: tick\" repeated 3x"));

        cache.record_line("late line").unwrap();
        token.cancel();
        handle.await.unwrap();

        let last = rx.recv().await.unwrap();
        assert_eq!(last.display_text, "late line");
        assert!(last.sequence_id > first.sequence_id);
        assert!(rx.recv().await.is_none(), "sender must be dropped after final flush");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.windows_flushed, 2);
        assert_eq!(snapshot.lines_flushed, 4);
        assert_eq!(snapshot.records_flushed, 2);
        assert_eq!(snapshot.summaries_emitted, 1);
    }
}
