use crate::health::HealthHandle;
use crate::repeat_cache::RepeatCache;
use crate::source::LogSource;
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Feed every line of `source` into `cache` until cancellation or end of
/// stream. A failing source is logged and not restarted.
pub(crate) fn spawn_ingest(
    mut source: Box<dyn LogSource>,
    cache: Arc<RepeatCache>,
    token: CancellationToken,
    health: HealthHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = source.describe();
        info!("Ingesting from {name}");

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = source.next_line() => next,
            };

            match next {
                Ok(Some(line)) => match cache.record_line(&line) {
                    Ok(true) => health.update(|h| h.lines_ingested += 1),
                    Ok(false) => health.update(|h| h.lines_skipped += 1),
                    Err(err) => {
                        error!("Dropping line from {name}: {err}");
                        health.record_error(format!("ingest: {err}"));
                    }
                },
                Ok(None) => {
                    info!("Log source {name} reached end of stream");
                    health.update(|h| h.source_ended = true);
                    break;
                }
                Err(err) => {
                    error!("Log source {name} failed: {err}");
                    health.update(|h| {
                        h.source_ended = true;
                        h.last_error = Some(format!("source: {err}"));
                    });
                    break;
                }
            }
        }

        source.shutdown().await;
    })
}
