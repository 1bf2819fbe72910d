use crate::{IndexerError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_K: usize = 5;
pub const DEFAULT_MAX_METADATA_LEN: usize = 100_000;

/// Tunables for the whole pipeline.
///
/// Resolution order: defaults, then an optional TOML file, then `LOGSIFT_*`
/// environment variables. The CLI applies its own flags last.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Vector length agreed between the embedder and the index.
    pub embedding_dim: usize,
    pub batch_size: usize,
    pub default_k: usize,
    pub flush_interval_ms: u64,
    /// Idle wait after which a partial batch is indexed.
    pub idle_timeout_ms: u64,
    pub max_metadata_len: usize,
    /// Per-stage bound on how long shutdown waits for a task.
    pub shutdown_grace_ms: u64,
    pub warmup_ms: u64,
    pub source_command: Vec<String>,
    /// How long the source command gets to exit after SIGTERM. Must stay
    /// below `shutdown_grace_ms` so the ingest stage ends on its own.
    pub source_kill_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            batch_size: DEFAULT_BATCH_SIZE,
            default_k: DEFAULT_K,
            flush_interval_ms: 10_000,
            idle_timeout_ms: 2_000,
            max_metadata_len: DEFAULT_MAX_METADATA_LEN,
            shutdown_grace_ms: 2_000,
            warmup_ms: 5_000,
            source_command: vec![
                "journalctl".to_string(),
                "-f".to_string(),
                "-o".to_string(),
                "short".to_string(),
            ],
            source_kill_timeout_ms: 1_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, overlaid with `path` (if any) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `LOGSIFT_*` overrides from `lookup`. Unparseable values are
    /// reported and ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "LOGSIFT_EMBEDDING_DIM", &mut self.embedding_dim);
        override_from(&lookup, "LOGSIFT_BATCH_SIZE", &mut self.batch_size);
        override_from(&lookup, "LOGSIFT_DEFAULT_K", &mut self.default_k);
        override_from(&lookup, "LOGSIFT_FLUSH_INTERVAL_MS", &mut self.flush_interval_ms);
        override_from(&lookup, "LOGSIFT_IDLE_TIMEOUT_MS", &mut self.idle_timeout_ms);
        override_from(&lookup, "LOGSIFT_MAX_METADATA_LEN", &mut self.max_metadata_len);
        override_from(&lookup, "LOGSIFT_SHUTDOWN_GRACE_MS", &mut self.shutdown_grace_ms);
        override_from(&lookup, "LOGSIFT_WARMUP_MS", &mut self.warmup_ms);
        override_from(
            &lookup,
            "LOGSIFT_SOURCE_KILL_TIMEOUT_MS",
            &mut self.source_kill_timeout_ms,
        );
        if let Some(raw) = lookup("LOGSIFT_SOURCE_COMMAND") {
            let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
            if argv.is_empty() {
                log::warn!("Ignoring empty LOGSIFT_SOURCE_COMMAND");
            } else {
                self.source_command = argv;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embedding_dim", self.embedding_dim as u64),
            ("batch_size", self.batch_size as u64),
            ("default_k", self.default_k as u64),
            ("flush_interval_ms", self.flush_interval_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("max_metadata_len", self.max_metadata_len as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IndexerError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.source_kill_timeout_ms >= self.shutdown_grace_ms {
            return Err(IndexerError::InvalidConfig(format!(
                "source_kill_timeout_ms ({}) must be less than shutdown_grace_ms ({})",
                self.source_kill_timeout_ms, self.shutdown_grace_ms
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    #[must_use]
    pub const fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    #[must_use]
    pub const fn source_kill_timeout(&self) -> Duration {
        Duration::from_millis(self.source_kill_timeout_ms)
    }
}

fn override_from<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => log::warn!("Ignoring invalid {key}={raw:?}"),
    }
}
