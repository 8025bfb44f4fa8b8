use std::time::Duration;

pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 64;
/// Roughly an 800x600 image.
pub const DEFAULT_DECODING_SIZE_CONSTRAINT: u64 = 480_000;
pub const DEFAULT_MIN_WORKERS: usize = 1;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_WORKER_KEEP_ALIVE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct LoaderConfig {
    /// Maximum number of decoded items kept in memory.
    #[builder(default = "DEFAULT_MAX_MEMORY_ENTRIES")]
    pub max_memory_entries: usize,
    /// Budget handed to the decoder, usually in pixels.
    #[builder(default = "DEFAULT_DECODING_SIZE_CONSTRAINT")]
    pub decoding_size_constraint: u64,
    /// Worker threads kept alive even when idle.
    #[builder(default = "DEFAULT_MIN_WORKERS")]
    pub min_workers: usize,
    /// Upper bound on concurrent jobs.
    #[builder(default = "DEFAULT_MAX_WORKERS")]
    pub max_workers: usize,
    /// How long a worker above the minimum waits for work before exiting.
    #[builder(default = "DEFAULT_WORKER_KEEP_ALIVE")]
    pub worker_keep_alive: Duration,
    /// If set, each network fetch must complete within this long.
    #[builder(default)]
    pub fetch_timeout: Option<Duration>,
}

impl LoaderConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_memory_entries == Some(0) {
            return Err("max_memory_entries must be at least 1".into());
        }
        if self.min_workers == Some(0) {
            return Err("min_workers must be at least 1".into());
        }
        let min = self.min_workers.unwrap_or(DEFAULT_MIN_WORKERS);
        let max = self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS);
        if max < min {
            return Err(format!(
                "max_workers ({}) must not be less than min_workers ({})",
                max, min
            ));
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> LoaderConfig {
        LoaderConfig {
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
            decoding_size_constraint: DEFAULT_DECODING_SIZE_CONSTRAINT,
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            worker_keep_alive: DEFAULT_WORKER_KEEP_ALIVE,
            fetch_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let built = LoaderConfigBuilder::default()
            .build()
            .expect("Should build");
        let default = LoaderConfig::default();
        assert_eq!(built.max_memory_entries, 64);
        assert_eq!(built.decoding_size_constraint, 480_000);
        assert_eq!(built.min_workers, default.min_workers);
        assert_eq!(built.max_workers, default.max_workers);
        assert_eq!(built.worker_keep_alive, Duration::from_secs(10));
        assert_eq!(built.fetch_timeout, None);
    }

    #[test]
    fn test_validation() {
        assert!(LoaderConfigBuilder::default()
            .max_memory_entries(0)
            .build()
            .is_err());
        assert!(LoaderConfigBuilder::default().min_workers(0).build().is_err());
        assert!(LoaderConfigBuilder::default()
            .min_workers(3)
            .max_workers(2)
            .build()
            .is_err());

        let cfg = LoaderConfigBuilder::default()
            .max_memory_entries(2)
            .max_workers(1)
            .fetch_timeout(Some(Duration::from_secs(3)))
            .build()
            .expect("Should build");
        assert_eq!(cfg.max_workers, 1);
        assert_eq!(cfg.fetch_timeout, Some(Duration::from_secs(3)));
    }
}
