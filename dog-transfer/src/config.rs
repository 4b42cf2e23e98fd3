use std::sync::Arc;
use std::time::Duration;

use crate::{TransferError, TransferResult};

/// Function returning the host's recommended parallelism
pub type ConcurrencyHint = Arc<dyn Fn() -> usize + Send + Sync>;

/// Global cap on transfers in progress
#[derive(Clone)]
pub enum ConcurrencyLimit {
    /// Fixed number of slots
    Fixed(usize),
    /// Re-queried at every admission decision
    Dynamic(ConcurrencyHint),
}

impl ConcurrencyLimit {
    /// Follow the available hardware parallelism
    pub fn dynamic() -> Self {
        Self::Dynamic(Arc::new(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }))
    }

    /// Follow a custom hint function
    pub fn dynamic_with<F>(hint: F) -> Self
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(hint))
    }

    /// Current slot count, never below one
    pub fn resolve(&self) -> usize {
        match self {
            Self::Fixed(n) => (*n).max(1),
            Self::Dynamic(hint) => hint().max(1),
        }
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self::Fixed(4)
    }
}

impl std::fmt::Debug for ConcurrencyLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// Configuration for the transfer manager
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum transfers in progress at once
    pub concurrency: ConcurrencyLimit,

    /// Size of one block of I/O
    pub block_size: u64,

    /// Blocks one transfer may run in parallel (further bounded by `concurrency`)
    pub max_blocks_per_transfer: usize,

    /// Transient failures a record may retry before it fails
    pub max_retries: u32,

    /// Base retry backoff duration
    pub base_retry_backoff: Duration,

    /// Maximum retry backoff duration
    pub max_retry_backoff: Duration,

    /// Compare downloaded content against the remote SHA-256 when one is known
    pub verify_checksums: bool,

    /// Buffer size of the broadcast event channel
    pub event_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyLimit::default(),
            block_size: 4 * 1024 * 1024, // 4MB
            max_blocks_per_transfer: 4,
            max_retries: 3,
            base_retry_backoff: Duration::from_millis(200),
            max_retry_backoff: Duration::from_secs(30),
            verify_checksums: true,
            event_capacity: 1024,
        }
    }
}

impl TransferConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `DOG_TRANSFER_*` environment variables.
    ///
    /// `DOG_TRANSFER_MAX_CONCURRENT` accepts a number or `dynamic`.
    pub fn from_env() -> TransferResult<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("DOG_TRANSFER_MAX_CONCURRENT") {
            config.concurrency = if value.eq_ignore_ascii_case("dynamic") {
                ConcurrencyLimit::dynamic()
            } else {
                ConcurrencyLimit::Fixed(parse_env("DOG_TRANSFER_MAX_CONCURRENT", &value)?)
            };
        }
        if let Ok(value) = std::env::var("DOG_TRANSFER_BLOCK_SIZE") {
            config.block_size = parse_env("DOG_TRANSFER_BLOCK_SIZE", &value)?;
        }
        if let Ok(value) = std::env::var("DOG_TRANSFER_MAX_BLOCKS") {
            config.max_blocks_per_transfer = parse_env("DOG_TRANSFER_MAX_BLOCKS", &value)?;
        }
        if let Ok(value) = std::env::var("DOG_TRANSFER_MAX_RETRIES") {
            config.max_retries = parse_env("DOG_TRANSFER_MAX_RETRIES", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.block_size == 0 {
            return Err(TransferError::Config("block_size must be positive".into()));
        }
        if self.max_blocks_per_transfer == 0 {
            return Err(TransferError::Config(
                "max_blocks_per_transfer must be positive".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(TransferError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn with_concurrency(mut self, limit: ConcurrencyLimit) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn with_max_concurrent(self, n: usize) -> Self {
        self.with_concurrency(ConcurrencyLimit::Fixed(n))
    }

    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_max_blocks_per_transfer(mut self, n: usize) -> Self {
        self.max_blocks_per_transfer = n;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_retry_backoff = base;
        self.max_retry_backoff = max;
        self
    }

    pub fn without_checksums(mut self) -> Self {
        self.verify_checksums = false;
        self
    }

    /// Backoff before retry number `attempt` (1-based), exponential and capped
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_retry_backoff
            .saturating_mul(factor)
            .min(self.max_retry_backoff)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> TransferResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TransferError::Config(format!("{} has invalid value {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_cap_is_four() {
        assert_eq!(TransferConfig::default().concurrency.resolve(), 4);
    }

    #[test]
    fn dynamic_limit_is_requeried() {
        let slots = Arc::new(AtomicUsize::new(2));
        let hint = slots.clone();
        let limit = ConcurrencyLimit::dynamic_with(move || hint.load(Ordering::SeqCst));

        assert_eq!(limit.resolve(), 2);
        slots.store(6, Ordering::SeqCst);
        assert_eq!(limit.resolve(), 6);
        slots.store(0, Ordering::SeqCst);
        assert_eq!(limit.resolve(), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = TransferConfig::default()
            .with_retry_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(350));
        assert_eq!(config.retry_backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let config = TransferConfig::default().with_block_size(0);
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));
    }
}
