#![forbid(unsafe_code)]

//! Store configuration.

/// Configuration for a [`Store`](crate::store::Store).
///
/// Float slots compare by bit pattern for the no-op-write check, so
/// writing `NaN` over `NaN` is a no-op and `-0.0` over `0.0` is a real
/// write. This is not configurable; it is recorded here because the
/// store is where the identity policy lives.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Initial capacity of the batched-delivery flush queue.
    pub flush_queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_queue_capacity: 16,
        }
    }
}

impl StoreConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial flush-queue capacity.
    #[must_use]
    pub fn with_flush_queue_capacity(mut self, capacity: usize) -> Self {
        self.flush_queue_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_default() {
        let config = StoreConfig::new().with_flush_queue_capacity(64);
        assert_eq!(config.flush_queue_capacity, 64);
        assert_eq!(StoreConfig::default().flush_queue_capacity, 16);
    }
}
