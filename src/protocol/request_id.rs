//! Correlation ids for outgoing Dubbo requests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

/// Monotonic source of request ids.
///
/// Cloning shares the counter. Production code uses [`RequestIdGenerator::global`];
/// tests build their own so assertions do not depend on test ordering.
#[derive(Debug, Clone, Default)]
pub struct RequestIdGenerator {
    next: Arc<AtomicI64>,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: Arc::new(AtomicI64::new(first)),
        }
    }

    /// The process-wide generator, created on first use.
    pub fn global() -> &'static RequestIdGenerator {
        static GLOBAL: OnceLock<RequestIdGenerator> = OnceLock::new();
        GLOBAL.get_or_init(RequestIdGenerator::new)
    }

    /// Take the next id. Relaxed ordering is enough since only uniqueness matters.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
