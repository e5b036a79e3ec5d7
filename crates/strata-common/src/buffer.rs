//! Shared full-block buffer pool
//!
//! Full-block writes and full-block stream frames check a buffer out of the
//! pool and hand it back after the data is consumed. Partial-size buffers are
//! never pooled. Returning takes the buffer by value, so one checkout can be
//! returned at most once.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool statistics
#[derive(Debug, Default)]
pub struct PoolStats {
    pub checkouts: AtomicU64,
    pub returns: AtomicU64,
    pub allocations: AtomicU64,
    pub rejected: AtomicU64,
}

/// Process-wide pool of `block_size` buffers
#[derive(Debug)]
pub struct BufferPool {
    block_size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
    stats: PoolStats,
}

impl BufferPool {
    /// Create a pool of `block_size` buffers retaining at most `capacity` idle ones
    #[must_use]
    pub fn new(block_size: usize, capacity: usize) -> Self {
        Self {
            block_size,
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
            stats: PoolStats::default(),
        }
    }

    /// Size of a pooled buffer
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Check out a buffer of exactly `block_size` bytes
    pub fn get(&self) -> Vec<u8> {
        self.stats.checkouts.fetch_add(1, Ordering::Relaxed);
        if let Some(buf) = self.free.lock().pop() {
            return buf;
        }
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        vec![0u8; self.block_size]
    }

    /// Return a buffer previously checked out
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() < self.block_size {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.stats.returns.fetch_add(1, Ordering::Relaxed);
        buf.resize(self.block_size, 0);
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Buffers checked out and not yet returned
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.stats
            .checkouts
            .load(Ordering::Relaxed)
            .saturating_sub(self.stats.returns.load(Ordering::Relaxed))
    }

    #[must_use]
    pub const fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
