//! Ram accounting
//!
//! A process-wide [`MemoryBreaker`] tracks the bytes reserved by all running
//! queries. Each query gets a [`RamAccountingContext`] handle which every
//! projector of its chains shares; the bytes reserved through a context are
//! handed back to the breaker when its last handle is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ExecError, ExecResult};

pub struct MemoryBreaker {
    name: String,
    limit: u64,
    used: AtomicU64,
    trips: AtomicU64,
}

impl MemoryBreaker {
    /// A `limit` of 0 disables the ceiling.
    pub fn new(name: impl Into<String>, limit: u64) -> Self {
        Self {
            name: name.into(),
            limit,
            used: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    /// Reserve `bytes` on behalf of `label`. This is the single place where
    /// the ceiling is checked; a reservation that would cross it is rolled
    /// back and reported as [`ExecError::MemoryLimit`].
    pub fn add_estimate(&self, bytes: u64, label: &str) -> ExecResult<u64> {
        let new_used = self.used.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if self.limit > 0 && new_used > self.limit {
            self.used.fetch_sub(bytes, Ordering::SeqCst);
            self.trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "[{}] breaker tripped for [{}]: {} bytes requested, limit {}",
                self.name,
                label,
                new_used,
                self.limit
            );
            return Err(ExecError::MemoryLimit {
                context: label.to_string(),
                used: new_used,
                limit: self.limit,
            });
        }
        Ok(new_used)
    }

    pub fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}

struct ContextInner {
    name: String,
    breaker: Arc<MemoryBreaker>,
    reserved: AtomicU64,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let reserved = self.reserved.load(Ordering::SeqCst);
        if reserved > 0 {
            self.breaker.release(reserved);
        }
    }
}

/// Per-query handle onto the breaker. Cloning is cheap and all clones share
/// the same running total.
#[derive(Clone)]
pub struct RamAccountingContext {
    inner: Arc<ContextInner>,
}

impl RamAccountingContext {
    pub fn new(name: impl Into<String>, breaker: Arc<MemoryBreaker>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                breaker,
                reserved: AtomicU64::new(0),
            }),
        }
    }

    /// A context backed by a private breaker without a ceiling
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(MemoryBreaker::new("unbounded", 0)))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn add_bytes(&self, bytes: u64) -> ExecResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        self.inner.breaker.add_estimate(bytes, &self.inner.name)?;
        self.inner.reserved.fetch_add(bytes, Ordering::SeqCst);
        Ok(())
    }

    pub fn release_bytes(&self, bytes: u64) {
        let released = self
            .inner
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |reserved| {
                Some(reserved.saturating_sub(bytes))
            })
            .map(|previous| previous.min(bytes))
            .unwrap_or(0);
        self.inner.breaker.release(released);
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.reserved.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RamAccountingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamAccountingContext")
            .field("name", &self.inner.name)
            .field("reserved", &self.total_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_trips_and_rolls_back() {
        let breaker = Arc::new(MemoryBreaker::new("query", 100));
        let ctx = RamAccountingContext::new("job-1", Arc::clone(&breaker));

        ctx.add_bytes(60).unwrap();
        let err = ctx.add_bytes(50).unwrap_err();
        assert_eq!(
            err,
            ExecError::MemoryLimit {
                context: "job-1".to_string(),
                used: 110,
                limit: 100
            }
        );
        assert_eq!(breaker.used(), 60);
        assert_eq!(ctx.total_bytes(), 60);
        assert_eq!(breaker.trip_count(), 1);
    }

    #[test]
    fn test_release_on_last_drop() {
        let breaker = Arc::new(MemoryBreaker::new("query", 0));
        let ctx = RamAccountingContext::new("job-2", Arc::clone(&breaker));
        let clone = ctx.clone();

        ctx.add_bytes(40).unwrap();
        clone.add_bytes(10).unwrap();
        assert_eq!(breaker.used(), 50);

        clone.release_bytes(5);
        assert_eq!(breaker.used(), 45);

        drop(ctx);
        assert_eq!(breaker.used(), 45);
        drop(clone);
        assert_eq!(breaker.used(), 0);
    }

    #[test]
    fn test_release_never_underflows() {
        let breaker = Arc::new(MemoryBreaker::new("query", 0));
        let ctx = RamAccountingContext::new("job-3", Arc::clone(&breaker));
        ctx.add_bytes(8).unwrap();
        ctx.release_bytes(100);
        assert_eq!(ctx.total_bytes(), 0);
        assert_eq!(breaker.used(), 0);
    }
}
