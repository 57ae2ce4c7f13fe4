//! Port Allocator.
//!
//! Hands out non-colliding ephemeral ports for worker readiness endpoints
//! and container port mappings. Allocation is serialized behind a
//! [`tokio::sync::Mutex`] so concurrent callers never race on the same
//! candidate port.

use std::net::{TcpListener, SocketAddr};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ExecError, ExecResult};

/// Default ephemeral port range, per IANA recommendation.
pub const DEFAULT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

/// Serialized allocator over a port range. Reservation is purely in-memory
/// bookkeeping plus a bind-test; release is advisory (it just forgets the
/// port, it does not hold the socket open).
#[derive(Clone)]
pub struct PortAllocator {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    range: std::ops::RangeInclusive<u16>,
    reserved: std::collections::HashSet<u16>,
}

impl PortAllocator {
    pub fn new(range: std::ops::RangeInclusive<u16>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                range,
                reserved: std::collections::HashSet::new(),
            })),
        }
    }

    /// Allocate `count` distinct ports, each verified bindable at the time
    /// of allocation. Fails with [`ExecError::PortExhaustion`] if the range
    /// is exhausted before `count` ports are found.
    pub async fn allocate(&self, count: usize) -> ExecResult<Vec<u16>> {
        let mut guard = self.inner.lock().await;
        let start = *guard.range.start();
        let end = *guard.range.end();
        let mut found = Vec::with_capacity(count);

        for candidate in guard.range.clone() {
            if found.len() == count {
                break;
            }
            if guard.reserved.contains(&candidate) {
                continue;
            }
            if bind_test(candidate) {
                guard.reserved.insert(candidate);
                found.push(candidate);
            }
        }

        if found.len() < count {
            for p in &found {
                guard.reserved.remove(p);
            }
            return Err(ExecError::PortExhaustion { start, end });
        }

        tracing::debug!(ports = ?found, "allocated ports");
        Ok(found)
    }

    /// Release previously-allocated ports back to the pool. Releasing a
    /// port that was never reserved is a no-op.
    pub async fn release(&self, ports: &[u16]) {
        let mut guard = self.inner.lock().await;
        for p in ports {
            guard.reserved.remove(p);
        }
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE)
    }
}

fn bind_test(port: u16) -> bool {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    TcpListener::bind(addr).is_ok()
}

/// Convenience: allocate `count` ports from the default ephemeral range
/// using a fresh, one-shot allocator.
pub async fn allocate_ports(count: usize) -> ExecResult<Vec<u16>> {
    PortAllocator::default().allocate(count).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_distinct_ports() {
        let allocator = PortAllocator::default();
        let ports = allocator.allocate(4).await.expect("ports");
        assert_eq!(ports.len(), 4);
        let unique: std::collections::HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn exhausts_a_tiny_range() {
        let allocator = PortAllocator::new(50000..=50001);
        let err = allocator.allocate(5).await.unwrap_err();
        assert!(matches!(err, ExecError::PortExhaustion { .. }));
    }

    #[tokio::test]
    async fn release_allows_reallocation() {
        let allocator = PortAllocator::new(50100..=50101);
        let first = allocator.allocate(2).await.expect("ports");
        allocator.release(&first).await;
        let second = allocator.allocate(2).await.expect("ports");
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_never_collide() {
        let allocator = PortAllocator::new(50200..=50210);
        let a = allocator.clone();
        let b = allocator.clone();
        let (r1, r2) = tokio::join!(a.allocate(3), b.allocate(3));
        let r1 = r1.expect("ports");
        let r2 = r2.expect("ports");
        let overlap = r1.iter().any(|p| r2.contains(p));
        assert!(!overlap);
    }
}
