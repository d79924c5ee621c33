//! UDP media port allocation.

use std::collections::BTreeSet;
use std::ops::Range;

use parking_lot::Mutex;

/// Hands out unused UDP ports from a half-open range `[min, max)`.
///
/// Ports released by torn-down streams become immediately reusable.
/// Allocation prefers the lowest free port, which keeps the assigned
/// ports predictable for firewall configuration.
pub struct PortAllocator {
    inner: Mutex<Inner>,
}

struct Inner {
    range: Range<u16>,
    in_use: BTreeSet<u16>,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                range,
                in_use: BTreeSet::new(),
            }),
        }
    }

    /// Reserve the lowest unused port, or `None` when the range is
    /// exhausted.
    pub fn allocate(&self) -> Option<u16> {
        let mut inner = self.inner.lock();
        let port = inner.range.clone().find(|port| !inner.in_use.contains(port));
        match port {
            Some(port) => {
                inner.in_use.insert(port);
                tracing::trace!(port, "allocated media port");
                Some(port)
            }
            None => {
                tracing::warn!(
                    range = ?inner.range,
                    "media port range exhausted"
                );
                None
            }
        }
    }

    /// Return a port to the pool. Unknown ports are ignored.
    pub fn release(&self, port: u16) {
        let mut inner = self.inner.lock();
        if inner.in_use.remove(&port) {
            tracing::trace!(port, "released media port");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_port() {
        let allocator = PortAllocator::new(9000..9003);
        assert_eq!(allocator.allocate(), Some(9000));
        assert_eq!(allocator.allocate(), Some(9001));
        assert_eq!(allocator.allocate(), Some(9002));
    }

    #[test]
    fn exhaustion_returns_none() {
        let allocator = PortAllocator::new(9000..9002);
        allocator.allocate();
        allocator.allocate();
        assert_eq!(allocator.allocate(), None);
    }

    #[test]
    fn released_port_is_immediately_reusable() {
        let allocator = PortAllocator::new(9000..9002);
        let first = allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        assert_eq!(allocator.allocate(), None);

        allocator.release(first);
        assert_eq!(allocator.allocate(), Some(first));
    }

    #[test]
    fn release_of_unknown_port_is_harmless() {
        let allocator = PortAllocator::new(9000..9001);
        allocator.release(12345);
        assert_eq!(allocator.allocate(), Some(9000));
    }

    #[test]
    fn empty_range_is_always_exhausted() {
        let allocator = PortAllocator::new(9000..9000);
        assert_eq!(allocator.allocate(), None);
    }
}
