//! Element addresses for the graph store.
//!
//! Every node, connector and link in the graph is identified by an [`Addr`].
//! The [`AddrAllocator`] provides thread-safe address generation.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};

/// Unique, niche-optimized address of a graph element.
///
/// Uses `NonZeroU64` so that `Option<Addr>` is the same size as `Addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Addr(NonZeroU64);

impl Addr {
    /// Create an `Addr` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Addr)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "addr:{}", self.0)
    }
}

/// Thread-safe element address allocator.
///
/// Produces monotonically increasing addresses starting from 1. Addresses of
/// erased elements are never reused.
#[derive(Debug)]
pub struct AddrAllocator {
    next: AtomicU64,
}

impl AddrAllocator {
    /// Create a new allocator that starts from address 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given address.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next address.
    pub fn next_addr(&self) -> GraphResult<Addr> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        Addr::new(raw).ok_or(GraphError::AddressSpaceExhausted)
    }

    /// Return the next address that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AddrAllocator {
    fn default() -> Self {
        Self::new()
    }
}
