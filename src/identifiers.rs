//! Correlation identifiers.
//!
//! Every outbound request carries a [`RequestId`] that the exchange echoes in
//! its reply. Identifiers come from one [`IdAllocator`] per channel, increase
//! monotonically and are never reused.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::CallError;

// ============================================================================
// RequestId
// ============================================================================

/// JSON-RPC request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw identifier.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// IdAllocator
// ============================================================================

/// Hands out request identifiers for one channel.
///
/// Exhausting the `u64` space is an error, never a wraparound.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first identifier is 1.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an allocator whose first identifier is `first`.
    #[inline]
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocates the next identifier.
    ///
    /// # Errors
    ///
    /// [`CallError::IdentifierSpaceExhausted`] once `u64::MAX` is reached.
    pub fn allocate(&self) -> Result<RequestId, CallError> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            .map(RequestId)
            .map_err(|_| CallError::IdentifierSpaceExhausted)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
