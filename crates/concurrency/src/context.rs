//! Execution context keys
//!
//! The manager tracks "the current transaction" per execution context. A
//! context is named explicitly by a [`ContextId`] rather than inferred from
//! the calling thread: callers allocate one per logical thread of control
//! and pass it to every manager call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Set on caller-managed ids so they never equal an allocated one.
const RAW_TAG: u64 = 1 << 63;

/// Key of one logical thread of control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a process-unique context id.
    pub fn new() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a caller-managed id (e.g. a worker index).
    ///
    /// Caller-managed ids live in their own number space: `from_raw(n)` never
    /// equals an id returned by [`ContextId::new`]. Only the low 63 bits of
    /// `raw` are kept.
    pub fn from_raw(raw: u64) -> Self {
        ContextId(raw | RAW_TAG)
    }

    /// Whether this id came from [`ContextId::from_raw`].
    pub fn is_raw(&self) -> bool {
        self.0 & RAW_TAG != 0
    }

    /// Numeric value without the caller-managed tag.
    pub fn as_u64(&self) -> u64 {
        self.0 & !RAW_TAG
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_raw() {
            write!(f, "ctx-raw-{}", self.as_u64())
        } else {
            write!(f, "ctx-{}", self.0)
        }
    }
}
