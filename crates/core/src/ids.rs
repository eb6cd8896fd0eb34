//! Global and branch transaction identifiers
//!
//! Every unit of work is named by a [`GlobalId`]; every resource participant's
//! share of it by a [`BranchId`]. Both have a stable binary encoding so that
//! identifiers handed to a resource manager before a crash can be recognised
//! again when that resource manager is scanned during recovery.
//!
//! ## Layout
//!
//! ```text
//! global transaction id (64 bytes)
//! ┌─────┬──────────────────────────┬─────────┬──────────────────────┐
//! │ len │ coordinator id (≤52)     │ padding │ tx number (u64 BE)   │
//! │ 1B  │ 52B                      │ 3B      │ 8B                   │
//! └─────┴──────────────────────────┴─────────┴──────────────────────┘
//!   bytes 0..56 = coordinator prefix          bytes 56..64
//!
//! branch qualifier (8 bytes) = branch sequence number (u64 BE)
//! ```

use crate::error::IdError;
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Format tag stamped on every identifier this coordinator creates ("2PC1").
pub const FORMAT_ID: i32 = 0x3250_4331;

/// Encoded length of a global transaction id.
pub const GLOBAL_ID_LEN: usize = 64;

/// Maximum number of coordinator-identity bytes kept in the encoding.
pub const MAX_COORDINATOR_ID_LEN: usize = 52;

/// Length of the coordinator prefix compared during recovery filtering.
pub const COORDINATOR_PREFIX_LEN: usize = 56;

/// Encoded length of a branch qualifier.
pub const BRANCH_QUALIFIER_LEN: usize = 8;

/// An identifier as reported by a resource manager.
///
/// This is the raw `(format, gtrid, bqual)` triple a participant returns from
/// its recovery scan. It may belong to any coordinator sharing the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalXid {
    /// Format tag
    pub format_id: i32,
    /// Global transaction id bytes
    pub gtrid: Vec<u8>,
    /// Branch qualifier bytes
    pub bqual: Vec<u8>,
}

impl ExternalXid {
    /// Create an external id from its parts.
    pub fn new(format_id: i32, gtrid: impl Into<Vec<u8>>, bqual: impl Into<Vec<u8>>) -> Self {
        Self {
            format_id,
            gtrid: gtrid.into(),
            bqual: bqual.into(),
        }
    }
}

/// Truncate a coordinator identity to the encodable byte budget.
///
/// Truncation happens on a char boundary so the kept identity stays valid UTF-8.
pub fn truncate_coordinator_id(coordinator_id: &str) -> &str {
    if coordinator_id.len() <= MAX_COORDINATOR_ID_LEN {
        return coordinator_id;
    }
    let mut end = MAX_COORDINATOR_ID_LEN;
    while !coordinator_id.is_char_boundary(end) {
        end -= 1;
    }
    &coordinator_id[..end]
}

fn coordinator_prefix(coordinator_id: &str) -> [u8; COORDINATOR_PREFIX_LEN] {
    let id = truncate_coordinator_id(coordinator_id).as_bytes();
    let mut prefix = [0u8; COORDINATOR_PREFIX_LEN];
    prefix[0] = id.len() as u8;
    prefix[1..1 + id.len()].copy_from_slice(id);
    prefix
}

/// Identifier of one global unit of work.
///
/// Two global ids are equal iff their coordinator identity and transaction
/// number match. Clones share the branch counter, so every clone allocates
/// from the same sequence.
#[derive(Clone)]
pub struct GlobalId {
    coordinator_id: Arc<str>,
    tx_number: u64,
    encoded: [u8; GLOBAL_ID_LEN],
    next_branch: Arc<AtomicU64>,
}

impl GlobalId {
    /// Build and encode a global id.
    ///
    /// The coordinator identity is truncated to [`MAX_COORDINATOR_ID_LEN`]
    /// bytes. An empty identity cannot be encoded.
    pub fn new(coordinator_id: &str, tx_number: u64) -> Result<Self, IdError> {
        let kept = truncate_coordinator_id(coordinator_id);
        if kept.is_empty() {
            return Err(IdError::EmptyCoordinatorId);
        }

        let mut encoded = [0u8; GLOBAL_ID_LEN];
        encoded[..COORDINATOR_PREFIX_LEN].copy_from_slice(&coordinator_prefix(kept));
        BigEndian::write_u64(&mut encoded[COORDINATOR_PREFIX_LEN..], tx_number);

        Ok(Self {
            coordinator_id: Arc::from(kept),
            tx_number,
            encoded,
            next_branch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Coordinator identity (already truncated).
    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    /// Transaction number assigned by the transaction store.
    pub fn tx_number(&self) -> u64 {
        self.tx_number
    }

    /// The 64-byte encoding.
    pub fn as_bytes(&self) -> &[u8; GLOBAL_ID_LEN] {
        &self.encoded
    }

    /// Allocate the next branch of this unit of work.
    ///
    /// Sequence numbers start at 1 and are never handed out twice, even when
    /// called concurrently.
    pub fn create_branch(&self) -> BranchId {
        let seq = self.next_branch.fetch_add(1, Ordering::SeqCst) + 1;
        BranchId {
            global: self.clone(),
            branch_seq: seq,
        }
    }
}

impl PartialEq for GlobalId {
    fn eq(&self, other: &Self) -> bool {
        self.tx_number == other.tx_number && self.coordinator_id == other.coordinator_id
    }
}

impl Eq for GlobalId {}

impl Hash for GlobalId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coordinator_id.hash(state);
        self.tx_number.hash(state);
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalId")
            .field("coordinator_id", &self.coordinator_id)
            .field("tx_number", &self.tx_number)
            .finish()
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.coordinator_id, self.tx_number)
    }
}

/// Identifier of one participant's branch of a global unit of work.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BranchId {
    global: GlobalId,
    branch_seq: u64,
}

impl BranchId {
    /// The global unit of work this branch belongs to.
    pub fn global(&self) -> &GlobalId {
        &self.global
    }

    /// Branch sequence number within the global id.
    pub fn branch_seq(&self) -> u64 {
        self.branch_seq
    }

    /// The 8-byte branch qualifier.
    pub fn qualifier(&self) -> [u8; BRANCH_QUALIFIER_LEN] {
        let mut bqual = [0u8; BRANCH_QUALIFIER_LEN];
        BigEndian::write_u64(&mut bqual, self.branch_seq);
        bqual
    }

    /// Encode as the triple handed to resource managers.
    pub fn to_external(&self) -> ExternalXid {
        ExternalXid::new(FORMAT_ID, self.global.as_bytes().to_vec(), self.qualifier())
    }
}

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchId")
            .field("coordinator_id", &self.global.coordinator_id)
            .field("tx_number", &self.global.tx_number)
            .field("branch_seq", &self.branch_seq)
            .finish()
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.global, self.branch_seq)
    }
}

/// Select the observed ids that belong to `coordinator_id` and decode them.
///
/// An id matches when its format tag is [`FORMAT_ID`], its gtrid is a full
/// 64-byte global id whose first 56 bytes equal this coordinator's prefix,
/// and its branch qualifier is exactly 8 bytes. Output order follows input
/// order; duplicates are dropped.
pub fn filter_recovery(observed: &[ExternalXid], coordinator_id: &str) -> Vec<BranchId> {
    let prefix = coordinator_prefix(coordinator_id);
    let kept = truncate_coordinator_id(coordinator_id);
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for xid in observed {
        if xid.format_id != FORMAT_ID
            || xid.gtrid.len() != GLOBAL_ID_LEN
            || xid.bqual.len() != BRANCH_QUALIFIER_LEN
            || xid.gtrid[..COORDINATOR_PREFIX_LEN] != prefix[..]
        {
            continue;
        }

        let tx_number = BigEndian::read_u64(&xid.gtrid[COORDINATOR_PREFIX_LEN..]);
        let branch_seq = BigEndian::read_u64(&xid.bqual);
        if !seen.insert((tx_number, branch_seq)) {
            continue;
        }

        // Prefix matched, so the identity is non-empty and encodable
        if let Ok(global) = GlobalId::new(kept, tx_number) {
            matches.push(BranchId { global, branch_seq });
        }
    }

    matches
}
