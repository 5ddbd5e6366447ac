//! Transactional lock manager
//!
//! Locks are held by transaction id until the transaction ends. A request that
//! conflicts with another transaction's lock waits until it is released or
//! the configured timeout expires.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{DistError, Result};
use crate::metadata::{ColocationId, RelationId};

/// Transaction ID
pub type TxnId = u64;

/// Lockable object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockTag {
    Relation(RelationId),
    /// The node registry as a whole
    NodeRegistry,
    /// The set of colocation groups, held while a group is looked up by signature
    ColocationCatalog,
    Colocation(ColocationId),
}

impl std::fmt::Display for LockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockTag::Relation(id) => write!(f, "relation {}", id),
            LockTag::NodeRegistry => write!(f, "node registry"),
            LockTag::ColocationCatalog => write!(f, "colocation catalog"),
            LockTag::Colocation(id) => write!(f, "colocation group {}", id),
        }
    }
}

/// Table-level lock modes, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockMode {
    const ALL: [LockMode; 8] = [
        LockMode::AccessShare,
        LockMode::RowShare,
        LockMode::RowExclusive,
        LockMode::ShareUpdateExclusive,
        LockMode::Share,
        LockMode::ShareRowExclusive,
        LockMode::Exclusive,
        LockMode::AccessExclusive,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Bitmask of modes this mode conflicts with
    fn conflict_mask(self) -> u8 {
        use LockMode::*;
        let modes: &[LockMode] = match self {
            AccessShare => &[AccessExclusive],
            RowShare => &[Exclusive, AccessExclusive],
            RowExclusive => &[Share, ShareRowExclusive, Exclusive, AccessExclusive],
            ShareUpdateExclusive => &[
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            Share => &[
                RowExclusive,
                ShareUpdateExclusive,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            ShareRowExclusive => &[
                RowExclusive,
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            Exclusive => &[
                RowShare,
                RowExclusive,
                ShareUpdateExclusive,
                Share,
                ShareRowExclusive,
                Exclusive,
                AccessExclusive,
            ],
            AccessExclusive => &Self::ALL,
        };
        modes.iter().fold(0, |mask, m| mask | m.bit())
    }

    pub fn conflicts_with(self, other: LockMode) -> bool {
        self.conflict_mask() & other.bit() != 0
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockMode::AccessShare => "ACCESS SHARE",
            LockMode::RowShare => "ROW SHARE",
            LockMode::RowExclusive => "ROW EXCLUSIVE",
            LockMode::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockMode::Share => "SHARE",
            LockMode::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::AccessExclusive => "ACCESS EXCLUSIVE",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a successful acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// A new lock was granted
    Granted,
    /// The transaction already held this exact lock
    AlreadyHeld,
}

/// Lock table shared by all transactions of an engine
pub struct LockManager {
    held: Mutex<HashMap<LockTag, Vec<(TxnId, LockMode)>>>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquire `mode` on `tag` for `txn`, waiting for conflicting holders
    pub fn acquire(&self, txn: TxnId, tag: LockTag, mode: LockMode) -> Result<Acquired> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self.held.lock();

        loop {
            let holders = held.entry(tag).or_default();
            if holders.contains(&(txn, mode)) {
                return Ok(Acquired::AlreadyHeld);
            }

            let blocked = holders
                .iter()
                .any(|(holder, held_mode)| *holder != txn && held_mode.conflicts_with(mode));
            if !blocked {
                holders.push((txn, mode));
                return Ok(Acquired::Granted);
            }

            debug!("Transaction {} waiting for {} lock on {}", txn, mode, tag);
            if self.released.wait_until(&mut held, deadline).timed_out() {
                let still_blocked = held.get(&tag).map_or(false, |holders| {
                    holders
                        .iter()
                        .any(|(holder, held_mode)| *holder != txn && held_mode.conflicts_with(mode))
                });
                if still_blocked {
                    return Err(DistError::LockConflict { tag, mode });
                }
            }
        }
    }

    /// Release every lock held by `txn`
    pub fn release_all(&self, txn: TxnId) {
        let mut held = self.held.lock();
        held.retain(|_, holders| {
            holders.retain(|(holder, _)| *holder != txn);
            !holders.is_empty()
        });
        drop(held);
        self.released.notify_all();
    }

    /// Current holders of a tag
    pub fn holders(&self, tag: LockTag) -> Vec<(TxnId, LockMode)> {
        self.held.lock().get(&tag).cloned().unwrap_or_default()
    }
}
