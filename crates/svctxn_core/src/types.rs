//! Core type definitions for svctxn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing within a process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a transaction ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide transaction ID.
    pub(crate) fn next() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identity of a transaction controller instance.
///
/// Used to verify that a transaction is handed back to the controller that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerId(Uuid);

impl ControllerId {
    /// Generates a fresh random controller ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctl:{}", self.0.simple())
    }
}

/// Classification of a transaction for admission purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnKind {
    /// Read-only; may run concurrently with other readers.
    Read,
    /// Updating; runs alone.
    Update,
}

impl TxnKind {
    /// Returns true for [`TxnKind::Update`].
    #[must_use]
    pub const fn is_update(self) -> bool {
        matches!(self, TxnKind::Update)
    }
}

impl fmt::Display for TxnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnKind::Read => f.write_str("read"),
            TxnKind::Update => f.write_str("update"),
        }
    }
}

/// Result of an idempotent structural mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationOutcome {
    /// The resource changed state.
    Applied,
    /// The resource was already in the requested state.
    NoOp,
}

impl MutationOutcome {
    /// Returns true if the mutation changed state.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_increase() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert!(a < b);
    }

    #[test]
    fn transaction_id_display() {
        assert_eq!(format!("{}", TransactionId::new(42)), "txn:42");
    }

    #[test]
    fn controller_ids_are_distinct() {
        assert_ne!(ControllerId::generate(), ControllerId::generate());
    }

    #[test]
    fn kind_display() {
        assert_eq!(TxnKind::Read.to_string(), "read");
        assert!(TxnKind::Update.is_update());
        assert!(!TxnKind::Read.is_update());
    }
}
