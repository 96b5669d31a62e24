//! Transactional resources.
//!
//! A resource joins a transaction the first time the transaction locks it for
//! writing: the resource's transactional write lock is acquired, a snapshot of
//! its state is taken and the pair is enlisted with the transaction. Commit
//! discards the snapshot, rollback reinstalls it. Either way the lock is held
//! until the transaction terminates.

use crate::error::TxnResult;
use crate::transaction::{Participant, Transaction};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Per-resource write lock owned by at most one transaction.
///
/// The lock is re-entrant for its owner and is released only when the owning
/// transaction terminates.
#[derive(Default)]
pub struct TransactionalLock {
    owner: Mutex<Option<TransactionId>>,
    released: Condvar,
}

impl TransactionalLock {
    /// Creates an unowned lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the owning transaction, if any.
    #[must_use]
    pub fn owner(&self) -> Option<TransactionId> {
        *self.owner.lock()
    }

    /// Returns true if `txn` owns the lock.
    #[must_use]
    pub fn is_held_by(&self, txn: TransactionId) -> bool {
        self.owner() == Some(txn)
    }

    /// Acquires the lock for `txn`, blocking while another transaction owns it.
    ///
    /// Returns false if `txn` already owned the lock.
    pub(crate) fn acquire(&self, txn: TransactionId, warn_after: Duration) -> bool {
        let mut owner = self.owner.lock();
        if *owner == Some(txn) {
            return false;
        }

        let started = Instant::now();
        let mut warned = false;
        while let Some(holder) = *owner {
            let timed_out = self.released.wait_for(&mut owner, warn_after).timed_out();
            if timed_out && !warned && owner.is_some() {
                warned = true;
                warn!(
                    target: "svctxn::resource",
                    txn = %txn,
                    holder = %holder,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "slow transactional write lock wait"
                );
            }
        }
        *owner = Some(txn);
        true
    }

    /// Releases the lock if `txn` owns it.
    pub(crate) fn release(&self, txn: TransactionId) {
        let mut owner = self.owner.lock();
        if *owner == Some(txn) {
            *owner = None;
            self.released.notify_all();
        }
    }
}

impl fmt::Debug for TransactionalLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalLock")
            .field("owner", &self.owner())
            .finish()
    }
}

/// A resource whose state can be captured and restored.
pub trait TransactionalResource: Send + Sync + 'static {
    /// Captured state.
    type Snapshot: Send + 'static;

    /// Returns the resource's transactional write lock.
    fn write_lock(&self) -> &TransactionalLock;

    /// Captures the current state.
    fn take_snapshot(&self) -> Self::Snapshot;

    /// Replaces the current state with `snapshot`.
    fn revert(&self, snapshot: Self::Snapshot);
}

/// Locks `resource` for writing on behalf of `txn`.
///
/// The first call by a transaction blocks until the resource is free, takes a
/// snapshot and enlists the resource, marking the transaction modified. Later
/// calls by the same transaction return at once.
///
/// # Errors
///
/// Returns `InvalidTransactionState` unless `txn` is an active, admitted
/// update transaction.
pub fn lock_write<R: TransactionalResource>(resource: &Arc<R>, txn: &Transaction) -> TxnResult<()> {
    txn.ensure_writable()?;

    let id = txn.id();
    if !resource.write_lock().acquire(id, txn.lock_wait_warning()) {
        return Ok(());
    }
    let snapshot = resource.take_snapshot();
    trace!(target: "svctxn::resource", txn = %id, "resource enlisted");

    txn.enlist(Box::new(Enlisted {
        resource: Arc::clone(resource),
        snapshot,
        owner: id,
    }))
}

struct Enlisted<R: TransactionalResource> {
    resource: Arc<R>,
    snapshot: R::Snapshot,
    owner: TransactionId,
}

impl<R: TransactionalResource> Participant for Enlisted<R> {
    fn commit(self: Box<Self>) {
        self.resource.write_lock().release(self.owner);
    }

    fn rollback(self: Box<Self>) {
        let Enlisted {
            resource,
            snapshot,
            owner,
        } = *self;
        resource.revert(snapshot);
        resource.write_lock().release(owner);
    }
}
