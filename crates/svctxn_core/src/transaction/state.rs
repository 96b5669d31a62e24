//! Transaction handle and lifecycle.

use super::controller::ControllerShared;
use crate::error::{TxnError, TxnResult};
use crate::executor::{Task, TaskExecutor};
use crate::problem::{ProblemReport, Severity};
use crate::types::{ControllerId, TransactionId, TxnKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State of a transaction.
///
/// State transitions:
/// - `Active` → `Prepared` (prepare)
/// - `Prepared` → `Committed` (commit)
/// - `Prepared` → `RolledBack` (abort)
/// - `Active` → `RolledBack` (abort or drop)
/// - `Prepared` → `Active` (restart, at most once)
///
/// `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Transaction is running and may modify resources.
    Active,
    /// Transaction has been prepared; no further modification is accepted.
    Prepared,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

impl TransactionState {
    /// Returns true for `Committed` and `RolledBack`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Active => "active",
            TransactionState::Prepared => "prepared",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// A resource enlisted in a transaction together with the snapshot it captured.
pub(crate) trait Participant: Send {
    /// Discards the snapshot and releases the resource's write lock.
    fn commit(self: Box<Self>);
    /// Reinstalls the snapshot and releases the resource's write lock.
    fn rollback(self: Box<Self>);
}

/// Mutable part of a transaction, guarded by the transaction's status lock.
pub(crate) struct Status {
    pub(crate) kind: TxnKind,
    pub(crate) state: TransactionState,
    /// Whether the transaction currently holds an admission slot.
    pub(crate) admitted: bool,
    pub(crate) modified: bool,
    restarted: bool,
    finished_at: Option<Instant>,
    participants: Vec<Box<dyn Participant>>,
}

pub(crate) struct TxnInner {
    pub(crate) id: TransactionId,
    controller_id: ControllerId,
    controller: Weak<ControllerShared>,
    executor: Arc<dyn TaskExecutor>,
    max_severity: Severity,
    lock_wait_warning: Duration,
    report: ProblemReport,
    created_at: Instant,
    pub(crate) status: Mutex<Status>,
}

impl TxnInner {
    /// Hands the termination back to the controller, if it still exists.
    fn finish(&self, committed: bool) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_terminated(self, committed);
        }
    }
}

impl Drop for TxnInner {
    fn drop(&mut self) {
        let status = self.status.get_mut();
        if status.state.is_terminal() {
            return;
        }
        warn!(target: "svctxn::txn", txn = %self.id, state = %status.state, "transaction dropped before termination; rolling back");
        status.state = TransactionState::RolledBack;
        status.finished_at = Some(Instant::now());
        let participants = std::mem::take(&mut status.participants);
        rollback_all(participants);
        self.finish(false);
    }
}

fn rollback_all(participants: Vec<Box<dyn Participant>>) {
    for participant in participants.into_iter().rev() {
        participant.rollback();
    }
}

/// A transaction handle.
///
/// Handles are cheap to clone; every clone refers to the same transaction. The
/// admission listener of an upgrade or downgrade receives such a clone.
///
/// Transactions are created by a [`TransactionController`](super::TransactionController).
/// Dropping the last handle of a transaction that was never terminated rolls it
/// back and frees its admission slot.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

impl Transaction {
    pub(crate) fn new(
        kind: TxnKind,
        controller: &Arc<ControllerShared>,
        executor: Arc<dyn TaskExecutor>,
        max_severity: Severity,
    ) -> Self {
        Self {
            inner: Arc::new(TxnInner {
                id: TransactionId::next(),
                controller_id: controller.id,
                controller: Arc::downgrade(controller),
                executor,
                max_severity,
                lock_wait_warning: controller.config.lock_wait_warning,
                report: ProblemReport::new(),
                created_at: Instant::now(),
                status: Mutex::new(Status {
                    kind,
                    state: TransactionState::Active,
                    admitted: false,
                    modified: false,
                    restarted: false,
                    finished_at: None,
                    participants: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &TxnInner {
        &self.inner
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Returns the ID of the controller that created this transaction.
    #[must_use]
    pub fn controller_id(&self) -> ControllerId {
        self.inner.controller_id
    }

    /// Returns the current classification.
    #[must_use]
    pub fn kind(&self) -> TxnKind {
        self.inner.status.lock().kind
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.status.lock().state
    }

    /// Returns true while the transaction accepts modifications.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns true once the transaction has been committed or rolled back.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if the transaction has modified any resource.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.inner.status.lock().modified
    }

    /// Returns true while the transaction holds an admission slot.
    ///
    /// A reader whose upgrade is still queued is not admitted.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        self.inner.status.lock().admitted
    }

    /// Returns the maximum problem severity that still allows commit.
    #[must_use]
    pub fn max_severity(&self) -> Severity {
        self.inner.max_severity
    }

    /// Returns the problem report.
    #[must_use]
    pub fn report(&self) -> &ProblemReport {
        &self.inner.report
    }

    /// Returns the executor attached to this transaction.
    #[must_use]
    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::clone(&self.inner.executor)
    }

    /// Returns how long the transaction has been running.
    ///
    /// After termination the value is fixed.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let finished_at = self.inner.status.lock().finished_at;
        match finished_at {
            Some(end) => end.duration_since(self.inner.created_at),
            None => self.inner.created_at.elapsed(),
        }
    }

    pub(crate) fn lock_wait_warning(&self) -> Duration {
        self.inner.lock_wait_warning
    }

    /// Ensures the transaction is active.
    pub fn ensure_active(&self) -> TxnResult<()> {
        let state = self.state();
        if state == TransactionState::Active {
            Ok(())
        } else {
            Err(TxnError::invalid_state(format!("transaction is {state}")))
        }
    }

    /// Ensures the transaction may structurally modify resources.
    pub(crate) fn ensure_writable(&self) -> TxnResult<()> {
        let status = self.inner.status.lock();
        if status.state != TransactionState::Active {
            return Err(TxnError::invalid_state(format!(
                "transaction is {}",
                status.state
            )));
        }
        if !status.kind.is_update() {
            return Err(TxnError::invalid_state(
                "read-only transaction cannot modify resources",
            ));
        }
        if !status.admitted {
            return Err(TxnError::invalid_state(
                "transaction is waiting for admission",
            ));
        }
        Ok(())
    }

    /// Records a participant and marks the transaction modified.
    ///
    /// If the transaction stopped being active in the meantime the participant
    /// is rolled back immediately.
    pub(crate) fn enlist(&self, participant: Box<dyn Participant>) -> TxnResult<()> {
        let mut status = self.inner.status.lock();
        if status.state != TransactionState::Active {
            let state = status.state;
            drop(status);
            participant.rollback();
            return Err(TxnError::invalid_state(format!("transaction is {state}")));
        }
        status.modified = true;
        status.participants.push(participant);
        Ok(())
    }

    /// Submits a unit of work to the transaction's executor.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> TxnResult<()> {
        self.ensure_active()?;
        let task: Task = Box::new(task);
        self.inner.executor.execute(task);
        Ok(())
    }

    /// Prepares the transaction.
    ///
    /// After this call the transaction accepts no further modification; it must
    /// then be committed, aborted or restarted.
    pub fn prepare(&self) -> TxnResult<()> {
        let mut status = self.inner.status.lock();
        if status.state != TransactionState::Active {
            return Err(TxnError::invalid_state(format!(
                "cannot prepare {} transaction",
                status.state
            )));
        }
        status.state = TransactionState::Prepared;
        debug!(target: "svctxn::txn", txn = %self.inner.id, "transaction prepared");
        Ok(())
    }

    /// Determines whether a prepared transaction can be committed.
    ///
    /// Returns false if any reported problem is more severe than the
    /// transaction's maximum severity; the transaction must then be aborted.
    pub fn can_commit(&self) -> TxnResult<bool> {
        let state = self.state();
        if state != TransactionState::Prepared {
            return Err(TxnError::invalid_state(format!(
                "transaction is {state}, not prepared"
            )));
        }
        Ok(!self.inner.report.exceeds(self.inner.max_severity))
    }

    /// Commits a prepared transaction and releases its admission slot.
    pub fn commit(&self) -> TxnResult<()> {
        let participants = {
            let mut status = self.inner.status.lock();
            if status.state != TransactionState::Prepared {
                return Err(TxnError::invalid_state(format!(
                    "cannot commit {} transaction",
                    status.state
                )));
            }
            if self.inner.report.exceeds(self.inner.max_severity) {
                return Err(TxnError::invalid_state(
                    "reported problems exceed the maximum severity; transaction must be aborted",
                ));
            }
            status.state = TransactionState::Committed;
            status.finished_at = Some(Instant::now());
            std::mem::take(&mut status.participants)
        };

        for participant in participants {
            participant.commit();
        }
        debug!(target: "svctxn::txn", txn = %self.inner.id, "transaction committed");
        self.inner.finish(true);
        Ok(())
    }

    /// Rolls back an active or prepared transaction.
    ///
    /// Every enlisted resource is reverted, most recent first.
    pub fn abort(&self) -> TxnResult<()> {
        let participants = {
            let mut status = self.inner.status.lock();
            if status.state.is_terminal() {
                return Err(TxnError::invalid_state(format!(
                    "cannot abort {} transaction",
                    status.state
                )));
            }
            status.state = TransactionState::RolledBack;
            status.finished_at = Some(Instant::now());
            std::mem::take(&mut status.participants)
        };

        rollback_all(participants);
        debug!(target: "svctxn::txn", txn = %self.inner.id, "transaction rolled back");
        self.inner.finish(false);
        Ok(())
    }

    /// Restarts a prepared update transaction.
    ///
    /// All modifications are reverted, the problem report is cleared and the
    /// transaction becomes active again. A transaction can be restarted once.
    pub fn restart(&self) -> TxnResult<()> {
        let participants = {
            let mut status = self.inner.status.lock();
            if status.state != TransactionState::Prepared {
                return Err(TxnError::invalid_state(format!(
                    "cannot restart {} transaction",
                    status.state
                )));
            }
            if !status.kind.is_update() {
                return Err(TxnError::invalid_state(
                    "only update transactions can be restarted",
                ));
            }
            if status.restarted {
                return Err(TxnError::invalid_state("transaction already restarted"));
            }
            status.restarted = true;
            std::mem::take(&mut status.participants)
        };

        rollback_all(participants);
        self.inner.report.clear();
        {
            let mut status = self.inner.status.lock();
            status.modified = false;
            status.state = TransactionState::Active;
        }
        if let Some(controller) = self.inner.controller.upgrade() {
            controller.stats.record_restart();
        }
        debug!(target: "svctxn::txn", txn = %self.inner.id, "transaction restarted");
        Ok(())
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.status.lock();
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("kind", &status.kind)
            .field("state", &status.state)
            .field("admitted", &status.admitted)
            .field("modified", &status.modified)
            .finish_non_exhaustive()
    }
}
