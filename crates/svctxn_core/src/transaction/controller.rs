//! Transaction controller.
//!
//! The controller admits transactions under reader/writer exclusion: any
//! number of read transactions may run together, an update transaction runs
//! alone. Requests that cannot be admitted wait in a FIFO queue. When the last
//! running transaction terminates the controller promotes the head of the
//! queue; a head read request is promoted together with every read request
//! directly behind it.
//!
//! ## Locking
//!
//! The admission lock is always taken before a transaction's status lock.
//! Listeners are invoked only after the admission lock has been released.

use super::listener::{self, Listener, PendingTransaction};
use super::state::{Transaction, TransactionState, TxnInner};
use crate::config::ControllerConfig;
use crate::error::{TxnError, TxnResult};
use crate::executor::TaskExecutor;
use crate::problem::{ProblemReport, Severity};
use crate::stats::{ControllerStats, StatsSnapshot};
use crate::types::{ControllerId, TransactionId, TxnKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Permission checked by [`TransactionController::with_authorizer`].
pub const CREATE_CONTROLLER_PERMISSION: &str = "create_transaction_controller";

/// Decides whether the caller may create a transaction controller.
pub trait Authorizer {
    /// Returns true if `permission` is granted.
    fn check_permission(&self, permission: &str) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&str) -> bool,
{
    fn check_permission(&self, permission: &str) -> bool {
        self(permission)
    }
}

/// Per-transaction options.
#[derive(Clone, Default)]
pub struct TxnOptions {
    executor: Option<Arc<dyn TaskExecutor>>,
    max_severity: Option<Severity>,
}

impl TxnOptions {
    /// Creates options that use the controller defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an executor to the transaction.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the maximum problem severity that still allows commit.
    ///
    /// `Severity::Critical` is rejected at creation time.
    #[must_use]
    pub fn max_severity(mut self, severity: Severity) -> Self {
        self.max_severity = Some(severity);
        self
    }
}

impl fmt::Debug for TxnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnOptions")
            .field("executor", &self.executor.is_some())
            .field("max_severity", &self.max_severity)
            .finish()
    }
}

/// Point-in-time view of the admission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionSnapshot {
    /// Number of admitted, not yet terminated transactions.
    pub running: usize,
    /// Whether the admitted set is a single update transaction.
    pub writer_active: bool,
    /// Queued requests, head first.
    pub pending: Vec<(TransactionId, TxnKind)>,
}

impl AdmissionSnapshot {
    /// Returns the number of queued requests.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is running or queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.running == 0 && self.pending.is_empty()
    }
}

struct PendingEntry {
    txn: Transaction,
    kind: TxnKind,
    listener: Box<dyn Listener>,
}

#[derive(Default)]
struct AdmissionState {
    running: usize,
    writer_active: bool,
    pending: VecDeque<PendingEntry>,
}

impl AdmissionState {
    fn admits(&self, kind: TxnKind) -> bool {
        match kind {
            TxnKind::Read => {
                self.running == 0 || (!self.writer_active && self.pending.is_empty())
            }
            TxnKind::Update => self.running == 0,
        }
    }

    fn admit(&mut self, txn: &Transaction, kind: TxnKind) {
        self.running += 1;
        if kind.is_update() {
            self.writer_active = true;
        }
        let mut status = txn.inner().status.lock();
        status.kind = kind;
        status.admitted = true;
    }

    /// Admits the next batch from the queue head.
    ///
    /// Entries whose transaction already terminated are moved to `discarded`.
    fn promote(&mut self, ready: &mut Vec<PendingEntry>, discarded: &mut Vec<PendingEntry>) {
        let head = loop {
            match self.pending.pop_front() {
                None => return,
                Some(entry) if entry.txn.is_terminated() => discarded.push(entry),
                Some(entry) => break entry,
            }
        };

        self.admit(&head.txn, head.kind);
        let batch_reads = !head.kind.is_update();
        ready.push(head);
        if !batch_reads {
            return;
        }

        while self.pending.front().is_some_and(|e| !e.kind.is_update()) {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            if entry.txn.is_terminated() {
                discarded.push(entry);
            } else {
                self.admit(&entry.txn, entry.kind);
                ready.push(entry);
            }
        }
    }

    fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            running: self.running,
            writer_active: self.writer_active,
            pending: self.pending.iter().map(|e| (e.txn.id(), e.kind)).collect(),
        }
    }
}

pub(crate) struct ControllerShared {
    pub(crate) id: ControllerId,
    pub(crate) config: ControllerConfig,
    pub(crate) stats: ControllerStats,
    admission: Mutex<AdmissionState>,
}

impl ControllerShared {
    /// Releases the admission slot of a terminated transaction, or withdraws
    /// its queue entry if it was never admitted.
    pub(crate) fn on_terminated(&self, txn: &TxnInner, committed: bool) {
        if committed {
            self.stats.record_commit();
        } else {
            self.stats.record_rollback();
        }

        let mut ready = Vec::new();
        let mut discarded = Vec::new();
        {
            let mut state = self.admission.lock();
            let was_admitted = std::mem::replace(&mut txn.status.lock().admitted, false);
            if was_admitted {
                debug_assert!(state.running > 0);
                state.running = state.running.saturating_sub(1);
                if state.running == 0 {
                    state.writer_active = false;
                    state.promote(&mut ready, &mut discarded);
                }
            } else if let Some(pos) = state.pending.iter().position(|e| e.txn.id() == txn.id) {
                debug!(target: "svctxn::admission", txn = %txn.id, "withdrawing queued request");
                discarded.extend(state.pending.remove(pos));
            }
        }

        drop(discarded);
        self.dispatch(ready);
    }

    fn dispatch(&self, ready: Vec<PendingEntry>) {
        if ready.is_empty() {
            return;
        }
        self.stats.record_promoted(ready.len() as u64);
        for entry in ready {
            debug!(target: "svctxn::admission", txn = %entry.txn.id(), kind = %entry.kind, "promoted from queue");
            self.notify(entry.listener, entry.txn);
        }
    }

    fn notify(&self, listener: Box<dyn Listener>, txn: Transaction) {
        let id = txn.id();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || listener.on_ready(txn)));
        if outcome.is_err() {
            self.stats.record_listener_failure();
            error!(target: "svctxn::admission", txn = %id, "admission listener panicked");
        }
    }
}

enum UpgradeOutcome {
    Rejected,
    InPlace(Box<dyn Listener>),
    Queued,
}

/// Admits transactions and coordinates their lifecycle.
///
/// The controller is a cheap handle; clones share the same admission state.
///
/// # Example
///
/// ```
/// use svctxn_core::{TransactionController, TxnOptions};
///
/// let controller = TransactionController::new();
/// let txn = controller.begin_update(TxnOptions::default())?.wait()?;
/// controller.prepare(&txn)?;
/// controller.commit(&txn)?;
/// # Ok::<(), svctxn_core::TxnError>(())
/// ```
#[derive(Clone)]
pub struct TransactionController {
    shared: Arc<ControllerShared>,
}

impl TransactionController {
    /// Creates a controller with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    /// Creates a controller with the given configuration.
    #[must_use]
    pub fn with_config(config: ControllerConfig) -> Self {
        let id = ControllerId::generate();
        info!(target: "svctxn::admission", controller = %id, "transaction controller created");
        Self {
            shared: Arc::new(ControllerShared {
                id,
                config,
                stats: ControllerStats::new(),
                admission: Mutex::new(AdmissionState::default()),
            }),
        }
    }

    /// Creates a controller after checking [`CREATE_CONTROLLER_PERMISSION`].
    pub fn with_authorizer(
        config: ControllerConfig,
        authorizer: &dyn Authorizer,
    ) -> TxnResult<Self> {
        if !authorizer.check_permission(CREATE_CONTROLLER_PERMISSION) {
            return Err(TxnError::permission_denied(CREATE_CONTROLLER_PERMISSION));
        }
        Ok(Self::with_config(config))
    }

    /// Returns the controller ID.
    #[must_use]
    pub fn id(&self) -> ControllerId {
        self.shared.id
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Returns a copy of the controller counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the current admission state.
    #[must_use]
    pub fn admission_state(&self) -> AdmissionSnapshot {
        self.shared.admission.lock().snapshot()
    }

    /// Returns true if `txn` was created by this controller.
    #[must_use]
    pub fn owns(&self, txn: &Transaction) -> bool {
        txn.controller_id() == self.shared.id
    }

    fn validate(&self, txn: &Transaction) -> TxnResult<()> {
        if self.owns(txn) {
            Ok(())
        } else {
            Err(TxnError::OwnershipMismatch)
        }
    }

    /// Creates a read transaction.
    ///
    /// The handle is returned at once. `listener` is called when the
    /// transaction is admitted, which may be before this call returns.
    pub fn create_read_transaction<L: Listener>(
        &self,
        options: TxnOptions,
        listener: L,
    ) -> TxnResult<Transaction> {
        self.create(TxnKind::Read, options, Box::new(listener))
    }

    /// Creates an update transaction.
    ///
    /// The handle is returned at once. `listener` is called when the
    /// transaction is admitted, which may be before this call returns.
    pub fn create_update_transaction<L: Listener>(
        &self,
        options: TxnOptions,
        listener: L,
    ) -> TxnResult<Transaction> {
        self.create(TxnKind::Update, options, Box::new(listener))
    }

    /// Requests a read transaction and returns a handle to wait on.
    pub fn begin_read(&self, options: TxnOptions) -> TxnResult<PendingTransaction> {
        let (listener, pending) = listener::channel();
        self.create(TxnKind::Read, options, Box::new(listener))?;
        Ok(pending)
    }

    /// Requests an update transaction and returns a handle to wait on.
    pub fn begin_update(&self, options: TxnOptions) -> TxnResult<PendingTransaction> {
        let (listener, pending) = listener::channel();
        self.create(TxnKind::Update, options, Box::new(listener))?;
        Ok(pending)
    }

    fn create(
        &self,
        kind: TxnKind,
        options: TxnOptions,
        listener: Box<dyn Listener>,
    ) -> TxnResult<Transaction> {
        let max_severity = options
            .max_severity
            .unwrap_or(self.shared.config.default_max_severity);
        if max_severity >= Severity::Critical {
            return Err(TxnError::invalid_argument("max_severity"));
        }
        let executor = options
            .executor
            .unwrap_or_else(|| Arc::clone(&self.shared.config.executor));

        let txn = Transaction::new(kind, &self.shared, executor, max_severity);
        let id = txn.id();
        self.shared.stats.record_created(kind.is_update());

        let admitted = {
            let mut state = self.shared.admission.lock();
            if state.admits(kind) {
                state.admit(&txn, kind);
                Some(listener)
            } else {
                state.pending.push_back(PendingEntry {
                    txn: txn.clone(),
                    kind,
                    listener,
                });
                None
            }
        };

        match admitted {
            Some(listener) => {
                self.shared.stats.record_admitted_immediately();
                debug!(target: "svctxn::admission", txn = %id, kind = %kind, "admitted");
                self.shared.notify(listener, txn.clone());
            }
            None => {
                self.shared.stats.record_queued();
                debug!(target: "svctxn::admission", txn = %id, kind = %kind, "queued");
            }
        }
        Ok(txn)
    }

    /// Upgrades a read transaction to an update transaction.
    ///
    /// Returns `Ok(false)` without any change if requests are queued, including
    /// when `txn` itself is still waiting for admission.
    /// Otherwise returns `Ok(true)`: if `txn` is the only running transaction it
    /// is upgraded in place, else it gives up its slot and waits at the head of
    /// the queue. `listener` is called once the upgrade takes effect. Upgrading
    /// an update transaction calls `listener` at once.
    pub fn upgrade<L: Listener>(&self, txn: &Transaction, listener: L) -> TxnResult<bool> {
        self.validate(txn)?;
        let listener: Box<dyn Listener> = Box::new(listener);

        let outcome = {
            let mut state = self.shared.admission.lock();
            let mut status = txn.inner().status.lock();
            if status.state != TransactionState::Active {
                return Err(TxnError::invalid_state(format!(
                    "cannot upgrade {} transaction",
                    status.state
                )));
            }
            if !status.kind.is_update() && !state.pending.is_empty() {
                UpgradeOutcome::Rejected
            } else if !status.admitted {
                return Err(TxnError::invalid_state(
                    "transaction is waiting for admission",
                ));
            } else if status.kind.is_update() {
                UpgradeOutcome::InPlace(listener)
            } else if state.running == 1 {
                status.kind = TxnKind::Update;
                state.writer_active = true;
                UpgradeOutcome::InPlace(listener)
            } else {
                status.admitted = false;
                drop(status);
                state.running -= 1;
                state.pending.push_front(PendingEntry {
                    txn: txn.clone(),
                    kind: TxnKind::Update,
                    listener,
                });
                UpgradeOutcome::Queued
            }
        };

        match outcome {
            UpgradeOutcome::Rejected => {
                self.shared.stats.record_upgrade_rejected();
                debug!(target: "svctxn::admission", txn = %txn.id(), "upgrade rejected; requests queued");
                Ok(false)
            }
            UpgradeOutcome::InPlace(listener) => {
                self.shared.stats.record_upgrade_in_place();
                debug!(target: "svctxn::admission", txn = %txn.id(), "upgraded in place");
                self.shared.notify(listener, txn.clone());
                Ok(true)
            }
            UpgradeOutcome::Queued => {
                self.shared.stats.record_upgrade_queued();
                debug!(target: "svctxn::admission", txn = %txn.id(), "upgrade queued behind running readers");
                Ok(true)
            }
        }
    }

    /// Downgrades an update transaction to a read transaction.
    ///
    /// Returns `Ok(false)` if `txn` has modified anything. Otherwise returns
    /// `Ok(true)`: with an empty queue the downgrade happens in place, else
    /// `txn` is placed at the head of the queue and promoted together with the
    /// read requests behind it. `listener` is called once the downgrade takes
    /// effect.
    pub fn downgrade<L: Listener>(&self, txn: &Transaction, listener: L) -> TxnResult<bool> {
        self.validate(txn)?;
        let listener: Box<dyn Listener> = Box::new(listener);

        let mut ready = Vec::new();
        let mut discarded = Vec::new();
        let direct = {
            let mut state = self.shared.admission.lock();
            let mut status = txn.inner().status.lock();
            if status.state != TransactionState::Active {
                return Err(TxnError::invalid_state(format!(
                    "cannot downgrade {} transaction",
                    status.state
                )));
            }
            if !status.kind.is_update() || !status.admitted {
                return Err(TxnError::invalid_state(
                    "only running update transactions can be downgraded",
                ));
            }
            if status.modified {
                drop(status);
                drop(state);
                self.shared.stats.record_downgrade_rejected();
                debug!(target: "svctxn::admission", txn = %txn.id(), "downgrade rejected; transaction modified resources");
                return Ok(false);
            }

            status.kind = TxnKind::Read;
            state.writer_active = false;
            if state.pending.is_empty() {
                Some(listener)
            } else {
                status.admitted = false;
                drop(status);
                state.running -= 1;
                state.pending.push_front(PendingEntry {
                    txn: txn.clone(),
                    kind: TxnKind::Read,
                    listener,
                });
                state.promote(&mut ready, &mut discarded);
                None
            }
        };

        self.shared.stats.record_downgrade();
        drop(discarded);
        match direct {
            Some(listener) => {
                debug!(target: "svctxn::admission", txn = %txn.id(), "downgraded in place");
                self.shared.notify(listener, txn.clone());
            }
            None => {
                debug!(target: "svctxn::admission", txn = %txn.id(), "downgraded; admitting queued readers");
                self.shared.dispatch(ready);
            }
        }
        Ok(true)
    }

    /// Requests an upgrade and returns a handle to wait on.
    ///
    /// Returns `Ok(None)` if the upgrade was rejected.
    pub fn begin_upgrade(&self, txn: &Transaction) -> TxnResult<Option<PendingTransaction>> {
        let (listener, pending) = listener::channel();
        Ok(self.upgrade(txn, listener)?.then_some(pending))
    }

    /// Requests a downgrade and returns a handle to wait on.
    ///
    /// Returns `Ok(None)` if the downgrade was rejected.
    pub fn begin_downgrade(&self, txn: &Transaction) -> TxnResult<Option<PendingTransaction>> {
        let (listener, pending) = listener::channel();
        Ok(self.downgrade(txn, listener)?.then_some(pending))
    }

    /// Prepares `txn`.
    pub fn prepare(&self, txn: &Transaction) -> TxnResult<()> {
        self.validate(txn)?;
        txn.prepare()
    }

    /// Determines whether prepared `txn` can be committed.
    pub fn can_commit(&self, txn: &Transaction) -> TxnResult<bool> {
        self.validate(txn)?;
        txn.can_commit()
    }

    /// Commits prepared `txn`.
    pub fn commit(&self, txn: &Transaction) -> TxnResult<()> {
        self.validate(txn)?;
        txn.commit()
    }

    /// Rolls back `txn`.
    pub fn abort(&self, txn: &Transaction) -> TxnResult<()> {
        self.validate(txn)?;
        txn.abort()
    }

    /// Restarts prepared `txn`.
    pub fn restart(&self, txn: &Transaction) -> TxnResult<()> {
        self.validate(txn)?;
        txn.restart()
    }

    /// Returns the executor of `txn`.
    pub fn executor(&self, txn: &Transaction) -> TxnResult<Arc<dyn TaskExecutor>> {
        self.validate(txn)?;
        Ok(txn.executor())
    }

    /// Returns the problem report of `txn`.
    pub fn report<'t>(&self, txn: &'t Transaction) -> TxnResult<&'t ProblemReport> {
        self.validate(txn)?;
        Ok(txn.report())
    }
}

impl Default for TransactionController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionController")
            .field("id", &self.shared.id)
            .field("admission", &self.admission_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Problem;
    use std::sync::mpsc;
    use std::time::Duration;

    fn recorder() -> (impl Listener, mpsc::Receiver<TransactionId>) {
        let (tx, rx) = mpsc::channel();
        let listener = move |txn: Transaction| {
            let _ = tx.send(txn.id());
        };
        (listener, rx)
    }

    fn ignore(_: Transaction) {}

    #[test]
    fn readers_share_admission() {
        let controller = TransactionController::new();
        let r1 = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        let r2 = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();

        let state = controller.admission_state();
        assert_eq!(state.running, 2);
        assert!(!state.writer_active);
        assert!(state.pending.is_empty());

        r1.abort().unwrap();
        r2.abort().unwrap();
        assert!(controller.admission_state().is_idle());
    }

    #[test]
    fn update_waits_for_readers() {
        let controller = TransactionController::new();
        let reader = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();

        let (listener, notified) = recorder();
        let update = controller
            .create_update_transaction(TxnOptions::default(), listener)
            .unwrap();
        assert!(!update.is_admitted());
        assert!(notified.try_recv().is_err());

        reader.abort().unwrap();
        assert_eq!(notified.try_recv().unwrap(), update.id());
        assert!(update.is_admitted());

        let state = controller.admission_state();
        assert_eq!(state.running, 1);
        assert!(state.writer_active);
        update.abort().unwrap();
    }

    #[test]
    fn reader_behind_queued_writer_waits() {
        let controller = TransactionController::new();
        let r1 = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        let u = controller.create_update_transaction(TxnOptions::default(), ignore).unwrap();
        let r2 = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();

        assert!(!u.is_admitted());
        assert!(!r2.is_admitted());
        assert_eq!(
            controller.admission_state().pending,
            vec![(u.id(), TxnKind::Update), (r2.id(), TxnKind::Read)]
        );

        r1.abort().unwrap();
        assert!(u.is_admitted());
        assert!(!r2.is_admitted());

        u.abort().unwrap();
        assert!(r2.is_admitted());
        r2.abort().unwrap();
    }

    #[test]
    fn promotion_batches_contiguous_reads() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let r1 = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();
        let r2 = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();
        let u = controller.create_update_transaction(TxnOptions::default(), ignore).unwrap();
        let r3 = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();

        w.abort().unwrap();
        assert!(r1.is_admitted());
        assert!(r2.is_admitted());
        assert!(!u.is_admitted());
        assert!(!r3.is_admitted());
        assert_eq!(controller.admission_state().running, 2);

        r1.abort().unwrap();
        r2.abort().unwrap();
        assert!(u.is_admitted());
        u.abort().unwrap();
        assert!(r3.is_admitted());
        r3.abort().unwrap();
        assert!(controller.admission_state().is_idle());
    }

    #[test]
    fn upgrade_in_place_when_alone() {
        let controller = TransactionController::new();
        let txn = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();

        let (listener, notified) = recorder();
        assert!(controller.upgrade(&txn, listener).unwrap());
        assert_eq!(notified.try_recv().unwrap(), txn.id());
        assert_eq!(txn.kind(), TxnKind::Update);
        assert!(controller.admission_state().writer_active);
        txn.abort().unwrap();
    }

    #[test]
    fn upgrade_queues_behind_other_readers() {
        let controller = TransactionController::new();
        let r1 = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        let r2 = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();

        let (listener, notified) = recorder();
        assert!(controller.upgrade(&r1, listener).unwrap());
        assert!(notified.try_recv().is_err());
        assert!(!r1.is_admitted());
        let state = controller.admission_state();
        assert_eq!(state.running, 1);
        assert_eq!(state.pending, vec![(r1.id(), TxnKind::Update)]);

        r2.abort().unwrap();
        assert_eq!(notified.try_recv().unwrap(), r1.id());
        assert_eq!(r1.kind(), TxnKind::Update);
        assert!(r1.is_admitted());
        r1.abort().unwrap();
    }

    #[test]
    fn upgrade_rejected_when_queue_not_empty() {
        let controller = TransactionController::new();
        let r1 = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        let u = controller.create_update_transaction(TxnOptions::default(), ignore).unwrap();

        let (listener, notified) = recorder();
        assert!(!controller.upgrade(&r1, listener).unwrap());
        assert!(notified.try_recv().is_err());
        assert_eq!(r1.kind(), TxnKind::Read);
        assert_eq!(controller.stats().upgrades_rejected, 1);

        r1.abort().unwrap();
        u.abort().unwrap();
    }

    #[test]
    fn queued_reader_upgrade_is_refused() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let reader = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();
        assert!(!reader.is_admitted());

        let (listener, notified) = recorder();
        assert!(!controller.upgrade(&reader, listener).unwrap());
        assert!(notified.try_recv().is_err());
        assert_eq!(reader.kind(), TxnKind::Read);
        assert_eq!(controller.admission_state().pending, vec![(reader.id(), TxnKind::Read)]);
        assert_eq!(controller.stats().upgrades_rejected, 1);

        w.abort().unwrap();
        assert!(reader.is_admitted());
        reader.abort().unwrap();
    }

    #[test]
    fn upgrade_of_update_notifies_immediately() {
        let controller = TransactionController::new();
        let txn = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let (listener, notified) = recorder();
        assert!(controller.upgrade(&txn, listener).unwrap());
        assert_eq!(notified.try_recv().unwrap(), txn.id());
        txn.abort().unwrap();
    }

    #[test]
    fn downgrade_in_place_with_empty_queue() {
        let controller = TransactionController::new();
        let txn = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();

        let (listener, notified) = recorder();
        assert!(controller.downgrade(&txn, listener).unwrap());
        assert_eq!(notified.try_recv().unwrap(), txn.id());
        assert_eq!(txn.kind(), TxnKind::Read);
        assert!(!controller.admission_state().writer_active);

        let reader = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        assert_eq!(controller.admission_state().running, 2);
        reader.abort().unwrap();
        txn.abort().unwrap();
    }

    #[test]
    fn downgrade_admits_queued_readers() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let r1 = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();
        let u = controller.create_update_transaction(TxnOptions::default(), ignore).unwrap();

        let (listener, notified) = recorder();
        assert!(controller.downgrade(&w, listener).unwrap());
        assert_eq!(notified.try_recv().unwrap(), w.id());
        assert!(w.is_admitted());
        assert!(r1.is_admitted());
        assert!(!u.is_admitted());
        assert_eq!(controller.admission_state().running, 2);

        w.abort().unwrap();
        r1.abort().unwrap();
        assert!(u.is_admitted());
        u.abort().unwrap();
    }

    #[test]
    fn downgrade_of_read_is_invalid() {
        let controller = TransactionController::new();
        let txn = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        assert!(controller.downgrade(&txn, ignore).unwrap_err().is_invalid_state());
        txn.abort().unwrap();
    }

    #[test]
    fn foreign_transaction_is_rejected() {
        let first = TransactionController::new();
        let second = TransactionController::new();
        let txn = first.begin_update(TxnOptions::default()).unwrap().wait().unwrap();

        assert!(!second.owns(&txn));
        assert_eq!(second.prepare(&txn), Err(TxnError::OwnershipMismatch));
        assert_eq!(second.upgrade(&txn, ignore), Err(TxnError::OwnershipMismatch));
        assert!(second.executor(&txn).is_err());
        assert!(txn.is_active());
        first.abort(&txn).unwrap();
    }

    #[test]
    fn critical_max_severity_is_rejected() {
        let controller = TransactionController::new();
        let result = controller.begin_update(TxnOptions::new().max_severity(Severity::Critical));
        assert!(matches!(result, Err(TxnError::InvalidArgument { .. })));
        assert_eq!(controller.stats().total_created(), 0);
    }

    #[test]
    fn permission_is_checked() {
        let denied = TransactionController::with_authorizer(ControllerConfig::default(), &|_: &str| false);
        assert_eq!(
            denied.err(),
            Some(TxnError::permission_denied(CREATE_CONTROLLER_PERMISSION))
        );

        let granted = TransactionController::with_authorizer(ControllerConfig::default(), &|p: &str| {
            p == CREATE_CONTROLLER_PERMISSION
        });
        assert!(granted.is_ok());
    }

    #[test]
    fn panicking_listener_is_contained() {
        let controller = TransactionController::new();
        let txn = controller
            .create_update_transaction(TxnOptions::default(), |_: Transaction| panic!("listener failure"))
            .unwrap();

        assert!(txn.is_admitted());
        assert_eq!(controller.stats().listener_failures, 1);

        let reader = controller.create_read_transaction(TxnOptions::default(), ignore).unwrap();
        txn.abort().unwrap();
        assert!(reader.is_admitted());
        reader.abort().unwrap();
    }

    #[test]
    fn terminating_queued_transaction_withdraws_it() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let queued = controller.create_update_transaction(TxnOptions::default(), ignore).unwrap();
        assert_eq!(controller.admission_state().pending_len(), 1);

        queued.abort().unwrap();
        assert_eq!(controller.admission_state().pending_len(), 0);
        w.abort().unwrap();
        assert!(controller.admission_state().is_idle());
    }

    #[test]
    fn dropping_admitted_transaction_releases_slot() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let mut pending = controller.begin_update(TxnOptions::default()).unwrap();
        assert!(!pending.is_ready());

        drop(w);
        let next = pending.wait_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(next.is_admitted());
        assert_eq!(controller.stats().rollbacks, 1);
        next.abort().unwrap();
    }

    #[test]
    fn dropping_pending_handle_abandons_request() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let pending = controller.begin_update(TxnOptions::default()).unwrap();
        drop(pending);

        w.abort().unwrap();
        assert!(controller.admission_state().is_idle());
    }

    #[test]
    fn dropped_controller_abandons_queued_requests() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let pending = controller.begin_update(TxnOptions::default()).unwrap();
        let mut polled = controller.begin_read(TxnOptions::default()).unwrap();
        let mut timed = controller.begin_read(TxnOptions::default()).unwrap();
        assert_eq!(polled.try_take().unwrap(), None);

        drop(controller);
        assert_eq!(pending.wait().unwrap_err(), TxnError::AdmissionAbandoned);
        assert_eq!(polled.try_take().unwrap_err(), TxnError::AdmissionAbandoned);
        assert_eq!(
            timed.wait_timeout(Duration::from_millis(10)).unwrap_err(),
            TxnError::AdmissionAbandoned
        );
        assert!(w.is_active());
        w.abort().unwrap();
    }

    #[test]
    fn pending_handle_polls_until_admitted() {
        let controller = TransactionController::new();
        let w = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        let mut pending = controller.begin_read(TxnOptions::default()).unwrap();
        assert!(!pending.is_ready());
        assert_eq!(pending.wait_timeout(Duration::from_millis(5)).unwrap(), None);

        w.abort().unwrap();
        let reader = pending.try_take().unwrap().expect("admitted");
        assert_eq!(reader.kind(), TxnKind::Read);
        reader.abort().unwrap();
    }

    #[test]
    fn report_and_executor_through_controller() {
        let controller = TransactionController::new();
        let txn = controller.begin_update(TxnOptions::default()).unwrap().wait().unwrap();
        controller.report(&txn).unwrap().add(Problem::error("boom"));
        controller.prepare(&txn).unwrap();
        assert!(!controller.can_commit(&txn).unwrap());
        controller.restart(&txn).unwrap();
        assert!(controller.report(&txn).unwrap().is_empty());
        let _executor = controller.executor(&txn).unwrap();
        controller.abort(&txn).unwrap();
    }

    #[test]
    fn admission_snapshot_serializes() {
        let controller = TransactionController::new();
        let json = serde_json::to_value(controller.admission_state()).unwrap();
        assert_eq!(json["running"], 0);
        assert_eq!(json["writer_active"], false);
    }
}
