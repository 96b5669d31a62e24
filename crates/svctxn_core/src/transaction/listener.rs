//! Admission listeners.

use super::state::Transaction;
use crate::error::{TxnError, TxnResult};
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tracing::debug;

/// Callback invoked once a transaction is admitted.
///
/// Listeners run outside every controller lock, on whichever thread caused
/// the admission. A panicking listener is logged and counted; it never
/// disturbs the admission state.
pub trait Listener: Send + 'static {
    /// Called with the admitted transaction.
    fn on_ready(self: Box<Self>, txn: Transaction);
}

impl<F> Listener for F
where
    F: FnOnce(Transaction) + Send + 'static,
{
    fn on_ready(self: Box<Self>, txn: Transaction) {
        (*self)(txn);
    }
}

/// Creates a listener that hands the admitted transaction to a [`PendingTransaction`].
pub(crate) fn channel() -> (impl Listener, PendingTransaction) {
    let (sender, receiver) = mpsc::sync_channel(1);
    let listener = move |txn: Transaction| {
        if let Err(mpsc::SendError(txn)) = sender.send(txn) {
            debug!(target: "svctxn::admission", txn = %txn.id(), "admission receiver dropped");
        }
    };
    (
        listener,
        PendingTransaction {
            receiver,
            ready: None,
        },
    )
}

/// A transaction that may still be waiting for admission.
///
/// Dropping a pending transaction that was never taken withdraws the request:
/// once admitted the transaction is rolled back and its slot is freed.
pub struct PendingTransaction {
    receiver: mpsc::Receiver<Transaction>,
    ready: Option<Transaction>,
}

impl PendingTransaction {
    /// Returns true if the transaction has been admitted.
    pub fn is_ready(&mut self) -> bool {
        if self.ready.is_none() {
            if let Ok(txn) = self.receiver.try_recv() {
                self.ready = Some(txn);
            }
        }
        self.ready.is_some()
    }

    /// Blocks until the transaction is admitted.
    pub fn wait(mut self) -> TxnResult<Transaction> {
        if let Some(txn) = self.ready.take() {
            return Ok(txn);
        }
        self.receiver
            .recv()
            .map_err(|_| TxnError::AdmissionAbandoned)
    }

    /// Waits up to `timeout` for admission.
    ///
    /// Returns `Ok(None)` if the transaction is still queued.
    pub fn wait_timeout(&mut self, timeout: Duration) -> TxnResult<Option<Transaction>> {
        if let Some(txn) = self.ready.take() {
            return Ok(Some(txn));
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(txn) => Ok(Some(txn)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TxnError::AdmissionAbandoned),
        }
    }

    /// Takes the transaction if it has already been admitted.
    pub fn try_take(&mut self) -> TxnResult<Option<Transaction>> {
        if let Some(txn) = self.ready.take() {
            return Ok(Some(txn));
        }
        match self.receiver.try_recv() {
            Ok(txn) => Ok(Some(txn)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TxnError::AdmissionAbandoned),
        }
    }
}

impl fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("ready", &self.ready.as_ref().map(Transaction::id))
            .finish_non_exhaustive()
    }
}
