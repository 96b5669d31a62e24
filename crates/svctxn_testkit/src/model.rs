//! Admission invariant checking.
//!
//! [`AdmissionDriver`] applies [`AdmissionOp`]s to a controller on a single
//! thread and checks the reader/writer invariants after every step.

use crate::fixtures::{AdmissionLog, TestCell};
use crate::generators::AdmissionOp;
use std::sync::Arc;
use svctxn_core::{
    AdmissionSnapshot, Transaction, TransactionController, TransactionState, TxnKind, TxnOptions,
};

/// Checks the invariants that hold for any admission snapshot.
pub fn check_admission_snapshot(snapshot: &AdmissionSnapshot) -> Result<(), String> {
    if snapshot.writer_active && snapshot.running != 1 {
        return Err(format!(
            "writer active with {} running transactions",
            snapshot.running
        ));
    }
    if snapshot.running == 0 && !snapshot.pending.is_empty() {
        return Err(format!(
            "{} requests queued while nothing runs",
            snapshot.pending.len()
        ));
    }
    Ok(())
}

/// Drives a controller through a sequence of operations.
pub struct AdmissionDriver {
    controller: TransactionController,
    cell: Arc<TestCell>,
    log: AdmissionLog,
    live: Vec<Transaction>,
}

impl AdmissionDriver {
    /// Creates a driver for `controller`.
    pub fn new(controller: TransactionController) -> Self {
        Self {
            controller,
            cell: TestCell::new(0),
            log: AdmissionLog::new(),
            live: Vec::new(),
        }
    }

    /// Returns the driven controller.
    pub fn controller(&self) -> &TransactionController {
        &self.controller
    }

    /// Returns the transactions still held by the driver.
    pub fn live(&self) -> &[Transaction] {
        &self.live
    }

    fn pick(&self, index: usize) -> Option<Transaction> {
        if self.live.is_empty() {
            None
        } else {
            Some(self.live[index % self.live.len()].clone())
        }
    }

    fn take(&mut self, index: usize) -> Option<Transaction> {
        if self.live.is_empty() {
            None
        } else {
            let at = index % self.live.len();
            Some(self.live.remove(at))
        }
    }

    /// Applies one operation and checks the outcome and the invariants.
    pub fn apply(&mut self, op: AdmissionOp) -> Result<(), String> {
        match op {
            AdmissionOp::BeginRead => {
                let txn = self
                    .controller
                    .create_read_transaction(TxnOptions::default(), self.log.listener())
                    .map_err(|e| e.to_string())?;
                self.live.push(txn);
            }
            AdmissionOp::BeginUpdate => {
                let txn = self
                    .controller
                    .create_update_transaction(TxnOptions::default(), self.log.listener())
                    .map_err(|e| e.to_string())?;
                self.live.push(txn);
            }
            AdmissionOp::Upgrade(i) => {
                if let Some(txn) = self.pick(i) {
                    self.upgrade(&txn)?;
                }
            }
            AdmissionOp::Downgrade(i) => {
                if let Some(txn) = self.pick(i) {
                    self.downgrade(&txn)?;
                }
            }
            AdmissionOp::Mutate(i) => {
                if let Some(txn) = self.pick(i) {
                    self.mutate(&txn, i as i64)?;
                }
            }
            AdmissionOp::Commit(i) => {
                if let Some(txn) = self.take(i) {
                    if txn.is_active() {
                        self.controller.prepare(&txn).map_err(|e| e.to_string())?;
                        self.controller.commit(&txn).map_err(|e| e.to_string())?;
                    }
                }
            }
            AdmissionOp::Abort(i) => {
                if let Some(txn) = self.take(i) {
                    if !txn.is_terminated() {
                        self.controller.abort(&txn).map_err(|e| e.to_string())?;
                    }
                }
            }
            AdmissionOp::Drop(i) => {
                drop(self.take(i));
            }
        }
        self.check()
    }

    fn upgrade(&self, txn: &Transaction) -> Result<(), String> {
        let active = txn.is_active();
        let was_update = txn.kind().is_update();
        let queue_busy = self.controller.admission_state().pending_len() > 0;
        let expected = if !active {
            None
        } else if !was_update && queue_busy {
            Some(false)
        } else if !txn.is_admitted() {
            None
        } else {
            Some(true)
        };
        let result = self.controller.upgrade(txn, |_: Transaction| {});

        match (expected, result) {
            (None, Err(_)) => Ok(()),
            (None, Ok(accepted)) => Err(format!(
                "upgrade of ineligible {} returned {accepted}",
                txn.id()
            )),
            (Some(_), Err(e)) => Err(format!("upgrade of {} failed: {e}", txn.id())),
            (Some(want), Ok(accepted)) if want == accepted => Ok(()),
            (Some(_), Ok(accepted)) => Err(format!(
                "upgrade of {} returned {accepted} with queue busy = {queue_busy}",
                txn.id()
            )),
        }
    }

    fn downgrade(&self, txn: &Transaction) -> Result<(), String> {
        let eligible = txn.is_active() && txn.is_admitted() && txn.kind().is_update();
        let modified = txn.is_modified();
        let result = self.controller.downgrade(txn, |_: Transaction| {});

        match (eligible, result) {
            (false, Err(_)) => Ok(()),
            (false, Ok(_)) => Err(format!("downgrade of ineligible {} succeeded", txn.id())),
            (true, Err(e)) => Err(format!("downgrade of {} failed: {e}", txn.id())),
            (true, Ok(accepted)) if accepted == !modified => {
                if accepted && txn.kind() != TxnKind::Read {
                    return Err(format!("{} still classified update", txn.id()));
                }
                Ok(())
            }
            (true, Ok(accepted)) => Err(format!(
                "downgrade of {} returned {accepted} with modified = {modified}",
                txn.id()
            )),
        }
    }

    fn mutate(&self, txn: &Transaction, value: i64) -> Result<(), String> {
        let writable = txn.is_active() && txn.is_admitted() && txn.kind().is_update();
        match (writable, self.cell.set(txn, value)) {
            (true, Ok(())) | (false, Err(_)) => Ok(()),
            (true, Err(e)) => Err(format!("write by {} failed: {e}", txn.id())),
            (false, Ok(())) => Err(format!("write by non-writer {} succeeded", txn.id())),
        }
    }

    /// Checks the admission invariants against the transactions still held.
    pub fn check(&self) -> Result<(), String> {
        let snapshot = self.controller.admission_state();
        check_admission_snapshot(&snapshot)?;

        let admitted: Vec<&Transaction> = self
            .live
            .iter()
            .filter(|t| t.state() != TransactionState::RolledBack && t.is_admitted())
            .collect();
        if admitted.len() != snapshot.running {
            return Err(format!(
                "{} admitted transactions but running = {}",
                admitted.len(),
                snapshot.running
            ));
        }
        let writers = admitted.iter().filter(|t| t.kind().is_update()).count();
        if snapshot.writer_active != (writers == 1) || writers > 1 {
            return Err(format!(
                "{writers} admitted writers but writer_active = {}",
                snapshot.writer_active
            ));
        }
        for (id, _) in &snapshot.pending {
            if admitted.iter().any(|t| t.id() == *id) {
                return Err(format!("{id} is both queued and running"));
            }
        }
        Ok(())
    }

    /// Aborts every transaction still held and checks that the controller is idle.
    pub fn finish(mut self) -> Result<(), String> {
        for txn in std::mem::take(&mut self.live) {
            if !txn.is_terminated() {
                self.controller.abort(&txn).map_err(|e| e.to_string())?;
            }
        }
        let snapshot = self.controller.admission_state();
        if !snapshot.is_idle() {
            return Err(format!("controller not idle after finish: {snapshot:?}"));
        }
        let stats = self.controller.stats();
        if stats.total_created() != stats.total_terminated() {
            return Err(format!(
                "created {} transactions but terminated {}",
                stats.total_created(),
                stats.total_terminated()
            ));
        }
        if self.cell.holder().is_some() {
            return Err("write lock still held after finish".to_string());
        }
        Ok(())
    }
}
