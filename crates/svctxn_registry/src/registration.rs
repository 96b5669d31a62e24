//! Per-name registrations.

use crate::name::ServiceName;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use svctxn_core::{
    lock_write, Transaction, TransactionalLock, TransactionalResource, TxnError, TxnResult,
};
use tracing::trace;

/// Receives registry-level changes cascaded to a registration.
///
/// Returning `Err` marks the cascade as failed. The failure is recorded in the
/// transaction's problem report; the registry change itself stands.
pub trait RegistrationObserver: Send + Sync {
    /// The owning registry was enabled.
    fn registry_enabled(&self, _name: &ServiceName) -> Result<(), String> {
        Ok(())
    }

    /// The owning registry was disabled.
    fn registry_disabled(&self, _name: &ServiceName) -> Result<(), String> {
        Ok(())
    }

    /// The registration was removed.
    fn removed(&self, _name: &ServiceName) -> Result<(), String> {
        Ok(())
    }
}

/// Registry-level change propagated to every registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cascade {
    Enable,
    Disable,
    Remove,
}

impl fmt::Display for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cascade::Enable => "enable",
            Cascade::Disable => "disable",
            Cascade::Remove => "remove",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Default)]
pub(crate) struct RegistrationState {
    registry_enabled: bool,
    removed: bool,
    observer: Option<Arc<dyn RegistrationObserver>>,
}

pub(crate) struct RegistrationInner {
    name: ServiceName,
    state: Mutex<RegistrationState>,
    lock: TransactionalLock,
}

impl TransactionalResource for RegistrationInner {
    type Snapshot = RegistrationState;

    fn write_lock(&self) -> &TransactionalLock {
        &self.lock
    }

    fn take_snapshot(&self) -> RegistrationState {
        self.state.lock().clone()
    }

    fn revert(&self, snapshot: RegistrationState) {
        *self.state.lock() = snapshot;
    }
}

/// The entry a registry holds for one service name.
///
/// A registration is never deleted from its registry; removal is logical.
/// Handles are cheap to clone and refer to the same registration.
#[derive(Clone)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    pub(crate) fn new(name: ServiceName) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                name,
                state: Mutex::new(RegistrationState::default()),
                lock: TransactionalLock::new(),
            }),
        }
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &ServiceName {
        &self.inner.name
    }

    /// Returns true if the owning registry's enable has reached this registration.
    #[must_use]
    pub fn is_registry_enabled(&self) -> bool {
        self.inner.state.lock().registry_enabled
    }

    /// Returns true if the registration has been removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().removed
    }

    /// Returns true if an observer is installed.
    #[must_use]
    pub fn has_observer(&self) -> bool {
        self.inner.state.lock().observer.is_some()
    }

    /// Returns true if both handles refer to the same registration.
    #[must_use]
    pub fn ptr_eq(&self, other: &Registration) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Installs `observer`, replacing any previous one.
    ///
    /// The change is reverted if `txn` rolls back.
    pub fn set_observer(
        &self,
        txn: &Transaction,
        observer: Arc<dyn RegistrationObserver>,
    ) -> TxnResult<()> {
        self.update_observer(txn, Some(observer))
    }

    /// Uninstalls the observer.
    pub fn clear_observer(&self, txn: &Transaction) -> TxnResult<()> {
        self.update_observer(txn, None)
    }

    fn update_observer(
        &self,
        txn: &Transaction,
        observer: Option<Arc<dyn RegistrationObserver>>,
    ) -> TxnResult<()> {
        lock_write(&self.inner, txn)?;
        let mut state = self.inner.state.lock();
        if state.removed {
            return Err(TxnError::resource_removed(format!(
                "registration {}",
                self.inner.name
            )));
        }
        state.observer = observer;
        Ok(())
    }

    /// Applies a cascaded registry change on behalf of `txn`.
    ///
    /// Changes that do not alter the registration's state do not reach the
    /// observer.
    pub(crate) fn cascade(&self, txn: &Transaction, event: Cascade) -> Result<(), String> {
        lock_write(&self.inner, txn).map_err(|e| e.to_string())?;

        let observer = {
            let mut state = self.inner.state.lock();
            if state.removed {
                return Ok(());
            }
            let changed = match event {
                Cascade::Enable => !std::mem::replace(&mut state.registry_enabled, true),
                Cascade::Disable => std::mem::replace(&mut state.registry_enabled, false),
                Cascade::Remove => {
                    state.removed = true;
                    true
                }
            };
            if !changed {
                return Ok(());
            }
            state.observer.clone()
        };

        trace!(target: "svctxn::registry", txn = %txn.id(), service = %self.inner.name, event = %event, "cascade applied");
        match observer {
            Some(observer) => match event {
                Cascade::Enable => observer.registry_enabled(&self.inner.name),
                Cascade::Disable => observer.registry_disabled(&self.inner.name),
                Cascade::Remove => observer.removed(&self.inner.name),
            },
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Registration")
            .field("name", &self.inner.name)
            .field("registry_enabled", &state.registry_enabled)
            .field("removed", &state.removed)
            .field("observer", &state.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svctxn_core::{TransactionController, TxnOptions};

    struct Failing;

    impl RegistrationObserver for Failing {
        fn registry_enabled(&self, _name: &ServiceName) -> Result<(), String> {
            Err("controller not installed".to_string())
        }
    }

    fn update(controller: &TransactionController) -> Transaction {
        controller
            .begin_update(TxnOptions::default())
            .unwrap()
            .wait()
            .unwrap()
    }

    #[test]
    fn cascade_is_idempotent() {
        let controller = TransactionController::new();
        let reg = Registration::new(ServiceName::new("svc.a").unwrap());
        let txn = update(&controller);

        reg.cascade(&txn, Cascade::Enable).unwrap();
        assert!(reg.is_registry_enabled());
        reg.set_observer(&txn, Arc::new(Failing)).unwrap();
        reg.cascade(&txn, Cascade::Enable).unwrap();
        assert!(reg.cascade(&txn, Cascade::Disable).is_ok());
        assert!(reg.cascade(&txn, Cascade::Enable).is_err());

        txn.abort().unwrap();
        assert!(!reg.is_registry_enabled());
        assert!(!reg.has_observer());
    }

    #[test]
    fn removed_registration_ignores_cascades() {
        let controller = TransactionController::new();
        let reg = Registration::new(ServiceName::new("svc.b").unwrap());
        let txn = update(&controller);

        reg.cascade(&txn, Cascade::Remove).unwrap();
        assert!(reg.is_removed());
        reg.cascade(&txn, Cascade::Enable).unwrap();
        assert!(!reg.is_registry_enabled());
        assert!(matches!(
            reg.set_observer(&txn, Arc::new(Failing)),
            Err(TxnError::ResourceRemoved { .. })
        ));

        txn.prepare().unwrap();
        txn.commit().unwrap();
        assert!(reg.is_removed());
    }

    #[test]
    fn read_transaction_cannot_cascade() {
        let controller = TransactionController::new();
        let reg = Registration::new(ServiceName::new("svc.c").unwrap());
        let txn = controller.begin_read(TxnOptions::default()).unwrap().wait().unwrap();
        assert!(reg.cascade(&txn, Cascade::Enable).is_err());
        assert!(!reg.is_registry_enabled());
        txn.abort().unwrap();
    }

    #[test]
    fn cleared_observer_returns_on_abort() {
        let controller = TransactionController::new();
        let reg = Registration::new(ServiceName::new("svc.watched").unwrap());
        let setup = update(&controller);
        reg.set_observer(&setup, Arc::new(Failing)).unwrap();
        setup.prepare().unwrap();
        setup.commit().unwrap();

        let txn = update(&controller);
        reg.clear_observer(&txn).unwrap();
        assert!(!reg.has_observer());
        assert!(reg.cascade(&txn, Cascade::Enable).is_ok());
        txn.abort().unwrap();

        assert!(reg.has_observer());
        assert!(!reg.is_registry_enabled());
    }
}
