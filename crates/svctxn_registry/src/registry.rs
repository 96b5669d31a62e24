//! Transactional service registry.

use crate::name::ServiceName;
use crate::registration::{Cascade, Registration};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use svctxn_core::{
    lock_write, ControllerId, MutationOutcome, Problem, Transaction, TransactionController,
    TransactionalLock, TransactionalResource, TxnError, TxnResult,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegistryFlags {
    enabled: bool,
    removed: bool,
}

/// Point-in-time copy of a registry's flags and entries.
///
/// Restoring a snapshot reinstalls exactly the captured state. A snapshot
/// holds no reference to the registry it was taken from.
#[derive(Clone)]
pub struct RegistrySnapshot {
    flags: RegistryFlags,
    entries: HashMap<ServiceName, Registration>,
}

impl RegistrySnapshot {
    /// Returns the captured enabled flag.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags.enabled
    }

    /// Returns the captured removed flag.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.flags.removed
    }

    /// Returns the number of captured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries were captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `name` was captured.
    #[must_use]
    pub fn contains(&self, name: &ServiceName) -> bool {
        self.entries.contains_key(name)
    }
}

impl fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("enabled", &self.flags.enabled)
            .field("removed", &self.flags.removed)
            .field("entries", &self.entries.len())
            .finish()
    }
}

struct RegistryInner {
    controller_id: ControllerId,
    entries: DashMap<ServiceName, Registration>,
    flags: Mutex<RegistryFlags>,
    lock: TransactionalLock,
}

impl RegistryInner {
    fn snapshot(&self) -> RegistrySnapshot {
        let flags = self.flags.lock();
        RegistrySnapshot {
            flags: *flags,
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    fn restore(&self, snapshot: RegistrySnapshot) {
        let mut flags = self.flags.lock();
        *flags = snapshot.flags;
        self.entries
            .retain(|name, _| snapshot.entries.contains_key(name));
        for (name, registration) in snapshot.entries {
            self.entries.insert(name, registration);
        }
    }
}

impl TransactionalResource for RegistryInner {
    type Snapshot = RegistrySnapshot;

    fn write_lock(&self) -> &TransactionalLock {
        &self.lock
    }

    fn take_snapshot(&self) -> RegistrySnapshot {
        self.snapshot()
    }

    fn revert(&self, snapshot: RegistrySnapshot) {
        self.restore(snapshot);
    }
}

/// Maps service names to registrations under transactional control.
///
/// Lookups never block. Structural changes require an admitted update
/// transaction of the controller the registry was created for; they hold the
/// registry's write lock until that transaction terminates and are undone if
/// it rolls back.
///
/// Registry-level changes cascade to every registration. A failed cascade is
/// recorded in the transaction's problem report with `Error` severity and
/// does not fail the operation.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Creates an enabled, empty registry bound to `controller`.
    #[must_use]
    pub fn new(controller: &TransactionController) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                controller_id: controller.id(),
                entries: DashMap::new(),
                flags: Mutex::new(RegistryFlags {
                    enabled: true,
                    removed: false,
                }),
                lock: TransactionalLock::new(),
            }),
        }
    }

    fn validate(&self, txn: &Transaction) -> TxnResult<()> {
        if txn.controller_id() == self.inner.controller_id {
            Ok(())
        } else {
            Err(TxnError::OwnershipMismatch)
        }
    }

    fn ensure_not_removed(&self) -> TxnResult<RegistryFlags> {
        let flags = *self.inner.flags.lock();
        if flags.removed {
            Err(TxnError::resource_removed("service registry"))
        } else {
            Ok(flags)
        }
    }

    /// Returns the registration for `name`, if any.
    #[must_use]
    pub fn get_registration(&self, name: &ServiceName) -> Option<Registration> {
        self.inner.entries.get(name).map(|e| e.value().clone())
    }

    /// Returns the registration for `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no registration exists.
    pub fn get_required_registration(&self, name: &ServiceName) -> TxnResult<Registration> {
        self.get_registration(name)
            .ok_or_else(|| TxnError::not_found(name.as_str()))
    }

    /// Returns the registration for `name`, creating it if necessary.
    ///
    /// A new registration of an enabled registry receives the enable cascade
    /// at once.
    ///
    /// # Errors
    ///
    /// Returns `ResourceRemoved` if the registry has been removed.
    pub fn get_or_create_registration(
        &self,
        txn: &Transaction,
        name: &ServiceName,
    ) -> TxnResult<Registration> {
        self.validate(txn)?;
        self.ensure_not_removed()?;
        txn.ensure_active()?;
        if let Some(existing) = self.get_registration(name) {
            return Ok(existing);
        }

        lock_write(&self.inner, txn)?;
        let (registration, enabled) = {
            let flags = self.ensure_not_removed()?;
            let mut created = false;
            let registration = self
                .inner
                .entries
                .entry(name.clone())
                .or_insert_with(|| {
                    created = true;
                    Registration::new(name.clone())
                })
                .value()
                .clone();
            (registration, created && flags.enabled)
        };

        debug!(target: "svctxn::registry", txn = %txn.id(), service = %name, "registration created");
        if enabled {
            self.cascade(txn, vec![registration.clone()], Cascade::Enable);
        }
        Ok(registration)
    }

    /// Removes the registry and every registration.
    ///
    /// Returns `NoOp` if the registry was already removed.
    pub fn remove(&self, txn: &Transaction) -> TxnResult<MutationOutcome> {
        self.validate(txn)?;
        txn.ensure_active()?;
        lock_write(&self.inner, txn)?;
        {
            let mut flags = self.inner.flags.lock();
            if flags.removed {
                return Ok(MutationOutcome::NoOp);
            }
            flags.removed = true;
        }

        debug!(target: "svctxn::registry", txn = %txn.id(), "registry removed");
        self.cascade(txn, self.registrations(), Cascade::Remove);
        Ok(MutationOutcome::Applied)
    }

    /// Enables the registry.
    ///
    /// Returns `NoOp` if it was already enabled.
    pub fn enable(&self, txn: &Transaction) -> TxnResult<MutationOutcome> {
        self.set_enabled(txn, true)
    }

    /// Disables the registry.
    ///
    /// Returns `NoOp` if it was already disabled.
    pub fn disable(&self, txn: &Transaction) -> TxnResult<MutationOutcome> {
        self.set_enabled(txn, false)
    }

    fn set_enabled(&self, txn: &Transaction, enabled: bool) -> TxnResult<MutationOutcome> {
        self.validate(txn)?;
        self.ensure_not_removed()?;
        lock_write(&self.inner, txn)?;
        {
            let mut flags = self.inner.flags.lock();
            if flags.removed {
                return Err(TxnError::resource_removed("service registry"));
            }
            if flags.enabled == enabled {
                return Ok(MutationOutcome::NoOp);
            }
            flags.enabled = enabled;
        }

        let event = if enabled {
            Cascade::Enable
        } else {
            Cascade::Disable
        };
        debug!(target: "svctxn::registry", txn = %txn.id(), event = %event, "registry flag changed");
        self.cascade(txn, self.registrations(), event);
        Ok(MutationOutcome::Applied)
    }

    fn registrations(&self) -> Vec<Registration> {
        self.inner
            .entries
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    fn cascade(&self, txn: &Transaction, registrations: Vec<Registration>, event: Cascade) {
        for registration in registrations {
            if let Err(reason) = registration.cascade(txn, event) {
                warn!(
                    target: "svctxn::registry",
                    txn = %txn.id(),
                    service = %registration.name(),
                    event = %event,
                    reason = %reason,
                    "cascade failed"
                );
                txn.report().add(
                    Problem::error(format!("{event} cascade failed: {reason}"))
                        .with_subject(registration.name().as_str()),
                );
            }
        }
    }

    /// Captures the registry's flags and entries.
    ///
    /// Meant for diagnostics and offline restore. The capture ignores the
    /// write lock, so it may include uncommitted changes of a running writer.
    #[must_use]
    pub fn take_snapshot(&self) -> RegistrySnapshot {
        self.inner.snapshot()
    }

    /// Reinstalls a captured state outside of any transaction.
    ///
    /// Only the registry's flags and name table are restored; registration
    /// states are left as they are. Fails with `InvalidTransactionState`
    /// while a transaction holds the registry's write lock.
    pub fn revert(&self, snapshot: RegistrySnapshot) -> TxnResult<()> {
        if let Some(owner) = self.inner.lock.owner() {
            return Err(TxnError::invalid_state(format!(
                "registry is locked by {owner}"
            )));
        }
        self.inner.restore(snapshot);
        Ok(())
    }

    /// Returns the number of registrations, removed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns true if the registry holds no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Returns all registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<ServiceName> {
        let mut names: Vec<_> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns true if the registry is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.flags.lock().enabled
    }

    /// Returns true if the registry has been removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.inner.flags.lock().removed
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = *self.inner.flags.lock();
        f.debug_struct("ServiceRegistry")
            .field("enabled", &flags.enabled)
            .field("removed", &flags.removed)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}
