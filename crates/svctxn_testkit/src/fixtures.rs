//! Test fixtures and controller helpers.
//!
//! Provides a ready-made controller/registry pair, recording listeners and
//! observers, and a small transactional resource for exercising rollback.

use parking_lot::Mutex;
use std::sync::{Arc, Once};
use std::time::Duration;
use svctxn_core::{
    lock_write, ControllerConfig, Listener, Transaction, TransactionController, TransactionId,
    TransactionalLock, TransactionalResource, TxnOptions, TxnResult,
};
use svctxn_registry::{RegistrationObserver, ServiceName, ServiceRegistry};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A controller with a registry bound to it.
#[derive(Debug, Clone)]
pub struct TestEnv {
    /// The transaction controller.
    pub controller: TransactionController,
    /// A registry bound to `controller`.
    pub registry: ServiceRegistry,
}

impl TestEnv {
    /// Creates an environment with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    /// Creates an environment with the given configuration.
    pub fn with_config(config: ControllerConfig) -> Self {
        init_tracing();
        let controller = TransactionController::with_config(config);
        let registry = ServiceRegistry::new(&controller);
        Self {
            controller,
            registry,
        }
    }

    /// Begins an update transaction and waits for admission.
    pub fn update(&self) -> Transaction {
        self.controller
            .begin_update(TxnOptions::default())
            .expect("Failed to request update transaction")
            .wait_timeout(Duration::from_secs(10))
            .expect("Update admission abandoned")
            .expect("Update transaction not admitted in time")
    }

    /// Begins a read transaction and waits for admission.
    pub fn read(&self) -> Transaction {
        self.controller
            .begin_read(TxnOptions::default())
            .expect("Failed to request read transaction")
            .wait_timeout(Duration::from_secs(10))
            .expect("Read admission abandoned")
            .expect("Read transaction not admitted in time")
    }

    /// Runs `f` in a fresh update transaction and commits it.
    pub fn in_update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Transaction) -> R,
    {
        let txn = self.update();
        let result = f(&txn);
        commit(&self.controller, &txn);
        result
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepares and commits `txn`.
pub fn commit(controller: &TransactionController, txn: &Transaction) {
    controller.prepare(txn).expect("Failed to prepare transaction");
    controller.commit(txn).expect("Failed to commit transaction");
}

/// Parses a service name.
pub fn service_name(name: &str) -> ServiceName {
    ServiceName::new(name).expect("Invalid service name")
}

/// Records the order in which transactions are admitted.
#[derive(Debug, Clone, Default)]
pub struct AdmissionLog {
    admitted: Arc<Mutex<Vec<TransactionId>>>,
}

impl AdmissionLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a listener that appends the admitted transaction to the log.
    pub fn listener(&self) -> impl Listener {
        let admitted = Arc::clone(&self.admitted);
        move |txn: Transaction| admitted.lock().push(txn.id())
    }

    /// Returns the admitted IDs in admission order.
    pub fn admitted(&self) -> Vec<TransactionId> {
        self.admitted.lock().clone()
    }

    /// Returns true if `txn` has been admitted.
    pub fn contains(&self, txn: &Transaction) -> bool {
        self.admitted.lock().contains(&txn.id())
    }

    /// Returns the position of `txn` in the admission order.
    pub fn position(&self, txn: &Transaction) -> Option<usize> {
        self.admitted.lock().iter().position(|id| *id == txn.id())
    }
}

/// A cascade delivered to a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    /// The owning registry was enabled.
    Enabled(ServiceName),
    /// The owning registry was disabled.
    Disabled(ServiceName),
    /// The registration was removed.
    Removed(ServiceName),
}

/// Registration observer that records every cascade.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    fail_disable: bool,
}

impl RecordingObserver {
    /// Creates an observer that accepts every cascade.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an observer that rejects disable cascades.
    pub fn failing_disable() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fail_disable: true,
        })
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of recorded events.
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl RegistrationObserver for RecordingObserver {
    fn registry_enabled(&self, name: &ServiceName) -> Result<(), String> {
        self.events.lock().push(ObservedEvent::Enabled(name.clone()));
        Ok(())
    }

    fn registry_disabled(&self, name: &ServiceName) -> Result<(), String> {
        self.events.lock().push(ObservedEvent::Disabled(name.clone()));
        if self.fail_disable {
            Err(format!("{name} refused to stop"))
        } else {
            Ok(())
        }
    }

    fn removed(&self, name: &ServiceName) -> Result<(), String> {
        self.events.lock().push(ObservedEvent::Removed(name.clone()));
        Ok(())
    }
}

/// A transactional integer cell.
#[derive(Debug, Default)]
pub struct TestCell {
    value: Mutex<i64>,
    lock: TransactionalLock,
}

impl TestCell {
    /// Creates a cell holding `value`.
    pub fn new(value: i64) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            lock: TransactionalLock::new(),
        })
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        *self.value.lock()
    }

    /// Sets the value on behalf of `txn`.
    pub fn set(self: &Arc<Self>, txn: &Transaction, value: i64) -> TxnResult<()> {
        lock_write(self, txn)?;
        *self.value.lock() = value;
        Ok(())
    }

    /// Returns the transaction currently holding the cell's write lock.
    pub fn holder(&self) -> Option<TransactionId> {
        self.lock.owner()
    }
}

impl TransactionalResource for TestCell {
    type Snapshot = i64;

    fn write_lock(&self) -> &TransactionalLock {
        &self.lock
    }

    fn take_snapshot(&self) -> i64 {
        self.get()
    }

    fn revert(&self, snapshot: i64) {
        *self.value.lock() = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_round_trip() {
        let env = TestEnv::new();
        let name = service_name("svc.fixture");
        env.in_update(|txn| {
            env.registry
                .get_or_create_registration(txn, &name)
                .expect("Failed to create registration");
        });
        assert!(env.registry.get_registration(&name).is_some());
        assert!(env.controller.admission_state().is_idle());
    }

    #[test]
    fn admission_log_records_order() {
        let env = TestEnv::new();
        let log = AdmissionLog::new();
        let txn = env
            .controller
            .create_read_transaction(TxnOptions::default(), log.listener())
            .unwrap();
        assert_eq!(log.position(&txn), Some(0));
        txn.abort().unwrap();
    }

    #[test]
    fn cell_reverts_on_abort() {
        let env = TestEnv::new();
        let cell = TestCell::new(1);
        let txn = env.update();
        cell.set(&txn, 2).unwrap();
        assert_eq!(cell.holder(), Some(txn.id()));
        txn.abort().unwrap();
        assert_eq!(cell.get(), 1);
        assert_eq!(cell.holder(), None);
    }
}
