//! Stress tests for svctxn.
//!
//! These helpers run many threads against one controller and count every
//! observed violation of reader/writer exclusion.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use svctxn_core::{Transaction, TransactionController, TxnOptions};
use svctxn_registry::{ServiceName, ServiceRegistry};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_txns: usize,
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that failed at any step.
    pub failed: usize,
    /// Observed overlaps of a writer with any other running transaction.
    pub exclusion_violations: usize,
    /// Largest number of readers observed running together.
    pub max_concurrent_readers: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub txns_per_second: f64,
}

impl StressTestResult {
    fn new(
        committed: usize,
        failed: usize,
        exclusion_violations: usize,
        max_concurrent_readers: usize,
        duration: Duration,
    ) -> Self {
        let total = committed + failed;
        let txns_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_txns: total,
            committed,
            failed,
            exclusion_violations,
            max_concurrent_readers,
            duration,
            txns_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_txns);
        println!("Committed: {}", self.committed);
        println!("Failed: {}", self.failed);
        println!("Exclusion violations: {}", self.exclusion_violations);
        println!("Max concurrent readers: {}", self.max_concurrent_readers);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txns/sec", self.txns_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transactions started by each thread.
    pub txns_per_thread: usize,
    /// Every n-th transaction of a thread is an update.
    pub update_every: usize,
    /// How long an admitted transaction stays running.
    pub hold: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            txns_per_thread: 200,
            update_every: 4,
            hold: Duration::from_micros(50),
        }
    }
}

impl StressConfig {
    /// Creates a configuration for quick runs.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            threads: 4,
            txns_per_thread: 50,
            update_every: 3,
            hold: Duration::from_micros(20),
        }
    }
}

#[derive(Default)]
struct Occupancy {
    readers: AtomicI64,
    writers: AtomicI64,
    max_readers: AtomicUsize,
    violations: AtomicUsize,
}

impl Occupancy {
    fn enter(&self, update: bool) {
        if update {
            let writers = self.writers.fetch_add(1, Ordering::SeqCst) + 1;
            if writers != 1 || self.readers.load(Ordering::SeqCst) != 0 {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            let readers = self.readers.fetch_add(1, Ordering::SeqCst) + 1;
            if self.writers.load(Ordering::SeqCst) != 0 {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
            self.max_readers
                .fetch_max(readers.max(0) as usize, Ordering::SeqCst);
        }
    }

    fn leave(&self, update: bool) {
        if update {
            self.writers.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.readers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn run_one(
    controller: &TransactionController,
    occupancy: &Occupancy,
    update: bool,
    hold: Duration,
    work: impl FnOnce(&Transaction) -> bool,
) -> bool {
    let pending = if update {
        controller.begin_update(TxnOptions::default())
    } else {
        controller.begin_read(TxnOptions::default())
    };
    let Ok(txn) = pending.and_then(|p| p.wait()) else {
        return false;
    };

    occupancy.enter(update);
    let ok = work(&txn);
    if !hold.is_zero() {
        thread::sleep(hold);
    }
    occupancy.leave(update);

    if !ok {
        let _ = controller.abort(&txn);
        return false;
    }
    controller.prepare(&txn).is_ok() && controller.commit(&txn).is_ok()
}

/// Runs a mixed read/update admission workload.
pub fn stress_admission(controller: &TransactionController, config: &StressConfig) -> StressTestResult {
    let occupancy = Arc::new(Occupancy::default());
    let committed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let update_every = config.update_every.max(1);

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let controller = controller.clone();
            let occupancy = Arc::clone(&occupancy);
            let committed = Arc::clone(&committed);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                for i in 0..config.txns_per_thread {
                    let update = (i + t) % update_every == 0;
                    if run_one(&controller, &occupancy, update, config.hold, |_| true) {
                        committed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        committed.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        occupancy.violations.load(Ordering::SeqCst),
        occupancy.max_readers.load(Ordering::SeqCst),
        start.elapsed(),
    )
}

/// Runs concurrent registrations and registry toggles against `registry`.
///
/// Every update transaction creates one registration and flips the
/// registry's enabled flag; read transactions look up registrations.
pub fn stress_registry(
    controller: &TransactionController,
    registry: &ServiceRegistry,
    config: &StressConfig,
) -> StressTestResult {
    let occupancy = Arc::new(Occupancy::default());
    let committed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let update_every = config.update_every.max(1);

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let controller = controller.clone();
            let registry = registry.clone();
            let occupancy = Arc::clone(&occupancy);
            let committed = Arc::clone(&committed);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                for i in 0..config.txns_per_thread {
                    let update = (i + t) % update_every == 0;
                    let Ok(name) = ServiceName::new(&format!("stress.t{t}.s{i}")) else {
                        failed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    };
                    let ok = run_one(&controller, &occupancy, update, config.hold, |txn| {
                        if update {
                            let created = registry.get_or_create_registration(txn, &name).is_ok();
                            let toggled = if registry.is_enabled() {
                                registry.disable(txn)
                            } else {
                                registry.enable(txn)
                            };
                            created && toggled.is_ok()
                        } else {
                            let _ = registry.get_registration(&name);
                            true
                        }
                    });
                    if ok {
                        committed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        committed.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        occupancy.violations.load(Ordering::SeqCst),
        occupancy.max_readers.load(Ordering::SeqCst),
        start.elapsed(),
    )
}
