//! # svctxn Core
//!
//! Transaction admission and lifecycle for svctxn.
//!
//! This crate provides:
//! - An admission controller with reader/writer exclusion and a FIFO queue
//! - Upgrade and downgrade of running transactions
//! - A prepare/commit/abort/restart lifecycle with problem reporting
//! - The snapshot/revert protocol for transactional resources
//!
//! ## Admission
//!
//! Any number of read transactions may run together; an update transaction
//! runs alone. A new read request joins running readers only if no request is
//! queued, so a waiting update is never starved by a stream of readers.
//!
//! ## Example
//!
//! ```rust
//! use svctxn_core::{TransactionController, TxnKind, TxnOptions};
//!
//! let controller = TransactionController::new();
//! let reader = controller.begin_read(TxnOptions::default())?.wait()?;
//! assert_eq!(reader.kind(), TxnKind::Read);
//!
//! // Alone, so the upgrade happens in place.
//! let upgraded = controller.begin_upgrade(&reader)?.expect("queue is empty");
//! let writer = upgraded.wait()?;
//! assert_eq!(writer.kind(), TxnKind::Update);
//!
//! controller.prepare(&writer)?;
//! controller.commit(&writer)?;
//! # Ok::<(), svctxn_core::TxnError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod executor;
mod problem;
mod resource;
mod stats;
mod transaction;
mod types;

pub use config::ControllerConfig;
pub use error::{TxnError, TxnResult};
pub use executor::{InlineExecutor, Task, TaskExecutor, ThreadExecutor};
pub use problem::{Problem, ProblemReport, Severity};
pub use resource::{lock_write, TransactionalLock, TransactionalResource};
pub use stats::{ControllerStats, StatsSnapshot};
pub use transaction::{
    AdmissionSnapshot, Authorizer, Listener, PendingTransaction, Transaction,
    TransactionController, TransactionState, TxnOptions, CREATE_CONTROLLER_PERMISSION,
};
pub use types::{ControllerId, MutationOutcome, TransactionId, TxnKind};
