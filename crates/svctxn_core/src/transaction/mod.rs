//! Transaction admission and lifecycle.
//!
//! - [`TransactionController`] admits transactions under reader/writer exclusion
//! - [`Transaction`] carries the lifecycle of one transaction
//! - [`PendingTransaction`] waits for admission on the calling thread

mod controller;
mod listener;
mod state;

pub use controller::{
    AdmissionSnapshot, Authorizer, TransactionController, TxnOptions,
    CREATE_CONTROLLER_PERMISSION,
};
pub use listener::{Listener, PendingTransaction};
pub(crate) use state::Participant;
pub use state::{Transaction, TransactionState};
