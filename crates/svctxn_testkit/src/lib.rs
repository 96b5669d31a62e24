//! # svctxn Testkit
//!
//! Test utilities for svctxn.
//!
//! This crate provides:
//! - Test fixtures (controller/registry environment, recording listeners and observers)
//! - Property-based test generators using proptest
//! - An admission driver that checks reader/writer invariants step by step
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use svctxn_testkit::prelude::*;
//!
//! let env = TestEnv::new();
//! let name = service_name("jboss.web");
//! env.in_update(|txn| {
//!     env.registry.get_or_create_registration(txn, &name).unwrap();
//! });
//! assert!(env.registry.get_registration(&name).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod model;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use model::*;
pub use stress::*;
