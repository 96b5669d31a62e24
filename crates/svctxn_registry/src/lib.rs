//! # svctxn Registry
//!
//! Transactional service registry for svctxn.
//!
//! A [`ServiceRegistry`] maps hierarchical [`ServiceName`]s to
//! [`Registration`]s. Lookups never block; structural changes run inside an
//! update transaction of the registry's controller and are undone if that
//! transaction rolls back.
//!
//! ## Example
//!
//! ```rust
//! use svctxn_core::{TransactionController, TxnOptions};
//! use svctxn_registry::{ServiceName, ServiceRegistry};
//!
//! let controller = TransactionController::new();
//! let registry = ServiceRegistry::new(&controller);
//! let name = ServiceName::new("jboss.web")?;
//!
//! let txn = controller.begin_update(TxnOptions::default())?.wait()?;
//! let registration = registry.get_or_create_registration(&txn, &name)?;
//! assert!(registration.is_registry_enabled());
//! controller.prepare(&txn)?;
//! controller.commit(&txn)?;
//!
//! assert!(registry.get_registration(&name).is_some());
//! # Ok::<(), svctxn_core::TxnError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod name;
mod registration;
mod registry;

pub use name::ServiceName;
pub use registration::{Registration, RegistrationObserver};
pub use registry::{RegistrySnapshot, ServiceRegistry};
