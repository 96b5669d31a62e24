//! Error types for svctxn core.

use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors raised by the controller, transactions and transactional resources.
///
/// Validation errors are raised before any state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnError {
    /// A required argument is missing or has an illegal value.
    #[error("invalid argument: {name}")]
    InvalidArgument {
        /// Name of the offending argument.
        name: String,
    },

    /// The environment refused a permission check.
    #[error("permission denied: {permission}")]
    PermissionDenied {
        /// The permission that was checked.
        permission: String,
    },

    /// The transaction was not created by the controller it was handed to.
    #[error("transaction not created by this controller")]
    OwnershipMismatch,

    /// The transaction is not in a state that allows the operation.
    #[error("invalid transaction state: {message}")]
    InvalidTransactionState {
        /// Description of why the state is invalid.
        message: String,
    },

    /// Structural operation on a resource that has been removed.
    #[error("resource removed: {resource}")]
    ResourceRemoved {
        /// Description of the removed resource.
        resource: String,
    },

    /// A required entry does not exist.
    #[error("not found: {name}")]
    NotFound {
        /// Name that was looked up.
        name: String,
    },

    /// A pending admission can never complete because its controller is gone.
    #[error("transaction admission abandoned")]
    AdmissionAbandoned,
}

impl TxnError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(name: impl Into<String>) -> Self {
        Self::InvalidArgument { name: name.into() }
    }

    /// Creates a permission denied error.
    pub fn permission_denied(permission: impl Into<String>) -> Self {
        Self::PermissionDenied {
            permission: permission.into(),
        }
    }

    /// Creates an invalid transaction state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidTransactionState {
            message: message.into(),
        }
    }

    /// Creates a resource removed error.
    pub fn resource_removed(resource: impl Into<String>) -> Self {
        Self::ResourceRemoved {
            resource: resource.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Returns true if the error reports an invalid transaction state.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidTransactionState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            TxnError::OwnershipMismatch.to_string(),
            "transaction not created by this controller"
        );
        let err = TxnError::invalid_state("transaction already prepared");
        assert!(err.to_string().contains("already prepared"));
        assert!(err.is_invalid_state());
    }

    #[test]
    fn constructors_fill_fields() {
        assert_eq!(
            TxnError::not_found("jboss.web"),
            TxnError::NotFound {
                name: "jboss.web".into()
            }
        );
        assert!(matches!(
            TxnError::resource_removed("registry"),
            TxnError::ResourceRemoved { .. }
        ));
        assert!(!TxnError::invalid_argument("name").is_invalid_state());
    }
}
