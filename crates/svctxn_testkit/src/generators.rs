//! Property-based test generators using proptest.
//!
//! Provides strategies for random admission and registry operation
//! sequences.

use proptest::prelude::*;
use svctxn_registry::ServiceName;

/// An operation against a transaction controller.
///
/// Indexed operations pick a live transaction modulo the number of live ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOp {
    /// Request a read transaction
    BeginRead,
    /// Request an update transaction
    BeginUpdate,
    /// Upgrade a transaction
    Upgrade(usize),
    /// Downgrade a transaction
    Downgrade(usize),
    /// Write to a shared resource
    Mutate(usize),
    /// Prepare and commit a transaction
    Commit(usize),
    /// Abort a transaction
    Abort(usize),
    /// Drop the test's handle without terminating
    Drop(usize),
}

/// Strategy for generating admission operations.
pub fn admission_op_strategy() -> impl Strategy<Value = AdmissionOp> {
    let index = 0..16usize;
    prop_oneof![
        3 => Just(AdmissionOp::BeginRead),
        2 => Just(AdmissionOp::BeginUpdate),
        2 => index.clone().prop_map(AdmissionOp::Upgrade),
        2 => index.clone().prop_map(AdmissionOp::Downgrade),
        2 => index.clone().prop_map(AdmissionOp::Mutate),
        2 => index.clone().prop_map(AdmissionOp::Commit),
        2 => index.clone().prop_map(AdmissionOp::Abort),
        1 => index.prop_map(AdmissionOp::Drop),
    ]
}

/// Strategy for generating a sequence of admission operations.
pub fn admission_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<AdmissionOp>> {
    prop::collection::vec(admission_op_strategy(), min_ops..max_ops)
}

/// Strategy for generating valid hierarchical service names.
pub fn service_name_strategy() -> impl Strategy<Value = ServiceName> {
    prop::string::string_regex("[a-z]{1,6}(\\.[a-z]{1,6}){0,2}")
        .expect("Invalid regex")
        .prop_map(|s| ServiceName::new(&s).expect("Generated name must be valid"))
}

/// A structural operation against a service registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOp {
    /// Get or create a registration
    Create(ServiceName),
    /// Enable the registry
    Enable,
    /// Disable the registry
    Disable,
    /// Remove the registry
    Remove,
}

/// Strategy for generating registry operations.
pub fn registry_op_strategy() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        4 => service_name_strategy().prop_map(RegistryOp::Create),
        2 => Just(RegistryOp::Enable),
        2 => Just(RegistryOp::Disable),
        1 => Just(RegistryOp::Remove),
    ]
}

/// Strategy for generating a sequence of registry operations.
pub fn registry_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<RegistryOp>> {
    prop::collection::vec(registry_op_strategy(), min_ops..max_ops)
}

/// Case budget for the property tests in this workspace.
///
/// Runs use [`PropTestConfig::quick`] unless `SVCTXN_THOROUGH` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropTestConfig {
    /// Number of generated cases.
    pub cases: u32,
    /// Upper bound on shrink steps for a failing case.
    pub max_shrink_iters: u32,
}

impl PropTestConfig {
    /// Small budget for routine runs.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 200,
        }
    }

    /// Large budget for soak runs.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 4096,
        }
    }

    /// Picks [`thorough`](Self::thorough) when `SVCTXN_THOROUGH` is set.
    #[must_use]
    pub fn from_env() -> Self {
        if std::env::var_os("SVCTXN_THOROUGH").is_some() {
            Self::thorough()
        } else {
            Self::quick()
        }
    }

    /// Builds the proptest runner configuration.
    #[must_use]
    pub fn to_proptest_config(self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn generated_names_are_hierarchical(name in service_name_strategy()) {
            prop_assert!(!name.as_str().is_empty());
            if let Some(parent) = name.parent() {
                prop_assert!(parent.is_parent_of(&name));
            }
        }

        #[test]
        fn sequences_respect_bounds(ops in admission_sequence_strategy(5, 20)) {
            prop_assert!(ops.len() >= 5);
            prop_assert!(ops.len() < 20);
        }
    }

    #[test]
    fn thorough_budget_exceeds_quick() {
        let quick = PropTestConfig::quick().to_proptest_config();
        let thorough = PropTestConfig::thorough().to_proptest_config();
        assert!(thorough.cases > quick.cases);
        assert!(thorough.max_shrink_iters > quick.max_shrink_iters);
        if std::env::var_os("SVCTXN_THOROUGH").is_none() {
            assert_eq!(PropTestConfig::from_env(), PropTestConfig::quick());
        }
    }
}
