//! Hierarchical service names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use svctxn_core::{TxnError, TxnResult};

/// A dot-separated service name, for example `jboss.web.connector`.
///
/// Names are immutable and cheap to clone. Empty names and empty segments are
/// rejected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    /// Segment separator.
    pub const SEPARATOR: char = '.';

    /// Parses a service name.
    pub fn new(name: &str) -> TxnResult<Self> {
        if name.is_empty() || name.split(Self::SEPARATOR).any(str::is_empty) {
            return Err(TxnError::invalid_argument("name"));
        }
        Ok(Self(Arc::from(name)))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR)
    }

    /// Returns the last segment.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.0
            .rsplit_once(Self::SEPARATOR)
            .map_or(&*self.0, |(_, last)| last)
    }

    /// Returns the enclosing name, or `None` for a top-level name.
    #[must_use]
    pub fn parent(&self) -> Option<ServiceName> {
        self.0
            .rsplit_once(Self::SEPARATOR)
            .map(|(parent, _)| Self(Arc::from(parent)))
    }

    /// Returns a child name with `segment` appended.
    ///
    /// `segment` may itself contain separators.
    pub fn append(&self, segment: &str) -> TxnResult<ServiceName> {
        let child = Self::new(segment)?;
        Ok(Self(Arc::from(format!("{}{}{}", self.0, Self::SEPARATOR, child.0))))
    }

    /// Returns true if `other` is nested anywhere below this name.
    #[must_use]
    pub fn is_parent_of(&self, other: &ServiceName) -> bool {
        other
            .0
            .strip_prefix(&*self.0)
            .is_some_and(|rest| rest.starts_with(Self::SEPARATOR))
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceName({})", self.0)
    }
}

impl FromStr for ServiceName {
    type Err = TxnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = TxnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0.to_string()
    }
}
