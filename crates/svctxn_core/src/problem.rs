//! Problem reporting for transactions.
//!
//! Failures that must not abort the operation that produced them (for example a
//! cascade that fails half way) are collected in the transaction's report. The
//! report decides whether a prepared transaction may still commit.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a reported problem, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something unexpected that does not threaten consistency.
    Warning,
    /// A failed operation.
    Error,
    /// A failure that always prevents commit.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A single reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// How serious the problem is.
    pub severity: Severity,
    /// Human readable description.
    pub message: String,
    /// What the problem is about, if known (for example a service name).
    pub subject: Option<String>,
}

impl Problem {
    /// Creates a problem with the given severity.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            subject: None,
        }
    }

    /// Creates an error-severity problem.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a warning-severity problem.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Attaches a subject to the problem.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Thread-safe collector of problems for one transaction.
#[derive(Debug, Default)]
pub struct ProblemReport {
    problems: Mutex<Vec<Problem>>,
}

impl ProblemReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a problem.
    pub fn add(&self, problem: Problem) {
        self.problems.lock().push(problem);
    }

    /// Returns a copy of all problems, in reporting order.
    pub fn problems(&self) -> Vec<Problem> {
        self.problems.lock().clone()
    }

    /// Returns the number of problems.
    pub fn len(&self) -> usize {
        self.problems.lock().len()
    }

    /// Returns true if nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.problems.lock().is_empty()
    }

    /// Returns the highest reported severity.
    pub fn max_severity(&self) -> Option<Severity> {
        self.problems.lock().iter().map(|p| p.severity).max()
    }

    /// Returns true if any problem is more severe than `limit`.
    pub fn exceeds(&self, limit: Severity) -> bool {
        self.problems.lock().iter().any(|p| p.severity > limit)
    }

    pub(crate) fn clear(&self) {
        self.problems.lock().clear();
    }
}
