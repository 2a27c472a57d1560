//! Structured validation errors.
//!
//! Validators collect every violated field before returning, so a caller
//! sees the whole list at once instead of fixing inputs one error at a time.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted path of the offending field (e.g. `budget.total`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Every field violation found while validating one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[error("invalid input: {}", Summary(&self.violations))]
pub struct Violations {
    violations: Vec<Violation>,
}

struct Summary<'a>(&'a [Violation]);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}

impl Violations {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection holding one violation.
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut v = Self::new();
        v.push(field, message);
        v
    }

    /// Record a violation.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Record a violation unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: impl Into<String>, message: impl Into<String>) {
        if !ok {
            self.push(field, message);
        }
    }

    /// Record a violation if `value` is empty or whitespace.
    pub fn require(&mut self, value: &str, field: &str) {
        self.check(!value.trim().is_empty(), field, "is required");
    }

    /// Record a violation if `value` is longer than `max` characters.
    pub fn max_len(&mut self, value: &str, field: &str, max: usize) {
        self.check(
            value.chars().count() <= max,
            field,
            format!("must be at most {max} characters"),
        );
    }

    /// Whether no violation was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// The recorded violations.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether `field` was flagged.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// `Ok(())` if empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns the collection itself when it holds at least one violation.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}
