//! Estimation scales.
//!
//! A scale is a named, strictly increasing sequence of positive vote values.
//! Sessions pick a scale from the built-in catalog at creation time; the
//! scale is immutable for the session's lifetime.

use serde::Serialize;
use thiserror::Error;

/// Catalog values for the `fibonacci` scale.
const FIBONACCI_VALUES: &[u32] = &[1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144];

/// Catalog values for the `workingdays` scale.
const WORKING_DAYS_VALUES: &[u32] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];

/// Error rejecting a malformed scale definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidScaleError {
    /// The scale has no values.
    #[error("scale '{0}' has no values")]
    Empty(String),

    /// The scale contains zero (votes are positive integers).
    #[error("scale '{0}' contains zero")]
    Zero(String),

    /// The values are not strictly increasing.
    #[error("scale '{0}' is not strictly increasing")]
    NotAscending(String),
}

/// A named estimation scale.
///
/// Invariant: `values` is non-empty, strictly increasing, and positive.
/// Enforced at construction so aggregation code can rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scale {
    name: String,
    values: Vec<u32>,
}

impl Scale {
    /// Creates a scale from a name and a value sequence.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidScaleError`] if the sequence is empty, contains
    /// zero, or is not strictly increasing.
    pub fn new(name: impl Into<String>, values: Vec<u32>) -> Result<Self, InvalidScaleError> {
        let name = name.into();
        if values.is_empty() {
            return Err(InvalidScaleError::Empty(name));
        }
        if values.first().is_some_and(|value| *value == 0) {
            return Err(InvalidScaleError::Zero(name));
        }
        if !values.windows(2).all(|pair| matches!(pair, [a, b] if a < b)) {
            return Err(InvalidScaleError::NotAscending(name));
        }
        Ok(Self { name, values })
    }

    /// Looks up a scale in the built-in catalog.
    ///
    /// Known names: `fibonacci`, `workingdays`.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        let values = match name {
            "fibonacci" => FIBONACCI_VALUES,
            "workingdays" => WORKING_DAYS_VALUES,
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            values: values.to_vec(),
        })
    }

    /// Returns the scale name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the scale values in ascending order.
    #[must_use]
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Returns the largest scale value.
    #[must_use]
    pub fn max(&self) -> u32 {
        // Non-empty by construction.
        self.values.last().copied().unwrap_or(0)
    }
}
