//! Error types for filter and ordering parameters.

use serde::Serialize;
use thiserror::Error;

/// One rejected query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidParam {
    /// The parameter as sent, e.g. `datumCreatie[gte]`.
    pub name: String,
    /// Human-readable reason.
    pub reason: String,
}

impl InvalidParam {
    /// Creates a new entry.
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Query parameters could not be turned into a store query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// One or more parameters are malformed. Maps to HTTP 400.
    #[error("invalid query parameters: {}", summarize(.0))]
    Invalid(Vec<InvalidParam>),

    /// A parameter references a field the caller may not read. Maps to HTTP 403.
    #[error("access to field '{field}' is not allowed")]
    Forbidden {
        /// External field name.
        field: String,
    },
}

impl FilterError {
    /// A single invalid parameter.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid(vec![InvalidParam::new(name, reason)])
    }

    /// Returns the invalid parameters; empty for [`FilterError::Forbidden`].
    #[must_use]
    pub fn invalid_params(&self) -> &[InvalidParam] {
        match self {
            Self::Invalid(params) => params,
            Self::Forbidden { .. } => &[],
        }
    }
}

fn summarize(params: &[InvalidParam]) -> String {
    params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_parameter() {
        let err = FilterError::Invalid(vec![
            InvalidParam::new("id[lt]", "Enter a whole number."),
            InvalidParam::new("naam[gt]", "Lookup 'gt' is not supported for field 'naam'."),
        ]);
        let text = err.to_string();
        assert!(text.contains("id[lt]: Enter a whole number."));
        assert!(text.contains("naam[gt]"));
        assert_eq!(err.invalid_params().len(), 2);
    }

    #[test]
    fn forbidden_has_no_invalid_params() {
        let err = FilterError::Forbidden {
            field: "eigenaarNaam".into(),
        };
        assert!(err.invalid_params().is_empty());
        assert_eq!(err.to_string(), "access to field 'eigenaarNaam' is not allowed");
    }
}
