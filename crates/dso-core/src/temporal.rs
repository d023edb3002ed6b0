//! Temporal identifiers.
//!
//! Rows of a temporal dataset carry a composite primary key of the form
//! `identifier@version`. The API exposes the bare identifier and addresses the
//! version through a query parameter.

/// Separator between identifier and version in temporal primary keys.
pub const TEMPORAL_SEPARATOR: char = '@';

/// Splits a temporal primary key into identifier and version.
///
/// The split happens on the last separator. Values without a separator are
/// returned as-is with no version.
#[must_use]
pub fn split_on_separator(value: &str) -> (&str, Option<&str>) {
    match value.rsplit_once(TEMPORAL_SEPARATOR) {
        Some((identifier, version)) => (identifier, Some(version)),
        None => (value, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn join_with_separator(identifier: &str, version: &str) -> String {
        format!("{identifier}{TEMPORAL_SEPARATOR}{version}")
    }

    #[test]
    fn splits_composite_key() {
        assert_eq!(split_on_separator("abc@2"), ("abc", Some("2")));
        assert_eq!(split_on_separator("abc"), ("abc", None));
        assert_eq!(split_on_separator("03630000000001@1"), ("03630000000001", Some("1")));
    }

    #[test]
    fn joins_composite_key() {
        assert_eq!(join_with_separator("abc", "2"), "abc@2");
    }

    proptest! {
        #[test]
        fn split_then_join_reconstructs(identifier in "[^@]{0,24}", version in "[^@]{0,8}") {
            let composite = join_with_separator(&identifier, &version);
            let (id, ver) = split_on_separator(&composite);
            prop_assert_eq!(id, identifier.as_str());
            prop_assert_eq!(ver, Some(version.as_str()));
            prop_assert_eq!(join_with_separator(id, ver.unwrap_or_default()), composite);
        }
    }
}
