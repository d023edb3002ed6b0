//! Wildcard patterns to SQL `LIKE` patterns.

/// Converts a user wildcard pattern into a `LIKE` pattern with `\` as escape.
///
/// `*` matches zero or more characters and `?` exactly one. Literal `\`, `%`
/// and `_` in the input are escaped first so they only match themselves.
#[must_use]
pub fn wildcard_to_like(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        match ch {
            '\\' => pattern.push_str("\\\\"),
            '%' => pattern.push_str("\\%"),
            '_' => pattern.push_str("\\_"),
            '*' => pattern.push('%'),
            '?' => pattern.push('_'),
            other => pattern.push(other),
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use dso_core::query::like_match;
    use proptest::prelude::*;

    #[test]
    fn escapes_before_translating() {
        assert_eq!(wildcard_to_like("foo*"), "foo%");
        assert_eq!(wildcard_to_like("f?o"), "f_o");
        assert_eq!(wildcard_to_like("100%_\\"), "100\\%\\_\\\\");
    }

    #[test]
    fn literal_percent_only_matches_itself() {
        let pattern = wildcard_to_like("foo%bar");
        assert!(like_match("foo%bar", &pattern));
        assert!(!like_match("fooXbar", &pattern));
        assert!(!like_match("foo%%bar", &pattern));
    }

    proptest! {
        #[test]
        fn text_without_wildcards_matches_only_itself(
            text in "[a-z%_\\\\]{0,12}",
            other in "[a-z%_\\\\]{0,12}",
        ) {
            let pattern = wildcard_to_like(&text);
            prop_assert!(like_match(&text, &pattern));
            prop_assert_eq!(like_match(&other, &pattern), other == text);
        }

        #[test]
        fn star_prefix_matches_any_prefix(prefix in "[a-z%_]{0,8}", text in "[a-z%_]{0,8}") {
            let pattern = wildcard_to_like(&format!("*{text}"));
            let candidate = format!("{prefix}{text}");
            prop_assert!(like_match(&candidate, &pattern));
        }
    }
}
