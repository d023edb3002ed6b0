//! Conversion between external camelCase names and internal snake_case columns.

/// Converts a camelCase name to snake_case.
///
/// Every uppercase letter that follows a lowercase letter or digit starts a
/// new word. Names that are already snake_case come back unchanged.
///
/// ```rust
/// use dso_core::naming::to_snake_case;
///
/// assert_eq!(to_snake_case("datumCreatie"), "datum_creatie");
/// assert_eq!(to_snake_case("datum_creatie"), "datum_creatie");
/// ```
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if previous.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
        previous = Some(ch);
    }
    out
}

/// Converts a snake_case name to camelCase.
///
/// ```rust
/// use dso_core::naming::to_camel_case;
///
/// assert_eq!(to_camel_case("eigenaar_naam"), "eigenaarNaam");
/// ```
#[must_use]
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' && !out.is_empty() {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_splits_words() {
        assert_eq!(to_snake_case("eigenaarNaam"), "eigenaar_naam");
        assert_eq!(to_snake_case("ligtInBuurt"), "ligt_in_buurt");
        assert_eq!(to_snake_case("id"), "id");
        assert_eq!(to_snake_case("code2Type"), "code2_type");
    }

    #[test]
    fn camel_case_joins_words() {
        assert_eq!(to_camel_case("datum_creatie"), "datumCreatie");
        assert_eq!(to_camel_case("id"), "id");
        assert_eq!(to_camel_case("begin_geldigheid"), "beginGeldigheid");
    }

    #[test]
    fn conversions_round_trip_for_schema_names() {
        for name in ["datumCreatie", "eigenaarNaam", "beginGeldigheid", "volgnummer"] {
            assert_eq!(to_camel_case(&to_snake_case(name)), name);
        }
    }
}
