//! Authorization scopes and field-access profiles.
//!
//! Every check here is monotonic: adding a scope to a caller's set can only
//! grant access, never revoke it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// The set of scopes held by the caller of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationScopeSet(BTreeSet<String>);

impl AuthorizationScopeSet {
    /// Creates a scope set from any iterator of scope names.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(scopes.into_iter().map(Into::into).collect())
    }

    /// Creates an empty scope set (anonymous caller).
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns true when the caller holds `scope`.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Returns true when `requirement` is absent or fully held.
    #[must_use]
    pub fn satisfies(&self, requirement: Option<&ScopeRequirement>) -> bool {
        requirement.is_none_or(|r| r.is_satisfied_by(self))
    }

    /// Iterates the held scopes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns true when no scopes are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Scopes attached to a schema element; every listed scope is required.
///
/// Deserializes from either a single scope string or a list of scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScopeRequirement(Vec<String>);

impl ScopeRequirement {
    /// Creates a requirement for the given scopes.
    pub fn all_of<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(scopes.into_iter().map(Into::into).collect())
    }

    /// Returns true when `held` contains every required scope.
    #[must_use]
    pub fn is_satisfied_by(&self, held: &AuthorizationScopeSet) -> bool {
        self.0.iter().all(|scope| held.contains(scope))
    }

    /// Returns the required scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ScopeRequirement {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(scope) => Self(vec![scope]),
            Raw::Many(scopes) => Self(scopes),
        })
    }
}

/// Permission a profile grants on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldPermission {
    /// Full read access regardless of the field's own scope.
    Read,
    /// Any permission this service does not interpret.
    #[serde(other)]
    Unknown,
}

/// Field grants for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProfile {
    /// External field name to permission.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldPermission>,
}

/// Table grants for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetProfile {
    /// Table name to grants.
    #[serde(default)]
    pub tables: BTreeMap<String, TableProfile>,
}

/// A named bundle of field grants, active for callers holding all its scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name.
    pub name: String,
    /// Scopes that activate this profile.
    pub scopes: Vec<String>,
    /// Dataset id to grants.
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetProfile>,
}

impl Profile {
    /// Returns true when the caller holds every activating scope.
    #[must_use]
    pub fn is_active_for(&self, held: &AuthorizationScopeSet) -> bool {
        self.scopes.iter().all(|scope| held.contains(scope))
    }

    fn grants_read(&self, dataset: &str, table: &str, field: &str) -> bool {
        self.datasets
            .get(dataset)
            .and_then(|d| d.tables.get(table))
            .and_then(|t| t.fields.get(field))
            .is_some_and(|permission| *permission == FieldPermission::Read)
    }
}

/// All configured profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSet(Vec<Profile>);

impl ProfileSet {
    /// Creates a profile set.
    #[must_use]
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self(profiles)
    }

    /// Parses a profiles document (a JSON array of profiles).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] when the document is malformed.
    pub fn from_json(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(Error::from)
    }

    /// Returns true when an active profile grants read on the field.
    #[must_use]
    pub fn grants_field_read(
        &self,
        held: &AuthorizationScopeSet,
        dataset: &str,
        table: &str,
        field: &str,
    ) -> bool {
        self.0
            .iter()
            .any(|p| p.is_active_for(held) && p.grants_read(dataset, table, field))
    }

    /// Returns the number of configured profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no profiles are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES: &str = r#"[{
        "name": "brk_readall",
        "scopes": ["BRK/RSN"],
        "datasets": {
            "afvalwegingen": {
                "tables": {"containers": {"fields": {"eigenaarNaam": "read", "serienummer": "letters:1"}}}
            }
        }
    }]"#;

    #[test]
    fn requirement_accepts_string_or_list() {
        let one: ScopeRequirement = serde_json::from_str(r#""BAG/R""#).expect("string");
        let many: ScopeRequirement = serde_json::from_str(r#"["A", "B"]"#).expect("list");
        assert_eq!(one.scopes(), ["BAG/R".to_string()]);
        assert_eq!(many.scopes().len(), 2);
    }

    #[test]
    fn requirement_needs_every_scope() {
        let requirement = ScopeRequirement::all_of(["A", "B"]);
        assert!(!requirement.is_satisfied_by(&AuthorizationScopeSet::new(["A"])));
        assert!(requirement.is_satisfied_by(&AuthorizationScopeSet::new(["A", "B", "C"])));
    }

    #[test]
    fn absent_requirement_is_public() {
        assert!(AuthorizationScopeSet::anonymous().satisfies(None));
    }

    #[test]
    fn adding_scopes_never_revokes_access() {
        let requirement = ScopeRequirement::all_of(["A"]);
        let mut held = vec!["A".to_string()];
        for extra in ["B", "C", "D"] {
            held.push(extra.to_string());
            assert!(AuthorizationScopeSet::new(held.clone()).satisfies(Some(&requirement)));
        }
    }

    #[test]
    fn active_profile_grants_field_read() {
        let profiles = ProfileSet::from_json(PROFILES).expect("profiles");
        let token = AuthorizationScopeSet::new(["BRK/RO", "BRK/RSN"]);
        assert!(profiles.grants_field_read(&token, "afvalwegingen", "containers", "eigenaarNaam"));
        assert!(!profiles.grants_field_read(&token, "afvalwegingen", "containers", "serienummer"));
        assert!(!profiles.grants_field_read(&token, "afvalwegingen", "clusters", "eigenaarNaam"));
    }

    #[test]
    fn inactive_profile_grants_nothing() {
        let profiles = ProfileSet::from_json(PROFILES).expect("profiles");
        let token = AuthorizationScopeSet::new(["BRK/RO"]);
        assert!(!profiles.grants_field_read(&token, "afvalwegingen", "containers", "eigenaarNaam"));
    }
}
