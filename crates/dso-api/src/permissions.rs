//! Scope checks on datasets, tables and fields.

use std::collections::BTreeSet;

use dso_core::scopes::{AuthorizationScopeSet, ProfileSet};
use dso_registry::ResourceDefinition;

use crate::error::ApiError;

/// Checks the dataset and table scopes of `resource`.
///
/// # Errors
///
/// Returns a 403 [`ApiError`] when either scope is not held.
pub fn check_access(
    resource: &ResourceDefinition,
    scopes: &AuthorizationScopeSet,
) -> Result<(), ApiError> {
    if !scopes.satisfies(resource.dataset_auth()) {
        return Err(ApiError::forbidden(format!(
            "You do not have permission to access dataset '{}'.",
            resource.dataset_id()
        )));
    }
    if !scopes.satisfies(resource.table_auth()) {
        return Err(ApiError::forbidden(format!(
            "You do not have permission to access table '{}'.",
            resource.name()
        )));
    }
    Ok(())
}

/// Returns true when the caller passes the dataset and table scopes.
#[must_use]
pub fn can_access(resource: &ResourceDefinition, scopes: &AuthorizationScopeSet) -> bool {
    check_access(resource, scopes).is_ok()
}

/// Returns the external names of fields the caller may not read.
///
/// A field is hidden when its own scope is not held and no active profile
/// grants read on it.
#[must_use]
pub fn hidden_fields(
    resource: &ResourceDefinition,
    scopes: &AuthorizationScopeSet,
    profiles: &ProfileSet,
) -> BTreeSet<String> {
    resource
        .fields()
        .iter()
        .filter(|field| {
            !scopes.satisfies(field.auth.as_ref())
                && !profiles.grants_field_read(
                    scopes,
                    resource.dataset_id(),
                    resource.name(),
                    &field.name,
                )
        })
        .map(|field| field.name.clone())
        .collect()
}
