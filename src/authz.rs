//! Group-based authorization.

use crate::oidc::IdClaims;

/// Why a user could not be authorized
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error(
        "Your account belongs to too many groups for them to be included in the sign-in token. \
         An administrator must configure the app registration to emit only groups assigned to \
         the application (\"Groups assigned to the application\" in the token configuration)."
    )]
    GroupOverage,

    #[error(
        "The sign-in token did not contain any group information. An administrator must add a \
         groups claim (security groups) to the app registration's token configuration."
    )]
    GroupClaimMissing,
}

/// Decides whether an authenticated user may use the application.
#[derive(Debug, Clone)]
pub struct GroupAuthorizer {
    required_group: Option<String>,
}

impl GroupAuthorizer {
    pub fn new(required_group: Option<String>) -> Self {
        if required_group.is_none() {
            tracing::warn!("ALLOWED_GROUP_ID not set, every authenticated user will be authorized");
        }
        Self { required_group }
    }

    pub fn required_group(&self) -> Option<&str> {
        self.required_group.as_deref()
    }

    /// Evaluate the claims of a freshly verified ID token.
    ///
    /// A present `groups` list wins over any overage indicator.
    pub fn evaluate(&self, claims: &IdClaims) -> Result<bool, AuthzError> {
        let Some(required) = &self.required_group else {
            tracing::info!(sub = %claims.sub, "No group required, authorizing");
            return Ok(true);
        };

        if let Some(groups) = &claims.groups {
            let member = groups.iter().any(|g| g == required);
            tracing::info!(
                sub = %claims.sub,
                group_count = groups.len(),
                member,
                "Evaluated group membership"
            );
            return Ok(member);
        }

        if claims.has_group_overage() {
            tracing::warn!(sub = %claims.sub, "Group overage in ID token");
            return Err(AuthzError::GroupOverage);
        }

        tracing::warn!(sub = %claims.sub, "ID token carries no groups claim");
        Err(AuthzError::GroupClaimMissing)
    }
}
