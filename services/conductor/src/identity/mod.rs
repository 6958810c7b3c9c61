//! Identity engine.
//!
//! Creates and revokes the per-resource trustee user and the trust delegating
//! the owner's roles to it.

mod keystone;
mod mock;
mod trust;

pub use keystone::KeystoneClient;
pub use mock::MockIdentity;
pub use trust::{
    authorize_context, generate_password, provision_credentials, revoke_credentials,
    PASSWORD_LENGTH,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Owner, TrustCredentials};

pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("failed to create trustee {name}: {message}")]
    TrusteeCreateFailed { name: String, message: String },

    #[error("failed to create trust for trustee {trustee_user_id}: {message}")]
    TrustCreateFailed {
        trustee_user_id: String,
        message: String,
    },

    #[error("failed to delete trust {trust_id}: {message}")]
    TrustDeleteFailed { trust_id: String, message: String },

    #[error("failed to delete trustee {trustee_user_id}: {message}")]
    TrusteeDeleteFailed {
        trustee_user_id: String,
        message: String,
    },

    #[error("failed to obtain a token for trust {trust_id}: {message}")]
    TokenIssueFailed { trust_id: String, message: String },

    /// The identity service could not be reached.
    #[error("identity service unavailable: {0}")]
    Transport(String),
}

/// A service user created to act on behalf of a resource owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trustee {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn create_trustee(
        &self,
        name: &str,
        password: &str,
        domain_id: &str,
    ) -> IdentityResult<Trustee>;

    /// Delegate the owner's roles to the trustee; returns the trust id.
    async fn create_trust(&self, owner: &Owner, trustee_user_id: &str) -> IdentityResult<String>;

    /// Revoke a trust. Revoking an unknown trust succeeds.
    async fn delete_trust(&self, trust_id: &str) -> IdentityResult<()>;

    /// Delete a trustee. Deleting an unknown trustee succeeds.
    async fn delete_trustee(&self, trustee_user_id: &str) -> IdentityResult<()>;

    /// Authenticate as the trustee and return a token scoped to the trust.
    async fn issue_trust_token(&self, trust: &TrustCredentials) -> IdentityResult<String>;
}
