//! Provisioning and revocation of a resource's delegated credentials.

use rand::Rng;
use tracing::{debug, info, warn};

use super::{Identity, IdentityError, IdentityResult};
use crate::context::OperationContext;
use crate::model::{Owner, TrustCredentials};

/// Length of generated trustee passwords.
pub const PASSWORD_LENGTH: usize = 18;

const PASSWORD_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARS[rng.random_range(0..PASSWORD_CHARS.len())] as char)
        .collect()
}

/// Create a trustee named after the resource and a trust from the owner to it.
///
/// When the trust cannot be created the trustee is removed again, so a
/// failure never leaves a half-provisioned identity behind.
pub async fn provision_credentials(
    identity: &dyn Identity,
    owner: &Owner,
    trustee_name: &str,
    domain_id: &str,
) -> IdentityResult<TrustCredentials> {
    let password = generate_password();
    let trustee = identity
        .create_trustee(trustee_name, &password, domain_id)
        .await?;

    let trust_id = match identity.create_trust(owner, &trustee.id).await {
        Ok(trust_id) => trust_id,
        Err(err) => {
            if let Err(cleanup) = identity.delete_trustee(&trustee.id).await {
                warn!(
                    trustee_user_id = %trustee.id,
                    error = %cleanup,
                    "Failed to remove trustee after trust creation failed"
                );
            }
            return Err(err);
        }
    };

    info!(trustee = %trustee.name, trust_id = %trust_id, "Provisioned delegated credentials");
    Ok(TrustCredentials {
        trustee_username: trustee.name,
        trustee_user_id: trustee.id,
        trustee_password: password,
        trust_id,
    })
}

/// Revoke the trust, then delete the trustee.
///
/// Both steps are attempted; the first failure is returned.
pub async fn revoke_credentials(
    identity: &dyn Identity,
    credentials: &TrustCredentials,
) -> IdentityResult<()> {
    let trust = identity.delete_trust(&credentials.trust_id).await;
    let trustee = identity.delete_trustee(&credentials.trustee_user_id).await;

    match (trust, trustee) {
        (Err(err), _) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => {
            info!(trust_id = %credentials.trust_id, "Revoked delegated credentials");
            Ok(())
        }
    }
}

/// Attach a trust-scoped token to `ctx` unless it has one or holds no trust.
pub async fn authorize_context(
    identity: &dyn Identity,
    ctx: OperationContext,
) -> IdentityResult<OperationContext> {
    let Some(trust) = ctx.trust.as_ref().filter(|_| ctx.needs_token()) else {
        return Ok(ctx);
    };
    let token = identity.issue_trust_token(trust).await?;
    debug!(trust_id = %trust.trust_id, "Issued trust-scoped token");
    Ok(ctx.with_token(token))
}

impl IdentityError {
    /// Failures raised while tearing credentials down.
    pub fn is_revocation(&self) -> bool {
        matches!(
            self,
            Self::TrustDeleteFailed { .. } | Self::TrusteeDeleteFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MockIdentity;
    use oasis_id::RequestId;

    fn owner() -> Owner {
        Owner {
            project_id: "proj".to_string(),
            user_id: "user".to_string(),
        }
    }

    #[test]
    fn passwords_have_fixed_length_and_vary() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), PASSWORD_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn provision_creates_trustee_and_trust() {
        let identity = MockIdentity::new();
        let creds = provision_credentials(&identity, &owner(), "fn_123", "default")
            .await
            .unwrap();

        assert_eq!(creds.trustee_username, "fn_123");
        assert_eq!(identity.live_trustees(), 1);
        assert_eq!(identity.live_trusts(), 1);
    }

    #[tokio::test]
    async fn trust_failure_removes_trustee() {
        let identity = MockIdentity::new();
        identity.fail_trust_creation();

        let err = provision_credentials(&identity, &owner(), "fn_123", "default")
            .await
            .unwrap_err();

        assert!(matches!(err, IdentityError::TrustCreateFailed { .. }));
        assert_eq!(identity.live_trustees(), 0);
    }

    #[tokio::test]
    async fn revoke_attempts_both_steps() {
        let identity = MockIdentity::new();
        let creds = provision_credentials(&identity, &owner(), "fn_123", "default")
            .await
            .unwrap();
        identity.fail_trust_deletion();

        let err = revoke_credentials(&identity, &creds).await.unwrap_err();

        assert!(err.is_revocation());
        assert_eq!(identity.live_trustees(), 0);
        assert_eq!(identity.live_trusts(), 1);
    }

    #[tokio::test]
    async fn context_with_trust_gets_a_scoped_token() {
        let identity = MockIdentity::new();
        let creds = provision_credentials(&identity, &owner(), "fn_123", "default")
            .await
            .unwrap();
        let ctx = OperationContext::new(RequestId::new(), owner()).with_trust(Some(creds.clone()));

        let ctx = authorize_context(&identity, ctx).await.unwrap();
        assert_eq!(ctx.token, Some(format!("token-for-{}", creds.trust_id)));

        let again = authorize_context(&identity, ctx).await.unwrap();
        assert!(again.token.is_some());
        assert_eq!(identity.tokens_issued(), 1);
    }

    #[tokio::test]
    async fn context_without_trust_stays_unscoped() {
        let identity = MockIdentity::new();
        let ctx = authorize_context(&identity, OperationContext::new(RequestId::new(), owner()))
            .await
            .unwrap();

        assert!(ctx.token.is_none());
        assert_eq!(identity.tokens_issued(), 0);
    }

    #[tokio::test]
    async fn revoked_trust_cannot_issue_tokens() {
        let identity = MockIdentity::new();
        let creds = provision_credentials(&identity, &owner(), "fn_123", "default")
            .await
            .unwrap();
        revoke_credentials(&identity, &creds).await.unwrap();

        let ctx = OperationContext::new(RequestId::new(), owner()).with_trust(Some(creds));
        let err = authorize_context(&identity, ctx).await.unwrap_err();
        assert!(matches!(err, IdentityError::TokenIssueFailed { .. }));
    }
}
