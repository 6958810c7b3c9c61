//! Per-operation context.
//!
//! Background work never reads ambient request state: every orchestrator or
//! identity call made on behalf of an owner receives the context that was
//! captured when the operation was submitted.

use std::fmt;

use oasis_id::RequestId;

use crate::model::{ManagedResource, Owner, TrustCredentials};

/// Context carried by one operation and its reconciliation loop.
///
/// Only the cached token changes after submission.
#[derive(Clone)]
pub struct OperationContext {
    pub request_id: RequestId,
    pub owner: Owner,
    /// Delegated credentials, when the resource still holds them.
    pub trust: Option<TrustCredentials>,
    /// Token scoped to `trust`; orchestrator calls fall back to the service
    /// token only when there is no trust.
    pub token: Option<String>,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("request_id", &self.request_id)
            .field("owner", &self.owner)
            .field("trust", &self.trust)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OperationContext {
    pub fn new(request_id: RequestId, owner: Owner) -> Self {
        Self {
            request_id,
            owner,
            trust: None,
            token: None,
        }
    }

    /// Context for work on an existing resource, carrying its credentials.
    pub fn for_resource(request_id: RequestId, resource: &ManagedResource) -> Self {
        Self {
            request_id,
            owner: resource.owner.clone(),
            trust: resource.trust.clone(),
            token: None,
        }
    }

    #[must_use]
    pub fn with_trust(mut self, trust: Option<TrustCredentials>) -> Self {
        self.trust = trust;
        self.token = None;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// True when calls should carry a trust-scoped token that is not held yet.
    pub fn needs_token(&self) -> bool {
        self.trust.is_some() && self.token.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner {
            project_id: "proj".to_string(),
            user_id: "user".to_string(),
        }
    }

    fn trust() -> TrustCredentials {
        TrustCredentials {
            trustee_username: "fn_1".to_string(),
            trustee_user_id: "user-1".to_string(),
            trustee_password: "secret".to_string(),
            trust_id: "trust-1".to_string(),
        }
    }

    #[test]
    fn debug_output_hides_token() {
        let ctx = OperationContext::new(RequestId::new(), owner())
            .with_trust(Some(trust()))
            .with_token("tok-abc");
        let printed = format!("{ctx:?}");

        assert!(!printed.contains("tok-abc"));
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn dropping_trust_drops_its_token() {
        let ctx = OperationContext::new(RequestId::new(), owner())
            .with_trust(Some(trust()))
            .with_token("tok-abc");
        assert!(!ctx.needs_token());

        let ctx = ctx.with_trust(None);
        assert!(ctx.token.is_none());
        assert!(!ctx.needs_token());
    }
}
