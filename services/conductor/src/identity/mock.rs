//! In-memory identity engine for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::info;

use super::{Identity, IdentityError, IdentityResult, Trustee};
use crate::model::{Owner, TrustCredentials};

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    trustees: HashMap<String, String>,
    trusts: HashSet<String>,
    fail_trustee_creation: bool,
    fail_trust_creation: bool,
    fail_trust_deletion: bool,
    tokens_issued: usize,
}

/// Tracks live trustees and trusts; failures are opt-in and sticky.
#[derive(Debug, Default)]
pub struct MockIdentity {
    state: Mutex<MockState>,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_trustee_creation(&self) {
        self.state().fail_trustee_creation = true;
    }

    pub fn fail_trust_creation(&self) {
        self.state().fail_trust_creation = true;
    }

    pub fn fail_trust_deletion(&self) {
        self.state().fail_trust_deletion = true;
    }

    pub fn live_trustees(&self) -> usize {
        self.state().trustees.len()
    }

    pub fn live_trusts(&self) -> usize {
        self.state().trusts.len()
    }

    pub fn tokens_issued(&self) -> usize {
        self.state().tokens_issued
    }

    pub fn has_trustee_named(&self, name: &str) -> bool {
        self.state().trustees.values().any(|n| n == name)
    }
}

#[async_trait]
impl Identity for MockIdentity {
    async fn create_trustee(
        &self,
        name: &str,
        _password: &str,
        _domain_id: &str,
    ) -> IdentityResult<Trustee> {
        let mut state = self.state();
        if state.fail_trustee_creation {
            return Err(IdentityError::TrusteeCreateFailed {
                name: name.to_string(),
                message: "mock failure".to_string(),
            });
        }

        state.next_id += 1;
        let id = format!("user-{}", state.next_id);
        state.trustees.insert(id.clone(), name.to_string());
        info!(trustee = %name, "[MOCK] Trustee created");
        Ok(Trustee {
            id,
            name: name.to_string(),
        })
    }

    async fn create_trust(&self, _owner: &Owner, trustee_user_id: &str) -> IdentityResult<String> {
        let mut state = self.state();
        if state.fail_trust_creation {
            return Err(IdentityError::TrustCreateFailed {
                trustee_user_id: trustee_user_id.to_string(),
                message: "mock failure".to_string(),
            });
        }

        state.next_id += 1;
        let id = format!("trust-{}", state.next_id);
        state.trusts.insert(id.clone());
        Ok(id)
    }

    async fn delete_trust(&self, trust_id: &str) -> IdentityResult<()> {
        let mut state = self.state();
        if state.fail_trust_deletion {
            return Err(IdentityError::TrustDeleteFailed {
                trust_id: trust_id.to_string(),
                message: "mock failure".to_string(),
            });
        }
        state.trusts.remove(trust_id);
        Ok(())
    }

    async fn delete_trustee(&self, trustee_user_id: &str) -> IdentityResult<()> {
        self.state().trustees.remove(trustee_user_id);
        Ok(())
    }

    async fn issue_trust_token(&self, trust: &TrustCredentials) -> IdentityResult<String> {
        let mut state = self.state();
        if !state.trusts.contains(&trust.trust_id) {
            return Err(IdentityError::TokenIssueFailed {
                trust_id: trust.trust_id.clone(),
                message: "trust not found".to_string(),
            });
        }
        state.tokens_issued += 1;
        Ok(format!("token-for-{}", trust.trust_id))
    }
}
