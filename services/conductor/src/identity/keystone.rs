//! Keystone v3 client for trustee users and trusts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Identity, IdentityError, IdentityResult, Trustee};
use crate::model::{Owner, TrustCredentials};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

#[derive(Clone)]
pub struct KeystoneClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
    trust_roles: Vec<String>,
}

impl KeystoneClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        trust_roles: Vec<String>,
    ) -> IdentityResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            trust_roles,
        })
    }

    async fn send(&self, request: RequestBuilder) -> IdentityResult<Response> {
        request
            .header(AUTH_TOKEN_HEADER, &self.auth_token)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))
    }
}

async fn failure_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{}: {}", status, body)
}

#[derive(Serialize)]
struct UserRequest<'a> {
    user: NewUser<'a>,
}

#[derive(Serialize)]
struct NewUser<'a> {
    name: &'a str,
    password: &'a str,
    domain_id: &'a str,
    enabled: bool,
}

#[derive(Deserialize)]
struct UserResponse {
    user: CreatedUser,
}

#[derive(Deserialize)]
struct CreatedUser {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct TrustRequest<'a> {
    trust: NewTrust<'a>,
}

#[derive(Serialize)]
struct NewTrust<'a> {
    trustor_user_id: &'a str,
    trustee_user_id: &'a str,
    project_id: &'a str,
    impersonation: bool,
    roles: Vec<RoleRef<'a>>,
}

#[derive(Serialize)]
struct RoleRef<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct TrustResponse {
    trust: CreatedTrust,
}

#[derive(Deserialize)]
struct CreatedTrust {
    id: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    auth: TokenAuth<'a>,
}

#[derive(Serialize)]
struct TokenAuth<'a> {
    identity: PasswordIdentity<'a>,
    scope: TrustScope<'a>,
}

#[derive(Serialize)]
struct PasswordIdentity<'a> {
    methods: [&'static str; 1],
    password: PasswordMethod<'a>,
}

#[derive(Serialize)]
struct PasswordMethod<'a> {
    user: PasswordUser<'a>,
}

#[derive(Serialize)]
struct PasswordUser<'a> {
    id: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct TrustScope<'a> {
    #[serde(rename = "OS-TRUST:trust")]
    trust: TrustRef<'a>,
}

#[derive(Serialize)]
struct TrustRef<'a> {
    id: &'a str,
}

impl<'a> TokenRequest<'a> {
    fn for_trust(trust: &'a TrustCredentials) -> Self {
        Self {
            auth: TokenAuth {
                identity: PasswordIdentity {
                    methods: ["password"],
                    password: PasswordMethod {
                        user: PasswordUser {
                            id: &trust.trustee_user_id,
                            password: &trust.trustee_password,
                        },
                    },
                },
                scope: TrustScope {
                    trust: TrustRef { id: &trust.trust_id },
                },
            },
        }
    }
}

/// Deletes treat a missing entity as already removed.
fn is_deleted(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND
}

#[async_trait]
impl Identity for KeystoneClient {
    async fn create_trustee(
        &self,
        name: &str,
        password: &str,
        domain_id: &str,
    ) -> IdentityResult<Trustee> {
        let failed = |message: String| IdentityError::TrusteeCreateFailed {
            name: name.to_string(),
            message,
        };
        let body = UserRequest {
            user: NewUser {
                name,
                password,
                domain_id,
                enabled: true,
            },
        };
        debug!(trustee = %name, domain_id = %domain_id, "Creating trustee user");

        let response = self
            .send(self.client.post(format!("{}/v3/users", self.base_url)).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(failed(failure_message(response).await));
        }

        let created: UserResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        Ok(Trustee {
            id: created.user.id,
            name: created.user.name,
        })
    }

    async fn create_trust(&self, owner: &Owner, trustee_user_id: &str) -> IdentityResult<String> {
        let failed = |message: String| IdentityError::TrustCreateFailed {
            trustee_user_id: trustee_user_id.to_string(),
            message,
        };
        let body = TrustRequest {
            trust: NewTrust {
                trustor_user_id: &owner.user_id,
                trustee_user_id,
                project_id: &owner.project_id,
                impersonation: true,
                roles: self
                    .trust_roles
                    .iter()
                    .map(|name| RoleRef { name: name.as_str() })
                    .collect(),
            },
        };
        debug!(trustee_user_id = %trustee_user_id, project_id = %owner.project_id, "Creating trust");

        let response = self
            .send(
                self.client
                    .post(format!("{}/v3/OS-TRUST/trusts", self.base_url))
                    .json(&body),
            )
            .await?;
        if !response.status().is_success() {
            return Err(failed(failure_message(response).await));
        }

        let created: TrustResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        Ok(created.trust.id)
    }

    async fn delete_trust(&self, trust_id: &str) -> IdentityResult<()> {
        let response = self
            .send(
                self.client
                    .delete(format!("{}/v3/OS-TRUST/trusts/{}", self.base_url, trust_id)),
            )
            .await?;
        if !is_deleted(response.status()) {
            return Err(IdentityError::TrustDeleteFailed {
                trust_id: trust_id.to_string(),
                message: failure_message(response).await,
            });
        }
        Ok(())
    }

    async fn delete_trustee(&self, trustee_user_id: &str) -> IdentityResult<()> {
        let response = self
            .send(
                self.client
                    .delete(format!("{}/v3/users/{}", self.base_url, trustee_user_id)),
            )
            .await?;
        if !is_deleted(response.status()) {
            return Err(IdentityError::TrusteeDeleteFailed {
                trustee_user_id: trustee_user_id.to_string(),
                message: failure_message(response).await,
            });
        }
        Ok(())
    }

    async fn issue_trust_token(&self, trust: &TrustCredentials) -> IdentityResult<String> {
        let failed = |message: String| IdentityError::TokenIssueFailed {
            trust_id: trust.trust_id.clone(),
            message,
        };
        debug!(trust_id = %trust.trust_id, "Requesting trust-scoped token");

        // Authenticates as the trustee; the service token is not sent.
        let response = self
            .client
            .post(format!("{}/v3/auth/tokens", self.base_url))
            .json(&TokenRequest::for_trust(trust))
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(failure_message(response).await));
        }

        response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| failed(format!("response carried no {SUBJECT_TOKEN_HEADER} header")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_request_is_scoped_to_the_trust() {
        let trust = TrustCredentials {
            trustee_username: "fn_1".to_string(),
            trustee_user_id: "user-1".to_string(),
            trustee_password: "pw".to_string(),
            trust_id: "trust-9".to_string(),
        };
        let json = serde_json::to_value(TokenRequest::for_trust(&trust)).unwrap();

        assert_eq!(json["auth"]["identity"]["methods"][0], "password");
        assert_eq!(json["auth"]["identity"]["password"]["user"]["id"], "user-1");
        assert_eq!(json["auth"]["scope"]["OS-TRUST:trust"]["id"], "trust-9");
    }
}
