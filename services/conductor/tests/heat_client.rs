//! Heat client against a mock HTTP server.

use std::collections::BTreeMap;

use oasis_conductor::context::OperationContext;
use oasis_conductor::model::{Owner, ResourceStatus, StackId, TrustCredentials};
use oasis_conductor::orchestrator::{
    HeatClient, Orchestrator, OrchestratorError, StackCreate, StackUpdate,
};
use oasis_id::RequestId;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ctx() -> OperationContext {
    OperationContext::new(
        RequestId::new(),
        Owner {
            project_id: "proj1".to_string(),
            user_id: "user1".to_string(),
        },
    )
}

fn trusted_ctx(token: &str) -> OperationContext {
    ctx()
        .with_trust(Some(TrustCredentials {
            trustee_username: "fn_1".to_string(),
            trustee_user_id: "trustee-id".to_string(),
            trustee_password: "pw".to_string(),
            trust_id: "trust-id".to_string(),
        }))
        .with_token(token)
}

fn client(server: &MockServer) -> HeatClient {
    HeatClient::new(server.uri(), Some("service-token".to_string())).unwrap()
}

#[tokio::test]
async fn create_posts_stack_and_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/proj1/stacks"))
        .and(header("X-Auth-Token", "service-token"))
        .and(body_partial_json(json!({
            "stack_name": "hello-abc",
            "parameters": {"function_replicas": 2},
            "timeout_mins": 20
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "stack": {"id": "stack-uuid", "links": []}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut parameters = BTreeMap::new();
    parameters.insert("function_replicas".to_string(), json!(2));
    let stack_id = client(&server)
        .submit_create(
            &ctx(),
            StackCreate {
                name: "hello-abc".to_string(),
                template: "heat_template_version: 2016-10-14".to_string(),
                parameters,
                timeout_mins: Some(20),
            },
        )
        .await
        .unwrap();

    assert_eq!(stack_id, StackId::new("stack-uuid"));
}

#[tokio::test]
async fn create_bad_request_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/proj1/stacks"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Parameter 'flavor' is invalid"))
        .mount(&server)
        .await;

    let err = client(&server)
        .submit_create(
            &ctx(),
            StackCreate {
                name: "pool-abc".to_string(),
                template: String::new(),
                parameters: BTreeMap::new(),
                timeout_mins: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::BadRequest(ref body) if body.contains("flavor")));
}

#[tokio::test]
async fn update_puts_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/proj1/stacks/stack-uuid"))
        .and(body_partial_json(json!({"parameters": {"node_count": 3}})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let mut parameters = BTreeMap::new();
    parameters.insert("node_count".to_string(), json!(3));
    client(&server)
        .submit_update(
            &ctx(),
            &StackId::new("stack-uuid"),
            StackUpdate {
                template: String::new(),
                parameters,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_of_missing_stack_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/proj1/stacks/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server)
        .submit_delete(&ctx(), &StackId::new("gone"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn get_status_decodes_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/proj1/stacks/stack-uuid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stack": {
                "id": "stack-uuid",
                "stack_status": "UPDATE_COMPLETE",
                "stack_status_reason": "Stack UPDATE completed successfully",
                "outputs": [
                    {"output_key": "node_addresses", "output_value": ["10.0.0.1", "10.0.0.2"]}
                ],
                "parameters": {"node_count": "2", "flavor": "m1.small"},
                "timeout_mins": 60
            }
        })))
        .mount(&server)
        .await;

    let snapshot = client(&server)
        .get_status(&ctx(), &StackId::new("stack-uuid"))
        .await
        .unwrap();

    assert_eq!(snapshot.parsed_status(), Ok(ResourceStatus::UPDATE_COMPLETE));
    assert_eq!(snapshot.output("node_addresses"), Some(&json!(["10.0.0.1", "10.0.0.2"])));
    assert_eq!(snapshot.parameters["node_count"], json!("2"));
    assert_eq!(snapshot.timeout_mins, Some(60));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_status(&ctx(), &StackId::new("stack-uuid"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn trusted_context_sends_its_scoped_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/proj1/stacks/stack-uuid"))
        .and(header("X-Auth-Token", "trust-scoped"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stack": {"id": "stack-uuid", "stack_status": "UPDATE_IN_PROGRESS"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server)
        .get_status(&trusted_ctx("trust-scoped"), &StackId::new("stack-uuid"))
        .await
        .unwrap();

    assert_eq!(snapshot.status, "UPDATE_IN_PROGRESS");
}

#[tokio::test]
async fn refused_token_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/proj1/stacks/stack-uuid"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_status(&trusted_ctx("stale"), &StackId::new("stack-uuid"))
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert!(!err.is_transient());
}
