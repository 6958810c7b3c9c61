//! HTTP API tests against a live listener with in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use oasis_conductor::api::create_router;
use oasis_conductor::conductor::{Conductor, ConductorSettings, PollOutcome};
use oasis_conductor::identity::MockIdentity;
use oasis_conductor::model::ResourceStatus;
use oasis_conductor::orchestrator::{MockOrchestrator, MockStep};
use oasis_conductor::state::AppState;
use oasis_conductor::store::MemoryStore;
use oasis_conductor::template::ExtraParameters;
use oasis_id::ResourceId;
use oasis_reconcile::PollSettings;
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestApp {
    base_url: String,
    client: reqwest::Client,
    conductor: Arc<Conductor>,
    orchestrator: Arc<MockOrchestrator>,
    identity: Arc<MockIdentity>,
}

impl TestApp {
    async fn spawn() -> Self {
        let orchestrator = Arc::new(MockOrchestrator::new());
        let identity = Arc::new(MockIdentity::new());
        let conductor = Arc::new(Conductor::new(
            orchestrator.clone(),
            identity.clone(),
            Arc::new(MemoryStore::default()),
            ConductorSettings {
                poll: PollSettings {
                    wait_interval: Duration::from_millis(5),
                    max_attempts: 50,
                },
                create_timeout: None,
                extra: ExtraParameters {
                    trustee_domain_id: "trustees".to_string(),
                    auth_url: "http://keystone.test/v3".to_string(),
                },
            },
        ));

        let app = create_router(AppState::new(conductor.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            conductor,
            orchestrator,
            identity,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str, project: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Project-Id", project)
            .header("X-User-Id", format!("{project}-admin"))
    }

    async fn create_function(&self, project: &str) -> Value {
        let response = self
            .request(reqwest::Method::POST, "/v1/functions", project)
            .json(&json!({"name": "hello", "body": "def main(): return 1", "replicas": 2}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        response.json().await.unwrap()
    }

    async fn settle(&self, id: &str) -> Option<PollOutcome> {
        let id: ResourceId = id.parse().unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.conductor.wait_for(&id))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn healthz_reports_service() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/healthz", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "conductor");
    assert_eq!(body["active_loops"], 0);
}

#[tokio::test]
async fn requests_without_identity_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/v1/functions", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()["content-type"],
        "application/problem+json"
    );

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "missing_identity");
}

#[tokio::test]
async fn function_lifecycle() {
    let app = TestApp::spawn().await;
    app.orchestrator
        .on_next_create(vec![MockStep::status(ResourceStatus::CREATE_COMPLETE)]);

    let created = app.create_function("project-a").await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["kind"], "function");
    assert_eq!(created["status"], "CREATE_IN_PROGRESS");
    assert_eq!(created["replicas"], 2);
    assert!(created.get("trust").is_none());
    assert_eq!(app.identity.live_trusts(), 1);

    assert_eq!(
        app.settle(&id).await,
        Some(PollOutcome::Completed(ResourceStatus::CREATE_COMPLETE))
    );

    let fetched: Value = app
        .request(reqwest::Method::GET, &format!("/v1/functions/{id}"), "project-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "CREATE_COMPLETE");

    let listed: Value = app
        .request(reqwest::Method::GET, "/v1/functions", "project-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);

    let response = app
        .request(reqwest::Method::PATCH, &format!("/v1/functions/{id}"), "project-a")
        .json(&json!({"replicas": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["status"], "UPDATE_IN_PROGRESS");
    assert_eq!(updated["replicas"], 3);

    let response = app
        .request(reqwest::Method::PATCH, &format!("/v1/functions/{id}"), "project-a")
        .json(&json!({"replicas": 4}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .request(reqwest::Method::DELETE, &format!("/v1/functions/{id}"), "project-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(app.settle(&id).await, Some(PollOutcome::Deleted));

    let response = app
        .request(reqwest::Method::GET, &format!("/v1/functions/{id}"), "project-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.identity.live_trusts(), 0);
}

#[tokio::test]
async fn other_projects_cannot_see_resources() {
    let app = TestApp::spawn().await;
    let created = app.create_function("project-a").await;
    let id = created["id"].as_str().unwrap();

    let response = app
        .request(reqwest::Method::GET, &format!("/v1/functions/{id}"), "project-b")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(reqwest::Method::DELETE, &format!("/v1/functions/{id}"), "project-b")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let listed: Value = app
        .request(reqwest::Method::GET, "/v1/functions", "project-b")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = TestApp::spawn().await;

    let response = app
        .request(reqwest::Method::GET, "/v1/functions/not-an-id", "project-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "invalid_id");
}

#[tokio::test]
async fn invalid_attributes_are_rejected_before_submission() {
    let app = TestApp::spawn().await;

    let response = app
        .request(reqwest::Method::POST, "/v1/nodepools", "project-a")
        .json(&json!({"name": "pool", "flavor": "", "image": "fedora"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "invalid_parameter_value");
    assert_eq!(app.orchestrator.create_calls(), 0);
    assert_eq!(app.identity.live_trustees(), 0);
}

#[tokio::test]
async fn nodepool_with_policy() {
    let app = TestApp::spawn().await;

    let response = app
        .request(reqwest::Method::POST, "/v1/nodepool_policies", "project-a")
        .json(&json!({"name": "small", "min_size": 1, "max_size": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let policy: Value = response.json().await.unwrap();
    let policy_id = policy["id"].as_str().unwrap();

    let fetched = app
        .request(
            reqwest::Method::GET,
            &format!("/v1/nodepool_policies/{policy_id}"),
            "project-a",
        )
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);

    let response = app
        .request(reqwest::Method::POST, "/v1/nodepools?timeout=30", "project-a")
        .json(&json!({
            "name": "pool",
            "flavor": "m1.small",
            "image": "fedora",
            "policy_id": policy_id,
            "node_count": 10
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let pool: Value = response.json().await.unwrap();
    assert_eq!(pool["kind"], "node_pool");
    assert_eq!(pool["status"], "CREATE_IN_PROGRESS");
    assert_eq!(pool["policy_id"], policy_id);
}

#[tokio::test]
async fn policy_with_inverted_bounds_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .request(reqwest::Method::POST, "/v1/nodepool_policies", "project-a")
        .json(&json!({"name": "broken", "min_size": 5, "max_size": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_is_a_problem_response() {
    let app = TestApp::spawn().await;

    let response = app
        .request(reqwest::Method::GET, "/v1/widgets", "proj")
        .header("X-Request-Id", "req-404")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "req-404");
    assert_eq!(
        response.headers()["content-type"],
        "application/problem+json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "route_not_found");
    assert_eq!(body["request_id"], "req-404");
}

#[tokio::test]
async fn responses_carry_a_generated_request_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/healthz", app.base_url))
        .send()
        .await
        .unwrap();

    let request_id = response.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn rejection_reports_the_echoed_request_id() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/v1/functions", app.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let header = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request_id"], header.as_str());
}
