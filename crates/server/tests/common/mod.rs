//! Common test utilities for API testing with a mock agent adapter.
//!
//! The fixture builds the real stores (SQLite in a temp dir), engine and
//! coordinator, with every capability served by a `MockAdapter`. The scheduler
//! is not started.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use leadflow_core::testing::{fixtures, MockAdapter};
use leadflow_core::{
    ActionStore, AdapterRegistry, CampaignCoordinator, CampaignStore, Config, CoordinatorConfig,
    DatabaseConfig, FollowupScheduler, Governor, LeadStore, OrchestrationEngine, ServerConfig,
    SqliteActionStore, SqliteCampaignStore, SqliteIntelCache, SqliteLeadStore,
};
use leadflow_server::state::AppState;

/// Test fixture with an in-process router.
pub struct TestFixture {
    pub router: Router,
    /// Serves every capability; script results and inspect calls through it
    pub adapter: Arc<MockAdapter>,
    pub engine: Arc<OrchestrationEngine>,
    pub coordinator: Arc<CampaignCoordinator>,
    pub scheduler: Arc<FollowupScheduler>,
    /// Keeps the database alive for the fixture's lifetime
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 8080,
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            campaign: CoordinatorConfig {
                // Always recompute so assertions see the latest counts
                status_cache_ttl_ms: 0,
                completion_poll_ms: 10,
                ..CoordinatorConfig::default()
            },
            ..Config::default()
        };
        config.engine.retry = fixtures::immediate_retry(3);

        let leads: Arc<dyn LeadStore> =
            Arc::new(SqliteLeadStore::new(&db_path).expect("Failed to create lead store"));
        let campaigns: Arc<dyn CampaignStore> = Arc::new(
            SqliteCampaignStore::new(&db_path).expect("Failed to create campaign store"),
        );
        let actions: Arc<dyn ActionStore> =
            Arc::new(SqliteActionStore::new(&db_path).expect("Failed to create action store"));

        let adapter = Arc::new(MockAdapter::new());
        let registry = AdapterRegistry::builder().with_all(adapter.clone()).build();
        let scheduler = Arc::new(FollowupScheduler::new(config.scheduler.clone(), actions));

        let engine = Arc::new(
            OrchestrationEngine::new(
                config.engine.clone(),
                leads,
                Arc::clone(&campaigns),
                Arc::clone(&scheduler),
                Arc::new(Governor::unlimited()),
                registry,
            )
            .with_default_campaign(config.campaign.defaults.clone())
            .with_intel_cache(Arc::new(
                SqliteIntelCache::new(&db_path).expect("Failed to create intel cache"),
            )),
        );
        let coordinator = Arc::new(CampaignCoordinator::new(
            config.campaign.clone(),
            Arc::clone(&engine),
            campaigns,
        ));

        let state = Arc::new(AppState::new(config, Arc::clone(&coordinator)));
        let router = leadflow_server::api::create_router(state);

        Self {
            router,
            adapter,
            engine,
            coordinator,
            scheduler,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
