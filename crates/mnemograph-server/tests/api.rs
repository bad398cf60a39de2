//! HTTP surface tests over the in-memory engine wiring.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use mnemograph_core::config::{
    Config, ContextWindowConfig, DedupConfig, GatewayConfig, GraphConfig, ProviderClass,
};
use mnemograph_core::{
    ChatMessage, ChatModel, ChatOptions, Embedder, Engine, GatewayError, GraphStore, InMemoryGraph,
};
use mnemograph_server::{AppState, router};

// ---- fakes ----------------------------------------------------------------

struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }

    fn dim(&self) -> usize {
        3
    }

    fn provider(&self) -> ProviderClass {
        ProviderClass::OpenAi
    }

    fn model(&self) -> &str {
        "test-embed"
    }
}

struct FixedChat(&'static str);

#[async_trait]
impl ChatModel for FixedChat {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, GatewayError> {
        Ok(self.0.to_string())
    }
}

fn test_config() -> Config {
    Config {
        graph: GraphConfig {
            url: "bolt://127.0.0.1:7687".into(),
            user: String::new(),
            password: String::new(),
        },
        embedding: GatewayConfig {
            provider: ProviderClass::OpenAi,
            base_url: "http://127.0.0.1:0/v1".into(),
            api_key: None,
            model: "test-embed".into(),
        },
        llm: GatewayConfig {
            provider: ProviderClass::OpenAi,
            base_url: "http://127.0.0.1:0/v1".into(),
            api_key: None,
            model: "test-chat".into(),
        },
        embedding_dims: 3,
        dedup: DedupConfig {
            enabled: false,
            threshold: None,
            max_candidates: 5,
        },
        context_window: ContextWindowConfig {
            enabled: false,
            size: 0,
        },
        requests_per_minute: 60,
        extraction_workers: 1,
        max_extraction_attempts: 3,
    }
}

fn app() -> Router {
    let engine = Engine::with_parts(
        Arc::new(InMemoryGraph::new()) as Arc<dyn GraphStore>,
        Arc::new(StaticEmbedder),
        Arc::new(FixedChat("DIFFERENT")),
        &test_config(),
    );
    router(AppState::new(Arc::new(engine)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, user: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("X-User-ID", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-User-ID", user);
    }
    builder.body(Body::empty()).unwrap()
}

// ---- tests ----------------------------------------------------------------

#[tokio::test]
async fn missing_user_id_is_a_400_with_detail() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/memories", None, &json!({"text": "a fact"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("user_id"));
}

#[tokio::test]
async fn add_and_fetch_round_trip() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json(
            "/memories",
            Some("alice"),
            &json!({"text": "I prefer dark mode", "app_name": "cli"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, get(&format!("/memories/{id}"), Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["content"], "I prefer dark mode");
    assert_eq!(fetched["appName"], "cli");

    // Another user sees a 404, indistinguishable from a missing id.
    let (status, body) = send(&app, get(&format!("/memories/{id}"), Some("bob"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let app = app();
    let (status, _) = send(
        &app,
        post_json("/memories", Some("alice"), &json!({"text": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn filter_returns_page_shape() {
    let app = app();
    for text in ["one", "two", "three"] {
        send(
            &app,
            post_json("/memories", Some("alice"), &json!({"text": text})),
        )
        .await;
    }

    let (status, body) = send(
        &app,
        post_json(
            "/memories/filter",
            Some("alice"),
            &json!({"page": 1, "size": 2}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["pages"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn search_shape_and_scoping() {
    let app = app();
    send(
        &app,
        post_json("/memories", Some("alice"), &json!({"text": "coffee every morning"})),
    )
    .await;

    let (status, body) = send(
        &app,
        post_json(
            "/memories/search",
            Some("alice"),
            &json!({"query": "coffee"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "coffee");
    assert_eq!(body["total"], 1);
    assert!(body["results"][0]["rrfScore"].is_number());

    let (_, stranger) = send(
        &app,
        post_json("/memories/search", Some("bob"), &json!({"query": "coffee"})),
    )
    .await;
    assert_eq!(stranger["total"], 0);
}

#[tokio::test]
async fn supersede_via_put_returns_the_successor() {
    let app = app();
    let (_, created) = send(
        &app,
        post_json("/memories", Some("alice"), &json!({"text": "I live in NYC"})),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/memories/{id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-User-ID", "alice")
        .body(Body::from(json!({"text": "I live in London"}).to_string()))
        .unwrap();
    let (status, successor) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(successor["id"], id.as_str());
    assert_eq!(successor["content"], "I live in London");

    // The predecessor is superseded out of the default listing.
    let (_, live) = send(
        &app,
        post_json("/memories/filter", Some("alice"), &json!({})),
    )
    .await;
    assert_eq!(live["total"], 1);
}

#[tokio::test]
async fn soft_delete_answers_ok() {
    let app = app();
    let (_, created) = send(
        &app,
        post_json("/memories", Some("alice"), &json!({"text": "temp"})),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/memories/{id}"))
        .header("X-User-ID", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn bulk_reports_per_item_statuses() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json(
            "/memories/bulk",
            Some("alice"),
            &json!({
                "items": [{"text": "same"}, {"text": "other"}, {"text": "SAME"}],
                "dedup_enabled": false
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["added"], 2);
    assert_eq!(body["skipped_duplicate"], 1);
    assert_eq!(body["results"][2]["status"], "skipped_duplicate");
}

#[tokio::test]
async fn health_reports_dependency_checks() {
    let app = app();
    let (status, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["memgraph"]["ok"], true);
    assert_eq!(body["checks"]["embeddings"]["ok"], true);
}

#[tokio::test]
async fn stats_counts_apps() {
    let app = app();
    send(
        &app,
        post_json(
            "/memories",
            Some("alice"),
            &json!({"text": "a", "app_name": "cli"}),
        ),
    )
    .await;
    send(
        &app,
        post_json(
            "/memories",
            Some("alice"),
            &json!({"text": "b", "app_name": "cli"}),
        ),
    )
    .await;

    let (status, body) = send(&app, get("/stats", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_memories"], 2);
    assert_eq!(body["apps"][0]["name"], "cli");
    assert_eq!(body["apps"][0]["memory_count"], 2);
}

#[tokio::test]
async fn backup_round_trip_over_http() {
    let app = app();
    send(
        &app,
        post_json("/memories", Some("alice"), &json!({"text": "exported fact"})),
    )
    .await;

    let (status, exported) = send(&app, post_json("/backup/export", Some("alice"), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exported["version"], "2.0");

    let fresh = self::app();
    let (status, report) = send(&fresh, post_json("/backup/import", Some("bob"), &exported)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["imported"], 1);
    assert_eq!(report["failed"], 0);
}

#[tokio::test]
async fn unknown_entity_is_a_404() {
    let app = app();
    let (status, _) = send(&app, get("/entities/nope", Some("alice"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clusters_rebuild_and_list() {
    let app = app();
    let (status, body) = send(&app, post_json("/clusters/rebuild", Some("alice"), &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = send(&app, get("/clusters", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["clusters"].as_array().unwrap().is_empty());
}
