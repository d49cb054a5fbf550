pub mod rule_routes;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http::header;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;

use scoring::{
    executable_utils::{AppState, router},
    model::FraudRule,
    storage::InMemoryStore,
};

use super::test_utils::rule_only_analyzer;

pub async fn create_test_app(rules: Vec<FraudRule>) -> (Router, Arc<InMemoryStore>) {
    let setup = rule_only_analyzer(rules).await;
    let app = router(AppState::new(Arc::new(setup.analyzer)));
    (app, setup.store)
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
