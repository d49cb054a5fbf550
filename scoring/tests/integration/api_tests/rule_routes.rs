use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use super::super::test_utils::large_amount_rule;
use super::{create_test_app, get_request, json_request, response_json};

fn rule_body(id: &str, impact: f64) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Large amount",
        "category": "amount",
        "severity": "high",
        "priority": 3,
        "score_impact": impact,
        "conditions": [
            { "field": "expense.amount", "operator": "greater_than", "value": 1000 }
        ]
    })
}

#[tokio::test]
async fn test_create_update_and_list_versions() {
    let (app, _) = create_test_app(vec![]).await;

    let created = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/fraud/rules",
            &json!({ "user": "admin", "rule": rule_body("large", 0.4) }),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(response_json(created).await["version"], 1);

    let updated = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/fraud/rules/large",
            &json!({ "user": "editor", "rule": rule_body("large", 0.55) }),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = response_json(updated).await;
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["updated_by"], "editor");

    let versions = app
        .clone()
        .oneshot(get_request("/api/fraud/rules/large/versions"))
        .await
        .unwrap();
    let versions = response_json(versions).await;
    assert_eq!(versions.as_array().unwrap().len(), 1);
    assert_eq!(versions[0]["version"], 1);
    assert_eq!(versions[0]["snapshot"]["score_impact"], 0.4);

    let fetched = app.oneshot(get_request("/api/fraud/rules/large")).await.unwrap();
    assert_eq!(response_json(fetched).await["score_impact"], 0.55);
}

#[tokio::test]
async fn test_invalid_rule_is_unprocessable() {
    let (app, _) = create_test_app(vec![]).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/fraud/rules",
            &json!({ "user": "admin", "rule": rule_body("broken", 3.0) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response_json(response).await["error"], "invalid_rule");
}

#[tokio::test]
async fn test_list_filters_by_category() {
    let timing = scoring::model::FraudRule::new(
        "night",
        "Night",
        scoring::model::RuleCategory::Timing,
        scoring::model::Severity::Low,
        0.1,
    );
    let (app, _) = create_test_app(vec![
        large_amount_rule("large", 1000.0, 0.4),
        large_amount_rule("retired", 1000.0, 0.4).inactive(),
        timing,
    ])
    .await;

    let all = app.clone().oneshot(get_request("/api/fraud/rules")).await.unwrap();
    assert_eq!(response_json(all).await.as_array().unwrap().len(), 3);

    let active = app
        .clone()
        .oneshot(get_request("/api/fraud/rules?active=true"))
        .await
        .unwrap();
    assert_eq!(response_json(active).await.as_array().unwrap().len(), 2);

    let amount = app
        .oneshot(get_request("/api/fraud/rules?category=amount"))
        .await
        .unwrap();
    let amount = response_json(amount).await;
    assert_eq!(amount.as_array().unwrap().len(), 1);
    assert_eq!(amount[0]["id"], "large");
}

#[tokio::test]
async fn test_unknown_rule_is_not_found() {
    let (app, _) = create_test_app(vec![]).await;
    let response = app.oneshot(get_request("/api/fraud/rules/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
