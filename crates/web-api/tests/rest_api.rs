mod support;

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
};
use application::SendMessageRequest;
use domain::{ConnectionId, RoleName, SessionUser, UserId};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use web_api::router;

use support::{memory_state, TestServer};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn health_check() {
    let (state, _) = memory_state();
    let response = router(state)
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn presence_requires_bearer_token() {
    let (state, _) = memory_state();
    let app = router(state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/v1/presence")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");

    let alice = SessionUser::new(UserId::from(Uuid::new_v4()), "alice");
    state.coordinator.connect(&alice, ConnectionId::generate());
    let token = state.jwt_service.generate_token(&alice).expect("token");

    let response = app
        .oneshot(
            Request::get("/api/v1/presence")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["display_name"], "alice");
}

#[tokio::test]
async fn history_pages_over_http() {
    let (state, directory) = memory_state();
    let alice = SessionUser::new(UserId::from(Uuid::new_v4()), "alice");
    let bob = SessionUser::new(UserId::from(Uuid::new_v4()), "bob");
    directory.assign(alice.user_id, RoleName::new("staff")).await;
    directory.assign(bob.user_id, RoleName::new("staff")).await;

    for i in 0..3 {
        state
            .coordinator
            .send_message(
                &alice,
                SendMessageRequest {
                    text: format!("m{i}"),
                    recipient_ids: vec![bob.user_id],
                    attachment_url: None,
                },
            )
            .await
            .expect("send");
    }

    let token = state.jwt_service.generate_token(&bob).expect("token");
    let response = router(state)
        .oneshot(
            Request::get("/api/v1/messages?limit=2")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let texts: Vec<&str> = body
        .as_array()
        .expect("messages")
        .iter()
        .filter_map(|message| message["text"].as_str())
        .collect();
    assert_eq!(texts, vec!["m1", "m2"]);
}

#[tokio::test]
async fn history_over_real_http_client() {
    let server = TestServer::start().await;
    let (_alice, token) = server.user("alice", "staff").await;

    let client = reqwest::Client::new();
    let response = client
        .get(server.http_url("/api/v1/messages"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body, Value::Array(Vec::new()));

    let response = client
        .get(server.http_url("/api/v1/messages"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}
