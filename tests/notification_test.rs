//! Integration tests for the notification inbox: durable storage for
//! offline recipients, pagination, and read state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

/// Helper: start the server on a random port and return the base URL.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = marketspace::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = marketspace::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = marketspace::state::AppState {
        db,
        jwt_secret,
        connections: Arc::new(marketspace::ws::ConnectionRegistry::new()),
        channels: Arc::new(marketspace::chat::channels::ChannelResolver::new()),
        push: Arc::new(marketspace::notify::push::SandboxPush),
        email: Arc::new(marketspace::notify::email::SandboxMailer),
    };

    let app = marketspace::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

/// Register a user and return (user_id, access_token).
async fn register_user(base_url: &str, display_name: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/users", base_url))
        .json(&json!({
            "display_name": display_name,
            "email": format!("{}@example.test", display_name.to_lowercase()),
        }))
        .send()
        .await
        .expect("register request failed");
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["id"].as_str().unwrap().to_string(),
        body["access_token"].as_str().unwrap().to_string(),
    )
}

/// Notification dispatch is detached from the triggering request, so poll
/// the inbox until the expected count arrives.
async fn wait_for_notifications(
    base_url: &str,
    token: &str,
    expected: u64,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        let resp = client
            .get(format!("{}/api/notifications", base_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let page: serde_json::Value = resp.json().await.unwrap();
        if page["total"].as_u64().unwrap() >= expected {
            return page;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("notifications never arrived");
}

#[tokio::test]
async fn offline_recipient_finds_message_notification_in_inbox() {
    let base_url = start_test_server().await;
    let (_u1, token1) = register_user(&base_url, "Alice").await;
    let (u2, token2) = register_user(&base_url, "Bob").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(&token1)
        .json(&json!({ "recipient_id": u2, "body": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let sent: serde_json::Value = resp.json().await.unwrap();

    let page = wait_for_notifications(&base_url, &token2, 1).await;
    let item = &page["items"][0];
    assert_eq!(item["kind"], "message");
    assert_eq!(item["read"], false);
    assert_eq!(item["related"]["kind"], "message");
    assert_eq!(item["related"]["id"], sent["id"]);
}

#[tokio::test]
async fn service_request_notifies_the_provider() {
    let base_url = start_test_server().await;
    let (_customer, customer_token) = register_user(&base_url, "Cass").await;
    let (provider, provider_token) = register_user(&base_url, "Pat").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/requests", base_url))
        .bearer_auth(&customer_token)
        .json(&json!({ "provider_id": provider }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let request: serde_json::Value = resp.json().await.unwrap();

    let page = wait_for_notifications(&base_url, &provider_token, 1).await;
    let item = &page["items"][0];
    assert_eq!(item["kind"], "request");
    assert!(item["body"].as_str().unwrap().contains("Cass"));
    assert_eq!(item["related"]["kind"], "service_request");
    assert_eq!(item["related"]["id"], request["id"]);
}

#[tokio::test]
async fn read_state_and_unread_filter() {
    let base_url = start_test_server().await;
    let (_u1, token1) = register_user(&base_url, "Alice").await;
    let (u2, token2) = register_user(&base_url, "Bob").await;

    let client = reqwest::Client::new();
    for body in ["one", "two"] {
        let resp = client
            .post(format!("{}/api/messages", base_url))
            .bearer_auth(&token1)
            .json(&json!({ "recipient_id": u2, "body": body }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let page = wait_for_notifications(&base_url, &token2, 2).await;
    let first_id = page["items"][0]["id"].as_str().unwrap().to_string();

    // Someone else's token cannot flip it.
    let resp = client
        .post(format!("{}/api/notifications/{}/read", base_url, first_id))
        .bearer_auth(&token1)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/api/notifications/{}/read", base_url, first_id))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/api/notifications?unread_only=true", base_url))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    let unread: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(unread["total"], 1);
    assert_ne!(unread["items"][0]["id"].as_str().unwrap(), first_id);

    // Unknown id is NotFound, not a silent no-op.
    let resp = client
        .post(format!("{}/api/notifications/no-such-id/read", base_url))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn inbox_paginates_newest_first() {
    let base_url = start_test_server().await;
    let (_u1, token1) = register_user(&base_url, "Alice").await;
    let (u2, token2) = register_user(&base_url, "Bob").await;

    let client = reqwest::Client::new();
    for i in 0..5 {
        let resp = client
            .post(format!("{}/api/messages", base_url))
            .bearer_auth(&token1)
            .json(&json!({ "recipient_id": u2, "body": format!("msg {i}") }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        // Space out the sends so created_at ordering is deterministic.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    wait_for_notifications(&base_url, &token2, 5).await;

    let resp = client
        .get(format!("{}/api/notifications?page=1&limit=2", base_url))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    let page1: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page1["total"], 5);
    assert_eq!(page1["items"].as_array().unwrap().len(), 2);

    let resp = client
        .get(format!("{}/api/notifications?page=3&limit=2", base_url))
        .bearer_auth(&token2)
        .send()
        .await
        .unwrap();
    let page3: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page3["items"].as_array().unwrap().len(), 1);

    // Newest first within the first page.
    let created: Vec<&str> = page1["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["created_at"].as_str().unwrap())
        .collect();
    assert!(created[0] >= created[1]);
}
