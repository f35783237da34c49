//! Integration tests for promotion purchase, status checks, and the
//! promotion-aware offer ranking.

use std::net::SocketAddr;
use std::sync::Arc;

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

/// Create an offer and return its id.
async fn create_offer(base_url: &str, token: &str, title: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/offers", base_url))
        .bearer_auth(token)
        .json(&json!({ "title": title }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn promote_enforces_auth_ownership_and_tier() {
    let base_url = start_test_server().await;
    let (_owner, owner_token) = register_user(&base_url, "Olive").await;
    let (_other, other_token) = register_user(&base_url, "Oscar").await;
    let offer_id = create_offer(&base_url, &owner_token, "Garden work").await;

    let client = reqwest::Client::new();

    // No token
    let resp = client
        .post(format!("{}/api/offers/{}/promote", base_url, offer_id))
        .json(&json!({ "tier": "top" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Wrong owner
    let resp = client
        .post(format!("{}/api/offers/{}/promote", base_url, offer_id))
        .bearer_auth(&other_token)
        .json(&json!({ "tier": "top" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Unknown tier
    let resp = client
        .post(format!("{}/api/offers/{}/promote", base_url, offer_id))
        .bearer_auth(&owner_token)
        .json(&json!({ "tier": "platinum" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Unknown offer
    let resp = client
        .post(format!("{}/api/offers/no-such-offer/promote", base_url))
        .bearer_auth(&owner_token)
        .json(&json!({ "tier": "top" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn promotion_status_reflects_purchase() {
    let base_url = start_test_server().await;
    let (_owner, owner_token) = register_user(&base_url, "Olive").await;
    let offer_id = create_offer(&base_url, &owner_token, "Garden work").await;

    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/offers/{}/promotion", base_url, offer_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["is_promoted"], false);
    assert_eq!(status["remaining_days"], 0);

    let resp = client
        .post(format!("{}/api/offers/{}/promote", base_url, offer_id))
        .bearer_auth(&owner_token)
        .json(&json!({ "tier": "urgent" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let receipt: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(receipt["tier"], "urgent");
    assert_eq!(receipt["price_cents"], 499);

    let resp = client
        .get(format!("{}/api/offers/{}/promotion", base_url, offer_id))
        .send()
        .await
        .unwrap();
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["is_promoted"], true);
    assert_eq!(status["tier"], "urgent");
    // A 1-day tier bought just now has one (partial) day left.
    assert_eq!(status["remaining_days"], 1);
    assert_eq!(status["ends_at"], receipt["promoted_until"]);
}

#[tokio::test]
async fn listing_ranks_promoted_offers_above_newer_plain_ones() {
    let base_url = start_test_server().await;
    let (_owner, owner_token) = register_user(&base_url, "Olive").await;

    // Created oldest to newest.
    let promoted_top = create_offer(&base_url, &owner_token, "Tiling").await;
    let promoted_highlight = create_offer(&base_url, &owner_token, "Painting").await;
    let plain_newest = create_offer(&base_url, &owner_token, "Moving help").await;

    let client = reqwest::Client::new();
    for (offer, tier) in [(&promoted_top, "top"), (&promoted_highlight, "highlight")] {
        let resp = client
            .post(format!("{}/api/offers/{}/promote", base_url, offer))
            .bearer_auth(&owner_token)
            .json(&json!({ "tier": tier }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let resp = client
        .get(format!("{}/api/offers", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["total"], 3);

    let ids: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![
            promoted_top.as_str(),
            promoted_highlight.as_str(),
            plain_newest.as_str()
        ]
    );
    assert_eq!(page["items"][0]["promoted_tier"], "top");
    assert_eq!(page["items"][2]["promoted_tier"], serde_json::Value::Null);
}

#[tokio::test]
async fn repeat_purchase_extends_the_expiry() {
    let base_url = start_test_server().await;
    let (_owner, owner_token) = register_user(&base_url, "Olive").await;
    let offer_id = create_offer(&base_url, &owner_token, "Garden work").await;

    let client = reqwest::Client::new();
    let mut ends = Vec::new();
    for _ in 0..2 {
        let resp = client
            .post(format!("{}/api/offers/{}/promote", base_url, offer_id))
            .bearer_auth(&owner_token)
            .json(&json!({ "tier": "urgent" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let receipt: serde_json::Value = resp.json().await.unwrap();
        ends.push(receipt["promoted_until"].as_str().unwrap().to_string());
    }

    // RFC 3339 with fixed precision compares lexicographically.
    assert!(ends[1] > ends[0]);

    let resp = client
        .get(format!("{}/api/offers/{}/promotion", base_url, offer_id))
        .send()
        .await
        .unwrap();
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["remaining_days"], 2);
}
