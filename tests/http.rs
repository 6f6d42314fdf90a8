use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use tower::util::ServiceExt;

use wordstats::handlers::{AppState, NextbusUrls, router};
use wordstats::{Fetcher, PersistentStore, UserId, UserRegistry};

struct Harness {
    app: Router,
    persistent: Arc<PersistentStore>,
    _dir: tempfile::TempDir,
}

fn make_harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let persistent =
        Arc::new(PersistentStore::open(dir.path().join("WordStats.db")).unwrap());
    let registry = Arc::new(UserRegistry::new());
    registry.register(UserId(1), "alice", ["alice!a@example.org"]);
    registry.register(UserId(2), "bob", ["bob!b@example.org"]);
    let state = AppState::new(
        Arc::clone(&persistent),
        registry,
        Fetcher::new(1),
        NextbusUrls {
            north: "http://127.0.0.1:9/north".into(),
            south: "http://127.0.0.1:9/south".into(),
        },
        3,
        false,
    );
    Harness {
        app: router(state),
        persistent,
        _dir: dir,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn track(app: &Router, word: &str) -> (StatusCode, serde_json::Value) {
    let body = serde_json::json!({ "word": word });
    send(app, "POST", "/v1/channels/%23lab/words", Some(body)).await
}

async fn say(app: &Router, sender: &str, text: &str) -> serde_json::Value {
    let (status, body) = send(
        app,
        "POST",
        "/v1/messages",
        Some(serde_json::json!({ "channel": "#lab", "sender": sender, "text": text })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    body
}

#[tokio::test]
async fn healthz_ok() {
    let harness = make_harness();
    let response = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn tracks_words_and_ranks_speakers() {
    let harness = make_harness();
    let app = &harness.app;

    let (status, _) = track(app, "pizza").await;
    assert_eq!(status, StatusCode::CREATED);

    let body = say(app, "alice!a@example.org", "I love PIZZA!!").await;
    assert_eq!(body["recorded"], true);
    assert_eq!(body["count"], 1);
    say(app, "bob!b@example.org", "pizza pizza").await;
    let dropped = say(app, "eve!e@example.org", "pizza").await;
    assert_eq!(dropped["recorded"], false);

    let uri = "/v1/channels/%23LAB/wordstats?word=pizza&limit=1&requester=1";
    let (status, body) = send(app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "ranking");
    assert_eq!(body["total"], 3);
    assert_eq!(body["top"][0]["name"], "bob");
    assert_eq!(body["top"].as_array().unwrap().len(), 1);
    assert_eq!(body["requester"]["rank"], 2);
    assert!(body["reply"].as_str().unwrap().contains("You are ranked 2 out of 2"));

    let uri = "/v1/channels/%23lab/wordstats?user=1&word=pizza";
    let (_, body) = send(app, "GET", uri, None).await;
    assert_eq!(body["count"], 1);

    let (_, body) = send(app, "GET", "/v1/channels/%23lab/words", None).await;
    assert_eq!(body["words"], serde_json::json!(["pizza"]));
}

#[tokio::test]
async fn rejects_invalid_and_unknown_words() {
    let harness = make_harness();
    let app = &harness.app;

    let (status, body) = track(app, "piz-za").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("alphanumeric"));

    let (status, body) = send(app, "DELETE", "/v1/channels/%23lab/words/pizza", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not currently keeping"));

    track(app, "soup").await;
    let (status, _) = send(app, "DELETE", "/v1/channels/%23lab/words/pizza", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(app, "DELETE", "/v1/channels/%23lab/words/soup", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(app, "GET", "/v1/channels/%23lab/wordstats?word=soup", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(app, "GET", "/v1/channels/%23lab/wordstats?user=1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejects_channel_names_with_line_breaks() {
    let harness = make_harness();
    let app = &harness.app;

    let body = serde_json::json!({ "word": "pizza" });
    for uri in ["/v1/channels/%23a%0Ab/words", "/v1/channels/%23a%0Db/words"] {
        let (status, body) = send(app, "POST", uri, Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not a valid channel"));
    }
    let message = serde_json::json!({
        "channel": "#a\nb",
        "sender": "alice!a@example.org",
        "text": "pizza",
    });
    let (status, body) = send(app, "POST", "/v1/messages", Some(message)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["recorded"], false);

    track(app, "pizza").await;
    say(app, "alice!a@example.org", "pizza").await;
    let (status, _) = send(app, "POST", "/v1/flush", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let reopened = PersistentStore::open(harness.persistent.path()).unwrap();
    let lab = wordstats::ChannelName::new("#lab");
    assert_eq!(reopened.store().read().total_word_count(&lab, "pizza").unwrap(), 1);
}

#[tokio::test]
async fn zero_limit_returns_full_ranking() {
    let harness = make_harness();
    let app = &harness.app;

    track(app, "pizza").await;
    say(app, "alice!a@example.org", "pizza").await;
    say(app, "bob!b@example.org", "pizza pizza").await;

    let uri = "/v1/channels/%23lab/wordstats?word=pizza&limit=0";
    let (status, body) = send(app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let top = body["top"].as_array().unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0]["name"], "bob");
    assert_eq!(top[1]["name"], "alice");
}

#[tokio::test]
async fn flush_persists_counts() {
    let harness = make_harness();
    let app = &harness.app;

    track(app, "pizza").await;
    say(app, "bob!b@example.org", "pizza pizza").await;

    let (status, _) = send(app, "POST", "/v1/flush", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let reopened = PersistentStore::open(harness.persistent.path()).unwrap();
    let db = reopened.store().read();
    let lab = wordstats::ChannelName::new("#lab");
    assert_eq!(db.total_word_count(&lab, "pizza").unwrap(), 2);
    assert_eq!(db.top_users(&lab, "pizza", 0), [(UserId(2), 2)]);
}

#[tokio::test]
async fn registers_users_for_ingestion() {
    let harness = make_harness();
    let app = &harness.app;

    track(app, "soup").await;
    let (status, _) = send(
        app,
        "POST",
        "/v1/users",
        Some(serde_json::json!({ "id": 7, "name": "carol", "hostmasks": ["carol!c@example.org"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let body = say(app, "carol!c@example.org", "soup, soup!").await;
    assert_eq!(body["count"], 2);
    let (_, body) = send(app, "GET", "/v1/channels/%23lab/wordstats?user=7", None).await;
    assert_eq!(body["kind"], "user_breakdown");
    assert_eq!(body["name"], "carol");
}

#[tokio::test]
async fn nextbus_reports_upstream_failure() {
    let harness = make_harness();
    let (status, body) = send(&harness.app, "GET", "/v1/nextbus", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("fetch failed"));
}
