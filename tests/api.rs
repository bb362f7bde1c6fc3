//! End-to-end tests over a real listener.
//!
//! The generation engine is replaced by a scripted one; everything else
//! (router, service, registry, sessions, JSON store) is the production code.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

use chat_stream_server::agent::GenerationEngine;
use chat_stream_server::{build_router, shutdown_signal};
use chat_stream_server::db::JsonConversationStore;
use chat_stream_server::errors::AppError;
use chat_stream_server::service::chat_service::ChatService;
use chat_stream_server::stream::{RelayConfig, SessionConfig, SessionRegistry};

/// Replies with `replies[n]` on the n-th call, after `delays[n]`.
struct ScriptedEngine {
    replies: Vec<&'static str>,
    delays: Vec<Duration>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new(replies: Vec<&'static str>, delays: Vec<Duration>) -> Self {
        Self { replies, delays, calls: AtomicUsize::new(0) }
    }

    fn always(reply: &'static str) -> Self {
        Self::new(vec![reply], vec![Duration::ZERO])
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn generate(&self, _prompt: &str) -> Result<String, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.get(n).or(self.delays.last()).copied().unwrap_or_default();
        tokio::time::sleep(delay).await;
        let reply = self.replies.get(n).or(self.replies.last()).copied().unwrap_or_default();
        Ok(reply.to_string())
    }
}

struct TestApp {
    base: String,
    client: reqwest::Client,
    _dir: TempDir,
}

impl TestApp {
    async fn spawn(engine: ScriptedEngine, relay: RelayConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonConversationStore::new(dir.path().join("conversations.json")));
        let session = SessionConfig { chunk_delay: Duration::from_millis(1), ..SessionConfig::default() };
        let svc = ChatService::new(
            store,
            Arc::new(engine),
            Arc::new(SessionRegistry::new(Duration::from_secs(60))),
            session,
            relay,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(svc)).await.unwrap();
        });

        Self { base: format!("http://{addr}"), client: reqwest::Client::new(), _dir: dir }
    }

    async fn with_engine(engine: ScriptedEngine) -> Self {
        Self::spawn(
            engine,
            RelayConfig { attach_grace: Duration::from_millis(500), idle_timeout: Duration::from_secs(5) },
        )
        .await
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(format!("{}{path}", self.base)).send().await.unwrap()
    }

    /// Reads the whole SSE response and returns the JSON payload of every `data:` line.
    async fn events(&self, conv_id: &str) -> Vec<Value> {
        let response = tokio::time::timeout(Duration::from_secs(10), async {
            self.get(&format!("/events/{conv_id}")).await.text().await.unwrap()
        })
        .await
        .expect("event stream did not terminate");

        response
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }
}

fn tokens(events: &[Value]) -> String {
    events
        .iter()
        .filter(|e| e["type"] == "token")
        .map(|e| e["text"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn conversation_round_trip_streams_and_records_reply() {
    let app = TestApp::with_engine(ScriptedEngine::always(
        "I thread in Java permettono l'esecuzione concorrente.",
    ))
    .await;

    let created: Value = app.post("/conversation", json!({ "title": "Java" })).await.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let sent = app
        .post("/send", json!({ "conv_id": id, "message": "spiegami i thread in java" }))
        .await;
    assert_eq!(sent.status(), StatusCode::OK);
    assert_eq!(sent.json::<Value>().await.unwrap()["conv_id"], id.as_str());

    let started = app.post("/start_stream", json!({ "conv_id": id })).await;
    assert_eq!(started.status(), StatusCode::OK);

    let events = app.events(&id).await;
    assert_eq!(events.last().unwrap(), &json!({ "type": "done" }));
    assert_eq!(events.iter().filter(|e| e["type"] == "done").count(), 1);
    assert_eq!(tokens(&events), "I thread in Java permettono l'esecuzione concorrente.");
    assert!(events.iter().filter(|e| e["type"] == "token").all(|e| e["text"].as_str().unwrap().chars().count() <= 12));

    let conversation: Value = app.get(&format!("/conversation/{id}")).await.json().await.unwrap();
    assert_eq!(conversation["title"], "Java");
    let messages = conversation["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["text"].as_str().unwrap(), tokens(&events));
}

#[tokio::test]
async fn restarted_stream_only_delivers_newest_reply() {
    let app = TestApp::with_engine(ScriptedEngine::new(
        vec!["risposta vecchia", "risposta nuova"],
        vec![Duration::from_millis(300), Duration::ZERO],
    ))
    .await;

    let sent: Value = app
        .post("/send", json!({ "message": "come configuro docker?" }))
        .await
        .json()
        .await
        .unwrap();
    let id = sent["conv_id"].as_str().unwrap().to_string();

    app.post("/start_stream", json!({ "conv_id": id })).await;
    app.post("/start_stream", json!({ "conv_id": id })).await;

    let events = app.events(&id).await;
    assert_eq!(events.iter().filter(|e| e["type"] == "done").count(), 1);
    assert_eq!(events.last().unwrap()["type"], "done");

    // The superseded session is cancelled before it can record anything, so
    // history holds exactly the reply the subscriber saw.
    let conversation: Value = app.get(&format!("/conversation/{id}")).await.json().await.unwrap();
    let texts: Vec<&str> = conversation["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "come configuro docker?");
    assert_eq!(texts[1], tokens(&events));
}

#[tokio::test]
async fn off_topic_question_streams_refusal() {
    let app = TestApp::with_engine(ScriptedEngine::always("non usato")).await;

    let sent: Value = app.post("/send", json!({ "message": "che tempo fa oggi?" })).await.json().await.unwrap();
    let id = sent["conv_id"].as_str().unwrap().to_string();
    app.post("/start_stream", json!({ "conv_id": id })).await;

    let events = app.events(&id).await;
    assert_eq!(tokens(&events), chat_stream_server::filter::REFUSAL_TEXT);
}

#[tokio::test]
async fn idle_stream_is_closed_with_done() {
    let app = TestApp::spawn(
        ScriptedEngine::new(vec!["mai"], vec![Duration::from_secs(3600)]),
        RelayConfig { attach_grace: Duration::from_millis(500), idle_timeout: Duration::from_millis(200) },
    )
    .await;

    let sent: Value = app.post("/send", json!({ "message": "spiegami kubernetes" })).await.json().await.unwrap();
    let id = sent["conv_id"].as_str().unwrap().to_string();
    app.post("/start_stream", json!({ "conv_id": id })).await;

    assert_eq!(app.events(&id).await, vec![json!({ "type": "done" })]);

    let stopped: Value = app.post("/stop_stream", json!({ "conv_id": id })).await.json().await.unwrap();
    assert_eq!(stopped["cancelled"], true);
}

#[tokio::test]
async fn events_for_unknown_stream_report_error() {
    let app = TestApp::spawn(
        ScriptedEngine::always("x"),
        RelayConfig { attach_grace: Duration::from_millis(100), idle_timeout: Duration::from_secs(5) },
    )
    .await;

    let events = app.events("sconosciuto").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let app = TestApp::with_engine(ScriptedEngine::always("x")).await;

    let response = app.post("/send", json!({ "message": "" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Field 'message' cannot be empty");
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let app = TestApp::with_engine(ScriptedEngine::always("x")).await;

    let response = app.get("/conversation/non-esiste").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn conversations_are_listed_by_recent_activity() {
    let app = TestApp::with_engine(ScriptedEngine::always("x")).await;

    let empty: Value = app.post("/conversation", json!({})).await.json().await.unwrap();
    let older: Value = app.post("/send", json!({ "message": "prima domanda su git" })).await.json().await.unwrap();
    let newer: Value = app.post("/send", json!({ "message": "seconda domanda su sql" })).await.json().await.unwrap();

    let listed: Vec<Value> = app.get("/conversations").await.json().await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|c| c["id"].as_str().unwrap()).collect();
    assert_eq!(
        ids,
        vec![
            newer["conv_id"].as_str().unwrap(),
            older["conv_id"].as_str().unwrap(),
            empty["id"].as_str().unwrap(),
        ]
    );
    assert_eq!(listed[0]["title"], "seconda domanda su sql");
    assert_eq!(listed[2]["title"], "Nuova conversazione");
}

#[tokio::test]
async fn ask_answers_in_one_shot() {
    let app = TestApp::with_engine(ScriptedEngine::always("Usa docker compose.")).await;

    let answer: Value = app.post("/ask", json!({ "message": "come configuro docker?" })).await.json().await.unwrap();
    assert_eq!(answer["response"], "Usa docker compose.");

    let empty: Value = app.post("/ask", json!({ "message": "" })).await.json().await.unwrap();
    assert_eq!(empty["response"], "Inserisci un messaggio valido.");
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = TestApp::with_engine(ScriptedEngine::always("x")).await;

    let broken = app
        .client
        .post(format!("{}/send", app.base))
        .header("content-type", "application/json")
        .body("{\"message\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(broken.status(), StatusCode::BAD_REQUEST);
    let body: Value = broken.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

    let missing = app.client.post(format!("{}/start_stream", app.base)).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn shutdown_closes_open_event_streams() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonConversationStore::new(dir.path().join("conversations.json")));
    let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
    let svc = ChatService::new(
        store,
        Arc::new(ScriptedEngine::new(vec!["mai"], vec![Duration::from_secs(3600)])),
        Arc::clone(&registry),
        SessionConfig::default(),
        RelayConfig { attach_grace: Duration::from_millis(500), idle_timeout: Duration::from_secs(60) },
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let signal = async move {
        stop_rx.await.ok();
    };
    let server = tokio::spawn(async move {
        axum::serve(listener, build_router(svc))
            .with_graceful_shutdown(shutdown_signal(signal, registry))
            .await
            .unwrap();
    });

    let client = reqwest::Client::new();
    let sent: Value = client
        .post(format!("{base}/send"))
        .json(&json!({ "message": "spiegami kubernetes" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = sent["conv_id"].as_str().unwrap().to_string();
    client
        .post(format!("{base}/start_stream"))
        .json(&json!({ "conv_id": id }))
        .send()
        .await
        .unwrap();

    let events = tokio::spawn({
        let client = client.clone();
        let url = format!("{base}/events/{id}");
        async move { client.get(url).send().await.unwrap().text().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server kept running while a generation was pending")
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), events).await.unwrap().unwrap();
    let data: Vec<Value> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    assert_eq!(data, vec![json!({ "type": "done" })]);
}
