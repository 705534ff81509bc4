//! End-to-end pipeline tests: hashing embeddings, a real temp index
//! directory, and a local mock of the chat-completions endpoint.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::json;
use tempfile::TempDir;

use pagewise::answer::{AnswerOutcome, HIGH_TRAFFIC_MESSAGE, NO_CONTEXT_MESSAGE, TECHNICAL_ISSUE_MESSAGE};
use pagewise::completion::ChatCompletionsClient;
use pagewise::config::Config;
use pagewise::embedding::{Embedder, HashingEmbedder};
use pagewise::models::Page;
use pagewise::persist::IndexStorage;
use pagewise::pipeline::Pipeline;
use pagewise::retrieve::RetrieveError;

// ─── Mock completion server ─────────────────────────────────────────

struct MockCompletions {
    statuses: Mutex<VecDeque<u16>>,
    requests: AtomicUsize,
    last_body: Mutex<Option<serde_json::Value>>,
}

async fn handle_completion(
    State(mock): State<Arc<MockCompletions>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    mock.requests.fetch_add(1, Ordering::SeqCst);
    *mock.last_body.lock().unwrap() = Some(body);
    let status = mock.statuses.lock().unwrap().pop_front().unwrap_or(200);
    if status == 200 {
        (
            StatusCode::OK,
            Json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Paracetamol is used to treat fever and mild pain.\nCitations: page no: 1"
                    }
                }]
            })),
        )
    } else {
        (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({ "error": { "message": "upstream exploded with secret detail" } })),
        )
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_mock(statuses: &[u16]) -> (Arc<MockCompletions>, String) {
    let mock = Arc::new(MockCompletions {
        statuses: Mutex::new(statuses.iter().copied().collect()),
        requests: AtomicUsize::new(0),
        last_body: Mutex::new(None),
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(handle_completion))
        .with_state(mock.clone());
    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, format!("http://127.0.0.1:{}/v1/chat/completions", port))
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir, api_url: &str) -> Config {
    let mut cfg = Config::default();
    cfg.storage.dir = tmp.path().join("index");
    cfg.storage.uploads_dir = tmp.path().join("uploads");
    cfg.embedding.provider = "hashing".to_string();
    cfg.embedding.dims = Some(128);
    cfg.completion.api_url = api_url.to_string();
    cfg.completion.api_key_env = "PAGEWISE_TEST_UNSET_KEY".to_string();
    cfg.completion.retry_delay_secs = 0;
    cfg.completion.timeout_secs = 5;
    cfg
}

async fn pipeline(cfg: &Config) -> Pipeline {
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128).unwrap());
    let client = Arc::new(ChatCompletionsClient::new(&cfg.completion).unwrap());
    Pipeline::with_components(cfg, embedder, client)
        .await
        .unwrap()
}

fn leaflet() -> Vec<Page> {
    vec![
        Page::new(1, "Paracetamol is used to treat fever and mild to moderate pain.", "leaflet.pdf"),
        Page::new(2, "Store below 25 degrees and keep out of the reach of children.", "leaflet.pdf"),
        Page::new(3, "Adults should not take more than eight tablets in twenty four hours.", "leaflet.pdf"),
        Page::new(4, "Side effects are rare but may include skin rash.", "leaflet.pdf"),
    ]
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_paracetamol_question_cites_page_one() {
    let tmp = TempDir::new().unwrap();
    let (mock, url) = start_mock(&[200]).await;
    let cfg = test_config(&tmp, &url);
    let p = pipeline(&cfg).await;

    let report = p.ingest(leaflet()).await.unwrap();
    assert_eq!(report.chunks_added, 4);
    assert_eq!(report.documents_processed, 1);

    let hits = p.retrieve("What is paracetamol used for?", None).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].metadata.page_number, 1);

    let answer = p.answer("What is paracetamol used for?").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Answered);
    assert_eq!(answer.citations[0].source, "leaflet.pdf");
    assert_eq!(answer.citations[0].pages[0], 1);

    let text = answer.formatted();
    assert!(text.starts_with("Paracetamol is used to treat fever"));
    assert!(text.contains("Citations: page no: 1"));
    assert_eq!(text.matches("Citations:").count(), 1);
    assert_eq!(mock.requests.load(Ordering::SeqCst), 1);

    let body = mock.last_body.lock().unwrap().clone().unwrap();
    let prompt = body["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("leaflet.pdf | Page 1: Paracetamol is used to treat fever"));
    assert_eq!(body["max_tokens"], 2048);
}

#[tokio::test]
async fn test_empty_index_returns_no_context_without_calling_model() {
    let tmp = TempDir::new().unwrap();
    let (mock, url) = start_mock(&[]).await;
    let p = pipeline(&test_config(&tmp, &url)).await;

    let answer = p.answer("What is paracetamol used for?").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::NoContext);
    assert!(answer.citations.is_empty());
    assert!(answer.formatted().starts_with(NO_CONTEXT_MESSAGE));
    assert_eq!(mock.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limited_twice_then_answered() {
    let tmp = TempDir::new().unwrap();
    let (mock, url) = start_mock(&[429, 429, 200]).await;
    let p = pipeline(&test_config(&tmp, &url)).await;
    p.ingest(leaflet()).await.unwrap();

    let answer = p.answer("paracetamol").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Answered);
    assert_eq!(answer.attempts, 3);
    assert_eq!(mock.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rate_limit_budget_exhausted() {
    let tmp = TempDir::new().unwrap();
    let (mock, url) = start_mock(&[429, 429, 429, 429]).await;
    let p = pipeline(&test_config(&tmp, &url)).await;
    p.ingest(leaflet()).await.unwrap();

    let answer = p.answer("paracetamol").await.unwrap();
    assert_eq!(answer.formatted(), HIGH_TRAFFIC_MESSAGE);
    assert_eq!(mock.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_server_error_is_not_retried_and_not_leaked() {
    let tmp = TempDir::new().unwrap();
    let (mock, url) = start_mock(&[500, 200]).await;
    let p = pipeline(&test_config(&tmp, &url)).await;
    p.ingest(leaflet()).await.unwrap();

    let answer = p.answer("paracetamol").await.unwrap();
    assert_eq!(answer.formatted(), TECHNICAL_ISSUE_MESSAGE);
    assert!(!answer.formatted().contains("secret detail"));
    assert_eq!(mock.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_degrades_to_high_traffic() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let url = format!("http://127.0.0.1:{}/v1/chat/completions", port);
    let p = pipeline(&test_config(&tmp, &url)).await;
    p.ingest(leaflet()).await.unwrap();

    let answer = p.answer("paracetamol").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::HighTraffic);
    assert_eq!(answer.attempts, 3);
}

#[tokio::test]
async fn test_strict_mode_refuses_off_topic_query() {
    let tmp = TempDir::new().unwrap();
    let (mock, url) = start_mock(&[200]).await;
    let mut cfg = test_config(&tmp, &url);
    cfg.completion.strict_context_match = true;
    let p = pipeline(&cfg).await;
    p.ingest(leaflet()).await.unwrap();

    let answer = p.answer("insulin pump calibration").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::OffTopic);
    assert_eq!(mock.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reingest_into_fresh_store_is_idempotent() {
    let tmp_a = TempDir::new().unwrap();
    let tmp_b = TempDir::new().unwrap();
    let (_mock, url) = start_mock(&[]).await;
    let cfg_a = test_config(&tmp_a, &url);
    let cfg_b = test_config(&tmp_b, &url);

    pipeline(&cfg_a).await.ingest(leaflet()).await.unwrap();
    pipeline(&cfg_b).await.ingest(leaflet()).await.unwrap();

    let a = IndexStorage::new(&cfg_a.storage.dir).load("hashing-128").unwrap().unwrap();
    let b = IndexStorage::new(&cfg_b.storage.dir).load("hashing-128").unwrap().unwrap();
    assert_eq!(a.snapshot.len(), b.snapshot.len());
    let texts = |s: &pagewise::snapshot::IndexSnapshot| {
        s.store().entries().iter().map(|c| c.text.clone()).collect::<Vec<_>>()
    };
    assert_eq!(texts(&a.snapshot), texts(&b.snapshot));
    for (x, y) in a
        .snapshot
        .index()
        .as_flat()
        .iter()
        .zip(b.snapshot.index().as_flat())
    {
        assert!((x - y).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_reload_keeps_index_and_store_aligned() {
    let tmp = TempDir::new().unwrap();
    let (_mock, url) = start_mock(&[]).await;
    let cfg = test_config(&tmp, &url);

    let first = pipeline(&cfg).await;
    first.ingest(leaflet()).await.unwrap();
    first
        .ingest(vec![Page::new(1, "Ibuprofen reduces inflammation.", "other.pdf")])
        .await
        .unwrap();

    let reopened = pipeline(&cfg).await;
    let stats = reopened.stats();
    assert_eq!(stats.status, "ready");
    assert_eq!(stats.chunks, 5);
    assert_eq!(stats.documents, 2);

    let loaded = IndexStorage::new(&cfg.storage.dir).load("hashing-128").unwrap().unwrap();
    assert_eq!(loaded.snapshot.index().len(), loaded.snapshot.store().len());
}

#[tokio::test]
async fn test_corrupt_index_refuses_queries_until_rebuild() {
    let tmp = TempDir::new().unwrap();
    let (_mock, url) = start_mock(&[200]).await;
    let cfg = test_config(&tmp, &url);

    pipeline(&cfg).await.ingest(leaflet()).await.unwrap();

    let storage = IndexStorage::new(&cfg.storage.dir);
    let generation = storage.current_generation().unwrap().unwrap();
    let chunks_path = cfg.storage.dir.join(&generation).join("chunks.json");
    std::fs::write(&chunks_path, "[]").unwrap();

    let p = pipeline(&cfg).await;
    assert_eq!(p.stats().status, "corrupt");
    let err = p.answer("paracetamol").await.unwrap_err();
    assert!(matches!(err, RetrieveError::IndexUnusable(_)));
    assert!(p.ingest(leaflet()).await.is_err());

    p.rebuild(leaflet()).await.unwrap();
    assert_eq!(p.stats().chunks, 4);
    let answer = p.answer("paracetamol").await.unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Answered);
}

#[tokio::test]
async fn test_ingest_without_text_is_zero_count_success() {
    let tmp = TempDir::new().unwrap();
    let (_mock, url) = start_mock(&[]).await;
    let p = pipeline(&test_config(&tmp, &url)).await;

    let report = p.ingest(Vec::new()).await.unwrap();
    assert_eq!(report.chunks_added, 0);
    assert_eq!(p.stats().status, "empty");
}

#[tokio::test]
async fn test_single_page_top_one_retrieval() {
    let tmp = TempDir::new().unwrap();
    let (_mock, url) = start_mock(&[]).await;
    let p = pipeline(&test_config(&tmp, &url)).await;

    let report = p
        .ingest(vec![Page::new(1, "Paracetamol is used to treat fever", "leaflet.pdf")])
        .await
        .unwrap();
    assert_eq!(report.chunks_added, 1);
    assert_eq!(p.stats().chunks, 1);

    let hits = p.retrieve("What is paracetamol used for?", Some(1)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata.page_number, 1);
    assert_eq!(hits[0].metadata.source, "leaflet.pdf");
}

#[tokio::test(flavor = "current_thread")]
async fn test_concurrent_opens_share_verified_generation() {
    let tmp = TempDir::new().unwrap();
    let (_mock, url) = start_mock(&[]).await;
    let cfg = test_config(&tmp, &url);
    pipeline(&cfg).await.ingest(leaflet()).await.unwrap();

    let (a, b) = tokio::join!(pipeline(&cfg), pipeline(&cfg));
    let (a, b) = (a.stats(), b.stats());
    assert_eq!(a.status, "ready");
    assert_eq!(a.chunks, 4);
    assert_eq!(a.generation, b.generation);
}
