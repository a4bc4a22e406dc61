//! End-to-end federation over real library servers on local ports.

use polymath::config::Dispatch;
use polymath::federate::{Federator, QueryMode};
use polymath::protocol::RetrievalRequest;
use polymath::{server, Bit, Info, Library, PolymathError};
use polymath_core::backend::memory::InMemoryBackend;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const MODEL: &str = "test:tiny";

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn bit(text: &str, url: &str, embedding: [f32; 2]) -> Bit {
    let mut bit = Bit::from_chunk(text, Info::new(url), 0);
    bit.embedding = Some(embedding.to_vec());
    bit
}

fn library(bits: Vec<Bit>) -> Library {
    let mut library = Library::with_dims(MODEL, 2);
    for bit in bits {
        library.insert(bit).unwrap();
    }
    library
}

/// Serve `contents` under `model` and return the server URL.
async fn spawn_library(contents: Library, model: &str) -> String {
    let port = find_free_port();
    let backend = Arc::new(InMemoryBackend::new(contents));
    let app = server::router(backend, Library::with_dims(model, 2));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}/", port)
}

async fn three_servers() -> Vec<String> {
    let a = spawn_library(
        library(vec![
            bit("Alpha near.", "https://a.example/1", [1.0, 0.0]),
            bit("Alpha far.", "https://a.example/2", [0.0, 1.0]),
        ]),
        MODEL,
    )
    .await;
    let b = spawn_library(
        library(vec![bit("Beta.", "https://b.example/1", [0.6, 0.8])]),
        MODEL,
    )
    .await;
    let c = spawn_library(
        library(vec![bit("Gamma.", "https://c.example/1", [1.0, 1.0])]),
        MODEL,
    )
    .await;
    vec![a, b, c]
}

fn federator(dispatch: Dispatch, token_count: usize) -> Federator {
    Federator::new(MODEL, token_count, dispatch, Duration::from_secs(5)).unwrap()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_results_concatenate_in_server_order() {
    let servers = three_servers().await;
    let mode = QueryMode::Embedding(vec![1.0, 0.0]);

    for dispatch in [Dispatch::Sequential, Dispatch::Concurrent] {
        let merged = federator(dispatch, 1500).query(&servers, &mode).await.unwrap();
        assert_eq!(
            merged.context,
            vec!["Alpha near.", "Alpha far.", "Beta.", "Gamma."],
            "dispatch {:?}",
            dispatch
        );
        assert_eq!(
            merged.sources,
            vec![
                "https://a.example/1",
                "https://a.example/2",
                "https://b.example/1",
                "https://c.example/1"
            ]
        );
    }
}

#[tokio::test]
async fn test_reversed_server_list_reverses_blocks() {
    let mut servers = three_servers().await;
    servers.reverse();
    let merged = federator(Dispatch::Sequential, 1500)
        .query(&servers, &QueryMode::Embedding(vec![1.0, 0.0]))
        .await
        .unwrap();
    assert_eq!(
        merged.context,
        vec!["Gamma.", "Beta.", "Alpha near.", "Alpha far."]
    );
}

#[tokio::test]
async fn test_each_server_gets_the_full_budget() {
    let servers = three_servers().await;
    // Each first bit costs 3 tokens; a budget of 3 keeps one bit per server.
    let merged = federator(Dispatch::Sequential, 3)
        .query(&servers, &QueryMode::Embedding(vec![1.0, 0.0]))
        .await
        .unwrap();
    assert_eq!(merged.context, vec!["Alpha near.", "Beta.", "Gamma."]);
}

#[tokio::test]
async fn test_server_error_aborts_whole_query() {
    let mut servers = three_servers().await;
    let wrong_model = spawn_library(
        library(vec![bit("Other.", "https://x.example/1", [1.0, 0.0])]),
        "test:other",
    )
    .await;
    servers.insert(1, wrong_model.clone());

    for dispatch in [Dispatch::Sequential, Dispatch::Concurrent] {
        let err = federator(dispatch, 1500)
            .query(&servers, &QueryMode::Embedding(vec![1.0, 0.0]))
            .await
            .unwrap_err();
        match err.downcast_ref::<PolymathError>() {
            Some(PolymathError::Server { server, message }) => {
                assert_eq!(server, &wrong_model);
                assert!(message.contains("does not match"), "message: {}", message);
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_random_sampling_is_reproducible() {
    let bits = (0..20)
        .map(|i| bit(&format!("Bit number {}.", i), "https://r.example/", [1.0, 0.0]))
        .collect();
    let server = vec![spawn_library(library(bits), MODEL).await];
    let federator = federator(Dispatch::Sequential, 1500);

    let first = federator
        .query(&server, &QueryMode::Random { seed: Some(42) })
        .await
        .unwrap();
    let second = federator
        .query(&server, &QueryMode::Random { seed: Some(42) })
        .await
        .unwrap();
    assert_eq!(first.context.len(), 20);
    assert_eq!(first, second);
    assert_eq!(first.sources, vec!["https://r.example/"]);
}

#[tokio::test]
async fn test_server_rejects_bad_requests() {
    let url = spawn_library(library(vec![]), MODEL).await;
    let client = reqwest::Client::new();

    let resp = client.post(&url).body("not json").send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid request body"));

    let mut both = RetrievalRequest::similarity(MODEL, 10, &[1.0, 0.0]);
    both.sort = Some(polymath_core::query::Sort::Random);
    let resp = client.post(&url).json(&both).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    let mut old = RetrievalRequest::random(MODEL, 10, None);
    old.version = "9".to_string();
    let resp = client.post(&url).json(&old).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    let wrong_dims = RetrievalRequest::similarity(MODEL, 10, &[1.0, 0.0, 0.0]);
    let resp = client.post(&url).json(&wrong_dims).send().await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_health_and_empty_library() {
    let url = spawn_library(library(vec![]), MODEL).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}health", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], "0");

    let resp = client
        .post(&url)
        .json(&RetrievalRequest::similarity(MODEL, 10, &[1.0, 0.0]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["embedding_model"], MODEL);
    assert_eq!(body["omit"], "embedding");
    assert_eq!(body["bits"].as_array().unwrap().len(), 0);
}
