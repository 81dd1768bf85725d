use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use warp::Filter;

/// Serve `/api/generate` as Ollama does: one NDJSON object per piece, `gap`
/// apart, the last one marked `done`. Every request gets the whole reply.
#[allow(dead_code)]
pub async fn spawn_mock_ollama(pieces: Vec<&'static str>, gap: Duration) -> (String, mpsc::Sender<()>) {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

    let route = warp::post()
        .and(warp::path!("api" / "generate"))
        .map(move || {
            let pieces = pieces.clone();
            let (mut tx, body) = warp::hyper::Body::channel();
            tokio::spawn(async move {
                let last = pieces.len().saturating_sub(1);
                for (i, piece) in pieces.into_iter().enumerate() {
                    tokio::time::sleep(gap).await;
                    let obj = json!({
                        "model": "gemma3:27b",
                        "created_at": "2025-01-01T00:00:00Z",
                        "response": piece,
                        "done": i == last
                    });
                    if tx.send_data(format!("{obj}\n").into()).await.is_err() {
                        return;
                    }
                }
            });
            warp::reply::Response::new(body)
        });

    let (addr, server) = warp::serve(route).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
        shutdown_rx.recv().await;
    });
    tokio::spawn(server);
    (format!("http://{}", addr), shutdown_tx)
}

/// Serve `/v1/chat/completions` as an OpenAI-compatible server streaming SSE.
///
/// Each delta is sent `gap` after the previous one; `[DONE]` follows the
/// last. The authorization header seen on each request is recorded.
#[allow(dead_code)]
pub async fn spawn_mock_openai(
    deltas: Vec<&'static str>,
    gap: Duration,
) -> (String, Arc<Mutex<Vec<Option<String>>>>, mpsc::Sender<()>) {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let auth = Arc::new(Mutex::new(Vec::new()));
    let seen = auth.clone();

    let route = warp::post()
        .and(warp::path!("v1" / "chat" / "completions"))
        .and(warp::header::optional::<String>("authorization"))
        .map(move |header: Option<String>| {
            seen.lock().unwrap().push(header);
            let deltas = deltas.clone();
            let (mut tx, body) = warp::hyper::Body::channel();
            tokio::spawn(async move {
                let role = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
                if tx.send_data(role.into()).await.is_err() {
                    return;
                }
                for d in deltas {
                    tokio::time::sleep(gap).await;
                    let obj = json!({ "choices": [{ "delta": { "content": d } }] });
                    let line = format!("data: {}\n\n", obj);
                    if tx.send_data(line.into()).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send_data("data: [DONE]\n\n".into()).await;
            });
            warp::reply::Response::new(body)
        });

    let (addr, server) = warp::serve(route).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
        shutdown_rx.recv().await;
    });
    tokio::spawn(server);
    (format!("http://{}", addr), auth, shutdown_tx)
}
