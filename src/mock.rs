use crate::protocol::{Action, AgentRequest};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Json;
use base64::Engine;
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const INVOCATIONS_PATH: &str = "/invocations";

/// Canned bytes served for exports so the client side can be checked end to end.
pub const MOCK_PDF_BYTES: &[u8] = b"%PDF-1.7\n% deckstream mock\n%%EOF\n";
pub const MOCK_PPTX_BYTES: &[u8] = b"PK\x03\x04deckstream-mock-pptx";

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub auth_token: String,
    /// Pause before each event, to make streaming visible.
    pub event_delay: Duration,
    /// Number of export requests answered with an `error` event before succeeding.
    pub failing_exports: usize,
    /// Same, for share requests.
    pub failing_shares: usize,
    /// Export and share replies stop after the progress event.
    pub withhold_results: bool,
    /// Leave the stream open after the last scripted event instead of sending `[DONE]`.
    pub hold_open: bool,
    /// Invocations served so far, shared with whoever holds a clone of the config.
    pub requests: Arc<AtomicUsize>,
}

impl MockConfig {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            event_delay: Duration::ZERO,
            failing_exports: 0,
            failing_shares: 0,
            withhold_results: false,
            hold_open: false,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct MockState {
    config: MockConfig,
    export_requests: AtomicUsize,
    share_requests: AtomicUsize,
}

type MockResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub fn router(config: MockConfig) -> axum::Router {
    let state = Arc::new(MockState {
        config,
        export_requests: AtomicUsize::new(0),
        share_requests: AtomicUsize::new(0),
    });

    axum::Router::new()
        .route(INVOCATIONS_PATH, post(invoke))
        .with_state(state)
}

pub async fn run(listen: &str, config: MockConfig) -> MockResult<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(
        "mock agent listening on http://{}{}",
        listener.local_addr()?,
        INVOCATIONS_PATH
    );
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Binds to an ephemeral local port and serves in the background.
pub async fn spawn(config: MockConfig) -> MockResult<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(config);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "mock agent stopped");
        }
    });
    Ok(addr)
}

async fn invoke(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<AgentRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&headers, &state.config.auth_token)?;
    state.config.requests.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(action = ?request.action, "mock invocation");

    let events = script(&state, &request);
    let delay = state.config.event_delay;
    let mut frames: Vec<String> = events.into_iter().map(|event| event.to_string()).collect();
    if !state.config.hold_open {
        frames.push("[DONE]".to_string());
    }
    let tail = if state.config.hold_open {
        futures::stream::pending::<Result<Event, Infallible>>().left_stream()
    } else {
        futures::stream::empty().right_stream()
    };

    let stream = futures::stream::iter(frames)
        .then(move |data| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Event, Infallible>(Event::default().data(data))
        })
        .chain(tail);

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn script(state: &MockState, request: &AgentRequest) -> Vec<Value> {
    match request.action {
        Action::Chat => chat_script(request),
        Action::ExportPdf | Action::ExportPptx | Action::ExportPptxEditable => {
            let seen = state.export_requests.fetch_add(1, Ordering::SeqCst);
            if seen < state.config.failing_exports {
                return vec![json!({"type": "error", "message": "renderer crashed"})];
            }
            let progress = json!({"type": "progress", "message": "converting..."});
            if state.config.withhold_results {
                return vec![progress];
            }
            let (kind, bytes) = if request.action == Action::ExportPdf {
                ("pdf", MOCK_PDF_BYTES)
            } else {
                ("pptx", MOCK_PPTX_BYTES)
            };
            vec![
                progress,
                json!({
                    "type": kind,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }),
            ]
        }
        Action::ShareSlide => {
            let seen = state.share_requests.fetch_add(1, Ordering::SeqCst);
            if seen < state.config.failing_shares {
                return vec![json!({"type": "error", "error": "bucket unavailable"})];
            }
            if state.config.withhold_results {
                return vec![json!({"type": "progress", "message": "uploading..."})];
            }
            vec![json!({
                "type": "share_result",
                "url": "https://mock.deckstream.local/s/deck-1/index.html",
                "expiresAt": 1_893_456_000,
            })]
        }
    }
}

fn chat_script(request: &AgentRequest) -> Vec<Value> {
    if request.model.as_deref() == Some("invalid") {
        return vec![json!({
            "type": "error",
            "error": "ValidationException: The provided model identifier is invalid.",
        })];
    }

    let prompt = request.prompt.to_lowercase();
    if prompt.contains("share") || prompt.contains("tweet") {
        let url = "https://x.com/intent/tweet?text=Made%20slides%20with%20deckstream";
        return vec![
            json!({"type": "tool_use", "data": "generate_tweet_url"}),
            json!({"type": "tweet_url", "data": url}),
        ];
    }

    let topic = request.prompt.trim();
    let markdown = format!(
        "---\nmarp: true\ntheme: {}\nsize: 16:9\npaginate: true\n---\n\n# {}\n\n---\n\n## Overview\n\n- Why it matters\n- How it works\n- What to try next\n\n---\n\n# Thank you!\n",
        request.theme, topic
    );

    let mut events = vec![
        json!({"type": "status", "data": "Reading the request..."}),
        json!({"type": "text", "data": "Let me look that up "}),
        json!({"type": "text", "data": "first."}),
        json!({"type": "tool_use", "data": "web_search", "query": topic}),
    ];
    if let Some(url) = topic.split_whitespace().find(|word| word.starts_with("http")) {
        events.push(json!({"type": "tool_use", "data": "http_request", "query": url}));
    }
    events.extend([
        json!({"type": "text", "data": "Found enough material. Building the deck now."}),
        json!({"type": "tool_use", "data": "output_slide"}),
        json!({"type": "markdown", "data": markdown}),
        json!({"type": "text", "data": "Done! Ask me for any changes."}),
    ]);
    events
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), StatusCode> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        Some(value) if value == format!("Bearer {}", token) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
