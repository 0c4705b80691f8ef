use crate::error::{ClientError, ClientResult};
use crate::protocol::{AgentRequest, StreamEvent};
use crate::sse::{read_sse_stream, Flow};
use crate::watchdog::IdleBudgets;
use reqwest::header::ACCEPT;
use reqwest::Client as HttpClient;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub token: String,
    pub budgets: IdleBudgets,
}

/// Posts agent invocations and exposes the answer as an event stream.
#[derive(Debug, Clone)]
pub struct AgentClient {
    endpoint: String,
    token: String,
    budgets: IdleBudgets,
    http: HttpClient,
}

pub fn resolve_token(explicit: Option<String>) -> ClientResult<String> {
    if let Some(token) = explicit.filter(|token| !token.trim().is_empty()) {
        return Ok(token);
    }

    read_token_file().map_err(|_| {
        ClientError::Validation(
            "No auth token found; pass --token, set DECKSTREAM_TOKEN, or write ~/.deckstream/token."
                .to_string(),
        )
    })
}

impl AgentClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            endpoint: normalize_endpoint(&config.endpoint),
            token: config.token,
            budgets: config.budgets,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn budgets(&self) -> IdleBudgets {
        self.budgets
    }

    /// Sends one request and feeds every decoded event to `on_event` until the
    /// stream ends or the callback stops it.
    pub async fn invoke<F, D>(&self, request: &AgentRequest, on_event: F, on_done: D) -> ClientResult<()>
    where
        F: FnMut(StreamEvent) -> Result<Flow, ClientError>,
        D: FnOnce(),
    {
        tracing::debug!(action = ?request.action, endpoint = %self.endpoint, "invoking agent");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        read_sse_stream(response.bytes_stream(), self.budgets, on_event, on_done).await
    }
}

fn normalize_endpoint(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn read_token_file() -> ClientResult<String> {
    let token = std::fs::read_to_string(token_path())?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(ClientError::Validation("token file is empty".to_string()));
    }
    Ok(token)
}

pub fn token_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".deckstream").join("token");
    }

    PathBuf::from("deckstream.token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_token_wins() {
        assert_eq!(resolve_token(Some("abc".to_string())).unwrap(), "abc");
    }

    #[test]
    fn endpoint_loses_trailing_slashes() {
        assert_eq!(
            normalize_endpoint(" http://localhost:8080/invocations/ "),
            "http://localhost:8080/invocations"
        );
    }
}
