use crate::client::AgentClient;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Action, AgentRequest, ExportFormat, ShareResult, StreamEvent};
use crate::sse::Flow;
use base64::Engine;
use bytes::Bytes;
use std::time::Duration;

/// Decoded binary payload tagged with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    content_type: &'static str,
}

impl Blob {
    pub fn from_base64(encoded: &str, content_type: &'static str) -> ClientResult<Self> {
        let data = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self {
            data: Bytes::from(data),
            content_type,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_secs(1),
        }
    }
}

/// Attempt bookkeeping for a single export call.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    policy: RetryPolicy,
}

impl RetryState {
    fn new(policy: RetryPolicy) -> Self {
        Self { attempt: 0, policy }
    }

    /// Records a failed attempt; true if another one is allowed.
    fn record_failure(&mut self) -> bool {
        self.attempt += 1;
        self.attempt <= self.policy.max_retries
    }
}

pub async fn export_slide(
    client: &AgentClient,
    markdown: &str,
    format: ExportFormat,
    theme: &str,
) -> ClientResult<Blob> {
    export_slide_with_policy(client, markdown, format, theme, RetryPolicy::default()).await
}

/// Exports the deck, retrying the whole exchange on any failure.
pub async fn export_slide_with_policy(
    client: &AgentClient,
    markdown: &str,
    format: ExportFormat,
    theme: &str,
    policy: RetryPolicy,
) -> ClientResult<Blob> {
    let mut retry = RetryState::new(policy);
    loop {
        match export_once(client, markdown, format, theme).await {
            Ok(blob) => {
                tracing::info!(format = format.label(), size = blob.size(), "export finished");
                return Ok(blob);
            }
            Err(err) if retry.record_failure() => {
                tracing::warn!(
                    format = format.label(),
                    attempt = retry.attempt,
                    error = %err,
                    "export failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn export_once(
    client: &AgentClient,
    markdown: &str,
    format: ExportFormat,
    theme: &str,
) -> ClientResult<Blob> {
    let request = AgentRequest::one_shot(format.action(), markdown, theme);
    let mut result = None;

    client
        .invoke(
            &request,
            |event| {
                if let Some(data) = export_payload(&event, format) {
                    result = Some(Blob::from_base64(data, format.mime_type())?);
                    return Ok(Flow::Stop);
                }
                remote_failure(&event, &format!("{} export error", format.label()))?;
                Ok(Flow::Continue)
            },
            || {},
        )
        .await?;

    result.ok_or(ClientError::MissingResult(format.label()))
}

/// Publishes the deck and returns its public URL. Not retried.
pub async fn share_slide(client: &AgentClient, markdown: &str, theme: &str) -> ClientResult<ShareResult> {
    let request = AgentRequest::one_shot(Action::ShareSlide, markdown, theme);
    let mut result = None;

    client
        .invoke(
            &request,
            |event| {
                if let StreamEvent::ShareResult {
                    url: Some(url),
                    expires_at,
                } = &event
                {
                    if !url.is_empty() {
                        result = Some(ShareResult {
                            url: url.clone(),
                            expires_at: expires_at.unwrap_or_default(),
                        });
                        return Ok(Flow::Stop);
                    }
                }
                remote_failure(&event, "share error")?;
                Ok(Flow::Continue)
            },
            || {},
        )
        .await?;

    let result = result.ok_or(ClientError::MissingResult("share link"))?;
    tracing::info!(url = %result.url, "slide shared");
    Ok(result)
}

fn export_payload(event: &StreamEvent, format: ExportFormat) -> Option<&str> {
    let data = match (event, format.event_type()) {
        (StreamEvent::Pdf { data }, "pdf") => data,
        (StreamEvent::Pptx { data }, "pptx") => data,
        _ => return None,
    };
    data.as_deref().filter(|data| !data.is_empty())
}

fn remote_failure(event: &StreamEvent, fallback: &str) -> ClientResult<()> {
    if let StreamEvent::Error { .. } = event {
        let message = event.error_message().unwrap_or(fallback);
        return Err(ClientError::Remote(message.to_string()));
    }
    Ok(())
}
