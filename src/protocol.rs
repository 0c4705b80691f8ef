use serde::{Deserialize, Serialize};

/// Attachments above this size are refused before any request is made.
pub const MAX_REFERENCE_FILE_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_THEME: &str = "border";

/// One decoded `data:` payload from the agent stream.
///
/// The agent emits most payloads under a `data` key; the descriptive field
/// names are accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        #[serde(alias = "data", default)]
        content: String,
    },
    Status {
        #[serde(alias = "data", alias = "message", default)]
        status: Option<String>,
    },
    ToolUse {
        #[serde(alias = "data", alias = "name")]
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    Markdown {
        #[serde(alias = "data")]
        markdown: String,
    },
    TweetUrl {
        #[serde(alias = "data")]
        url: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ShareResult {
        #[serde(default)]
        url: Option<String>,
        #[serde(rename = "expiresAt", default)]
        expires_at: Option<i64>,
    },
    Pdf {
        #[serde(default)]
        data: Option<String>,
    },
    Pptx {
        #[serde(default)]
        data: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Message carried by a remote `error` event, if any.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            StreamEvent::Error { message, error } => [message, error]
                .into_iter()
                .filter_map(|value| value.as_deref())
                .find(|value| !value.is_empty()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Chat,
    ExportPdf,
    ExportPptx,
    ExportPptxEditable,
    ShareSlide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Pdf,
    Pptx,
    PptxEditable,
}

impl ExportFormat {
    pub fn action(self) -> Action {
        match self {
            ExportFormat::Pdf => Action::ExportPdf,
            ExportFormat::Pptx => Action::ExportPptx,
            ExportFormat::PptxEditable => Action::ExportPptxEditable,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Pptx | ExportFormat::PptxEditable => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }

    /// Payload type the agent answers with. Editable decks arrive as plain `pptx`.
    pub fn event_type(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Pptx | ExportFormat::PptxEditable => "pptx",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "PDF",
            ExportFormat::Pptx => "PPTX",
            ExportFormat::PptxEditable => "editable PPTX",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Pptx | ExportFormat::PptxEditable => "pptx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareResult {
    pub url: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub base64_data: String,
}

/// Per-turn request context. Built by the caller and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub model: String,
    pub theme: String,
    pub reference_file: Option<ReferenceFile>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, model: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            model: model.into(),
            theme: theme.into(),
            reference_file: None,
        }
    }

    pub fn with_reference_file(mut self, file: ReferenceFile) -> Self {
        self.reference_file = Some(file);
        self
    }
}

/// JSON body of every agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub action: Action,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(default)]
    pub markdown: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_file: Option<ReferenceFile>,
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

impl AgentRequest {
    pub fn chat(prompt: impl Into<String>, markdown: impl Into<String>, context: &SessionContext) -> Self {
        Self {
            action: Action::Chat,
            prompt: prompt.into(),
            markdown: markdown.into(),
            theme: context.theme.clone(),
            session_id: Some(context.session_id.clone()),
            model: Some(context.model.clone()),
            reference_file: context.reference_file.clone(),
        }
    }

    pub fn one_shot(action: Action, markdown: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            action,
            prompt: String::new(),
            markdown: markdown.into(),
            theme: theme.into(),
            session_id: None,
            model: None,
            reference_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_agent_data_field_aliases() {
        let event: StreamEvent =
            serde_json::from_value(json!({"type": "text", "data": "hello"})).unwrap();
        assert_eq!(
            event,
            StreamEvent::Text {
                content: "hello".to_string()
            }
        );

        let event: StreamEvent = serde_json::from_value(
            json!({"type": "tool_use", "data": "web_search", "query": "rust sse"}),
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolUse {
                tool: "web_search".to_string(),
                query: Some("rust sse".to_string()),
            }
        );
    }

    #[test]
    fn unknown_types_map_to_unknown() {
        let event: StreamEvent =
            serde_json::from_value(json!({"type": "progress", "message": "PDF..."})).unwrap();
        assert_eq!(event, StreamEvent::Unknown);
    }

    #[test]
    fn error_message_prefers_message_then_error() {
        let event: StreamEvent =
            serde_json::from_value(json!({"type": "error", "error": "too big"})).unwrap();
        assert_eq!(event.error_message(), Some("too big"));

        let event: StreamEvent =
            serde_json::from_value(json!({"type": "error", "message": "boom", "error": "x"}))
                .unwrap();
        assert_eq!(event.error_message(), Some("boom"));

        let event: StreamEvent = serde_json::from_value(json!({"type": "error"})).unwrap();
        assert_eq!(event.error_message(), None);
    }

    #[test]
    fn share_result_reads_camel_case_expiry() {
        let event: StreamEvent = serde_json::from_value(
            json!({"type": "share_result", "url": "https://x/s/1", "expiresAt": 1700000000}),
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ShareResult {
                url: Some("https://x/s/1".to_string()),
                expires_at: Some(1_700_000_000),
            }
        );
    }

    #[test]
    fn chat_request_carries_session_context() {
        let context = SessionContext::new("s-1", "opus", "gaia");
        let request = AgentRequest::chat("make slides", "# deck", &context);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["action"], "chat");
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["model"], "opus");
        assert_eq!(body["theme"], "gaia");
        assert!(body.get("reference_file").is_none());
    }

    #[test]
    fn editable_pptx_is_answered_by_pptx_events() {
        assert_eq!(ExportFormat::PptxEditable.event_type(), "pptx");
        assert_eq!(
            ExportFormat::PptxEditable.mime_type(),
            ExportFormat::Pptx.mime_type()
        );
        let body = serde_json::to_value(AgentRequest::one_shot(
            ExportFormat::PptxEditable.action(),
            "# deck",
            "border",
        ))
        .unwrap();
        assert_eq!(body["action"], "export_pptx_editable");
        assert!(body.get("prompt").is_none());
    }
}
