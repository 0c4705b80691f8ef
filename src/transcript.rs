use crate::protocol::StreamEvent;

pub const INITIAL_GREETING: &str =
    "What kind of deck would you like to make? I can also summarize a URL for you!";
pub const EDIT_PROMPT: &str =
    "How should I change it? I can adjust the content, the number of slides, or fix overflowing text.";
pub const THINKING_INDICATOR: &str = "Thinking...";

pub const SLIDE_TOOL: &str = "output_slide";
pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const WEB_FETCH_TOOL: &str = "http_request";
pub const TWEET_TOOL: &str = "generate_tweet_url";

pub type MessageId = u64;

/// Hands out transcript ids. Owned by whoever owns the transcript so tests can
/// seed it.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: MessageId,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: MessageId) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> MessageId {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    WebSearch,
    WebFetch,
    SlideGeneration,
    TweetGeneration,
}

impl StatusCategory {
    fn is_lookup(self) -> bool {
        matches!(self, StatusCategory::WebSearch | StatusCategory::WebFetch)
    }

    pub fn for_tool(name: &str) -> Option<Self> {
        match name {
            SLIDE_TOOL => Some(StatusCategory::SlideGeneration),
            WEB_SEARCH_TOOL => Some(StatusCategory::WebSearch),
            WEB_FETCH_TOOL => Some(StatusCategory::WebFetch),
            TWEET_TOOL => Some(StatusCategory::TweetGeneration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPhase {
    InProgress,
    Completed,
}

/// Category and phase of a status entry, plus the query or URL it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLabel {
    pub category: StatusCategory,
    pub phase: StatusPhase,
    pub detail: Option<String>,
}

impl StatusLabel {
    pub fn in_progress(category: StatusCategory, detail: Option<String>) -> Self {
        Self {
            category,
            phase: StatusPhase::InProgress,
            detail: detail.filter(|detail| !detail.is_empty()),
        }
    }

    pub fn is_in_progress(&self, category: StatusCategory) -> bool {
        self.category == category && self.phase == StatusPhase::InProgress
    }

    fn complete(&mut self) {
        self.phase = StatusPhase::Completed;
        self.detail = None;
    }

    pub fn text(&self) -> String {
        let base = match (self.category, self.phase) {
            (StatusCategory::WebSearch, StatusPhase::InProgress) => "Searching the web...",
            (StatusCategory::WebSearch, StatusPhase::Completed) => "Web search complete",
            (StatusCategory::WebFetch, StatusPhase::InProgress) => "Reading the page...",
            (StatusCategory::WebFetch, StatusPhase::Completed) => "Page read",
            (StatusCategory::SlideGeneration, StatusPhase::InProgress) => "Building slides...",
            (StatusCategory::SlideGeneration, StatusPhase::Completed) => "Slides ready",
            (StatusCategory::TweetGeneration, StatusPhase::InProgress) => "Drafting a post...",
            (StatusCategory::TweetGeneration, StatusPhase::Completed) => "Post draft ready",
        };
        match &self.detail {
            Some(detail) => format!("{base} \"{detail}\""),
            None => base.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub status: Option<StatusLabel>,
    pub tip_index: Option<usize>,
}

impl Message {
    pub fn is_status(&self) -> bool {
        self.status.is_some()
    }

    #[cfg(test)]
    pub fn status_text(&self) -> Option<String> {
        self.status.as_ref().map(StatusLabel::text)
    }

    fn is_assistant_text(&self) -> bool {
        self.role == Role::Assistant && !self.is_status()
    }

    #[cfg(test)]
    fn has_status(&self, category: StatusCategory) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.category == category)
    }

    fn has_in_progress(&self, category: StatusCategory) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.is_in_progress(category))
    }
}

/// Side effects the transcript owner has to carry out after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartTipRotation,
    StopTipRotation,
    SlideReady(String),
}

pub fn share_prompt(url: &str) -> String {
    format!("Thanks for downloading! Want to share how it went on X? 👉 [Post]({url})")
}

/// Ordered chat transcript plus the transient activity indicator.
///
/// Only the active chat turn mutates it; renderers read `messages()`.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    ids: IdGenerator,
    indicator: Option<String>,
}

impl Transcript {
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            messages: Vec::new(),
            ids,
            indicator: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn indicator(&self) -> Option<&str> {
        self.indicator.as_deref()
    }

    fn push(&mut self, role: Role, content: impl Into<String>, is_streaming: bool) -> MessageId {
        if is_streaming {
            self.end_streaming();
        }
        let id = self.ids.next_id();
        self.messages.push(Message {
            id,
            role,
            content: content.into(),
            is_streaming,
            status: None,
            tip_index: None,
        });
        id
    }

    fn push_status(&mut self, label: StatusLabel) -> MessageId {
        let id = self.ids.next_id();
        self.messages.push(Message {
            id,
            role: Role::Assistant,
            content: String::new(),
            is_streaming: false,
            status: Some(label),
            tip_index: None,
        });
        id
    }

    /// Appends a finished assistant message, e.g. a greeting.
    pub fn push_notice(&mut self, text: &str) -> MessageId {
        self.push(Role::Assistant, text, false)
    }

    /// Like `push_notice`, but drops earlier copies of the same text first.
    pub fn replace_notice(&mut self, text: &str) -> MessageId {
        self.messages
            .retain(|msg| !(msg.is_assistant_text() && msg.content == text));
        self.push_notice(text)
    }

    /// Records the user's prompt and opens an empty streaming reply.
    pub fn begin_turn(&mut self, prompt: &str) -> MessageId {
        self.push(Role::User, prompt, false);
        self.indicator = Some(THINKING_INDICATOR.to_string());
        self.push(Role::Assistant, "", true)
    }

    /// Opens a streaming reply without a visible user prompt.
    pub fn begin_silent_turn(&mut self) -> MessageId {
        self.push(Role::Assistant, "", true)
    }

    pub fn apply(&mut self, event: &StreamEvent) -> Vec<Effect> {
        match event {
            StreamEvent::Text { content } => {
                self.apply_text(content);
                Vec::new()
            }
            StreamEvent::Status { status } => {
                if let Some(status) = status {
                    self.indicator = Some(status.clone());
                }
                Vec::new()
            }
            StreamEvent::ToolUse { tool, query } => self.apply_tool_use(tool, query.as_deref()),
            StreamEvent::Markdown { markdown } => self.apply_markdown(markdown),
            StreamEvent::TweetUrl { url } => {
                self.complete_in_progress(|category| category == StatusCategory::TweetGeneration);
                self.push_notice(&share_prompt(url));
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn apply_text(&mut self, delta: &str) {
        self.indicator = None;
        self.complete_in_progress(StatusCategory::is_lookup);

        let last_status = self.messages.iter().rposition(Message::is_status);
        let last_text = self.messages.iter().rposition(Message::is_assistant_text);

        match (last_status, last_text) {
            (Some(status), Some(text)) if text < status => {
                self.push(Role::Assistant, delta, true);
            }
            (Some(_), None) | (None, None) => {
                self.push(Role::Assistant, delta, true);
            }
            (_, Some(text)) => self.messages[text].content.push_str(delta),
        }
    }

    fn apply_tool_use(&mut self, tool: &str, query: Option<&str>) -> Vec<Effect> {
        self.end_streaming();

        let Some(category) = StatusCategory::for_tool(tool) else {
            tracing::debug!(tool, "tool without a status entry");
            return Vec::new();
        };

        match category {
            StatusCategory::SlideGeneration => {
                if !self.has_in_progress(category) {
                    self.complete_in_progress(StatusCategory::is_lookup);
                    self.push_status(StatusLabel::in_progress(category, None));
                }
                vec![Effect::StartTipRotation]
            }
            StatusCategory::WebSearch | StatusCategory::WebFetch => {
                let label = StatusLabel::in_progress(category, query.map(str::to_string));
                let duplicate = self
                    .messages
                    .iter()
                    .any(|msg| msg.status.as_ref() == Some(&label));
                if !duplicate {
                    self.messages.retain(|msg| !msg.has_in_progress(category));
                    self.push_status(label);
                }
                Vec::new()
            }
            StatusCategory::TweetGeneration => {
                if !self.has_in_progress(category) {
                    self.push_status(StatusLabel::in_progress(category, None));
                }
                Vec::new()
            }
        }
    }

    fn apply_markdown(&mut self, markdown: &str) -> Vec<Effect> {
        for msg in &mut self.messages {
            if msg.has_in_progress(StatusCategory::SlideGeneration) {
                if let Some(status) = msg.status.as_mut() {
                    status.complete();
                }
                msg.tip_index = None;
            }
        }
        vec![
            Effect::SlideReady(markdown.to_string()),
            Effect::StopTipRotation,
        ]
    }

    /// Points the in-progress slide status at a new tip. Returns false when
    /// there is no such status.
    pub fn apply_tip(&mut self, tip_index: usize) -> bool {
        let mut updated = false;
        for msg in &mut self.messages {
            if msg.has_in_progress(StatusCategory::SlideGeneration) {
                msg.tip_index = Some(tip_index);
                updated = true;
            }
        }
        updated
    }

    /// Settles the transcript once the stream has ended normally.
    pub fn complete_turn(&mut self) -> Vec<Effect> {
        self.complete_in_progress(|category| {
            category.is_lookup() || category == StatusCategory::TweetGeneration
        });
        self.end_streaming();
        self.indicator = None;
        vec![Effect::StopTipRotation]
    }

    /// Replaces streaming state with `display` after a failed turn.
    pub fn fail_turn(&mut self, display: &str) -> Vec<Effect> {
        self.messages.retain(|msg| !msg.is_status());
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content = display.to_string();
                last.is_streaming = false;
            }
            _ => {
                self.push(Role::Assistant, display, false);
            }
        }
        self.end_streaming();
        self.indicator = None;
        vec![Effect::StopTipRotation]
    }

    fn has_in_progress(&self, category: StatusCategory) -> bool {
        self.messages.iter().any(|msg| msg.has_in_progress(category))
    }

    fn complete_in_progress(&mut self, matches: impl Fn(StatusCategory) -> bool) {
        for msg in &mut self.messages {
            if let Some(status) = msg.status.as_mut() {
                if status.phase == StatusPhase::InProgress && matches(status.category) {
                    status.complete();
                }
            }
        }
    }

    fn end_streaming(&mut self) {
        for msg in &mut self.messages {
            msg.is_streaming = false;
        }
    }

    #[cfg(test)]
    pub fn statuses(&self, category: StatusCategory) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(move |msg| msg.has_status(category))
    }
}
