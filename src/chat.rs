use crate::client::AgentClient;
use crate::error::{ClientError, ClientResult, GENERIC_ERROR_MESSAGE};
use crate::export::{export_slide, share_slide};
use crate::protocol::{
    AgentRequest, ExportFormat, ReferenceFile, SessionContext, ShareResult, StreamEvent,
    MAX_REFERENCE_FILE_BYTES,
};
use crate::sse::Flow;
use crate::tips::{start_rotation, RotationHandle, TipBag, TipTiming, TIPS};
use crate::transcript::{Effect, IdGenerator, Transcript, EDIT_PROMPT, INITIAL_GREETING};
use base64::Engine;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const SHARE_POST_PROMPT: &str =
    "Suggest a share link for posting about this deck on X. Use the tool right away, without commentary.";

/// Called with the finished deck markdown whenever the agent outputs slides.
pub type SlideReadyHook = Box<dyn FnMut(&str) + Send>;

/// Messages that drive the controller. Everything that touches the transcript
/// goes through this channel so updates are applied one at a time.
#[derive(Debug)]
pub enum ChatUpdate {
    Event(StreamEvent),
    Finished(ClientResult<()>),
    Tip { generation: u64, index: usize },
    Exported(ClientResult<PathBuf>),
    Shared(ClientResult<ShareResult>),
}

/// Owns the transcript and runs chat turns, one at a time.
pub struct ChatController {
    transcript: Transcript,
    client: AgentClient,
    context: SessionContext,
    markdown: String,
    attachment: Option<ReferenceFile>,
    in_flight: bool,
    slides_this_turn: bool,
    sender: mpsc::UnboundedSender<ChatUpdate>,
    receiver: mpsc::UnboundedReceiver<ChatUpdate>,
    tip_bag: Arc<Mutex<TipBag>>,
    tip_timing: TipTiming,
    rotation: Option<RotationHandle>,
    rotation_generation: u64,
    on_slide_ready: Option<SlideReadyHook>,
}

impl ChatController {
    pub fn new(client: AgentClient, context: SessionContext) -> Self {
        Self::with_parts(
            client,
            context,
            IdGenerator::new(),
            TipBag::new(TIPS.len()),
            TipTiming::default(),
        )
    }

    pub fn with_parts(
        client: AgentClient,
        context: SessionContext,
        ids: IdGenerator,
        tip_bag: TipBag,
        tip_timing: TipTiming,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            transcript: Transcript::new(ids),
            client,
            context,
            markdown: String::new(),
            attachment: None,
            in_flight: false,
            slides_this_turn: false,
            sender,
            receiver,
            tip_bag: Arc::new(Mutex::new(tip_bag)),
            tip_timing,
            rotation: None,
            rotation_generation: 0,
            on_slide_ready: None,
        }
    }

    pub fn on_slide_ready(mut self, hook: SlideReadyHook) -> Self {
        self.on_slide_ready = Some(hook);
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    pub fn greet(&mut self) {
        self.transcript.push_notice(INITIAL_GREETING);
    }

    pub fn notice(&mut self, text: &str) {
        self.transcript.push_notice(text);
    }

    pub fn prompt_for_edit(&mut self) {
        self.transcript.replace_notice(EDIT_PROMPT);
    }

    /// Attaches a reference file to the next submitted turn.
    pub fn attach(&mut self, file: ReferenceFile) {
        self.attachment = Some(file);
    }

    pub fn set_markdown(&mut self, markdown: impl Into<String>) {
        self.markdown = markdown.into();
    }

    /// Starts a chat turn. Rejected while another turn is still streaming.
    pub fn submit(&mut self, prompt: &str) -> ClientResult<()> {
        if self.in_flight {
            return Err(ClientError::Busy);
        }
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ClientError::Validation("message is empty".to_string()));
        }

        let mut context = self.context.clone();
        if let Some(file) = self.attachment.take() {
            context = context.with_reference_file(file);
        }
        let request = AgentRequest::chat(prompt, self.markdown.clone(), &context);

        self.transcript.begin_turn(prompt);
        self.spawn_turn(request);
        Ok(())
    }

    /// Asks the agent for a share link to post after a download.
    pub fn request_share_post(&mut self) -> ClientResult<()> {
        if self.in_flight {
            return Err(ClientError::Busy);
        }
        let request = AgentRequest::chat(SHARE_POST_PROMPT, self.markdown.clone(), &self.context);
        self.transcript.begin_silent_turn();
        self.spawn_turn(request);
        Ok(())
    }

    fn spawn_turn(&mut self, request: AgentRequest) {
        self.in_flight = true;
        self.slides_this_turn = false;
        let client = self.client.clone();
        let sender = self.sender.clone();
        tracing::info!(session = %self.context.session_id, model = %self.context.model, "chat turn started");

        tokio::spawn(async move {
            let events = sender.clone();
            let result = client
                .invoke(
                    &request,
                    move |event| {
                        if let StreamEvent::Error { .. } = event {
                            let message = event.error_message().unwrap_or(GENERIC_ERROR_MESSAGE);
                            return Err(ClientError::Remote(message.to_string()));
                        }
                        // A closed channel means the controller is gone.
                        if events.send(ChatUpdate::Event(event)).is_err() {
                            return Ok(Flow::Stop);
                        }
                        Ok(Flow::Continue)
                    },
                    || {},
                )
                .await;
            let _ = sender.send(ChatUpdate::Finished(result));
        });
    }

    /// Exports the current deck to `path` in the background.
    pub fn start_export(&mut self, format: ExportFormat, path: PathBuf) {
        let client = self.client.clone();
        let sender = self.sender.clone();
        let markdown = self.markdown.clone();
        let theme = self.context.theme.clone();
        tokio::spawn(async move {
            let result = match export_slide(&client, &markdown, format, &theme).await {
                Ok(blob) => tokio::fs::write(&path, blob.as_bytes())
                    .await
                    .map(|_| path)
                    .map_err(ClientError::from),
                Err(err) => Err(err),
            };
            let _ = sender.send(ChatUpdate::Exported(result));
        });
    }

    pub fn start_share(&mut self) {
        let client = self.client.clone();
        let sender = self.sender.clone();
        let markdown = self.markdown.clone();
        let theme = self.context.theme.clone();
        tokio::spawn(async move {
            let result = share_slide(&client, &markdown, &theme).await;
            let _ = sender.send(ChatUpdate::Shared(result));
        });
    }

    /// Applies every update that is already queued. Returns true if anything changed.
    pub fn drain(&mut self) -> bool {
        let mut changed = false;
        while let Ok(update) = self.receiver.try_recv() {
            self.handle(update);
            changed = true;
        }
        changed
    }

    /// Waits for and applies updates until the current turn has finished.
    pub async fn run_until_idle(&mut self) {
        while self.in_flight {
            match self.receiver.recv().await {
                Some(update) => self.handle(update),
                None => break,
            }
        }
    }

    pub fn handle(&mut self, update: ChatUpdate) {
        match update {
            ChatUpdate::Event(event) => {
                let effects = self.transcript.apply(&event);
                self.run_effects(effects);
            }
            ChatUpdate::Finished(Ok(())) => {
                tracing::info!("chat turn finished");
                self.in_flight = false;
                let effects = self.transcript.complete_turn();
                self.run_effects(effects);
                if self.slides_this_turn {
                    self.prompt_for_edit();
                }
            }
            ChatUpdate::Finished(Err(err)) => {
                tracing::error!(error = %err, timeout = err.is_idle_timeout(), "chat turn failed");
                self.in_flight = false;
                let effects = self.transcript.fail_turn(err.user_message());
                self.run_effects(effects);
            }
            ChatUpdate::Tip { generation, index } => {
                let running = self
                    .rotation
                    .as_ref()
                    .is_some_and(RotationHandle::is_running);
                if running && generation == self.rotation_generation {
                    self.transcript.apply_tip(index);
                }
            }
            ChatUpdate::Exported(Ok(path)) => {
                self.transcript
                    .push_notice(&format!("Saved the deck to {}.", path.display()));
                if let Err(err) = self.request_share_post() {
                    tracing::debug!(error = %err, "skipping share post");
                }
            }
            ChatUpdate::Exported(Err(err)) => {
                tracing::error!(error = %err, "export failed");
                self.transcript
                    .push_notice(&format!("Export failed: {err}"));
            }
            ChatUpdate::Shared(Ok(result)) => {
                self.transcript
                    .push_notice(&format!("Your deck is public at {}", result.url));
            }
            ChatUpdate::Shared(Err(err)) => {
                tracing::error!(error = %err, "share failed");
                self.transcript
                    .push_notice(&format!("Sharing failed: {err}"));
            }
        }
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartTipRotation => self.start_tips(),
                Effect::StopTipRotation => self.stop_tips(),
                Effect::SlideReady(markdown) => {
                    if let Some(hook) = self.on_slide_ready.as_mut() {
                        hook(&markdown);
                    }
                    self.markdown = markdown;
                    self.slides_this_turn = true;
                }
            }
        }
    }

    fn start_tips(&mut self) {
        self.stop_tips();
        self.rotation_generation += 1;
        let generation = self.rotation_generation;
        let sender = self.sender.clone();
        self.rotation = Some(start_rotation(
            Arc::clone(&self.tip_bag),
            self.tip_timing,
            move |index| {
                let _ = sender.send(ChatUpdate::Tip { generation, index });
            },
        ));
    }

    fn stop_tips(&mut self) {
        if let Some(mut rotation) = self.rotation.take() {
            rotation.stop();
        }
    }
}

/// Reads a local file into an attachment, refusing anything over the size limit.
pub fn load_reference_file(path: &Path) -> ClientResult<ReferenceFile> {
    let size = std::fs::metadata(path)?.len();
    if size > MAX_REFERENCE_FILE_BYTES {
        return Err(ClientError::Validation(format!(
            "{} is larger than 10 MB",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string());
    let mime_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => "application/pdf",
        _ => "application/octet-stream",
    };

    Ok(ReferenceFile {
        file_name,
        mime_type: mime_type.to_string(),
        size,
        base64_data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::error::MODEL_UNAVAILABLE_MESSAGE;
    use crate::mock::{self, MockConfig, INVOCATIONS_PATH};
    use crate::transcript::{Role, StatusCategory};
    use crate::watchdog::IdleBudgets;
    use std::time::Duration;

    async fn controller(model: &str) -> ChatController {
        let addr = mock::spawn(MockConfig::new("t")).await.unwrap();
        let client = AgentClient::new(ClientConfig {
            endpoint: format!("http://{addr}{INVOCATIONS_PATH}"),
            token: "t".to_string(),
            budgets: IdleBudgets::default(),
        });
        ChatController::with_parts(
            client,
            SessionContext::new("session-1", model, "border"),
            IdGenerator::new(),
            TipBag::seeded(TIPS.len(), 1),
            TipTiming::default(),
        )
    }

    fn unreachable_client() -> AgentClient {
        AgentClient::new(ClientConfig {
            endpoint: "http://127.0.0.1:9/invocations".to_string(),
            token: "t".to_string(),
            budgets: IdleBudgets::default(),
        })
    }

    #[tokio::test]
    async fn full_turn_builds_the_transcript() {
        let slides = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&slides);
        let mut chat = controller("sonnet")
            .await
            .on_slide_ready(Box::new(move |markdown: &str| {
                sink.lock().unwrap().push(markdown.to_string())
            }));

        chat.greet();
        chat.submit("Rust https://www.rust-lang.org").unwrap();
        assert!(chat.is_busy());
        chat.run_until_idle().await;
        assert!(!chat.is_busy());

        let messages = chat.transcript().messages();
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].content, "Let me look that up first.");
        assert!(messages.iter().all(|msg| !msg.is_streaming));
        assert_eq!(messages[messages.len() - 2].content, "Done! Ask me for any changes.");
        assert_eq!(messages.last().unwrap().content, EDIT_PROMPT);

        let slide = chat
            .transcript()
            .statuses(StatusCategory::SlideGeneration)
            .next()
            .unwrap();
        assert_eq!(slide.status_text().as_deref(), Some("Slides ready"));
        assert!(chat.markdown().contains("marp: true"));
        assert_eq!(slides.lock().unwrap().len(), 1);
        assert!(chat.rotation.is_none());
    }

    #[tokio::test]
    async fn second_submission_is_rejected_while_streaming() {
        let mut chat = controller("sonnet").await;
        chat.submit("first").unwrap();
        let err = chat.submit("second").unwrap_err();
        assert!(matches!(err, ClientError::Busy));
        chat.run_until_idle().await;
        chat.submit("third").unwrap();
        chat.run_until_idle().await;
    }

    #[tokio::test]
    async fn remote_model_error_shows_model_unavailable() {
        let mut chat = controller("invalid").await;
        chat.submit("hello").unwrap();
        chat.run_until_idle().await;

        let last = chat.transcript().messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, MODEL_UNAVAILABLE_MESSAGE);
        assert!(chat.transcript().messages().iter().all(|msg| !msg.is_status()));
    }

    #[tokio::test]
    async fn transport_failure_overwrites_the_pending_bubble() {
        let mut chat = ChatController::new(
            unreachable_client(),
            SessionContext::new("s", "sonnet", "border"),
        );
        chat.submit("hello").unwrap();
        chat.run_until_idle().await;

        let messages = chat.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, GENERIC_ERROR_MESSAGE);
        assert_eq!(chat.transcript().indicator(), None);
    }

    #[tokio::test]
    async fn share_post_turn_ends_with_a_share_prompt() {
        let mut chat = controller("sonnet").await;
        chat.request_share_post().unwrap();
        chat.run_until_idle().await;

        let messages = chat.transcript().messages();
        let last = messages.last().unwrap();
        assert!(last.content.contains("https://x.com/intent/tweet"));
        let tweet = chat
            .transcript()
            .statuses(StatusCategory::TweetGeneration)
            .next()
            .unwrap();
        assert_eq!(tweet.status_text().as_deref(), Some("Post draft ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_tip_ticks_are_ignored() {
        let mut chat = ChatController::new(
            unreachable_client(),
            SessionContext::new("s", "sonnet", "border"),
        );
        chat.transcript.begin_turn("deck please");
        chat.handle(ChatUpdate::Event(StreamEvent::ToolUse {
            tool: "output_slide".to_string(),
            query: None,
        }));
        assert!(chat.rotation.is_some());
        let generation = chat.rotation_generation;

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert!(chat.drain());
        let slide = chat
            .transcript()
            .statuses(StatusCategory::SlideGeneration)
            .next()
            .unwrap();
        assert!(slide.tip_index.is_some());

        chat.handle(ChatUpdate::Event(StreamEvent::Markdown {
            markdown: "# deck".to_string(),
        }));
        assert!(chat.rotation.is_none());
        chat.handle(ChatUpdate::Tip {
            generation,
            index: 0,
        });
        let slide = chat
            .transcript()
            .statuses(StatusCategory::SlideGeneration)
            .next()
            .unwrap();
        assert_eq!(slide.tip_index, None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!chat.drain());
    }

    #[tokio::test]
    async fn export_success_saves_file_and_asks_for_a_share_post() {
        let mut chat = controller("sonnet").await;
        chat.set_markdown("# deck");
        let dir = std::env::temp_dir().join(format!("deckstream-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("deck.pdf");

        chat.start_export(ExportFormat::Pdf, path.clone());
        let update = chat.receiver.recv().await.unwrap();
        assert!(matches!(update, ChatUpdate::Exported(Ok(_))));
        chat.handle(update);
        assert!(chat.is_busy());
        chat.run_until_idle().await;

        assert_eq!(std::fs::read(&path).unwrap(), mock::MOCK_PDF_BYTES);
        assert!(chat
            .transcript()
            .messages()
            .iter()
            .any(|msg| msg.content.starts_with("Saved the deck to")));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn oversized_attachments_are_refused() {
        let dir = std::env::temp_dir().join(format!("deckstream-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let small = dir.join("notes.pdf");
        std::fs::write(&small, b"%PDF-1.4").unwrap();
        // Sparse, so it is only cheap to refuse if the size is checked before reading.
        let big = dir.join("big.bin");
        std::fs::File::create(&big)
            .unwrap()
            .set_len(MAX_REFERENCE_FILE_BYTES * 1024)
            .unwrap();
        let edge = dir.join("edge.pdf");
        std::fs::File::create(&edge)
            .unwrap()
            .set_len(MAX_REFERENCE_FILE_BYTES)
            .unwrap();

        let file = load_reference_file(&small).unwrap();
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.size, 8);
        assert!(matches!(
            load_reference_file(&big),
            Err(ClientError::Validation(_))
        ));
        assert_eq!(load_reference_file(&edge).unwrap().size, MAX_REFERENCE_FILE_BYTES);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
