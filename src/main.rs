mod chat;
mod client;
mod config;
mod error;
mod export;
mod mock;
mod protocol;
mod sse;
mod tips;
mod transcript;
mod ui;
mod watchdog;

use chat::{load_reference_file, ChatController};
use clap::Parser;
use client::{resolve_token, AgentClient, ClientConfig};
use config::{ChatArgs, Cli, Command, ExportArgs, MockServerArgs, Settings, ShareArgs};
use mock::MockConfig;
use protocol::SessionContext;
use std::error::Error;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const DEFAULT_LOG_FILTER: &str = "deckstream=info";

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Chat(args) => run_chat(cli.settings, args).await,
        Command::Export(args) => {
            init_stderr_logging();
            run_export(cli.settings, args).await
        }
        Command::Share(args) => {
            init_stderr_logging();
            run_share(cli.settings, args).await
        }
        Command::MockServer(args) => {
            init_stderr_logging();
            run_mock_server(args).await
        }
    }
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();
}

// The chat screen owns the terminal, so logs only go to a file when asked.
fn init_file_logging(path: &Path) -> MainResult<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn build_client(settings: &Settings) -> MainResult<AgentClient> {
    let token = resolve_token(settings.token.clone())?;
    let client = AgentClient::new(ClientConfig {
        endpoint: settings.endpoint.clone(),
        token,
        budgets: settings.budgets(),
    });
    tracing::debug!(endpoint = client.endpoint(), budgets = ?client.budgets(), "agent client ready");
    Ok(client)
}

async fn run_chat(settings: Settings, args: ChatArgs) -> MainResult<()> {
    if let Some(path) = &args.log_file {
        init_file_logging(path)?;
    } else if args.prompt.is_some() {
        init_stderr_logging();
    }

    let client = build_client(&settings)?;
    let context = SessionContext::new(Uuid::new_v4().to_string(), &settings.model, &settings.theme);
    let mut chat = ChatController::new(client, context);
    if let Some(path) = &args.deck {
        chat.set_markdown(tokio::fs::read_to_string(path).await?);
    }
    if let Some(path) = &args.attach {
        chat.attach(load_reference_file(path)?);
    }

    let Some(prompt) = args.prompt else {
        return ui::run_tui(chat, args.output_dir);
    };

    chat.submit(&prompt)?;
    chat.run_until_idle().await;
    for line in ui::transcript_lines(chat.transcript().messages()) {
        println!("{line}");
    }
    Ok(())
}

async fn run_export(settings: Settings, args: ExportArgs) -> MainResult<()> {
    let client = build_client(&settings)?;
    let markdown = tokio::fs::read_to_string(&args.markdown).await?;
    let blob = export::export_slide(&client, &markdown, args.format, &settings.theme).await?;

    let output = args.output_path();
    tokio::fs::write(&output, blob.as_bytes()).await?;
    println!(
        "Wrote {} ({} bytes, {})",
        output.display(),
        blob.size(),
        blob.content_type()
    );
    Ok(())
}

async fn run_share(settings: Settings, args: ShareArgs) -> MainResult<()> {
    let client = build_client(&settings)?;
    let markdown = tokio::fs::read_to_string(&args.markdown).await?;
    let result = export::share_slide(&client, &markdown, &settings.theme).await?;

    println!("{}", result.url);
    println!("expires at {} (unix seconds)", result.expires_at);
    Ok(())
}

async fn run_mock_server(args: MockServerArgs) -> MainResult<()> {
    let mut config = MockConfig::new(args.auth_token);
    config.event_delay = Duration::from_millis(args.event_delay_ms);
    config.failing_exports = args.failing_exports;
    mock::run(&args.listen, config).await
}
