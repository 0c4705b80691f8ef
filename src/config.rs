use crate::protocol::{ExportFormat, DEFAULT_THEME};
use crate::watchdog::IdleBudgets;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787/invocations";
pub const DEFAULT_MODEL: &str = "sonnet";

#[derive(Debug, Parser)]
#[command(name = "deckstream", version, about = "Chat with a slide-generation agent")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Agent invocation URL.
    #[arg(long, global = true, env = "DECKSTREAM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Bearer token; falls back to ~/.deckstream/token.
    #[arg(long, global = true, env = "DECKSTREAM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, global = true, env = "DECKSTREAM_THEME", default_value = DEFAULT_THEME)]
    pub theme: String,

    #[arg(long, global = true, env = "DECKSTREAM_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Seconds to wait for the first event. 0 waits forever.
    #[arg(long, global = true, default_value_t = 120)]
    pub first_event_timeout_secs: u64,

    /// Seconds allowed between events once the stream is going. 0 waits forever.
    #[arg(long, global = true, default_value_t = 90)]
    pub idle_timeout_secs: u64,
}

impl Settings {
    pub fn budgets(&self) -> IdleBudgets {
        IdleBudgets::new(
            seconds(self.first_event_timeout_secs),
            seconds(self.idle_timeout_secs),
        )
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat in the terminal.
    Chat(ChatArgs),
    /// Export a Marp markdown deck to PDF or PowerPoint.
    Export(ExportArgs),
    /// Publish a Marp markdown deck and print its public URL.
    Share(ShareArgs),
    /// Serve a scripted agent on a local port.
    MockServer(MockServerArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Send a single prompt, print the transcript and exit.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Existing Marp markdown deck to keep editing.
    #[arg(long)]
    pub deck: Option<PathBuf>,

    /// PDF to send as reference material with the first message.
    #[arg(long)]
    pub attach: Option<PathBuf>,

    /// Where Ctrl-E / Ctrl-P exports are written.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Write logs here; the chat screen is otherwise silent.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    pub markdown: PathBuf,

    #[arg(long, value_enum, default_value_t = ExportFormat::Pdf)]
    pub format: ExportFormat,

    /// Output path; defaults to the input name with the format's extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ExportArgs {
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.markdown.with_extension(self.format.extension()),
        }
    }
}

#[derive(Debug, Args)]
pub struct ShareArgs {
    pub markdown: PathBuf,
}

#[derive(Debug, Args)]
pub struct MockServerArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub listen: String,

    /// Token clients must present.
    #[arg(long, env = "DECKSTREAM_MOCK_TOKEN", default_value = "mock-token")]
    pub auth_token: String,

    /// Delay between scripted events, in milliseconds.
    #[arg(long, default_value_t = 150)]
    pub event_delay_ms: u64,

    /// Fail this many export requests before answering.
    #[arg(long, default_value_t = 0)]
    pub failing_exports: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seconds_disables_a_budget() {
        let cli = Cli::try_parse_from([
            "deckstream",
            "--first-event-timeout-secs",
            "0",
            "--idle-timeout-secs",
            "30",
            "chat",
        ])
        .unwrap();
        let budgets = cli.settings.budgets();
        assert_eq!(budgets.first_event, None);
        assert_eq!(budgets.between_events, Some(Duration::from_secs(30)));
    }

    #[test]
    fn export_defaults_output_next_to_the_input() {
        let cli = Cli::try_parse_from([
            "deckstream",
            "export",
            "talks/rust.md",
            "--format",
            "pptx-editable",
        ])
        .unwrap();
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.format, ExportFormat::PptxEditable);
        assert_eq!(args.output_path(), PathBuf::from("talks/rust.pptx"));
    }

    #[test]
    fn global_options_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["deckstream", "share", "deck.md", "--theme", "gaia"]).unwrap();
        assert_eq!(cli.settings.theme, "gaia");
        assert_eq!(cli.settings.model, DEFAULT_MODEL);
    }
}
