use crate::chat::ChatController;
use crate::protocol::ExportFormat;
use crate::tips::TIPS;
use crate::transcript::{Message, Role, StatusPhase};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;
const STREAMING_CURSOR: &str = "▌";

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> UiResult<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn message_lines(message: &Message) -> Vec<LineSpec> {
    if let Some(status) = &message.status {
        let (marker, color) = match status.phase {
            StatusPhase::InProgress => ("●", Color::Green),
            StatusPhase::Completed => ("✓", Color::DarkGray),
        };
        let mut lines = vec![LineSpec::new(
            format!("{marker} {}", status.text()),
            Style::default().fg(color),
        )];
        if let Some(tip) = message.tip_index.and_then(|index| TIPS.get(index)) {
            lines.push(LineSpec::new(
                format!("  Tip: {tip}"),
                Style::default()
                    .fg(Color::Gray)
                    .add_modifier(Modifier::ITALIC),
            ));
        }
        return lines;
    }

    let (header, color) = match message.role {
        Role::User => ("You:", Color::Blue),
        Role::Assistant => ("Agent:", Color::Yellow),
    };
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);

    let mut body = message.content.clone();
    if message.is_streaming {
        body.push_str(STREAMING_CURSOR);
    }

    let mut lines = vec![LineSpec::new(header, header_style)];
    for line in body.lines() {
        lines.push(LineSpec::new(format!("  {}", line), body_style));
    }
    lines
}

/// Plain-text rendering of a transcript, one entry per line.
pub fn transcript_lines(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .flat_map(message_lines)
        .map(|spec| spec.text)
        .collect()
}

fn rendered_height(lines: &[LineSpec], width: u16) -> usize {
    let width = width.max(1) as usize;
    lines
        .iter()
        .map(|line| line.text.chars().count().max(1).div_ceil(width))
        .sum()
}

/// Prompt being typed. `cursor` counts chars, so multi-byte input edits cleanly.
#[derive(Debug, Default)]
struct Composer {
    text: String,
    cursor: usize,
}

impl Composer {
    fn byte_offset(&self, cursor: usize) -> usize {
        self.text
            .char_indices()
            .nth(cursor)
            .map_or(self.text.len(), |(index, _)| index)
    }

    fn insert(&mut self, c: char) {
        let at = self.byte_offset(self.cursor);
        self.text.insert(at, c);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_offset(self.cursor);
        self.text.remove(at);
    }

    fn step(&mut self, forward: bool) {
        let len = self.text.chars().count();
        self.cursor = if forward {
            (self.cursor + 1).min(len)
        } else {
            self.cursor.saturating_sub(1)
        };
    }

    fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    /// Column and row of the cursor inside the typed text.
    fn position(&self) -> (usize, usize) {
        let before = &self.text[..self.byte_offset(self.cursor)];
        let row = before.matches('\n').count();
        let col = before.rsplit('\n').next().map_or(0, |line| line.chars().count());
        (col, row)
    }

    fn render(&self) -> Text<'static> {
        if self.text.is_empty() {
            return Text::from(Span::styled(
                "Describe the deck you want...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.text
                .split('\n')
                .map(|line| Line::from(line.to_string()))
                .collect::<Vec<_>>(),
        )
    }
}

// Keeps the cursor inside the input box border, however small the terminal is.
fn cursor_in(area: Rect, (col, row): (usize, usize)) -> (u16, u16) {
    let col = u16::try_from(col).unwrap_or(u16::MAX);
    let row = u16::try_from(row).unwrap_or(u16::MAX);
    let x = area
        .x
        .saturating_add(1)
        .saturating_add(col)
        .min(area.x + area.width.saturating_sub(2));
    let y = area
        .y
        .saturating_add(1)
        .saturating_add(row)
        .min(area.y + area.height.saturating_sub(2));
    (x, y)
}

pub struct App {
    chat: ChatController,
    input: Composer,
    output_dir: PathBuf,
    should_quit: bool,
}

impl App {
    pub fn new(chat: ChatController, output_dir: PathBuf) -> Self {
        Self {
            chat,
            input: Composer::default(),
            output_dir,
            should_quit: false,
        }
    }

    fn draw(&self, f: &mut Frame) {
        let [log_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)]).areas(f.area());

        let specs: Vec<LineSpec> = self
            .chat
            .transcript()
            .messages()
            .iter()
            .flat_map(|message| {
                let mut lines = message_lines(message);
                lines.push(LineSpec::new("", Style::default()));
                lines
            })
            .collect();
        let inner_width = log_area.width.saturating_sub(2);
        let inner_height = log_area.height.saturating_sub(2) as usize;
        let overflow = rendered_height(&specs, inner_width).saturating_sub(inner_height);

        let text = Text::from(
            specs
                .into_iter()
                .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
                .collect::<Vec<_>>(),
        );
        let log = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" deckstream · {} ", self.chat.context().theme))
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false })
            .scroll((overflow.min(u16::MAX as usize) as u16, 0));
        f.render_widget(log, log_area);

        let title = match self.chat.transcript().indicator() {
            Some(indicator) => format!(
                " Enter send · Ctrl-E pdf · Ctrl-P pptx · Ctrl-U share · Esc quit [{indicator}] "
            ),
            None => " Enter send · Ctrl-E pdf · Ctrl-P pptx · Ctrl-U share · Esc quit ".to_string(),
        };
        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input_paragraph, input_area);

        f.set_cursor_position(cursor_in(input_area, self.input.position()));
    }

    fn export(&mut self, format: ExportFormat) {
        if self.chat.markdown().is_empty() {
            self.chat
                .notice("There is no deck to export yet. Ask for one first!");
            return;
        }
        let path = self
            .output_dir
            .join(format!("deck.{}", format.extension()));
        tracing::info!(format = format.label(), path = %path.display(), "export requested");
        self.chat.start_export(format, path);
    }

    fn share(&mut self) {
        if self.chat.markdown().is_empty() {
            self.chat
                .notice("There is no deck to share yet. Ask for one first!");
            return;
        }
        self.chat.start_share();
    }

    fn submit(&mut self) {
        if self.input.text.trim().is_empty() || self.chat.is_busy() {
            return;
        }
        let msg = self.input.take();
        if let Err(err) = self.chat.submit(&msg) {
            tracing::debug!(error = %err, "submission rejected");
        }
    }

    fn handle_events(&mut self) -> UiResult<bool> {
        self.chat.drain();

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) {
                    match key.code {
                        KeyCode::Char('c') => {
                            self.should_quit = true;
                            return Ok(false);
                        }
                        KeyCode::Char('e') => self.export(ExportFormat::Pdf),
                        KeyCode::Char('p') => self.export(ExportFormat::Pptx),
                        KeyCode::Char('u') => self.share(),
                        _ => {}
                    }
                    return Ok(true);
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                        return Ok(false);
                    }
                    KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
                        self.input.insert('\n')
                    }
                    KeyCode::Enter => self.submit(),
                    KeyCode::Char(c) => self.input.insert(c),
                    KeyCode::Backspace => self.input.backspace(),
                    KeyCode::Left => self.input.step(false),
                    KeyCode::Right => self.input.step(true),
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(chat: ChatController, output_dir: PathBuf) -> UiResult<()> {
    let _guard = TerminalGuard::new()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new(chat, output_dir);
    app.chat.greet();

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events()? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{StatusCategory, StatusLabel};

    fn assistant(content: &str, is_streaming: bool) -> Message {
        Message {
            id: 1,
            role: Role::Assistant,
            content: content.to_string(),
            is_streaming,
            status: None,
            tip_index: None,
        }
    }

    fn typed(text: &str) -> Composer {
        let mut composer = Composer::default();
        for ch in text.chars() {
            composer.insert(ch);
        }
        composer
    }

    #[test]
    fn newline_moves_the_cursor_to_the_next_row() {
        let composer = typed("hello\nworld");
        assert_eq!(composer.position(), (5, 1));
        assert_eq!(composer.render().lines.len(), 2);
    }

    #[test]
    fn backspace_removes_multibyte_chars() {
        let mut composer = typed("héllo");
        for _ in 0..3 {
            composer.step(false);
        }
        composer.backspace();
        assert_eq!(composer.text, "hllo");
        assert_eq!(composer.position(), (1, 0));

        composer.step(true);
        composer.step(true);
        composer.step(true);
        composer.step(true);
        assert_eq!(composer.position(), (4, 0));
    }

    #[test]
    fn take_empties_the_composer() {
        let mut composer = typed("deck about tokio");
        assert_eq!(composer.take(), "deck about tokio");
        assert_eq!(composer.position(), (0, 0));
        composer.backspace();
        assert!(composer.text.is_empty());
    }

    #[test]
    fn cursor_stays_put_on_tiny_terminals() {
        assert_eq!(cursor_in(Rect::new(0, 0, 1, 1), (3, 2)), (0, 0));
        assert_eq!(cursor_in(Rect::new(0, 0, 0, 0), (0, 0)), (0, 0));
        assert_eq!(cursor_in(Rect::new(2, 10, 40, 6), (3, 1)), (6, 12));
        assert_eq!(cursor_in(Rect::new(2, 10, 40, 6), (100, 9)), (40, 14));
    }

    #[test]
    fn streaming_bubble_shows_a_cursor() {
        let lines = transcript_lines(&[assistant("Working on it", true)]);
        assert_eq!(lines, vec!["Agent:", "  Working on it▌"]);
    }

    #[test]
    fn slide_status_shows_the_current_tip() {
        let mut message = assistant("", false);
        message.status = Some(StatusLabel::in_progress(StatusCategory::SlideGeneration, None));
        message.tip_index = Some(0);

        let lines = transcript_lines(&[message]);
        assert_eq!(lines[0], "● Building slides...");
        assert_eq!(lines[1], format!("  Tip: {}", TIPS[0]));
    }

    #[test]
    fn wrapped_lines_count_towards_height() {
        let lines = vec![
            LineSpec::new("x".repeat(25), Style::default()),
            LineSpec::new("", Style::default()),
        ];
        assert_eq!(rendered_height(&lines, 10), 4);
    }
}
