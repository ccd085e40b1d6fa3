use std::error::Error;
use std::io;
use std::time::Duration;

use ratatui::{
    backend::CrosstermBackend,
    crossterm::{
        event::{
            self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
            KeyModifiers, MouseEventKind,
        },
        execute,
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    },
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::config::RuntimeConfig;
use crate::core::language::{self, LanguageProfile};
use crate::core::transcript::{Transcript, CONTEXT_WINDOW};

/// One rendered item in the scrollback. Errors live only here; the
/// transcript never records them.
enum ScrollbackEntry {
    User(String),
    Assistant(String),
    Error(String),
}

struct ChatApp {
    transcript: Transcript,
    scrollback: Vec<ScrollbackEntry>,
    /// In-flight assistant reply. Committed to the transcript only when the
    /// exchange ends cleanly.
    pending_response: Option<String>,
    input: String,
    profile: &'static LanguageProfile,
    config: RuntimeConfig,
    client: reqwest::Client,
    stream: ChatStreamService,
    exchange_counter: u64,
    cancel_token: Option<CancellationToken>,
    awaiting_reply: bool,
    scroll_offset: u16,
    auto_scroll: bool,
    viewport_height: u16,
}

impl ChatApp {
    fn new(config: RuntimeConfig, profile: &'static LanguageProfile, stream: ChatStreamService) -> Self {
        Self {
            transcript: Transcript::new(),
            scrollback: Vec::new(),
            pending_response: None,
            input: String::new(),
            profile,
            config,
            client: reqwest::Client::new(),
            stream,
            exchange_counter: 0,
            cancel_token: None,
            awaiting_reply: false,
            scroll_offset: 0,
            auto_scroll: true,
            viewport_height: 0,
        }
    }

    /// Send the current input as a user turn. Whitespace-only input records
    /// nothing and issues no request; a submit while a reply is still in
    /// flight is refused.
    fn submit_input(&mut self) {
        if self.awaiting_reply || self.input.trim().is_empty() {
            return;
        }

        let input = std::mem::take(&mut self.input);
        if !self.transcript.append_user(&input) {
            return;
        }
        self.scrollback
            .push(ScrollbackEntry::User(input.trim().to_string()));

        let context = self.transcript.recent_context(CONTEXT_WINDOW, self.profile);
        let prompt = language::build_prompt(self.profile, &context);

        self.exchange_counter += 1;
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());
        self.pending_response = Some(String::new());
        self.awaiting_reply = true;
        self.auto_scroll = true;

        self.stream.spawn_exchange(StreamParams {
            client: self.client.clone(),
            base_url: self.config.base_url.clone(),
            api_key: self.config.api_key.clone(),
            model: self.config.model.clone(),
            prompt,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            cancel_token,
            exchange_id: self.exchange_counter,
        });
    }

    fn on_stream_message(&mut self, message: StreamMessage, exchange_id: u64) {
        if exchange_id != self.exchange_counter {
            return;
        }

        match message {
            StreamMessage::Chunk(text) => {
                if let Some(buffer) = &mut self.pending_response {
                    buffer.push_str(&text);
                }
            }
            StreamMessage::End(full_response) => {
                self.transcript.append_assistant(full_response.clone());
                self.scrollback.push(ScrollbackEntry::Assistant(full_response));
                self.pending_response = None;
                self.awaiting_reply = false;
                self.cancel_token = None;
            }
            StreamMessage::Error(error) => {
                self.scrollback.push(ScrollbackEntry::Error(format!(
                    "{}: {error}",
                    self.profile.error_label
                )));
                self.pending_response = None;
                self.awaiting_reply = false;
                self.cancel_token = None;
            }
        }
    }

    fn toggle_language(&mut self) {
        self.profile = language::next_profile(self.profile);
    }

    fn cancel_current_exchange(&self) {
        if let Some(token) = &self.cancel_token {
            token.cancel();
        }
    }

    fn build_display_lines(&self) -> Vec<Line<'_>> {
        let mut lines = Vec::new();

        for entry in &self.scrollback {
            match entry {
                ScrollbackEntry::User(text) => {
                    lines.push(Line::from(vec![
                        Span::styled(
                            format!("{}: ", self.profile.user_label),
                            Style::default()
                                .fg(Color::Cyan)
                                .add_modifier(Modifier::BOLD),
                        ),
                        Span::styled(text.as_str(), Style::default().fg(Color::Cyan)),
                    ]));
                    lines.push(Line::from(""));
                }
                ScrollbackEntry::Assistant(text) => {
                    push_assistant_lines(&mut lines, self.profile, text);
                    lines.push(Line::from(""));
                }
                ScrollbackEntry::Error(text) => {
                    lines.push(Line::from(Span::styled(
                        text.as_str(),
                        Style::default().fg(Color::Red),
                    )));
                    lines.push(Line::from(""));
                }
            }
        }

        if let Some(buffer) = &self.pending_response {
            push_assistant_lines(&mut lines, self.profile, buffer);
            lines.push(Line::from(""));
        }

        lines
    }

    fn max_scroll_offset(&self) -> u16 {
        let total_lines = self.build_display_lines().len() as u16;
        total_lines.saturating_sub(self.viewport_height)
    }

    fn sync_scroll(&mut self) {
        let max_offset = self.max_scroll_offset();
        if self.auto_scroll {
            self.scroll_offset = max_offset;
        } else {
            self.scroll_offset = self.scroll_offset.min(max_offset);
        }
    }

    fn scroll_up(&mut self, lines: u16) {
        self.auto_scroll = false;
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    fn scroll_down(&mut self, lines: u16) {
        let max_offset = self.max_scroll_offset();
        self.scroll_offset = self.scroll_offset.saturating_add(lines).min(max_offset);
        if self.scroll_offset >= max_offset {
            self.auto_scroll = true;
        }
    }
}

fn push_assistant_lines<'a>(
    lines: &mut Vec<Line<'a>>,
    profile: &'static LanguageProfile,
    text: &'a str,
) {
    lines.push(Line::from(Span::styled(
        format!("{}:", profile.assistant_name),
        Style::default()
            .fg(Color::Magenta)
            .add_modifier(Modifier::BOLD),
    )));
    for content_line in text.lines() {
        if content_line.trim().is_empty() {
            lines.push(Line::from(""));
        } else {
            lines.push(Line::from(Span::styled(
                content_line,
                Style::default().fg(Color::White),
            )));
        }
    }
}

fn ui(f: &mut Frame, app: &ChatApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.area());

    let lines = app.build_display_lines();

    let messages_paragraph = Paragraph::new(lines)
        .block(Block::default().title(format!("Plausch ({})", app.profile.display_name)))
        .wrap(Wrap { trim: true })
        .scroll((app.scroll_offset, 0));
    f.render_widget(messages_paragraph, chunks[0]);

    let input_title = if app.awaiting_reply {
        app.profile.busy_notice
    } else {
        app.profile.input_hint
    };

    let input_paragraph = if app.input.is_empty() {
        Paragraph::new(Span::styled(
            app.profile.input_placeholder,
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Paragraph::new(app.input.as_str()).style(Style::default().fg(Color::Yellow))
    };
    let input_paragraph = input_paragraph
        .block(Block::default().borders(Borders::ALL).title(input_title))
        .wrap(Wrap { trim: true });
    f.render_widget(input_paragraph, chunks[1]);

    f.set_cursor_position((
        chunks[1].x + app.input.chars().count() as u16 + 1,
        chunks[1].y + 1,
    ));
}

/// Run the interactive chat session until the user quits.
pub async fn run(
    config: RuntimeConfig,
    profile: &'static LanguageProfile,
) -> Result<(), Box<dyn Error>> {
    let (service, mut rx) = ChatStreamService::new();
    let mut app = ChatApp::new(config, profile, service);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, &mut app, &mut rx).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut ChatApp,
    rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
) -> Result<(), Box<dyn Error>> {
    loop {
        let size = terminal.size()?;
        // 3 rows for the input area, 1 for the scrollback title.
        app.viewport_height = size.height.saturating_sub(3).saturating_sub(1);
        app.sync_scroll();

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.cancel_current_exchange();
                        return Ok(());
                    }
                    KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.toggle_language();
                    }
                    KeyCode::Enter => app.submit_input(),
                    KeyCode::Char(c) => app.input.push(c),
                    KeyCode::Backspace => {
                        app.input.pop();
                    }
                    KeyCode::Up => app.scroll_up(1),
                    KeyCode::Down => app.scroll_down(1),
                    _ => {}
                },
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollUp => app.scroll_up(3),
                    MouseEventKind::ScrollDown => app.scroll_down(3),
                    _ => {}
                },
                _ => {}
            }
        }

        // Drain everything the worker produced since the last tick.
        while let Ok((message, exchange_id)) = rx.try_recv() {
            app.on_stream_message(message, exchange_id);
        }
    }
}
