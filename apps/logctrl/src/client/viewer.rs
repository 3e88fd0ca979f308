use crate::client::layout::{PaneSize, SizeSpec};
use crate::stream::notify::{self, Updates, Wake};
use crate::stream::{LogStream, StreamOptions};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Frame;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use std::io::{self, Stdout};
use std::os::fd::OwnedFd;
use std::time::Duration;
use tracing::{debug, info, trace};

const APP_TITLE: &str = "<Ctrl+LOG>";
const PROMPT_LABEL: &str = ":";
const INPUT_POLL: Duration = Duration::from_millis(50);

const LOG_PANE: PaneSize = PaneSize::new(SizeSpec::Ratio(1.0), SizeSpec::Delta(-1));
const PROMPT_PANE: PaneSize = PaneSize::new(SizeSpec::Ratio(1.0), SizeSpec::Fixed(1));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewMode {
    Live,
    History,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Quit,
    ToggleHistory,
    Submit(String),
}

/// Log pane over a prompt line.
///
/// In live mode the pane shows the stream's live buffer, whose capacity is
/// kept equal to the pane height. History mode pages through the durable
/// copy instead.
#[derive(Debug)]
pub struct Viewer {
    mode: ViewMode,
    prompt: String,
    history: Vec<String>,
    scroll: usize,
    log_rows: u16,
}

impl Viewer {
    pub fn new() -> Self {
        Self {
            mode: ViewMode::Live,
            prompt: String::new(),
            history: Vec::new(),
            scroll: 0,
            log_rows: 0,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Splits `area` into the log pane and the prompt line below it.
    pub fn layout(area: Rect) -> (Rect, Rect) {
        let log = LOG_PANE.place(area);
        let below = Rect {
            y: area.y + log.height,
            height: area.height - log.height,
            ..area
        };
        (log, PROMPT_PANE.place(below))
    }

    /// Matches the live buffer to the rows visible inside the log pane.
    pub fn fit(&mut self, area: Rect, stream: &LogStream) {
        let (log, _) = Self::layout(area);
        let rows = log.height.saturating_sub(2).max(1);
        if rows != self.log_rows {
            trace!(target = "viewer", rows, "log pane resized");
            self.log_rows = rows;
            stream.set_buffer_size(usize::from(rows));
            self.clamp_scroll();
        }
    }

    /// Sizes the live buffer for `area` before replication begins, so lines
    /// produced ahead of the first frame stay visible.
    pub fn attach(&mut self, area: Rect, stream: &mut LogStream) -> Result<Updates> {
        self.fit(area, stream);
        let (notifier, updates) = notify::channel();
        stream.start(notifier).context("starting replication")?;
        Ok(updates)
    }

    pub fn on_key(&mut self, key: KeyEvent) -> KeyAction {
        if key.kind != KeyEventKind::Press {
            return KeyAction::None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => KeyAction::Quit,
            KeyCode::Tab => KeyAction::ToggleHistory,
            KeyCode::Esc if self.mode == ViewMode::History => KeyAction::ToggleHistory,
            KeyCode::Enter => KeyAction::Submit(std::mem::take(&mut self.prompt)),
            KeyCode::Backspace => {
                self.prompt.pop();
                KeyAction::None
            }
            KeyCode::Up => self.scroll_by(1),
            KeyCode::Down => self.scroll_by(-1),
            KeyCode::PageUp => self.scroll_by(self.page() as isize),
            KeyCode::PageDown => self.scroll_by(-(self.page() as isize)),
            KeyCode::Char(ch) if !ctrl => {
                self.prompt.push(ch);
                KeyAction::None
            }
            _ => KeyAction::None,
        }
    }

    pub fn show_history(&mut self, text: &str) {
        self.history = text.lines().map(str::to_owned).collect();
        self.scroll = 0;
        self.mode = ViewMode::History;
    }

    pub fn show_live(&mut self) {
        self.history.clear();
        self.scroll = 0;
        self.mode = ViewMode::Live;
    }

    /// Lines of history visible with the current scroll offset.
    pub fn history_window(&self) -> &[String] {
        let end = self.history.len() - self.scroll;
        let start = end.saturating_sub(usize::from(self.page()));
        &self.history[start..end]
    }

    pub fn render(&self, frame: &mut Frame<'_>, stream: &LogStream) {
        let (log_area, prompt_area) = Self::layout(frame.area());

        let lines: Vec<Line<'_>> = match self.mode {
            ViewMode::Live => stream.snapshot_lines().into_iter().map(Line::from).collect(),
            ViewMode::History => self
                .history_window()
                .iter()
                .map(|line| Line::from(line.as_str()))
                .collect(),
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Indexed(63)))
            .title(self.title(stream));
        frame.render_widget(Paragraph::new(lines).block(block), log_area);

        let prompt = Line::from(vec![
            Span::styled(PROMPT_LABEL, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(self.prompt.as_str()),
        ]);
        frame.render_widget(Paragraph::new(prompt), prompt_area);

        let label = PROMPT_LABEL.chars().count() + self.prompt.chars().count();
        let cursor_x = prompt_area.x + u16::try_from(label).unwrap_or(u16::MAX);
        if prompt_area.height > 0 {
            frame.set_cursor_position((cursor_x.min(prompt_area.right().saturating_sub(1)), prompt_area.y));
        }
    }

    fn title(&self, stream: &LogStream) -> String {
        let mut title = match self.mode {
            ViewMode::Live => format!(" {APP_TITLE} live ({} lines) ", stream.line_count()),
            ViewMode::History => format!(
                " {APP_TITLE} history {}/{} ",
                self.history.len() - self.scroll,
                self.history.len()
            ),
        };
        if stream.is_finished() {
            title.push_str("[feed ended] ");
        }
        title
    }

    fn page(&self) -> u16 {
        self.log_rows.max(1)
    }

    fn scroll_by(&mut self, delta: isize) -> KeyAction {
        if self.mode == ViewMode::History {
            self.scroll = self.scroll.saturating_add_signed(delta);
            self.clamp_scroll();
        }
        KeyAction::None
    }

    fn clamp_scroll(&mut self) {
        let max = self.history.len().saturating_sub(usize::from(self.page()));
        self.scroll = self.scroll.min(max);
    }
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

struct Screen {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Screen {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err);
        }
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok(Self { terminal })
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        let _ = self.terminal.show_cursor();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

/// Replicates `feed` and renders it until the user quits.
pub fn run(feed: OwnedFd, options: &StreamOptions) -> Result<()> {
    let mut stream = LogStream::from_fd(feed, options).context("creating log stream")?;
    info!(target = "viewer", path = %stream.log_path().display(), "durable log ready");

    let mut screen = Screen::enter().context("entering alternate screen")?;
    let mut viewer = Viewer::new();
    let area = screen.terminal.size().context("reading screen size")?;
    let updates = viewer.attach(Rect::new(0, 0, area.width, area.height), &mut stream)?;
    loop {
        let area = screen.terminal.size().context("reading screen size")?;
        viewer.fit(Rect::new(0, 0, area.width, area.height), &stream);
        screen
            .terminal
            .draw(|frame| viewer.render(frame, &stream))
            .context("drawing frame")?;

        if event::poll(INPUT_POLL).context("polling input")? {
            if let Event::Key(key) = event::read().context("reading input")? {
                match viewer.on_key(key) {
                    KeyAction::Quit => break,
                    KeyAction::ToggleHistory => match viewer.mode() {
                        ViewMode::Live => viewer.show_history(&stream.read_all()?),
                        ViewMode::History => viewer.show_live(),
                    },
                    KeyAction::Submit(command) => {
                        debug!(target = "viewer", %command, "prompt submitted");
                    }
                    KeyAction::None => {}
                }
            }
        }
        if updates.poll() == Wake::Closed {
            trace!(target = "viewer", "feed closed");
        }
    }

    drop(screen);
    debug!(target = "viewer", lines = stream.line_count(), "viewer closed");
    stream.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn stream_over(text: &str, dir: &tempfile::TempDir) -> LogStream {
        let options = StreamOptions {
            log_dir: Some(dir.path().to_path_buf()),
            buffer_lines: 1,
            line_cursor: false,
        };
        LogStream::new(Cursor::new(text.as_bytes().to_vec()), &options).unwrap()
    }

    #[test]
    fn layout_leaves_one_prompt_row() {
        let (log, prompt) = Viewer::layout(Rect::new(0, 0, 80, 24));
        assert_eq!(log, Rect::new(0, 0, 80, 23));
        assert_eq!(prompt, Rect::new(0, 23, 80, 1));
    }

    #[test]
    fn fit_sizes_live_buffer_to_pane() {
        let dir = tempfile::tempdir().unwrap();
        let stream = stream_over("", &dir);
        let mut viewer = Viewer::new();
        viewer.fit(Rect::new(0, 0, 80, 24), &stream);
        assert_eq!(stream.buffer_size(), 21);
        viewer.fit(Rect::new(0, 0, 80, 2), &stream);
        assert_eq!(stream.buffer_size(), 1);
    }

    #[test_timeout::timeout]
    fn attach_sizes_buffer_before_the_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = stream_over("start\nwarn: low disk\nstop\n", &dir);
        let mut viewer = Viewer::new();
        let updates = viewer.attach(Rect::new(0, 0, 80, 24), &mut stream).unwrap();
        while updates.wait() {}
        stream.join().unwrap();
        assert_eq!(stream.snapshot(), "start\nwarn: low disk\nstop");
    }

    #[test]
    fn enter_clears_prompt() {
        let mut viewer = Viewer::new();
        for ch in "grep disk".chars() {
            viewer.on_key(press(KeyCode::Char(ch)));
        }
        viewer.on_key(press(KeyCode::Backspace));
        assert_eq!(viewer.prompt(), "grep dis");
        assert_eq!(
            viewer.on_key(press(KeyCode::Enter)),
            KeyAction::Submit("grep dis".into())
        );
        assert_eq!(viewer.prompt(), "");
    }

    #[test]
    fn ctrl_c_quits() {
        let mut viewer = Viewer::new();
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(viewer.on_key(key), KeyAction::Quit);
        assert_eq!(viewer.prompt(), "");
    }

    #[test]
    fn history_scrolls_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let stream = stream_over("", &dir);
        let mut viewer = Viewer::new();
        viewer.fit(Rect::new(0, 0, 40, 6), &stream);
        assert_eq!(viewer.on_key(press(KeyCode::Tab)), KeyAction::ToggleHistory);

        let text: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        viewer.show_history(&text);
        assert_eq!(viewer.mode(), ViewMode::History);
        assert_eq!(viewer.history_window(), ["line 8", "line 9", "line 10"]);

        viewer.on_key(press(KeyCode::Up));
        assert_eq!(viewer.history_window(), ["line 7", "line 8", "line 9"]);

        for _ in 0..20 {
            viewer.on_key(press(KeyCode::PageUp));
        }
        assert_eq!(viewer.history_window(), ["line 1", "line 2", "line 3"]);

        viewer.on_key(press(KeyCode::PageDown));
        viewer.on_key(press(KeyCode::PageDown));
        viewer.on_key(press(KeyCode::PageDown));
        viewer.on_key(press(KeyCode::PageDown));
        assert_eq!(viewer.history_window(), ["line 8", "line 9", "line 10"]);

        assert_eq!(viewer.on_key(press(KeyCode::Esc)), KeyAction::ToggleHistory);
        viewer.show_live();
        assert_eq!(viewer.mode(), ViewMode::Live);
    }

    #[test]
    fn scrolling_is_ignored_while_live() {
        let mut viewer = Viewer::new();
        viewer.on_key(press(KeyCode::Up));
        assert!(viewer.history_window().is_empty());
        assert_eq!(viewer.on_key(press(KeyCode::Esc)), KeyAction::None);
    }
}
