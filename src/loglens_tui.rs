//! Ratatui interface for LogLens.

use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::Frame;

use crate::levels::canonical_level;
use crate::loglens_core::ListItem as LogRow;
use crate::loglens_stream::ConnectionState;
use crate::loglens_upload::{self, first_file};
use crate::loglens_view::{Viewer, ViewerConfig};

const PAGE_STEP: isize = 10;

/// Key handling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Filter,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    Upload(PathBuf),
}

/// Input buffer with a cursor (byte offset, always on a char boundary).
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub buffer: String,
    pub cursor: usize,
}

impl InputState {
    pub fn set(&mut self, value: &str) {
        self.buffer = value.to_string();
        self.cursor = self.buffer.len();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    pub fn insert_str(&mut self, value: &str) {
        if self.cursor >= self.buffer.len() {
            self.buffer.push_str(value);
            self.cursor = self.buffer.len();
            return;
        }
        self.buffer.insert_str(self.cursor, value);
        self.cursor += value.len();
    }

    pub fn backspace(&mut self) {
        let Some(prev) = self.buffer[..self.cursor].chars().next_back() else {
            return;
        };
        self.cursor -= prev.len_utf8();
        self.buffer.remove(self.cursor);
    }

    pub fn move_left(&mut self) {
        if let Some(prev) = self.buffer[..self.cursor].chars().next_back() {
            self.cursor -= prev.len_utf8();
        }
    }

    pub fn move_right(&mut self) {
        if let Some(next) = self.buffer[self.cursor..].chars().next() {
            self.cursor += next.len_utf8();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TuiConfig {
    pub viewer: ViewerConfig,
    /// Shown next to the connection state in the top bar.
    pub server_label: String,
    pub initial_filter: Option<String>,
}

#[derive(Debug)]
pub struct Tui {
    pub viewer: Viewer,
    pub mode: Mode,
    pub filter_input: InputState,
    pub upload_input: InputState,
    connection: ConnectionState,
    server_label: String,
    status: Option<String>,
    detail_scroll: u16,
    detail_anchor: Option<usize>,
}

impl Default for Tui {
    fn default() -> Self {
        Self::new(TuiConfig::default())
    }
}

struct Areas {
    top: Rect,
    list: Rect,
    detail: Rect,
    footer: Rect,
}

impl Tui {
    pub fn new(config: TuiConfig) -> Self {
        let mut viewer = Viewer::new(config.viewer);
        if let Some(filter) = config.initial_filter {
            viewer.set_filter(filter);
        }
        Self {
            viewer,
            mode: Mode::Normal,
            filter_input: InputState::default(),
            upload_input: InputState::default(),
            connection: ConnectionState::Idle,
            server_label: config.server_label,
            status: None,
            detail_scroll: 0,
            detail_anchor: None,
        }
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status(&mut self, text: impl Into<String>) {
        self.status = Some(text.into());
    }

    pub fn begin_upload(&mut self) {
        loglens_upload::begin_upload(&mut self.viewer);
        self.detail_scroll = 0;
        self.status = None;
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if let KeyCode::Char('c' | 'C') = key.code {
                return Action::Quit;
            }
        }

        match self.mode {
            Mode::Normal => self.handle_normal(key),
            Mode::Filter => self.handle_filter(key),
            Mode::Upload => self.handle_upload(key),
        }
    }

    /// Bracketed paste. Terminals deliver dropped files as pasted paths.
    pub fn handle_paste(&mut self, text: &str) -> Action {
        let text = text.trim_end_matches(['\r', '\n']);
        match self.mode {
            Mode::Filter => {
                self.filter_input.insert_str(&text.replace(['\r', '\n'], " "));
                self.viewer.set_filter(self.filter_input.buffer.clone());
                Action::None
            }
            Mode::Upload => {
                self.upload_input.insert_str(text);
                Action::None
            }
            Mode::Normal => self.submit_upload(text),
        }
    }

    pub fn handle_mouse(&mut self, event: MouseEvent, size: Rect) -> Action {
        let areas = Self::areas(size);
        let in_rect = |rect: Rect| {
            event.column >= rect.x
                && event.column < rect.x.saturating_add(rect.width)
                && event.row >= rect.y
                && event.row < rect.y.saturating_add(rect.height)
        };

        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if in_rect(areas.top) {
                    self.enter_filter();
                    return Action::None;
                }
                let inner = Self::list_inner_area(size);
                if in_rect(inner) {
                    let total = self.viewer.view().len();
                    let selected = self.viewer.selection().position().unwrap_or(0);
                    let offset = logs_view_offset(selected, total, inner.height as usize);
                    let position = offset + usize::from(event.row - inner.y);
                    if position < total {
                        let _ = self.viewer.select(position);
                    }
                }
            }
            MouseEventKind::ScrollDown if in_rect(areas.list) => self.viewer.select_relative(1),
            MouseEventKind::ScrollUp if in_rect(areas.list) => self.viewer.select_relative(-1),
            MouseEventKind::ScrollDown if in_rect(areas.detail) => {
                self.detail_scroll = self.detail_scroll.saturating_add(1);
            }
            MouseEventKind::ScrollUp if in_rect(areas.detail) => {
                self.detail_scroll = self.detail_scroll.saturating_sub(1);
            }
            _ => {}
        }
        Action::None
    }

    pub fn render(&mut self, frame: &mut Frame<'_>) {
        let anchor = self.viewer.selected_record().map(|(index, _)| index);
        if anchor != self.detail_anchor {
            self.detail_anchor = anchor;
            self.detail_scroll = 0;
        }

        let areas = Self::areas(frame.area());
        self.render_top_bar(frame, areas.top);
        self.render_list(frame, areas.list);
        self.render_detail(frame, areas.detail);
        self.render_footer(frame, areas.footer);
    }

    /// Rows of the log list, inside its border.
    pub fn list_inner_area(size: Rect) -> Rect {
        Block::default().borders(Borders::ALL).inner(Self::areas(size).list)
    }

    fn areas(size: Rect) -> Areas {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
            .split(size);
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(rows[1]);
        Areas { top: rows[0], list: main[0], detail: main[1], footer: rows[2] }
    }

    fn handle_normal(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Char('q' | 'Q') => return Action::Quit,
            KeyCode::Char('/') => self.enter_filter(),
            KeyCode::Char('o') => {
                self.upload_input.clear();
                self.mode = Mode::Upload;
            }
            KeyCode::Char('j') | KeyCode::Down => self.viewer.select_relative(1),
            KeyCode::Char('k') | KeyCode::Up => self.viewer.select_relative(-1),
            KeyCode::PageDown => self.viewer.select_relative(PAGE_STEP),
            KeyCode::PageUp => self.viewer.select_relative(-PAGE_STEP),
            KeyCode::Char('g') | KeyCode::Home => self.viewer.select_first(),
            KeyCode::Char('G') | KeyCode::End => self.viewer.select_last(),
            KeyCode::Char('J') => self.detail_scroll = self.detail_scroll.saturating_add(1),
            KeyCode::Char('K') => self.detail_scroll = self.detail_scroll.saturating_sub(1),
            KeyCode::Esc => {
                self.status = None;
                self.viewer.set_filter("");
            }
            _ => {}
        }
        Action::None
    }

    fn handle_filter(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Enter => self.mode = Mode::Normal,
            KeyCode::Esc => {
                self.filter_input.clear();
                self.viewer.set_filter("");
                self.mode = Mode::Normal;
            }
            KeyCode::Backspace => {
                self.filter_input.backspace();
                self.viewer.set_filter(self.filter_input.buffer.clone());
            }
            KeyCode::Left => self.filter_input.move_left(),
            KeyCode::Right => self.filter_input.move_right(),
            KeyCode::Down => self.viewer.select_relative(1),
            KeyCode::Up => self.viewer.select_relative(-1),
            KeyCode::Char(ch) => {
                let mut buf = [0u8; 4];
                self.filter_input.insert_str(ch.encode_utf8(&mut buf));
                self.viewer.set_filter(self.filter_input.buffer.clone());
            }
            _ => {}
        }
        Action::None
    }

    fn handle_upload(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Esc => {
                self.upload_input.clear();
                self.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                self.mode = Mode::Normal;
                let input = std::mem::take(&mut self.upload_input.buffer);
                self.upload_input.clear();
                return self.submit_upload(&input);
            }
            KeyCode::Backspace => self.upload_input.backspace(),
            KeyCode::Left => self.upload_input.move_left(),
            KeyCode::Right => self.upload_input.move_right(),
            KeyCode::Char(ch) => {
                let mut buf = [0u8; 4];
                self.upload_input.insert_str(ch.encode_utf8(&mut buf));
            }
            _ => {}
        }
        Action::None
    }

    fn enter_filter(&mut self) {
        self.filter_input.set(self.viewer.filter());
        self.mode = Mode::Filter;
    }

    fn submit_upload(&mut self, input: &str) -> Action {
        let paths = parse_dropped_paths(input);
        match first_file(&paths) {
            Some(path) => Action::Upload(path.to_path_buf()),
            None => {
                self.status = Some("no file given".to_string());
                Action::None
            }
        }
    }

    fn render_top_bar(&self, frame: &mut Frame<'_>, area: Rect) {
        let editing = self.mode == Mode::Filter;
        let state_color = match self.connection {
            ConnectionState::Open => Color::Green,
            ConnectionState::Connecting => Color::Yellow,
            ConnectionState::Backoff => Color::Red,
            ConnectionState::Idle => Color::DarkGray,
        };
        let status = Line::from(vec![
            Span::styled("● ", Style::default().fg(state_color)),
            Span::raw(format!("{} {} ", self.connection.as_str(), self.server_label)),
        ])
        .right_aligned();
        let block = Block::default()
            .borders(Borders::ALL)
            .title_top(Line::from(" Filter ").left_aligned())
            .title_top(status)
            .border_style(self.border_style(editing));

        let content = if editing {
            input_line(&self.filter_input)
        } else if self.viewer.filter().is_empty() {
            Line::from(Span::styled("press / to filter", dimmed_style()))
        } else {
            Line::from(self.viewer.filter().to_string())
        };
        frame.render_widget(Paragraph::new(content).block(block), area);
    }

    fn render_list(&self, frame: &mut Frame<'_>, area: Rect) {
        let projection = self.viewer.projection();
        let total = projection.items.len();
        let position = self.viewer.selection().position();
        let pos = position.map_or(0, |position| position + 1);
        let block = Block::default()
            .borders(Borders::ALL)
            .title_top(Line::from(format!(" Logs {total}/{} ", self.viewer.records().len())))
            .title_bottom(Line::from(format!("─ {pos} of {total} ─")).right_aligned())
            .border_style(self.border_style(self.mode == Mode::Normal));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let height = inner.height as usize;
        let offset = logs_view_offset(position.unwrap_or(0), total, height);
        let selected_style = Style::default().fg(Color::Black).bg(Color::White).add_modifier(Modifier::BOLD);
        let items: Vec<ListItem> = projection
            .items
            .iter()
            .skip(offset)
            .take(height)
            .map(|row| {
                let item = ListItem::new(format_row(row));
                if row.active {
                    item.style(selected_style)
                } else {
                    item
                }
            })
            .collect();
        frame.render_widget(List::new(items), inner);
    }

    fn render_detail(&self, frame: &mut Frame<'_>, area: Rect) {
        let title = match self.viewer.selected_record() {
            Some((index, _)) if self.viewer.notice().is_none() => format!(" Detail #{} ", index + 1),
            _ => " Detail ".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title_top(Line::from(title))
            .border_style(self.border_style(false));
        let paragraph = Paragraph::new(self.viewer.detail_text())
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((self.detail_scroll, 0));
        frame.render_widget(paragraph, area);
    }

    fn render_footer(&self, frame: &mut Frame<'_>, area: Rect) {
        let key_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
        let sep_style = dimmed_style();
        let mut spans: Vec<Span<'static>> = Vec::new();
        let push_item = |spans: &mut Vec<Span<'static>>, label: &'static str, key: &'static str| {
            if !spans.is_empty() {
                spans.push(Span::styled(" | ", sep_style));
            }
            spans.push(Span::styled(label, sep_style));
            spans.push(Span::raw(":"));
            spans.push(Span::styled(key, key_style));
        };

        match self.mode {
            Mode::Normal => {
                push_item(&mut spans, "Filter", "/");
                push_item(&mut spans, "Move", "j/k");
                push_item(&mut spans, "Top", "g");
                push_item(&mut spans, "Bottom", "G");
                push_item(&mut spans, "Upload", "o");
                push_item(&mut spans, "Clear", "Esc");
                push_item(&mut spans, "Quit", "q");
            }
            Mode::Filter => {
                push_item(&mut spans, "Keep", "Enter");
                push_item(&mut spans, "Clear", "Esc");
            }
            Mode::Upload => {
                let mut line = vec![Span::styled("Upload file: ", key_style)];
                line.extend(input_line(&self.upload_input).spans);
                line.push(Span::styled("  Send:Enter | Cancel:Esc", sep_style));
                frame.render_widget(Paragraph::new(Line::from(line)), area);
                return;
            }
        }
        if let Some(status) = self.status() {
            spans.push(Span::styled(" | ", sep_style));
            spans.push(Span::styled(status.to_string(), Style::default().fg(Color::Yellow)));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn border_style(&self, focused: bool) -> Style {
        if focused {
            Style::default().fg(Color::Green)
        } else {
            dimmed_style()
        }
    }
}

fn dimmed_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn level_style(level: &str) -> Style {
    match canonical_level(level) {
        Some("trace") => Style::default().fg(Color::DarkGray),
        Some("debug") => Style::default().fg(Color::Blue),
        Some("info") => Style::default().fg(Color::Green),
        Some("warn") => Style::default().fg(Color::Yellow),
        Some("error") => Style::default().fg(Color::Red),
        Some("fatal") => Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
        _ => Style::default(),
    }
}

fn format_row(row: &LogRow) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("[{}]", row.level), level_style(&row.level)),
        Span::raw(" "),
        Span::raw(row.message.replace(['\r', '\n'], " ")),
    ])
}

fn input_line(input: &InputState) -> Line<'static> {
    let cursor_style = Style::default().add_modifier(Modifier::REVERSED);
    let (before, rest) = input.buffer.split_at(input.cursor.min(input.buffer.len()));
    let mut chars = rest.chars();
    let under = chars.next().map_or_else(|| " ".to_string(), String::from);
    Line::from(vec![
        Span::raw(before.to_string()),
        Span::styled(under, cursor_style),
        Span::raw(chars.as_str().to_string()),
    ])
}

fn logs_view_offset(selected: usize, total: usize, viewport_height: usize) -> usize {
    if viewport_height == 0 || total <= viewport_height {
        return 0;
    }
    let offset = selected.saturating_add(1).saturating_sub(viewport_height);
    offset.min(total - viewport_height)
}

/// Splits pasted or typed text into file paths. Handles shell quoting and
/// backslash escapes, which is how terminals render dropped files.
pub fn parse_dropped_paths(input: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                in_token = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    paths.push(dropped_path(&current));
                    current.clear();
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        paths.push(dropped_path(&current));
    }
    paths.retain(|path| !path.as_os_str().is_empty());
    paths
}

fn dropped_path(token: &str) -> PathBuf {
    PathBuf::from(token.strip_prefix("file://").unwrap_or(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loglens_core::{Record, Selection, NO_MATCH_PLACEHOLDER};
    use crate::loglens_upload::PROCESSING_NOTICE;
    use crossterm::event::{KeyEventKind, KeyEventState};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use rstest::{fixture, rstest};
    use serde_json::json;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent { code, modifiers, kind: KeyEventKind::Press, state: KeyEventState::empty() }
    }

    fn type_text(tui: &mut Tui, text: &str) {
        for ch in text.chars() {
            tui.handle_key(key(KeyCode::Char(ch), KeyModifiers::NONE));
        }
    }

    fn record(level: &str, message: &str) -> Record {
        Record::try_from(json!({"level": level, "message": message})).expect("record")
    }

    fn render_text(tui: &mut Tui) -> String {
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend).expect("terminal");
        terminal.draw(|frame| tui.render(frame)).expect("draw");
        terminal.backend().buffer().content.iter().map(|cell| cell.symbol()).collect()
    }

    #[fixture]
    fn tui() -> Tui {
        let mut tui = Tui::new(TuiConfig { server_label: "127.0.0.1:8080".into(), ..TuiConfig::default() });
        tui.viewer.append(record("info", "a"));
        tui.viewer.append(record("error", "b"));
        tui.viewer.append(record("info", "c"));
        tui
    }

    #[test]
    fn multiline_message_renders_on_one_row() {
        let mut tui = Tui::default();
        tui.viewer.append(record("info", "line1\nline2\r\nline3"));
        let text = render_text(&mut tui);
        assert!(text.contains("[INFO] line1 line2  line3"));
        assert!(!text.contains("line1line2"));
    }

    #[rstest]
    fn filter_applies_on_every_keystroke(mut tui: Tui) {
        tui.handle_key(key(KeyCode::Char('/'), KeyModifiers::NONE));
        assert_eq!(tui.mode, Mode::Filter);
        type_text(&mut tui, "er");
        assert_eq!(tui.viewer.filter(), "er");
        assert_eq!(tui.viewer.view().indices(), &[1]);

        tui.handle_key(key(KeyCode::Backspace, KeyModifiers::NONE));
        tui.handle_key(key(KeyCode::Backspace, KeyModifiers::NONE));
        assert_eq!(tui.viewer.view().len(), 3);
    }

    #[rstest]
    fn enter_keeps_filter_and_escape_clears_it(mut tui: Tui) {
        tui.handle_key(key(KeyCode::Char('/'), KeyModifiers::NONE));
        type_text(&mut tui, "error");
        tui.handle_key(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(tui.mode, Mode::Normal);
        assert_eq!(tui.viewer.filter(), "error");

        tui.handle_key(key(KeyCode::Char('/'), KeyModifiers::NONE));
        assert_eq!(tui.filter_input.buffer, "error");
        tui.handle_key(key(KeyCode::Esc, KeyModifiers::NONE));
        assert_eq!(tui.viewer.filter(), "");
        assert_eq!(tui.viewer.view().len(), 3);
    }

    #[rstest]
    fn navigation_keys_move_selection(mut tui: Tui) {
        assert_eq!(tui.viewer.selection(), Selection::At(0));
        tui.handle_key(key(KeyCode::Char('j'), KeyModifiers::NONE));
        assert_eq!(tui.viewer.selection(), Selection::At(1));
        tui.handle_key(key(KeyCode::Char('G'), KeyModifiers::SHIFT));
        assert_eq!(tui.viewer.selection(), Selection::At(2));
        tui.handle_key(key(KeyCode::Down, KeyModifiers::NONE));
        assert_eq!(tui.viewer.selection(), Selection::At(2));
        tui.handle_key(key(KeyCode::Char('g'), KeyModifiers::NONE));
        assert_eq!(tui.viewer.selection(), Selection::At(0));
        tui.handle_key(key(KeyCode::Char('k'), KeyModifiers::NONE));
        assert_eq!(tui.viewer.selection(), Selection::At(0));
    }

    #[rstest]
    #[case(key(KeyCode::Char('q'), KeyModifiers::NONE))]
    #[case(key(KeyCode::Char('c'), KeyModifiers::CONTROL))]
    fn quit_keys(mut tui: Tui, #[case] event: KeyEvent) {
        assert_eq!(tui.handle_key(event), Action::Quit);
    }

    #[rstest]
    fn mouse_click_selects_log_row(mut tui: Tui) {
        let rect = Rect { x: 0, y: 0, width: 100, height: 30 };
        let list_area = Tui::list_inner_area(rect);
        let mouse = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: list_area.x.saturating_add(1),
            row: list_area.y.saturating_add(2),
            modifiers: KeyModifiers::NONE,
        };
        tui.handle_mouse(mouse, rect);
        assert_eq!(tui.viewer.selection(), Selection::At(2));
    }

    #[rstest]
    fn mouse_click_below_rows_is_ignored(mut tui: Tui) {
        let rect = Rect { x: 0, y: 0, width: 100, height: 30 };
        let list_area = Tui::list_inner_area(rect);
        let mouse = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: list_area.x,
            row: list_area.y.saturating_add(10),
            modifiers: KeyModifiers::NONE,
        };
        tui.handle_mouse(mouse, rect);
        assert_eq!(tui.viewer.selection(), Selection::At(0));
    }

    #[rstest]
    fn render_shows_rows_and_detail(mut tui: Tui) {
        tui.viewer.select(1).unwrap();
        let text = render_text(&mut tui);
        assert!(text.contains("[INFO] a"));
        assert!(text.contains("[ERROR] b"));
        assert!(text.contains("\"message\": \"b\""));
        assert!(text.contains("open") || text.contains("idle"));
    }

    #[rstest]
    fn render_shows_placeholder_when_nothing_matches(mut tui: Tui) {
        tui.viewer.set_filter("zzz");
        let text = render_text(&mut tui);
        assert!(text.contains(NO_MATCH_PLACEHOLDER));
        assert!(!text.contains("[INFO] a"));
    }

    #[rstest]
    fn upload_prompt_submits_first_path(mut tui: Tui) {
        tui.handle_key(key(KeyCode::Char('o'), KeyModifiers::NONE));
        assert_eq!(tui.mode, Mode::Upload);
        type_text(&mut tui, "first.log second.log");
        let action = tui.handle_key(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(action, Action::Upload(PathBuf::from("first.log")));
        assert_eq!(tui.mode, Mode::Normal);
    }

    #[rstest]
    fn empty_upload_prompt_sets_status(mut tui: Tui) {
        tui.handle_key(key(KeyCode::Char('o'), KeyModifiers::NONE));
        let action = tui.handle_key(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(action, Action::None);
        assert_eq!(tui.status(), Some("no file given"));
    }

    #[rstest]
    fn paste_in_normal_mode_is_a_file_drop(mut tui: Tui) {
        let action = tui.handle_paste("'/tmp/my logs/app.log'\n");
        assert_eq!(action, Action::Upload(PathBuf::from("/tmp/my logs/app.log")));
    }

    #[rstest]
    fn paste_in_filter_mode_extends_filter(mut tui: Tui) {
        tui.handle_key(key(KeyCode::Char('/'), KeyModifiers::NONE));
        tui.handle_paste("ERR");
        assert_eq!(tui.viewer.filter(), "ERR");
        assert_eq!(tui.viewer.view().indices(), &[1]);
    }

    #[rstest]
    fn begin_upload_shows_progress_notice(mut tui: Tui) {
        tui.begin_upload();
        assert!(tui.viewer.records().is_empty());
        let text = render_text(&mut tui);
        assert!(text.contains(PROCESSING_NOTICE));
    }

    #[rstest]
    #[case("a.log", vec!["a.log"])]
    #[case("  a.log   b.log ", vec!["a.log", "b.log"])]
    #[case(r"/tmp/my\ file.log", vec!["/tmp/my file.log"])]
    #[case("\"/tmp/x y.log\" 'z.log'", vec!["/tmp/x y.log", "z.log"])]
    #[case("file:///var/log/app.log", vec!["/var/log/app.log"])]
    #[case("   ", vec![])]
    fn parses_dropped_paths(#[case] input: &str, #[case] expected: Vec<&str>) {
        let expected: Vec<PathBuf> = expected.into_iter().map(PathBuf::from).collect();
        assert_eq!(parse_dropped_paths(input), expected);
    }

    #[test]
    fn input_backspace_handles_multibyte() {
        let mut input = InputState::default();
        input.insert_str("héé");
        input.backspace();
        assert_eq!(input.buffer, "hé");
        input.move_left();
        input.insert_str("x");
        assert_eq!(input.buffer, "hxé");
    }

    #[rstest]
    #[case(0, 3, 10, 0)]
    #[case(15, 40, 10, 6)]
    #[case(39, 40, 10, 30)]
    #[case(5, 40, 0, 0)]
    fn view_offset_keeps_selection_visible(
        #[case] selected: usize,
        #[case] total: usize,
        #[case] height: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(logs_view_offset(selected, total, height), expected);
    }
}
