//! Call flow panel.
//!
//! Shows the messages of one call as arrows between participant columns and
//! lets the user move a cursor through them. The panel keeps its own
//! [`ViewState`]; the capture side never touches it.

use std::sync::Arc;

use crossterm::event::KeyCode;
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Widget};

use crate::domain::{Call, Endpoint, Message};
use crate::error::ViewError;

/// Rows used by the participant header
const HEADER_ROWS: u16 = 2;
/// Rows drawn per message: label and arrow
const ROWS_PER_MESSAGE: u16 = 2;
/// Width reserved for the time column ("10:30:00.123456")
const TIME_WIDTH: u16 = 15;
/// Horizontal distance between participant columns
const COLUMN_WIDTH: u16 = 24;
/// Message lines assumed until the first draw measures the panel
const DEFAULT_VISIBLE_LINES: usize = 20;

const HELP_LINES: [&str; 7] = [
    "Up / k       previous message",
    "Down / j     next message",
    "PgUp         previous page",
    "PgDn         next page",
    "Home / End   first / last message",
    "F1 / h       toggle this help",
    "Esc / q      back to call list",
];

/// Whether a key was consumed by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Handled,
    /// Let an outer dispatcher try its own bindings
    NotHandled,
}

/// Display state of an attached call.
#[derive(Debug)]
struct ViewState {
    call: Arc<Call>,
    /// Index of the first displayed message
    first: usize,
    /// Index of the message under the cursor
    cursor: usize,
    /// Lines available for messages at the last draw
    visible_lines: usize,
    /// Participants in order of first appearance
    columns: Vec<Endpoint>,
    /// Messages already scanned for participants
    learned: usize,
}

impl ViewState {
    fn new(call: Arc<Call>) -> Self {
        Self {
            call,
            first: 0,
            cursor: 0,
            visible_lines: DEFAULT_VISIBLE_LINES,
            columns: Vec::new(),
            learned: 0,
        }
    }

    /// Messages that fit in the window.
    fn capacity(&self) -> usize {
        (self.visible_lines / usize::from(ROWS_PER_MESSAGE)).max(1)
    }

    /// Screen line of the cursor, relative to the first message row.
    fn cursor_line(&self) -> usize {
        (self.cursor - self.first) * usize::from(ROWS_PER_MESSAGE)
    }

    fn last_index(&self) -> usize {
        self.call.len().saturating_sub(1)
    }

    fn move_to(&mut self, index: usize) {
        self.cursor = index.min(self.last_index());
        self.scroll_to_cursor();
    }

    /// Adjust the first displayed message so the cursor is visible.
    fn scroll_to_cursor(&mut self) {
        let capacity = self.capacity();
        if self.cursor < self.first {
            self.first = self.cursor;
        } else if self.cursor >= self.first + capacity {
            self.first = self.cursor + 1 - capacity;
        }
    }

    fn column_of(&mut self, endpoint: Endpoint) -> usize {
        match self.columns.iter().position(|&e| e == endpoint) {
            Some(index) => index,
            None => {
                self.columns.push(endpoint);
                self.columns.len() - 1
            }
        }
    }

    /// Add participants of messages appended since the last draw.
    fn learn_columns(&mut self) {
        for message in self.call.window(self.learned, usize::MAX) {
            self.column_of(message.src);
            self.column_of(message.dst);
            self.learned += 1;
        }
    }
}

/// Call flow panel controller.
///
/// Starts unattached. [`set_active_call`](Self::set_active_call) attaches a
/// call and resets the cursor to its first message.
#[derive(Debug, Default)]
pub struct CallFlowView {
    state: Option<ViewState>,
    show_help: bool,
}

impl CallFlowView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `call` (or detach with `None`), resetting cursor and scroll.
    pub fn set_active_call(&mut self, call: Option<Arc<Call>>) {
        self.state = call.map(ViewState::new);
        self.show_help = false;
    }

    /// Detach the current call, releasing the reference.
    pub fn detach(&mut self) {
        self.set_active_call(None);
    }

    /// Currently attached call.
    pub fn active_call(&self) -> Option<&Arc<Call>> {
        self.state.as_ref().map(|state| &state.call)
    }

    pub fn is_attached(&self) -> bool {
        self.state.is_some()
    }

    /// Index of the message under the cursor.
    pub fn cursor(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.cursor)
    }

    /// Index of the first displayed message.
    pub fn first_displayed(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.first)
    }

    /// Screen line of the cursor within the message area.
    pub fn cursor_line(&self) -> Option<usize> {
        self.state.as_ref().map(ViewState::cursor_line)
    }

    /// Whether the panel must be redrawn after `message` was placed.
    pub fn notify_new_message(&self, message: &Message) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.call.id() == message.call_id())
    }

    /// The panel has a help overlay.
    pub fn help(&self) -> bool {
        true
    }

    pub fn is_showing_help(&self) -> bool {
        self.show_help
    }

    /// Handle a key press.
    pub fn handle_key(&mut self, key: KeyCode) -> KeyOutcome {
        let Some(state) = self.state.as_mut() else {
            return KeyOutcome::NotHandled;
        };

        match key {
            KeyCode::Down | KeyCode::Char('j') => state.move_to(state.cursor.saturating_add(1)),
            KeyCode::Up | KeyCode::Char('k') => state.move_to(state.cursor.saturating_sub(1)),
            KeyCode::PageDown => {
                let capacity = state.capacity();
                state.move_to(state.cursor.saturating_add(capacity))
            }
            KeyCode::PageUp => {
                let capacity = state.capacity();
                state.move_to(state.cursor.saturating_sub(capacity))
            }
            KeyCode::Home => state.move_to(0),
            KeyCode::End => state.move_to(usize::MAX),
            KeyCode::F(1) | KeyCode::Char('h') => self.show_help = !self.show_help,
            _ => return KeyOutcome::NotHandled,
        }

        KeyOutcome::Handled
    }

    /// Render the panel into `area`.
    pub fn draw(&mut self, area: Rect, buf: &mut Buffer) -> Result<(), ViewError> {
        let state = self.state.as_mut().ok_or(ViewError::Detached)?;

        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" Call flow: {} ", state.call.id()));
        let inner = block.inner(area);
        block.render(area, buf);

        if inner.height <= HEADER_ROWS || inner.width == 0 {
            return Ok(());
        }

        state.learn_columns();
        state.visible_lines = usize::from(inner.height - HEADER_ROWS);
        state.cursor = state.cursor.min(state.last_index());
        state.scroll_to_cursor();

        let body_top = inner.y + HEADER_ROWS;
        draw_participants(state, inner, buf);

        let visible = state.call.window(state.first, state.capacity());
        for (row, message) in visible.iter().enumerate() {
            let y = body_top + row as u16 * ROWS_PER_MESSAGE;
            let selected = state.first + row == state.cursor;
            draw_message(state, message, inner, y, selected, buf);
        }

        if self.show_help {
            draw_help(inner, buf);
        }

        Ok(())
    }
}

/// X coordinate of a participant column.
fn column_x(area: Rect, column: usize) -> u32 {
    u32::from(area.x) + u32::from(TIME_WIDTH + 2 + COLUMN_WIDTH / 2) + column as u32 * u32::from(COLUMN_WIDTH)
}

/// Write `text` at (`x`, `y`), clipped to `area`.
fn put(buf: &mut Buffer, area: Rect, x: u32, y: u16, text: &str, style: Style) {
    if y < area.top() || y >= area.bottom() || x >= u32::from(area.right()) {
        return;
    }
    let x = x as u16;
    let width = usize::from(area.right() - x);
    buf.set_stringn(x, y, text, width, style);
}

fn draw_participants(state: &ViewState, area: Rect, buf: &mut Buffer) {
    let header_style = Style::default().add_modifier(Modifier::BOLD);
    let line_style = Style::default().fg(Color::DarkGray);

    for (column, endpoint) in state.columns.iter().enumerate() {
        let center = column_x(area, column);
        let label = endpoint.to_string();
        let x = center.saturating_sub(label.len() as u32 / 2).max(u32::from(area.x));
        put(buf, area, x, area.y, &label, header_style);

        for y in area.y + 1..area.bottom() {
            put(buf, area, center, y, "│", line_style);
        }
    }
}

fn draw_message(
    state: &ViewState,
    message: &Message,
    area: Rect,
    y: u16,
    selected: bool,
    buf: &mut Buffer,
) {
    let src = state.columns.iter().position(|&e| e == message.src).unwrap_or(0);
    let dst = state.columns.iter().position(|&e| e == message.dst).unwrap_or(0);
    let (left, right) = (column_x(area, src.min(dst)), column_x(area, src.max(dst)));

    let mut style = Style::default();
    if selected {
        style = style.add_modifier(Modifier::REVERSED);
    }
    let arrow_style = if selected {
        style.fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Cyan)
    };

    // Label row: method or status line between the two columns
    let span = (right - left).max(u32::from(COLUMN_WIDTH)) as usize;
    let label: String = message.summary.chars().take(span.saturating_sub(2)).collect();
    put(buf, area, left + 2, y, &label, style);

    // Arrow row: time on the left, arrow between the columns
    let time = message
        .timestamp
        .split_once(' ')
        .map(|(_, time)| time)
        .unwrap_or(&message.timestamp);
    put(buf, area, u32::from(area.x), y + 1, time, style);

    let arrow = if src == dst {
        "◄─►".to_string()
    } else {
        let body = "─".repeat((right - left).saturating_sub(1) as usize);
        if src < dst {
            format!("{}>", body)
        } else {
            format!("<{}", body)
        }
    };
    put(buf, area, left + 1, y + 1, &arrow, arrow_style);
}

fn draw_help(area: Rect, buf: &mut Buffer) {
    let width = (HELP_LINES.iter().map(|l| l.len()).max().unwrap_or(0) as u16 + 4).min(area.width);
    let height = (HELP_LINES.len() as u16 + 2).min(area.height);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };

    let lines: Vec<Line> = HELP_LINES.iter().map(|l| Line::from(*l)).collect();
    Clear.render(popup, buf);
    Paragraph::new(lines)
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::ALL).title(" Help "))
        .render(popup, buf);
}
