//! Call list panel.

use std::sync::Arc;

use crossterm::event::KeyCode;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, StatefulWidget};

use super::call_flow::KeyOutcome;
use crate::domain::Call;

/// Selectable list of every call seen so far.
#[derive(Debug, Default)]
pub struct CallListView {
    state: ListState,
}

impl CallListView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the selected row.
    pub fn selected_index(&self) -> Option<usize> {
        self.state.selected()
    }

    /// The selected call. The first row counts as selected until the
    /// user moves.
    pub fn selected(&self, calls: &[Arc<Call>]) -> Option<Arc<Call>> {
        calls
            .get(self.state.selected().unwrap_or(0))
            .map(Arc::clone)
    }

    pub fn handle_key(&mut self, key: KeyCode, count: usize) -> KeyOutcome {
        if count == 0 {
            return KeyOutcome::NotHandled;
        }
        let last = count - 1;
        let current = self.state.selected().unwrap_or(0).min(last);

        let next = match key {
            KeyCode::Down | KeyCode::Char('j') => (current + 1).min(last),
            KeyCode::Up | KeyCode::Char('k') => current.saturating_sub(1),
            KeyCode::Home => 0,
            KeyCode::End => last,
            _ => return KeyOutcome::NotHandled,
        };
        self.state.select(Some(next));
        KeyOutcome::Handled
    }

    pub fn draw(&mut self, calls: &[Arc<Call>], area: Rect, buf: &mut Buffer) {
        if self.state.selected().is_none() && !calls.is_empty() {
            self.state.select(Some(0));
        }

        let items: Vec<ListItem> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| ListItem::new(describe(i, call)))
            .collect();

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" Calls ({}) ", calls.len())),
            )
            .highlight_style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol(">> ");

        StatefulWidget::render(list, area, buf, &mut self.state);
    }
}

fn describe(index: usize, call: &Call) -> String {
    match call.message(0) {
        Some(first) => format!(
            "{:>4}  {:<40}  {:>3} msgs  {} -> {}  {}",
            index + 1,
            call.id(),
            call.len(),
            first.src,
            first.dst,
            first.summary
        ),
        None => format!("{:>4}  {}", index + 1, call.id()),
    }
}
