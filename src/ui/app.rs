//! Terminal application: owns the terminal, the panels and the event loop.

use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Paragraph, Widget};
use ratatui::Terminal;

use super::call_flow::{CallFlowView, KeyOutcome};
use super::call_list::CallListView;
use crate::domain::Message;
use crate::pipeline::RunSummary;
use crate::store::CallStore;

/// How long the loop waits for a key before checking for new messages
const TICK: Duration = Duration::from_millis(100);

/// State of the capture thread as shown in the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Running(String),
    Finished(RunSummary),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    CallList,
    CallFlow,
}

/// The call viewer.
pub struct App {
    store: CallStore,
    messages: Receiver<Arc<Message>>,
    status_rx: Receiver<CaptureStatus>,
    status: CaptureStatus,
    running: Arc<AtomicBool>,
    screen: Screen,
    call_list: CallListView,
    call_flow: CallFlowView,
    quit: bool,
}

impl App {
    pub fn new(
        store: CallStore,
        messages: Receiver<Arc<Message>>,
        status_rx: Receiver<CaptureStatus>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            messages,
            status_rx,
            status: CaptureStatus::Running(String::new()),
            running,
            screen: Screen::CallList,
            call_list: CallListView::new(),
            call_flow: CallFlowView::new(),
            quit: false,
        }
    }

    /// Take over the terminal and run until the user quits.
    pub fn run(&mut self) -> io::Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
        let mut dirty = true;

        while !self.should_quit() {
            dirty |= self.poll_updates();

            if dirty {
                terminal.draw(|f| {
                    let area = f.size();
                    self.render(area, f.buffer_mut());
                })?;
                dirty = false;
            }

            if event::poll(TICK)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key);
                        dirty = true;
                    }
                    Event::Resize(_, _) => dirty = true,
                    _ => {}
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Drain pending messages and status changes. Returns whether the
    /// screen needs a redraw.
    pub fn poll_updates(&mut self) -> bool {
        let mut redraw = false;

        while let Ok(message) = self.messages.try_recv() {
            redraw |= match self.screen {
                // The list shows counts for every call
                Screen::CallList => true,
                Screen::CallFlow => self.call_flow.notify_new_message(&message),
            };
        }

        while let Ok(status) = self.status_rx.try_recv() {
            self.status = status;
            redraw = true;
        }

        redraw
    }

    /// Dispatch a key to the current panel, then to the global bindings.
    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }

        match self.screen {
            Screen::CallList => {
                let calls = self.store.calls();
                if self.call_list.handle_key(key.code, calls.len()) == KeyOutcome::Handled {
                    return;
                }
                match key.code {
                    KeyCode::Enter => {
                        if let Some(call) = self.call_list.selected(&calls) {
                            self.call_flow.set_active_call(Some(call));
                            self.screen = Screen::CallFlow;
                        }
                    }
                    KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
                    _ => {}
                }
            }
            Screen::CallFlow => {
                if self.call_flow.handle_key(key.code) == KeyOutcome::Handled {
                    return;
                }
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    self.call_flow.detach();
                    self.screen = Screen::CallList;
                }
            }
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Render the current screen and status line into `buf`.
    pub fn render(&mut self, area: Rect, buf: &mut Buffer) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        match self.screen {
            Screen::CallList => {
                let calls = self.store.calls();
                self.call_list.draw(&calls, chunks[0], buf);
            }
            Screen::CallFlow => {
                if let Err(e) = self.call_flow.draw(chunks[0], buf) {
                    tracing::warn!("Call flow not drawn: {}", e);
                    self.screen = Screen::CallList;
                }
            }
        }

        let (text, color) = match &self.status {
            CaptureStatus::Running(source) => (format!(" Capturing {}", source), Color::Green),
            CaptureStatus::Finished(summary) => (format!(" Finished: {}", summary), Color::Cyan),
            CaptureStatus::Failed(reason) => (format!(" Capture stopped: {}", reason), Color::Red),
        };
        Paragraph::new(text)
            .style(Style::default().fg(color))
            .render(chunks[1], buf);
    }
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}
