//! TUI application state and event handling

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use litmus_client::{ActionError, ReportView};
use litmus_common::Experiment;

/// Lower panel contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Guardrails,
    Snapshots,
    Bandit,
}

impl Panel {
    fn next(self) -> Self {
        match self {
            Panel::Guardrails => Panel::Snapshots,
            Panel::Snapshots => Panel::Bandit,
            Panel::Bandit => Panel::Guardrails,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Panel::Guardrails => "Guardrails",
            Panel::Snapshots => "Snapshots",
            Panel::Bandit => "Bandit",
        }
    }
}

/// Footer message after an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

/// Actions the event loop dispatches to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    Terminate,
    Refresh,
}

/// TUI application state
pub struct WatchApp {
    pub view: ReportView,
    pub api_url: String,
    pub version: String,
    pub panel: Panel,
    pub confirm_terminate: bool,
    pub terminating: bool,
    pub notice: Option<Notice>,
    pub scroll_offset: usize,
    pub should_quit: bool,
}

impl WatchApp {
    pub fn new(view: ReportView, api_url: impl Into<String>) -> Self {
        Self {
            view,
            api_url: api_url.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            panel: Panel::Guardrails,
            confirm_terminate: false,
            terminating: false,
            notice: None,
            scroll_offset: 0,
            should_quit: false,
        }
    }

    /// Replace the rendered view with the controller's latest
    pub fn update_view(&mut self, view: ReportView) {
        self.view = view;
    }

    /// Handle key events
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<AppAction> {
        if self.confirm_terminate {
            return self.handle_confirm_key(key);
        }

        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) | (KeyCode::Char('q'), _) => {
                self.should_quit = true;
                None
            }
            (KeyCode::Char('t'), _) => {
                if self.terminating {
                    self.notice = Some(Notice::Info("Terminate already in progress".to_string()));
                    return None;
                }
                let running = self
                    .view
                    .experiment
                    .loaded()
                    .map(|e| e.status.is_running())
                    .unwrap_or(false);
                if running {
                    self.confirm_terminate = true;
                    self.notice = None;
                } else {
                    self.notice = Some(Notice::Error(
                        "Only running experiments can be terminated".to_string(),
                    ));
                }
                None
            }
            (KeyCode::Char('r'), _) => {
                self.notice = Some(Notice::Info("Refreshing".to_string()));
                Some(AppAction::Refresh)
            }
            (KeyCode::Tab, _) => {
                self.panel = self.panel.next();
                self.scroll_offset = 0;
                None
            }
            (KeyCode::Up | KeyCode::Char('k'), _) => {
                self.scroll_offset = self.scroll_offset.saturating_sub(1);
                None
            }
            (KeyCode::Down | KeyCode::Char('j'), _) => {
                self.scroll_offset += 1;
                None
            }
            _ => None,
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                self.confirm_terminate = false;
                self.terminating = true;
                self.notice = Some(Notice::Info("Terminating".to_string()));
                Some(AppAction::Terminate)
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.confirm_terminate = false;
                None
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                None
            }
            _ => None,
        }
    }

    /// Record the outcome of a terminate
    pub fn terminate_finished(&mut self, result: Result<Experiment, ActionError>) {
        self.terminating = false;
        self.notice = Some(match result {
            Ok(experiment) => Notice::Info(format!("Experiment is now {}", experiment.status)),
            Err(ActionError::Unconfirmed(e)) => Notice::Error(format!(
                "Terminate sent but not confirmed ({}); press r to refresh",
                e.detail()
            )),
            Err(e) => Notice::Error(e.to_string()),
        });
    }
}
