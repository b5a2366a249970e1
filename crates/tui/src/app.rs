use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use emubot_core::device_log::{DeviceRow, LogStore};
use emubot_core::types::{Command, OrchestratorState};

use crate::confirm::ConfirmDialog;

const MAX_LOG_LINES: usize = 5000;

pub struct App {
    pub logs: Arc<LogStore>,
    pub orch_state: Arc<Mutex<OrchestratorState>>,
    /// Device rows as of the last refresh.
    pub rows: Vec<DeviceRow>,
    pub refresh_every: Duration,
    pub last_refresh: Option<Instant>,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        logs: Arc<LogStore>,
        orch_state: Arc<Mutex<OrchestratorState>>,
        refresh_every: Duration,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            logs,
            orch_state,
            rows: Vec::new(),
            refresh_every,
            last_refresh: None,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn orch_state(&self) -> OrchestratorState {
        *self.orch_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-read the latest line of every device, at most once per
    /// `refresh_every`.
    pub fn refresh_rows(&mut self) {
        let due = self.last_refresh.map_or(true, |t| t.elapsed() >= self.refresh_every);
        if due {
            self.rows = self.logs.snapshot();
            self.last_refresh = Some(Instant::now());
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > MAX_LOG_LINES {
            let excess = self.log_messages.len() - MAX_LOG_LINES;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
        }
    }

    pub fn start_all(&mut self) {
        self.cmd_tx.send(Command::StartAll).ok();
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Quit straight away when idle; ask first while workers are running.
    pub fn request_quit(&mut self) {
        if self.orch_state() == OrchestratorState::Running {
            self.confirm = Some(ConfirmDialog::new("Stop all devices and quit?"));
        } else {
            self.quit();
        }
    }

    /// Enter on the dialog.
    pub fn answer_confirm(&mut self) {
        if let Some(dialog) = self.confirm.take() {
            if dialog.selected {
                self.quit();
            }
        }
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}
