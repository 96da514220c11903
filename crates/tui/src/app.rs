use std::sync::{Arc, Mutex, mpsc};
use consul_core::types::{Control, LoopStatus, OrchestratorState};

use crate::confirm::ConfirmDialog;

pub struct App {
    pub status: Arc<Mutex<LoopStatus>>,
    pub orch_state: Arc<Mutex<OrchestratorState>>,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Control>,
    /// Command line being typed, when in input mode
    pub input: Option<String>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        status: Arc<Mutex<LoopStatus>>,
        orch_state: Arc<Mutex<OrchestratorState>>,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Control>,
    ) -> Self {
        Self {
            status,
            orch_state,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            input: None,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
            if self.log_scroll > 0 {
                // keep the viewed lines in place
                self.log_scroll += 1;
            }
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn start_stop(&mut self) {
        self.cmd_tx.send(Control::StartStop).ok();
    }

    pub fn ask_restart(&mut self) {
        self.confirm = Some(ConfirmDialog::new("Kill and relaunch the client?"));
    }

    /// Close the dialog, restarting if it was confirmed.
    pub fn answer_confirm(&mut self) {
        if let Some(dialog) = self.confirm.take() {
            if dialog.selected {
                self.cmd_tx.send(Control::ForceRestart).ok();
            }
        }
    }

    pub fn begin_input(&mut self) {
        self.input = Some(String::new());
    }

    pub fn submit_input(&mut self) {
        if let Some(text) = self.input.take() {
            let text = text.trim();
            if !text.is_empty() {
                self.cmd_tx.send(Control::Enqueue(text.to_string())).ok();
            }
        }
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Control::Quit).ok();
        self.should_quit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> (App, mpsc::Receiver<Control>, mpsc::Sender<String>) {
        let (log_tx, log_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let app = App::new(
            Arc::new(Mutex::new(LoopStatus::default())),
            Arc::new(Mutex::new(OrchestratorState::Stopped)),
            log_rx,
            cmd_tx,
        );
        (app, cmd_rx, log_tx)
    }

    #[test]
    fn test_input_is_trimmed_and_queued() {
        let (mut app, cmd_rx, _log) = app();
        app.begin_input();
        app.input.as_mut().unwrap().push_str("  players ");
        app.submit_input();
        assert!(matches!(cmd_rx.try_recv(), Ok(Control::Enqueue(t)) if t == "players"));

        app.begin_input();
        app.submit_input();
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_restart_needs_confirmation() {
        let (mut app, cmd_rx, _log) = app();
        app.ask_restart();
        app.answer_confirm();
        assert!(cmd_rx.try_recv().is_err());

        app.ask_restart();
        app.confirm.as_mut().unwrap().toggle();
        app.answer_confirm();
        assert!(matches!(cmd_rx.try_recv(), Ok(Control::ForceRestart)));
    }

    #[test]
    fn test_scrolled_log_stays_put() {
        let (mut app, _cmd_rx, log_tx) = app();
        app.scroll_log_up(2);
        log_tx.send("a".into()).unwrap();
        app.drain_logs();
        assert_eq!(app.log_scroll, 3);
        app.scroll_log_down(10);
        assert_eq!(app.log_scroll, 0);
    }
}
