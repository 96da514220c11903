use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::channel::CommandChannel;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::logger;
use crate::sleep::Clock;
use crate::settings::SessionSettings;
use crate::types::{BatchReport, Command, Session};

/// Inter-command delay: base plus a penalty per recent failure, sped up once
/// a success streak passes the threshold in the second half of a batch,
/// clamped to the configured band.
pub fn pacing(cfg: &SessionSettings, recent_failures: usize, streak: u32, progress: f64) -> Duration {
    let mut ms = (cfg.base_interval_ms + recent_failures as u64 * cfg.failure_penalty_ms) as f64;
    if streak > cfg.streak_threshold && progress > 0.5 {
        ms *= cfg.speedup;
    }
    let ms = (ms.round() as u64).clamp(cfg.min_interval_ms, cfg.max_interval_ms.max(cfg.min_interval_ms));
    Duration::from_millis(ms)
}

/// What a batch did, plus the commands it never got to.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub report: BatchReport,
    pub errors: Vec<Error>,
    /// Never submitted: the surface could not be (re)opened or the mode set
    pub unsent: Vec<Command>,
}

/// Runs many commands under one activation of the chat surface.
pub struct SessionController<'e> {
    engine: &'e mut Engine,
    cfg: SessionSettings,
    session: Option<Session>,
    recent: VecDeque<bool>,
    streak: u32,
    consecutive_failures: u32,
    result: BatchResult,
}

impl<'e> SessionController<'e> {
    pub fn new(engine: &'e mut Engine) -> Self {
        let cfg = engine.settings.session.clone();
        Self {
            engine,
            cfg,
            session: None,
            recent: VecDeque::new(),
            streak: 0,
            consecutive_failures: 0,
            result: BatchResult::default(),
        }
    }

    pub fn engine(&self) -> &Engine {
        self.engine
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.active)
    }

    pub fn open(&mut self) -> Result<()> {
        let mut channel = CommandChannel::new(&mut *self.engine);
        channel.ensure_open()?;
        channel.ensure_mode()?;
        self.engine.clock.sleep_ms(self.cfg.open_settle_ms);
        self.session = Some(Session {
            started_at: self.engine.clock.now(),
            commands_sent: Vec::new(),
            active: true,
        });
        logger::info_p("session", "opened");
        Ok(())
    }

    /// Leave the game in a neutral state whether or not a session is active.
    pub fn close(&mut self) {
        let key = self.engine.settings.keys.close.clone();
        if let Err(e) = self.engine.platform.actuator.press_key(&key) {
            logger::warn_p("session", &format!("close failed: {}", e));
        }
        self.engine.clock.sleep_ms(self.cfg.close_settle_ms);
        if let Some(s) = self.session.take() {
            logger::info_p("session", &format!("closed after {} command(s)", s.commands_sent.len()));
        }
    }

    fn reopen(&mut self) -> Result<()> {
        self.close();
        self.result.report.reopened += 1;
        self.open()
    }

    fn expired(&self) -> bool {
        let now = self.engine.clock.now();
        self.session
            .as_ref()
            .is_some_and(|s| now.duration_since(s.started_at) >= self.cfg.timeout())
    }

    fn note(&mut self, ok: bool) {
        self.recent.push_back(ok);
        while self.recent.len() > self.cfg.failure_window.max(1) {
            self.recent.pop_front();
        }
        if ok {
            self.streak += 1;
            self.consecutive_failures = 0;
        } else {
            self.streak = 0;
            self.consecutive_failures += 1;
        }
    }

    /// Send one command inside the session, opening or refreshing it first
    /// when needed. Captured output is published under the command's class
    /// category.
    ///
    /// Only commands that reached the submit key count as sent. Anything
    /// failing earlier leaves the report untouched.
    pub fn send(&mut self, cmd: &Command) -> Result<Option<String>> {
        if self.expired() {
            logger::info_p("session", "session timed out, reopening");
            self.reopen()?;
        } else if !self.is_active() {
            self.open()?;
        }

        let (sent, submitted) = {
            let mut channel = CommandChannel::new(&mut *self.engine);
            let sent = channel.send(cmd);
            (sent, channel.submitted())
        };
        if !submitted {
            if let Err(e) = &sent {
                logger::warn_p("session", &format!("'{}' not delivered: {}", cmd.text, e));
            }
            return sent;
        }

        self.result.report.sent += 1;
        if let Some(s) = self.session.as_mut() {
            s.commands_sent.push(cmd.text.clone());
        }

        match &sent {
            Ok(out) => {
                self.result.report.succeeded += 1;
                self.note(true);
                if let Some(out) = out {
                    self.engine.platform.sink.publish(&cmd.class.category, out);
                }
            }
            Err(e) => {
                logger::warn_p("session", &format!("'{}' failed: {}", cmd.text, e));
                self.result.report.failed += 1;
                self.note(false);
            }
        }

        if self.consecutive_failures >= self.cfg.consecutive_failure_limit {
            logger::warn_p("session", &format!("{} consecutive failures, restarting session", self.consecutive_failures));
            self.consecutive_failures = 0;
            if let Err(e) = self.reopen() {
                self.result.errors.push(e);
            }
        }
        sent
    }

    /// Sleep the dynamic inter-command interval.
    pub fn pause(&self, progress: f64) {
        let failures = self.recent.iter().filter(|ok| !**ok).count();
        let d = pacing(&self.cfg, failures, self.streak, progress);
        self.engine.clock.sleep(d);
    }

    /// Send `commands` in order under one activation and close the surface
    /// afterwards regardless of outcome.
    pub fn run_batch(mut self, commands: &[Command]) -> BatchResult {
        let started = self.engine.clock.now();
        if let Err(e) = self.open() {
            logger::warn_p("session", &format!("cannot open: {}", e));
            self.result.errors.push(e);
            self.result.unsent = commands.to_vec();
        } else {
            for (i, cmd) in commands.iter().enumerate() {
                let attempted = self.result.report.sent;
                if let Err(e) = self.send(cmd) {
                    self.result.errors.push(e);
                    if self.result.report.sent == attempted {
                        // never submitted, this one and the rest go back
                        self.result.unsent = commands[i..].to_vec();
                        break;
                    }
                }
                if i + 1 < commands.len() {
                    self.pause((i + 1) as f64 / commands.len() as f64);
                }
            }
        }
        self.close();
        self.finish(started)
    }

    /// Close and hand back what happened since `started`.
    pub fn finish(mut self, started: Instant) -> BatchResult {
        if self.session.is_some() {
            self.close();
        }
        self.result.report.elapsed = self.engine.clock.now().duration_since(started);
        self.result
    }
}
