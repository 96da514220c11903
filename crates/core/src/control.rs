use std::collections::VecDeque;
use std::time::Duration;

use crate::duties::PeriodicDuties;
use crate::engine::Engine;
use crate::error::{Counter, Error, Result};
use crate::logger;
use crate::pixel;
use crate::session::{BatchResult, SessionController};
use crate::settings::LoginStep;
use crate::sleep::Clock;
use crate::types::{Command, GameState, LoopStatus};

/// Top-level state machine: decides each poll whether to launch, wait, log
/// in, deliver pending commands, run duties or escalate.
pub struct ControlLoop {
    engine: Engine,
    duties: PeriodicDuties,
    state: GameState,
    soft: u32,
    hard: u32,
    unknown_streak: u32,
    loading_streak: u32,
    queue: VecDeque<Command>,
    escalations: u32,
    last_batch: Option<String>,
    last_error: Option<String>,
}

impl ControlLoop {
    pub fn new(engine: Engine) -> Self {
        let duties = PeriodicDuties::new(engine.settings.periodic.clone());
        Self {
            engine,
            duties,
            state: GameState::Unknown,
            soft: 0,
            hard: 0,
            unknown_streak: 0,
            loading_streak: 0,
            queue: VecDeque::new(),
            escalations: 0,
            last_batch: None,
            last_error: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    /// (soft, hard)
    pub fn counters(&self) -> (u32, u32) {
        (self.soft, self.hard)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn escalations(&self) -> u32 {
        self.escalations
    }

    /// Queue operator input (alias, sequence name or raw command). Nothing
    /// is queued if any expanded command is rejected.
    pub fn enqueue(&mut self, input: &str) -> Result<usize> {
        let texts = self.engine.table.expand(input);
        if texts.is_empty() {
            return Err(Error::InvalidCommand("empty command".into()));
        }
        let cmds = texts
            .iter()
            .map(|t| self.engine.table.prepare(t))
            .collect::<Result<Vec<_>>>()?;
        let n = cmds.len();
        self.queue.extend(cmds);
        Ok(n)
    }

    pub fn status(&self) -> LoopStatus {
        let control = &self.engine.settings.control;
        LoopStatus {
            state: self.state,
            soft_errors: self.soft,
            hard_errors: self.hard,
            soft_limit: control.soft_limit,
            hard_limit: control.hard_limit,
            pending: self.queue.len(),
            cached_labels: self.engine.verifier.cache().len(),
            escalations: self.escalations,
            last_batch: self.last_batch.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Delay before the next poll; shorter while a backlog is waiting.
    pub fn poll_interval(&self) -> Duration {
        let control = &self.engine.settings.control;
        if self.queue.len() >= control.busy_threshold {
            Duration::from_millis(control.busy_poll_interval_ms)
        } else {
            Duration::from_millis(control.poll_interval_ms)
        }
    }

    /// Operator-requested restart.
    pub fn force_restart(&mut self) {
        logger::warn_p("control", "restart requested");
        self.escalate();
    }

    fn escalate(&mut self) {
        logger::error_p(
            "control",
            &format!(
                "escalating (soft {}/{}, hard {}/{}): killing the client",
                self.soft,
                self.engine.settings.control.soft_limit,
                self.hard,
                self.engine.settings.control.hard_limit
            ),
        );
        if let Err(e) = self.engine.platform.supervisor.kill() {
            logger::error_p("control", &format!("kill failed: {}", e));
        }
        self.engine.reset();
        self.soft = 0;
        self.hard = 0;
        self.unknown_streak = 0;
        self.loading_streak = 0;
        self.state = GameState::NotRunning;
        self.escalations += 1;
    }

    fn count(&mut self, e: &Error) {
        match e.counter() {
            Some(Counter::Soft) => self.soft += 1,
            Some(Counter::Hard) => self.hard += 1,
            None => {}
        }
        self.last_error = Some(e.to_string());
    }

    fn fetch_remote(&mut self) {
        let fetched = match &self.engine.platform.source {
            Some(source) => source.fetch_pending(),
            None => return,
        };
        match fetched {
            Ok(list) => {
                for text in list {
                    if let Err(e) = self.enqueue(&text) {
                        logger::warn_p("control", &format!("dropped '{}': {}", text, e));
                    }
                }
            }
            Err(e) => logger::warn_p("control", &format!("fetch failed: {}", e)),
        }
    }

    fn classify(&mut self) -> GameState {
        if !self.engine.platform.supervisor.is_running() {
            return GameState::NotRunning;
        }
        let clock = self.engine.clock.clone();
        let platform = &self.engine.platform;
        let verifier = &mut self.engine.verifier;

        if verifier.probe(platform, &*clock, "hud-marker") || verifier.probe(platform, &*clock, "chat-open-marker") {
            return GameState::InteractiveIdle;
        }
        if verifier.probe(platform, &*clock, "login-marker") {
            return GameState::Login;
        }
        if verifier.probe(platform, &*clock, "loading-marker") {
            return GameState::Loading;
        }
        let probes = &self.engine.settings.loading_probes;
        if !probes.is_empty() {
            if let Ok(frame) = platform.frames.capture(None) {
                if pixel::all_match(&frame, probes) {
                    return GameState::Loading;
                }
            }
        }
        GameState::Unknown
    }

    fn login(&mut self) -> bool {
        let clock = self.engine.clock.clone();
        let actuator = &self.engine.platform.actuator;
        for step in &self.engine.settings.login {
            let done = match step {
                LoginStep::Click { x, y } => actuator.click(*x, *y),
                LoginStep::Key { key } => actuator.press_key(key),
                LoginStep::Wait { ms } => {
                    clock.sleep_ms(*ms);
                    Ok(())
                }
            };
            if let Err(e) = done {
                logger::warn_p("control", &format!("login step {:?} failed: {}", step, e));
                self.soft += 1;
                return false;
            }
        }
        clock.sleep_ms(self.engine.settings.control.login_settle_ms);
        if self.engine.verifier.probe(&self.engine.platform, &*clock, "login-marker") {
            logger::warn_p("control", "still on the login screen");
            self.soft += 1;
            return false;
        }
        logger::info_p("control", "login sequence done");
        true
    }

    fn absorb(&mut self, result: BatchResult) -> bool {
        for e in &result.errors {
            self.count(e);
        }
        for cmd in result.unsent.into_iter().rev() {
            self.queue.push_front(cmd);
        }
        let r = &result.report;
        self.last_batch = Some(format!("{}/{} ok, {} reopen(s), {:.1?}", r.succeeded, r.sent, r.reopened, r.elapsed));
        result.errors.is_empty()
    }

    fn interactive(&mut self) -> bool {
        if !self.queue.is_empty() {
            self.state = GameState::InteractiveActive;
            let batch: Vec<Command> = self.queue.drain(..).collect();
            logger::info_p("control", &format!("delivering {} command(s)", batch.len()));
            let result = SessionController::new(&mut self.engine).run_batch(&batch);
            self.state = GameState::InteractiveIdle;
            return self.absorb(result);
        }
        if self.duties.due(self.engine.clock.now()) {
            let result = self.duties.run(&mut self.engine);
            return self.absorb(result);
        }
        true
    }

    /// One pass of the state machine. `Fatal` errors and an unavailable text
    /// recognizer come back as `Err`; only the former should stop polling.
    pub fn poll(&mut self) -> Result<GameState> {
        let limits = self.engine.settings.control.clone();
        if self.soft > limits.soft_limit || self.hard > limits.hard_limit {
            self.escalate();
            return Ok(self.state);
        }

        // without recognition every label reads as missing; skip the cycle
        if let Err(e) = self.engine.platform.recognizer.ensure_ready() {
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        self.fetch_remote();
        let clock = self.engine.clock.clone();
        let state = self.classify();
        if state != self.state {
            logger::info_p("control", &format!("state: {} -> {}", self.state, state));
        }
        self.state = state;
        if state != GameState::Unknown {
            self.unknown_streak = 0;
        }
        if state != GameState::Loading {
            self.loading_streak = 0;
        }

        let clean = match state {
            GameState::NotRunning => {
                match self.engine.platform.supervisor.launch() {
                    Err(e) if e.is_fatal() => {
                        self.last_error = Some(e.to_string());
                        return Err(e);
                    }
                    Err(e) => {
                        logger::warn_p("control", &format!("launch failed: {}", e));
                    }
                    Ok(()) => clock.sleep_ms(limits.launch_wait_ms),
                }
                // every launch counts until a clean cycle proves it worked
                self.soft += 1;
                false
            }
            GameState::Loading => {
                self.loading_streak += 1;
                if self.loading_streak > limits.loading_limit {
                    self.hard += 1;
                }
                clock.sleep_ms(limits.loading_wait_ms);
                false
            }
            GameState::Login => self.login(),
            GameState::InteractiveIdle | GameState::InteractiveActive => self.interactive(),
            GameState::Unknown => {
                self.unknown_streak += 1;
                if self.unknown_streak > limits.unknown_limit {
                    logger::warn_p("control", &format!("unknown state for {} polls", self.unknown_streak));
                    self.hard += 1;
                }
                false
            }
        };

        if clean && (self.soft > 0 || self.hard > 0) {
            logger::info_p("control", "clean cycle, counters reset");
            self.soft = 0;
            self.hard = 0;
        }
        Ok(self.state)
    }
}
