use std::time::Duration;

use crate::commands;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::logger;
use crate::retry::Retry;
use crate::sleep::Clock;
use crate::types::{ChatMode, Command};

/// Output differs from what was just typed and is not empty.
fn is_response(out: &str, sent: &str) -> bool {
    !out.trim().is_empty() && out != sent
}

/// Send-one-command primitive over the chat input surface.
pub struct CommandChannel<'e> {
    engine: &'e mut Engine,
    submitted: bool,
}

impl<'e> CommandChannel<'e> {
    pub fn new(engine: &'e mut Engine) -> Self {
        Self { engine, submitted: false }
    }

    /// Whether the last `send` got as far as the submit key. A failed send
    /// that was never submitted left nothing behind and may be retried.
    pub fn submitted(&self) -> bool {
        self.submitted
    }

    fn press(&self, key: &str) -> Result<()> {
        self.engine
            .platform
            .actuator
            .press_key(key)
            .map_err(|e| Error::ChannelUnavailable { reason: format!("key '{}': {}", key, e) })
    }

    /// Make sure the input surface is open, activating it once if needed.
    pub fn ensure_open(&mut self) -> Result<()> {
        let clock = self.engine.clock.clone();
        if self.engine.verifier.surface_open(&self.engine.platform, &*clock) {
            return Ok(());
        }
        let key = self.engine.settings.keys.activate.clone();
        logger::info_p("channel", "opening chat");
        self.press(&key)?;
        clock.sleep_ms(self.engine.settings.channel.activation_settle_ms);
        if self.engine.verifier.surface_open(&self.engine.platform, &*clock) {
            return Ok(());
        }
        Err(Error::ChannelUnavailable { reason: "chat did not open".into() })
    }

    /// Cycle the sub-mode until the configured one shows.
    pub fn ensure_mode(&mut self) -> Result<()> {
        let cfg = self.engine.settings.channel.clone();
        let target = ChatMode::parse(&cfg.target_mode);
        if target == ChatMode::Unknown {
            return Ok(());
        }
        let clock = self.engine.clock.clone();
        let cycle: Vec<ChatMode> = cfg.mode_cycle.iter().map(|m| ChatMode::parse(m)).collect();
        let key = self.engine.settings.keys.mode_switch.clone();

        let mut current = self.engine.verifier.current_mode(&self.engine.platform, &*clock);
        let mut attempts = 0;
        while current != target {
            if attempts >= cfg.mode_switch_attempts {
                return Err(Error::ModeUnreachable { target, last: current });
            }
            // jump straight to the target when both ends are in the known cycle
            let presses = match (
                cycle.iter().position(|m| *m == current),
                cycle.iter().position(|m| *m == target),
            ) {
                (Some(from), Some(to)) => (to + cycle.len() - from) % cycle.len(),
                _ => 1,
            };
            for _ in 0..presses.max(1) {
                self.press(&key)?;
                clock.sleep_ms(cfg.mode_switch_settle_ms);
            }
            attempts += 1;
            current = self.engine.verifier.current_mode(&self.engine.platform, &*clock);
        }
        Ok(())
    }

    fn write_clipboard_verified(&self, text: &str) -> bool {
        let cfg = &self.engine.settings.channel;
        let clock = self.engine.clock.clone();
        let actuator = &self.engine.platform.actuator;
        Retry::fixed(cfg.clipboard_attempts, Duration::from_millis(cfg.clipboard_settle_ms))
            .run(&*clock, |_| {
                actuator.write_clipboard(text).ok()?;
                clock.sleep_ms(cfg.clipboard_settle_ms);
                (actuator.read_clipboard().ok()? == text).then_some(())
            })
            .is_some()
    }

    /// Clear the input box and put `text` into it.
    fn inject(&self, text: &str) -> Result<()> {
        let cfg = &self.engine.settings.channel;
        let keys = &self.engine.settings.keys;
        let clock = self.engine.clock.clone();
        let actuator = &self.engine.platform.actuator;
        let unavailable = |e: Error| Error::ChannelUnavailable { reason: e.to_string() };

        if let Some([x, y]) = cfg.input_focus {
            actuator.click(x, y).map_err(unavailable)?;
            clock.sleep_ms(cfg.settle_ms);
        }
        self.press(&keys.select_all)?;
        self.press(&keys.clear)?;
        clock.sleep_ms(cfg.settle_ms);

        if text.chars().count() <= cfg.paste_threshold {
            return actuator.type_text(text).map_err(unavailable);
        }

        let backup = actuator.read_clipboard().unwrap_or_default();
        if !self.write_clipboard_verified(text) {
            logger::warn_p("channel", "clipboard write not confirmed, typing instead");
            return actuator.type_text(text).map_err(unavailable);
        }
        self.press(&keys.paste)?;
        clock.sleep_ms(cfg.settle_ms);
        if let Err(e) = actuator.write_clipboard(&backup) {
            logger::warn_p("channel", &format!("clipboard restore failed: {}", e));
        }
        Ok(())
    }

    fn read_response(&self, sent: &str) -> Option<String> {
        match self.engine.platform.actuator.read_clipboard() {
            Ok(out) if is_response(&out, sent) => Some(out),
            _ => None,
        }
    }

    /// Deliver one command. Returns the captured output for commands whose
    /// class expects one, `None` otherwise.
    pub fn send(&mut self, cmd: &Command) -> Result<Option<String>> {
        self.submitted = false;
        self.ensure_open()?;
        self.ensure_mode()?;

        let text = commands::normalize(&cmd.text);
        let clock = self.engine.clock.clone();
        let rule = self.engine.table.rule_named(&cmd.class.name).clone();
        let cfg = self.engine.settings.channel.clone();

        self.inject(&text)?;
        self.press(&self.engine.settings.keys.submit.clone())?;
        self.submitted = true;
        let submitted = clock.now();
        logger::info_p("channel", &format!("sent: {}", text));

        if !cmd.class.expects_response() {
            self.engine.timing.record(&rule, clock.now() - submitted, true);
            return Ok(None);
        }

        // results land in the clipboard; drop whatever is there now
        if let Err(e) = self.engine.platform.actuator.write_clipboard("") {
            logger::warn_p("channel", &format!("clipboard clear failed: {}", e));
        }

        let ceiling = self.engine.timing.wait_ceiling(&rule);
        let steps = cfg.response_steps.max(1);
        let step = ceiling / steps;
        let mut polled = None;
        for _ in 0..steps {
            clock.sleep(step);
            polled = self.read_response(&text);
            if polled.is_some() {
                break;
            }
        }
        let mut out = polled.or_else(|| {
            Retry::fixed(cfg.response_retries, Duration::from_millis(cfg.retry_backoff_ms))
                .run(&*clock, |_| self.read_response(&text))
        });
        let mut lost = false;
        if out.is_none() {
            if self.engine.verifier.surface_open(&self.engine.platform, &*clock) {
                out = self.read_response(&text);
            } else {
                lost = true;
            }
        }

        let waited = clock.now() - submitted;
        self.engine.timing.record(&rule, waited, out.is_some());
        match out {
            Some(out) => {
                logger::info_p("channel", &format!("response in {:?} ({} chars)", waited, out.len()));
                Ok(Some(out))
            }
            None if lost => Err(Error::ChannelUnavailable { reason: "chat closed while waiting for a response".into() }),
            None => Err(Error::NoResponseObserved { command: text, waited }),
        }
    }
}
