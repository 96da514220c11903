use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::engine::Engine;
use crate::logger;
use crate::sleep::Clock;
use crate::session::{BatchResult, SessionController};
use crate::settings::{PagedDuty, PeriodicSettings};
use crate::types::Command;

fn page_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Page (\d+)/(\d+)").unwrap())
}

/// `(current, total)` from a "Page N/M" footer.
pub fn page_of(output: &str) -> Option<(u32, u32)> {
    let c = page_re().captures(output)?;
    Some((c[1].parse().ok()?, c[2].parse().ok()?))
}

/// Whether a paged listing is finished after `output` for page `page`.
fn last_page(duty: &PagedDuty, page: u32, output: &str) -> bool {
    if output.trim().chars().count() < duty.min_output_len || page >= duty.max_pages {
        return true;
    }
    matches!(page_of(output), Some((cur, total)) if cur >= total)
}

/// Fixed background commands, run at most once per interval.
pub struct PeriodicDuties {
    cfg: PeriodicSettings,
    last_run: Option<Instant>,
}

impl PeriodicDuties {
    pub fn new(cfg: PeriodicSettings) -> Self {
        Self { cfg, last_run: None }
    }

    pub fn due(&self, now: Instant) -> bool {
        if !self.cfg.enabled || (self.cfg.commands.is_empty() && self.cfg.paged.is_none()) {
            return false;
        }
        self.last_run
            .map_or(true, |t| now.duration_since(t) >= Duration::from_secs(self.cfg.interval_secs))
    }

    fn prepare(engine: &Engine, text: &str) -> Option<Command> {
        match engine.table.prepare(text) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                logger::warn_p("duty", &format!("skipping '{}': {}", text, e));
                None
            }
        }
    }

    /// Run every duty inside one session. Marks the schedule even when the
    /// session fails, so a broken surface is not hammered every poll.
    pub fn run(&mut self, engine: &mut Engine) -> BatchResult {
        let started = engine.clock.now();
        self.last_run = Some(started);
        let fixed: Vec<Command> = self.cfg.commands.iter().filter_map(|t| Self::prepare(engine, t)).collect();
        let paged = self.cfg.paged.clone();
        logger::info_p("duty", &format!("running {} periodic command(s)", fixed.len()));

        let mut session = SessionController::new(engine);
        if let Err(e) = session.open() {
            logger::warn_p("duty", &format!("cannot open: {}", e));
            session.close();
            let mut result = session.finish(started);
            result.errors.push(e);
            return result;
        }

        let mut errors = Vec::new();
        for (i, cmd) in fixed.iter().enumerate() {
            if let Err(e) = session.send(cmd) {
                errors.push(e);
            }
            if i + 1 < fixed.len() || paged.is_some() {
                session.pause(0.0);
            }
        }

        if let Some(duty) = paged {
            let mut page = 1;
            loop {
                let text = duty.template.replace("{page}", &page.to_string());
                let Some(cmd) = Self::prepare(session.engine(), &text) else { break };
                match session.send(&cmd) {
                    Ok(Some(out)) if !last_page(&duty, page, &out) => {
                        page += 1;
                        session.pause(0.0);
                    }
                    Ok(_) => break,
                    Err(e) => {
                        errors.push(e);
                        break;
                    }
                }
            }
            logger::info_p("duty", &format!("walked {} page(s)", page));
        }

        session.close();
        let mut result = session.finish(started);
        result.errors.extend(errors);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::platform::stub::SimulatedConsole;
    use crate::platform::Platform;
    use crate::settings::{KeyBindings, Settings};
    use crate::sleep::{Clock, VirtualClock};

    #[test]
    fn test_page_footer() {
        assert_eq!(page_of("flag 1\nflag 2\nPage 2/5"), Some((2, 5)));
        assert_eq!(page_of("nothing"), None);
        let duty = PagedDuty::default();
        assert!(last_page(&duty, 1, "short"));
        assert!(last_page(&duty, 3, "flags of the map\nPage 3/3"));
        assert!(!last_page(&duty, 1, "flags of the map\nPage 1/3"));
        assert!(last_page(&duty, duty.max_pages, "flags of the map\nPage 1/300"));
    }

    #[test]
    fn test_due_once_per_interval() {
        let clock = VirtualClock::new();
        let sim = SimulatedConsole::in_game(KeyBindings::default());
        let mut engine = Engine::new(Platform::simulated(&sim), Settings::default(), Arc::new(VirtualClock::new()));
        let mut duties = PeriodicDuties::new(PeriodicSettings { paged: None, ..PeriodicSettings::default() });
        assert!(duties.due(clock.now()));
        duties.run(&mut engine);
        assert!(!duties.due(engine.clock.now()));
        assert!(duties.due(engine.clock.now() + Duration::from_secs(60)));

        let off = PeriodicDuties::new(PeriodicSettings { enabled: false, ..PeriodicSettings::default() });
        assert!(!off.due(clock.now()));
    }

    #[test]
    fn test_paged_duty_walks_until_last_page() {
        let sim = SimulatedConsole::in_game(KeyBindings::default());
        sim.reply("#listflags 1", "Flag A owner 1\nPage 1/3");
        sim.reply("#listflags 2", "Flag B owner 2\nPage 2/3");
        sim.reply("#listflags 3", "Flag C owner 3\nPage 3/3");
        sim.reply("#listflags 4", "Flag D owner 4\nPage 4/3");
        let mut engine = Engine::new(Platform::simulated(&sim), Settings::default(), Arc::new(VirtualClock::new()));
        let cfg = PeriodicSettings { commands: Vec::new(), ..PeriodicSettings::default() };
        let result = PeriodicDuties::new(cfg).run(&mut engine);
        assert!(result.errors.is_empty());
        let s = sim.state();
        assert_eq!(s.submitted, vec!["#listflags 1 true", "#listflags 2 true", "#listflags 3 true"]);
        assert_eq!(s.published.len(), 3);
        assert!(s.published.iter().all(|(cat, _)| cat == "flags"));
        assert_eq!(s.activations, 1);
    }
}
