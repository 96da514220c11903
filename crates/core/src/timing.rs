use std::collections::HashMap;
use std::time::Duration;

use crate::settings::ClassRule;

/// Observed round trips of one command class.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TimingSample {
    pub last_latency: Option<Duration>,
    pub successes: u32,
    pub failures: u32,
}

/// Per-class adaptive wait ceilings.
#[derive(Default)]
pub struct TimingModel {
    samples: HashMap<String, TimingSample>,
}

impl TimingModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `min(last * factor, max)` once a success has been seen, else the
    /// class default (still capped).
    pub fn wait_ceiling(&self, rule: &ClassRule) -> Duration {
        let max = Duration::from_millis(rule.max_wait_ms);
        let ceiling = match self.samples.get(&rule.name).and_then(|s| s.last_latency) {
            Some(last) => Duration::from_millis((last.as_millis() as f64 * rule.factor.max(1.0)).round() as u64),
            None => Duration::from_millis(rule.default_wait_ms),
        };
        ceiling.min(max)
    }

    /// Only successful round trips move the latency estimate.
    pub fn record(&mut self, rule: &ClassRule, latency: Duration, success: bool) {
        let sample = self.samples.entry(rule.name.clone()).or_default();
        if success {
            sample.last_latency = Some(latency);
            sample.successes += 1;
        } else {
            sample.failures += 1;
        }
    }

    pub fn sample(&self, class: &str) -> Option<&TimingSample> {
        self.samples.get(class)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn list_players() -> ClassRule {
        Settings::default().classes.into_iter().find(|c| c.name == "listplayers").unwrap()
    }

    #[test]
    fn test_default_until_first_success() {
        let rule = list_players();
        let mut model = TimingModel::new();
        assert_eq!(model.wait_ceiling(&rule), Duration::from_millis(1200));
        model.record(&rule, Duration::from_millis(50), false);
        assert_eq!(model.wait_ceiling(&rule), Duration::from_millis(1200));
        assert_eq!(model.sample("listplayers").unwrap().failures, 1);
    }

    #[test]
    fn test_fast_success_shrinks_ceiling() {
        let rule = list_players();
        let mut model = TimingModel::new();
        model.record(&rule, Duration::from_millis(400), true);
        assert_eq!(model.wait_ceiling(&rule), Duration::from_millis(480));
        assert!(model.wait_ceiling(&rule) < Duration::from_millis(rule.default_wait_ms));
    }

    #[test]
    fn test_ceiling_never_exceeds_max() {
        let rule = list_players();
        let mut model = TimingModel::new();
        for ms in [10, 2900, 5000, 60_000] {
            model.record(&rule, Duration::from_millis(ms), true);
            assert!(model.wait_ceiling(&rule) <= Duration::from_millis(rule.max_wait_ms));
        }
        model.reset();
        assert!(model.sample("listplayers").is_none());
    }
}
