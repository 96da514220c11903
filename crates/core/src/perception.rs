use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::logger;
use crate::platform::Platform;
use crate::retry::Retry;
use crate::settings::PerceptionSettings;
use crate::sleep::Clock;
use crate::types::*;

/// Case-insensitive match that tolerates characters dropped at either end:
/// exact, variant inside the hit, or the hit inside the variant as long as
/// it keeps at least half of it.
pub fn text_matches(hit: &str, variant: &str) -> bool {
    let hit = hit.trim().to_lowercase();
    let variant = variant.trim().to_lowercase();
    if hit.is_empty() || variant.is_empty() {
        return false;
    }
    if hit.contains(&variant) {
        return true;
    }
    variant.contains(&hit) && hit.chars().count() * 2 >= variant.chars().count()
}

/// Label name -> variants, fixed at startup.
pub struct Labels {
    table: HashMap<String, Label>,
}

impl Labels {
    pub fn new(table: &BTreeMap<String, Vec<String>>) -> Self {
        let table = table
            .iter()
            .map(|(name, variants)| {
                (name.clone(), Label { name: name.clone(), variants: variants.clone() })
            })
            .collect();
        Self { table }
    }

    pub fn get(&self, name: &str) -> Option<&Label> {
        self.table.get(name)
    }
}

impl Label {
    pub fn matches(&self, text: &str) -> bool {
        self.variants.iter().any(|v| text_matches(text, v))
    }
}

/// Last known on-screen position of each label.
#[derive(Default)]
pub struct PerceptionCache {
    regions: HashMap<String, CachedRegion>,
}

impl PerceptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&CachedRegion> {
        self.regions.get(label)
    }

    pub fn insert(&mut self, label: &str, rect: CaptureRect, found_at: Instant) {
        self.regions.insert(
            label.to_string(),
            CachedRegion {
                label: label.to_string(),
                x1: rect.l,
                y1: rect.t,
                x2: rect.right(),
                y2: rect.bottom(),
                found_at,
            },
        );
    }

    pub fn remove(&mut self, label: &str) -> Option<CachedRegion> {
        self.regions.remove(label)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}

/// Result of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Cached region still shows the label.
    CacheHit,
    /// Found by a full-frame scan with no cache entry.
    Located,
    /// Cached region mismatched, full scan found it elsewhere.
    Relocated,
    /// Not cached and not on screen.
    Missing,
    /// Cached region mismatched and the full scan saw nothing at all.
    Ambiguous,
    /// Cached region mismatched and the full scan saw text, but not the label.
    Stale,
}

impl Outcome {
    pub fn found(&self) -> bool {
        matches!(self, Outcome::CacheHit | Outcome::Located | Outcome::Relocated)
    }
}

/// Where a full-frame scan put a label.
enum Scan {
    /// Tightest box, or `None` when the recognizer gave no geometry
    Found(Option<CaptureRect>),
    NotFound { saw_text: bool },
}

pub struct LabelVerifier {
    labels: Labels,
    cache: PerceptionCache,
    retry: Retry,
    margin: i32,
}

impl LabelVerifier {
    pub fn new(labels: Labels, settings: &PerceptionSettings) -> Self {
        Self {
            labels,
            cache: PerceptionCache::new(),
            retry: Retry::fixed(settings.verify_attempts, Duration::from_millis(settings.verify_delay_ms)),
            margin: settings.region_margin,
        }
    }

    pub fn cache(&self) -> &PerceptionCache {
        &self.cache
    }

    pub fn reset(&mut self) {
        self.cache.clear();
    }

    fn recognize(&self, platform: &Platform, rect: Option<CaptureRect>, hint: Option<&str>) -> (Option<Capture>, Vec<TextHit>) {
        let capture = match platform.frames.capture(rect) {
            Ok(c) => c,
            Err(e) => {
                logger::warn_p("perception", &format!("capture failed: {}", e));
                return (None, Vec::new());
            }
        };
        match platform.recognizer.recognize(&capture, hint) {
            Ok(hits) => (Some(capture), hits),
            Err(e) => {
                logger::warn_p("perception", &format!("recognition failed: {}", e));
                (Some(capture), Vec::new())
            }
        }
    }

    fn full_scan(&self, platform: &Platform, label: &Label) -> Scan {
        let (capture, hits) = self.recognize(platform, None, None);
        let saw_text = hits.iter().any(|h| !h.text.trim().is_empty());
        let matching: Vec<&TextHit> = hits.iter().filter(|h| label.matches(&h.text)).collect();
        if matching.is_empty() {
            return Scan::NotFound { saw_text };
        }
        let (dx, dy) = capture.map(|c| (c.left, c.top)).unwrap_or((0, 0));
        let tightest = matching
            .iter()
            .filter_map(|h| h.bounds())
            .min_by_key(|r| r.area())
            .map(|r| r.translated(dx, dy));
        Scan::Found(tightest)
    }

    /// One verification attempt for `label`.
    pub fn check(&mut self, platform: &Platform, clock: &dyn Clock, label: &Label) -> Outcome {
        let cached = self.cache.get(&label.name).map(|c| c.rect());

        if let Some(rect) = cached {
            let hint = label.variants.first().map(|s| s.as_str());
            let (_, hits) = self.recognize(platform, Some(rect.padded(self.margin)), hint);
            if hits.iter().any(|h| label.matches(&h.text)) {
                return Outcome::CacheHit;
            }
        }

        match self.full_scan(platform, label) {
            Scan::Found(rect) => {
                if let Some(rect) = rect {
                    self.cache.insert(&label.name, rect, clock.now());
                }
                if cached.is_some() {
                    logger::info_p("perception", &format!("'{}' relocated to {:?}", label.name, rect));
                    Outcome::Relocated
                } else {
                    Outcome::Located
                }
            }
            Scan::NotFound { .. } if cached.is_none() => Outcome::Missing,
            Scan::NotFound { saw_text: false } => Outcome::Ambiguous,
            Scan::NotFound { saw_text: true } => {
                self.cache.remove(&label.name);
                logger::info_p("perception", &format!("'{}' gone, cache purged", label.name));
                Outcome::Stale
            }
        }
    }

    /// Confirm `label` is on screen, retrying a bounded number of times.
    ///
    /// `Ok(false)` means the label was simply not there. A cached label that
    /// could not be confirmed reports `RecognitionAmbiguous` (cache kept) or
    /// `StalePosition` (cache purged).
    pub fn verify(&mut self, platform: &Platform, clock: &dyn Clock, name: &str) -> Result<bool> {
        let Some(label) = self.labels.get(name).cloned() else {
            logger::warn_p("perception", &format!("no label named '{}'", name));
            return Ok(false);
        };
        let retry = self.retry;
        let mut worst = Outcome::Missing;
        let found = retry.run(clock, |_| {
            let outcome = self.check(platform, clock, &label);
            if outcome.found() {
                return Some(());
            }
            if outcome == Outcome::Stale || (outcome == Outcome::Ambiguous && worst == Outcome::Missing) {
                worst = outcome;
            }
            None
        });
        match (found, worst) {
            (Some(()), _) => Ok(true),
            (None, Outcome::Stale) => Err(Error::StalePosition { label: name.to_string() }),
            (None, Outcome::Ambiguous) => Err(Error::RecognitionAmbiguous { label: name.to_string() }),
            (None, _) => Ok(false),
        }
    }

    /// Single-attempt presence probe, for state classification.
    pub fn probe(&mut self, platform: &Platform, clock: &dyn Clock, name: &str) -> bool {
        match self.labels.get(name).cloned() {
            Some(label) => self.check(platform, clock, &label).found(),
            None => false,
        }
    }

    /// Whether the chat input surface is open.
    pub fn surface_open(&mut self, platform: &Platform, clock: &dyn Clock) -> bool {
        match self.verify(platform, clock, "chat-open-marker") {
            Ok(open) => open,
            Err(e) => {
                logger::info_p("perception", &e.to_string());
                false
            }
        }
    }

    /// Which chat sub-mode is shown, independent of whether it was expected.
    pub fn current_mode(&mut self, platform: &Platform, clock: &dyn Clock) -> ChatMode {
        const MODES: [ChatMode; 3] = [ChatMode::Global, ChatMode::Admin, ChatMode::Local];
        let retry = self.retry;
        retry
            .run(clock, |_| {
                MODES.into_iter().find(|m| m.label().is_some_and(|l| self.probe(platform, clock, l)))
            })
            .unwrap_or(ChatMode::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::{self, SimulatedConsole};
    use crate::settings::{KeyBindings, Settings};
    use crate::sleep::VirtualClock;

    fn setup() -> (SimulatedConsole, Platform, LabelVerifier, VirtualClock) {
        let settings = Settings::default();
        let sim = SimulatedConsole::in_game(KeyBindings::default());
        sim.state().chat_open = true;
        let platform = Platform::simulated(&sim);
        let verifier = LabelVerifier::new(Labels::new(&settings.labels), &settings.perception);
        (sim, platform, verifier, VirtualClock::new())
    }

    #[test]
    fn test_text_matching() {
        assert!(text_matches("mute", "MUTE"));
        assert!(text_matches("[MUTE]", "MUTE"));
        assert!(text_matches("GLOBA", "GLOBAL"));
        assert!(!text_matches("L", "GLOBAL"));
        assert!(!text_matches("", "GLOBAL"));
        assert!(!text_matches("LOCAL", "GLOBAL"));
    }

    #[test]
    fn test_first_verify_scans_once_and_caches() {
        let (sim, platform, mut v, clock) = setup();
        assert!(v.verify(&platform, &clock, "chat-open-marker").unwrap());
        assert_eq!(sim.state().full_scans, 1);
        let cached = v.cache().get("chat-open-marker").unwrap();
        assert_eq!(cached.rect(), stub::MUTE_BOX);

        assert!(v.verify(&platform, &clock, "chat-open-marker").unwrap());
        let s = sim.state();
        assert_eq!(s.full_scans, 1);
        assert_eq!(s.region_scans, 1);
    }

    #[test]
    fn test_relocated_label_updates_cache() {
        let (sim, platform, mut v, clock) = setup();
        assert!(v.verify(&platform, &clock, "chat-open-marker").unwrap());
        sim.state().chat_offset = (0, -120);
        let label = v.labels.get("chat-open-marker").cloned().unwrap();
        assert_eq!(v.check(&platform, &clock, &label), Outcome::Relocated);
        assert_eq!(v.cache().get("chat-open-marker").unwrap().rect(), stub::MUTE_BOX.translated(0, -120));
    }

    #[test]
    fn test_blind_rescan_keeps_cache() {
        let (sim, platform, mut v, clock) = setup();
        assert!(v.verify(&platform, &clock, "chat-open-marker").unwrap());
        // region read and the following full scan both see nothing, three times
        sim.state().blind_reads = 6;
        let err = v.verify(&platform, &clock, "chat-open-marker").unwrap_err();
        assert!(matches!(err, Error::RecognitionAmbiguous { .. }));
        assert!(v.cache().get("chat-open-marker").is_some());
        assert_eq!(clock.elapsed(), Duration::from_millis(200));
    }

    #[test]
    fn test_confirmed_miss_purges_once() {
        let (sim, platform, mut v, clock) = setup();
        assert!(v.verify(&platform, &clock, "chat-open-marker").unwrap());
        sim.state().chat_open = false;
        let err = v.verify(&platform, &clock, "chat-open-marker").unwrap_err();
        assert!(matches!(err, Error::StalePosition { .. }));
        assert!(v.cache().get("chat-open-marker").is_none());
        // nothing left to purge
        assert!(!v.verify(&platform, &clock, "chat-open-marker").unwrap());
        assert!(v.cache().is_empty());
    }

    #[test]
    fn test_mode_query_is_independent_of_surface() {
        let (sim, platform, mut v, clock) = setup();
        assert_eq!(v.current_mode(&platform, &clock), ChatMode::Global);
        sim.state().mode = ChatMode::Admin;
        assert_eq!(v.current_mode(&platform, &clock), ChatMode::Admin);
        sim.state().chat_open = false;
        assert_eq!(v.current_mode(&platform, &clock), ChatMode::Unknown);
        assert!(!v.surface_open(&platform, &clock));
    }
}
