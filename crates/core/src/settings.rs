use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logger;
use crate::types::CommandKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub process: ProcessSettings,
    /// Regex matched against window titles/owners (macOS)
    pub window_pattern: String,
    pub ocr: OcrSettings,
    /// label name -> accepted text variants
    pub labels: BTreeMap<String, Vec<String>>,
    pub keys: KeyBindings,
    pub perception: PerceptionSettings,
    pub channel: ChannelSettings,
    pub session: SessionSettings,
    pub control: ControlSettings,
    pub periodic: PeriodicSettings,
    pub login: Vec<LoginStep>,
    pub classes: Vec<ClassRule>,
    pub aliases: BTreeMap<String, String>,
    pub sequences: BTreeMap<String, Vec<String>>,
    pub loading_probes: Vec<PixelProbe>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub id: u32,
    /// Backend base URL; empty disables the backend source and sink.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub name: String,
    pub launch: Vec<String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            name: "SCUM".into(),
            launch: vec!["open".into(), "steam://rungameid/513710".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub health: String,
    pub health_timeout_ms: u64,
    /// Command line that starts the service; empty means it is managed elsewhere
    pub launch: Vec<String>,
    pub start_attempts: u32,
    pub start_delay_ms: u64,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:1224/api/ocr".into(),
            timeout_ms: 10_000,
            health: "http://127.0.0.1:1224/health".into(),
            health_timeout_ms: 3_000,
            launch: Vec::new(),
            start_attempts: 10,
            start_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub activate: String,
    pub close: String,
    pub submit: String,
    pub mode_switch: String,
    pub select_all: String,
    pub clear: String,
    pub paste: String,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            activate: "t".into(),
            close: "escape".into(),
            submit: "enter".into(),
            mode_switch: "tab".into(),
            select_all: "ctrl+a".into(),
            clear: "delete".into(),
            paste: "ctrl+v".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionSettings {
    pub verify_attempts: u32,
    pub verify_delay_ms: u64,
    /// Extra pixels around a cached region when re-reading it
    pub region_margin: i32,
}

impl Default for PerceptionSettings {
    fn default() -> Self {
        Self { verify_attempts: 3, verify_delay_ms: 100, region_margin: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub paste_threshold: usize,
    pub max_command_len: usize,
    pub key_delay_ms: u64,
    pub settle_ms: u64,
    pub activation_settle_ms: u64,
    pub response_steps: u32,
    pub response_retries: u32,
    pub retry_backoff_ms: u64,
    pub clipboard_attempts: u32,
    pub clipboard_settle_ms: u64,
    pub mode_switch_attempts: u32,
    pub mode_switch_settle_ms: u64,
    pub target_mode: String,
    /// Order in which the mode-switch key cycles through sub-modes
    pub mode_cycle: Vec<String>,
    pub input_focus: Option<[i32; 2]>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            paste_threshold: 20,
            max_command_len: 200,
            key_delay_ms: 5,
            settle_ms: 80,
            activation_settle_ms: 500,
            response_steps: 4,
            response_retries: 3,
            retry_backoff_ms: 200,
            clipboard_attempts: 3,
            clipboard_settle_ms: 30,
            mode_switch_attempts: 5,
            mode_switch_settle_ms: 300,
            target_mode: "global".into(),
            mode_cycle: vec!["global".into(), "admin".into(), "local".into()],
            input_focus: Some([82, 319]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub base_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub failure_penalty_ms: u64,
    pub failure_window: usize,
    pub streak_threshold: u32,
    pub speedup: f64,
    pub consecutive_failure_limit: u32,
    pub timeout_ms: u64,
    pub open_settle_ms: u64,
    pub close_settle_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 350,
            min_interval_ms: 100,
            max_interval_ms: 1000,
            failure_penalty_ms: 100,
            failure_window: 5,
            streak_threshold: 5,
            speedup: 0.8,
            consecutive_failure_limit: 3,
            timeout_ms: 30_000,
            open_settle_ms: 300,
            close_settle_ms: 200,
        }
    }
}

impl SessionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub unknown_limit: u32,
    pub loading_limit: u32,
    pub poll_interval_ms: u64,
    pub busy_poll_interval_ms: u64,
    pub busy_threshold: usize,
    pub launch_wait_ms: u64,
    pub loading_wait_ms: u64,
    pub login_settle_ms: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            soft_limit: 15,
            hard_limit: 100,
            unknown_limit: 3,
            loading_limit: 60,
            poll_interval_ms: 2500,
            busy_poll_interval_ms: 1500,
            busy_threshold: 10,
            launch_wait_ms: 30_000,
            loading_wait_ms: 1000,
            login_settle_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub commands: Vec<String>,
    pub paged: Option<PagedDuty>,
}

impl Default for PeriodicSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            commands: vec![
                "#ListPlayers true".into(),
                "#ListSpawnedVehicles true".into(),
                "#dumpallsquadsinfolist".into(),
            ],
            paged: Some(PagedDuty::default()),
        }
    }
}

/// A listing command that has to be walked page by page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagedDuty {
    /// `{page}` is replaced by the 1-based page number
    pub template: String,
    pub max_pages: u32,
    pub min_output_len: usize,
}

impl Default for PagedDuty {
    fn default() -> Self {
        Self {
            template: "#listflags {page} true".into(),
            max_pages: 50,
            min_output_len: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LoginStep {
    Click { x: i32, y: i32 },
    Key { key: String },
    Wait { ms: u64 },
}

/// One row of the command class table, matched by prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRule {
    pub prefix: String,
    pub name: String,
    pub kind: CommandKind,
    pub category: String,
    pub default_wait_ms: u64,
    pub factor: f64,
    pub max_wait_ms: u64,
}

impl ClassRule {
    fn query(prefix: &str, category: &str, default_wait_ms: u64, factor: f64, max_wait_ms: u64) -> Self {
        Self {
            prefix: prefix.into(),
            name: prefix.trim_start_matches('#').to_ascii_lowercase(),
            kind: CommandKind::Query,
            category: category.into(),
            default_wait_ms,
            factor,
            max_wait_ms,
        }
    }

    /// Class used for commands no rule matches.
    pub fn fallback() -> Self {
        Self {
            prefix: String::new(),
            name: "action".into(),
            kind: CommandKind::Action,
            category: "chat".into(),
            default_wait_ms: 800,
            factor: 1.2,
            max_wait_ms: 2000,
        }
    }
}

/// A pixel that must match `color` (hex rgb) for the probe to hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelProbe {
    pub x: i32,
    pub y: i32,
    pub color: String,
    #[serde(default = "default_color_threshold")]
    pub threshold: f64,
}

fn default_color_threshold() -> f64 {
    30.0
}

/// `chat-open-marker` alone proves the client is in game. `hud-marker` is an
/// optional extra for clients that draw something recognizable while chat is
/// closed; removing it only costs a classification pass through `Unknown`.
fn default_labels() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 7] = [
        ("chat-open-marker", &["MUTE"]),
        ("hud-marker", &["HUD"]),
        ("login-marker", &["CONTINUE"]),
        ("loading-marker", &["LOADING"]),
        ("mode-global", &["GLOBAL"]),
        ("mode-local", &["LOCAL"]),
        ("mode-admin", &["ADMIN"]),
    ];
    table
        .iter()
        .map(|(name, variants)| (name.to_string(), variants.iter().map(|v| v.to_string()).collect()))
        .collect()
}

fn default_classes() -> Vec<ClassRule> {
    vec![
        ClassRule::query("#ListPlayers", "user", 1200, 1.2, 3000),
        ClassRule::query("#ListSpawnedVehicles", "spawned", 1000, 1.1, 2000),
        ClassRule::query("#dumpallsquadsinfolist", "all_group", 2500, 1.3, 4000),
        ClassRule::query("#listflags", "flags", 1500, 1.2, 3000),
        ClassRule::query("#ListZones", "chat", 1200, 1.2, 3000),
        ClassRule::query("#Location", "chat", 1000, 1.2, 2000),
    ]
}

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("players", "#ListPlayers true"),
        ("vehicles", "#ListSpawnedVehicles true"),
        ("squads", "#dumpallsquadsinfolist"),
        ("flags", "#listflags 1 true"),
        ("time12", "#SetTime 12 00"),
        ("time0", "#SetTime 00 00"),
        ("sunrise", "#SetTime 06 00"),
        ("morning", "#SetTime 08 00"),
        ("noon", "#SetTime 12 00"),
        ("evening", "#SetTime 18 00"),
        ("sunset", "#SetTime 20 00"),
        ("night", "#SetTime 22 00"),
        ("midnight", "#SetTime 00 00"),
        ("save", "#Save"),
        ("restart", "#RestartServer"),
        ("shutdown", "#Shutdown"),
        ("godmode", "#SetGodMode true"),
        ("nogodmode", "#SetGodMode false"),
        ("weather0", "#SetWeather 0"),
        ("weather1", "#SetWeather 1"),
        ("sunny", "#SetWeather 0"),
        ("storm", "#SetWeather 1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_sequences() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 5] = [
        ("status_check", &["#ListPlayers true", "#ListSpawnedVehicles true", "#dumpallsquadsinfolist"]),
        ("server_reset", &["#SetTime 12 00", "#SetWeather 0", "#Save"]),
        ("morning_routine", &["#SetTime 08 00", "#SetWeather 0", "#ListPlayers true"]),
        ("evening_routine", &["#SetTime 18 00", "#SetWeather 0", "#Save"]),
        (
            "admin_check",
            &["#ListPlayers true", "#ListSpawnedVehicles true", "#listflags 1 true", "#dumpallsquadsinfolist"],
        ),
    ];
    table
        .iter()
        .map(|(name, cmds)| (name.to_string(), cmds.iter().map(|c| c.to_string()).collect()))
        .collect()
}

fn default_login() -> Vec<LoginStep> {
    vec![
        LoginStep::Click { x: 426, y: 348 },
        LoginStep::Wait { ms: 1000 },
        LoginStep::Click { x: 97, y: 405 },
        LoginStep::Wait { ms: 1000 },
        LoginStep::Key { key: "enter".into() },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            process: ProcessSettings::default(),
            window_pattern: "SCUM".into(),
            ocr: OcrSettings::default(),
            labels: default_labels(),
            keys: KeyBindings::default(),
            perception: PerceptionSettings::default(),
            channel: ChannelSettings::default(),
            session: SessionSettings::default(),
            control: ControlSettings::default(),
            periodic: PeriodicSettings::default(),
            login: default_login(),
            classes: default_classes(),
            aliases: default_aliases(),
            sequences: default_sequences(),
            loading_probes: vec![
                PixelProbe { x: 427, y: 142, color: "ffffff".into(), threshold: 30.0 },
                PixelProbe { x: 438, y: 153, color: "ffffff".into(), threshold: 30.0 },
            ],
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing file gives the defaults; a file
    /// that does not parse is reported and also gives the defaults.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                logger::warn(&format!("ignoring {}: {}", path.display(), e));
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let s: Settings = serde_json::from_str(r#"{"control": {"soft_limit": 3}, "server": {"id": 7}}"#).unwrap();
        assert_eq!(s.control.soft_limit, 3);
        assert_eq!(s.control.hard_limit, 100);
        assert_eq!(s.server.id, 7);
        assert_eq!(s.channel.paste_threshold, 20);
        assert_eq!(s.labels["chat-open-marker"], vec!["MUTE".to_string()]);
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("consul-settings-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"control": {"soft_limit": "three"}"#).unwrap();
        let s = Settings::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(s.control.soft_limit, ControlSettings::default().soft_limit);
        assert_eq!(s.aliases["save"], "#Save");

        let missing = Settings::load(&std::env::temp_dir().join("consul-no-such-settings.json"));
        assert_eq!(missing.sequences["admin_check"].len(), 4);
    }

    #[test]
    fn test_login_steps_are_tagged() {
        let json = serde_json::to_string(&LoginStep::Click { x: 1, y: 2 }).unwrap();
        assert_eq!(json, r#"{"action":"click","x":1,"y":2}"#);
        let step: LoginStep = serde_json::from_str(r#"{"action":"wait","ms":500}"#).unwrap();
        assert_eq!(step, LoginStep::Wait { ms: 500 });
    }

    #[test]
    fn test_missing_file_falls_back() {
        let s = Settings::load(Path::new("/nonexistent/consul/settings.json"));
        assert_eq!(s.session.consecutive_failure_limit, 3);
        assert!(s.periodic.enabled);
    }
}
