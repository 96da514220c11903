use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::logger;
use crate::pixel;
use crate::settings::KeyBindings;
use crate::types::*;
use super::{Actuator, FrameSource, ProcessSupervisor, ResultSink, TextRecognizer};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

/// Where on-screen labels are drawn by the simulated client.
pub const CONTINUE_BOX: CaptureRect = CaptureRect { l: 66, t: 395, w: 102, h: 26 };
pub const LOADING_BOX: CaptureRect = CaptureRect { l: 380, t: 120, w: 100, h: 40 };
pub const HUD_BOX: CaptureRect = CaptureRect { l: 560, t: 10, w: 60, h: 20 };
pub const MUTE_BOX: CaptureRect = CaptureRect { l: 30, t: 310, w: 31, h: 15 };
pub const MODE_BOX: CaptureRect = CaptureRect { l: 233, t: 308, w: 34, h: 19 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Loading,
    Game,
}

/// Scripted reply for commands starting with `prefix`.
#[derive(Debug, Clone)]
pub struct Reply {
    pub prefix: String,
    pub text: String,
}

/// Observable state of the simulated client. Tests poke at it directly.
#[derive(Debug)]
pub struct SimState {
    pub running: bool,
    pub launch_fails: bool,
    /// Launch reports success but no process ever shows up
    pub launch_noop: bool,
    /// Recognition service cannot be brought up
    pub recognizer_down: bool,
    pub screen: Screen,
    /// Full-frame captures spent on the loading screen after launch
    pub loading_frames: u32,
    /// Clicks on the login screen needed to enter the game
    pub login_clicks: u32,
    pub chat_open: bool,
    /// Activation key is swallowed
    pub chat_blocked: bool,
    pub mode: ChatMode,
    pub mode_stuck: bool,
    pub buffer: String,
    pub selected: bool,
    pub clipboard: String,
    pub replies: Vec<Reply>,
    /// Submitted text is copied back verbatim instead of a reply
    pub echo: bool,
    /// Clipboard reads before a reply shows up
    pub reply_delay_reads: u32,
    pending_reply: Option<(String, u32)>,
    /// Offset applied to the chat labels, to simulate a moved layout
    pub chat_offset: (i32, i32),
    /// Next N recognizer calls see nothing
    pub blind_reads: u32,
    /// Runs after each accepted submit
    pub on_submit: Option<fn(&mut SimState)>,

    pub full_scans: u32,
    pub region_scans: u32,
    pub keys: Vec<String>,
    pub clicks: Vec<(i32, i32)>,
    pub activations: u32,
    pub submitted: Vec<String>,
    pub published: Vec<(String, String)>,
    pub launches: u32,
    pub kills: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            running: false,
            launch_fails: false,
            launch_noop: false,
            recognizer_down: false,
            screen: Screen::Loading,
            loading_frames: 2,
            login_clicks: 2,
            chat_open: false,
            chat_blocked: false,
            mode: ChatMode::Global,
            mode_stuck: false,
            buffer: String::new(),
            selected: false,
            clipboard: String::new(),
            replies: Vec::new(),
            echo: false,
            reply_delay_reads: 1,
            pending_reply: None,
            chat_offset: (0, 0),
            blind_reads: 0,
            on_submit: None,
            full_scans: 0,
            region_scans: 0,
            keys: Vec::new(),
            clicks: Vec::new(),
            activations: 0,
            submitted: Vec::new(),
            published: Vec::new(),
            launches: 0,
            kills: 0,
        }
    }
}

impl SimState {
    /// Text currently drawn on screen, in window coordinates.
    fn visible(&self) -> Vec<(String, CaptureRect)> {
        if !self.running {
            return Vec::new();
        }
        match self.screen {
            Screen::Loading => vec![("LOADING".into(), LOADING_BOX)],
            Screen::Login => vec![("CONTINUE".into(), CONTINUE_BOX)],
            Screen::Game => {
                let mut out = vec![("HUD".into(), HUD_BOX)];
                if self.chat_open {
                    let (dx, dy) = self.chat_offset;
                    out.push(("MUTE".into(), MUTE_BOX.translated(dx, dy)));
                    out.push((self.mode.to_string().to_uppercase(), MODE_BOX.translated(dx, dy)));
                }
                out
            }
        }
    }

    fn cycle_mode(&mut self) {
        self.mode = match self.mode {
            ChatMode::Global => ChatMode::Admin,
            ChatMode::Admin => ChatMode::Local,
            _ => ChatMode::Global,
        };
    }

    fn submit(&mut self) {
        let text = std::mem::take(&mut self.buffer);
        self.selected = false;
        if text.is_empty() {
            return;
        }
        let lower = text.to_ascii_lowercase();
        if self.echo {
            self.pending_reply = Some((text.clone(), self.reply_delay_reads));
        } else if let Some(reply) = self.replies.iter().find(|r| lower.starts_with(&r.prefix.to_ascii_lowercase())) {
            self.pending_reply = Some((reply.text.clone(), self.reply_delay_reads));
        }
        self.submitted.push(text);
        if let Some(hook) = self.on_submit {
            hook(self);
        }
    }

    fn insert(&mut self, text: &str) {
        if self.selected {
            self.buffer.clear();
            self.selected = false;
        }
        self.buffer.push_str(text);
    }
}

/// In-memory game client implementing every platform trait. Clones share
/// state.
#[derive(Clone)]
pub struct SimulatedConsole {
    keys: KeyBindings,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedConsole {
    pub fn new(keys: KeyBindings) -> Self {
        Self { keys, state: Arc::new(Mutex::new(SimState::default())) }
    }

    /// Already running, in game, chat closed.
    pub fn in_game(keys: KeyBindings) -> Self {
        let sim = Self::new(keys);
        {
            let mut s = sim.state();
            s.running = true;
            s.screen = Screen::Game;
        }
        sim
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn reply(&self, prefix: &str, text: &str) {
        self.state().replies.push(Reply { prefix: prefix.into(), text: text.into() });
    }
}

impl Actuator for SimulatedConsole {
    fn press_key(&self, key: &str) -> Result<()> {
        let mut s = self.state();
        s.keys.push(key.to_string());
        if !s.running {
            return Ok(());
        }
        let k = &self.keys;
        if key == k.submit {
            if s.screen == Screen::Game && s.chat_open {
                s.submit();
            }
        } else if key == k.close {
            s.chat_open = false;
            s.buffer.clear();
        } else if key == k.select_all {
            s.selected = true;
        } else if key == k.clear {
            if s.selected {
                s.buffer.clear();
                s.selected = false;
            } else {
                s.buffer.pop();
            }
        } else if key == k.paste {
            let clip = s.clipboard.clone();
            if s.chat_open {
                s.insert(&clip);
            }
        } else if key == k.mode_switch {
            if s.chat_open && !s.mode_stuck {
                s.cycle_mode();
            }
        } else if s.chat_open {
            s.insert(key);
        } else if key == k.activate && s.screen == Screen::Game && !s.chat_blocked {
            s.chat_open = true;
            s.activations += 1;
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        let mut s = self.state();
        if s.running && s.chat_open {
            s.insert(text);
        }
        Ok(())
    }

    fn click(&self, x: i32, y: i32) -> Result<()> {
        let mut s = self.state();
        s.clicks.push((x, y));
        if s.running && s.screen == Screen::Login {
            s.login_clicks = s.login_clicks.saturating_sub(1);
            if s.login_clicks == 0 {
                logger::info_p("sim", "login accepted");
                s.screen = Screen::Game;
            }
        }
        Ok(())
    }

    fn write_clipboard(&self, text: &str) -> Result<()> {
        self.state().clipboard = text.to_string();
        Ok(())
    }

    fn read_clipboard(&self) -> Result<String> {
        let mut s = self.state();
        if let Some((text, reads)) = s.pending_reply.take() {
            if reads <= 1 {
                s.clipboard = text;
            } else {
                s.pending_reply = Some((text, reads - 1));
            }
        }
        Ok(s.clipboard.clone())
    }
}

impl FrameSource for SimulatedConsole {
    fn capture(&self, rect: Option<CaptureRect>) -> Result<Capture> {
        let mut s = self.state();
        if !s.running {
            return Err(Error::Platform("window not found".into()));
        }
        let area = match rect {
            Some(r) => {
                s.region_scans += 1;
                r
            }
            None => {
                s.full_scans += 1;
                if s.screen == Screen::Loading {
                    if s.loading_frames == 0 {
                        s.screen = Screen::Login;
                    } else {
                        s.loading_frames -= 1;
                    }
                }
                CaptureRect { l: 0, t: 0, w: WIDTH as i32, h: HEIGHT as i32 }
            }
        };
        // loading screen is bright, everything else dark
        let rgb = if s.screen == Screen::Loading { [255, 255, 255] } else { [20, 24, 28] };
        let mut cap = pixel::solid(area.w.max(1) as u32, area.h.max(1) as u32, rgb);
        cap.left = area.l;
        cap.top = area.t;
        Ok(cap)
    }
}

impl TextRecognizer for SimulatedConsole {
    fn ensure_ready(&self) -> Result<()> {
        if self.state().recognizer_down {
            return Err(Error::Platform("recognition service not reachable".into()));
        }
        Ok(())
    }

    fn recognize(&self, capture: &Capture, _hint: Option<&str>) -> Result<Vec<TextHit>> {
        let mut s = self.state();
        if s.blind_reads > 0 {
            s.blind_reads -= 1;
            return Ok(Vec::new());
        }
        let area = CaptureRect {
            l: capture.left,
            t: capture.top,
            w: capture.width as i32,
            h: capture.height as i32,
        };
        Ok(s.visible()
            .into_iter()
            .filter(|(_, rect)| rect.intersects(&area))
            .map(|(text, rect)| TextHit::new(text, 0.95).with_rect(rect.translated(-area.l, -area.t)))
            .collect())
    }
}

impl ProcessSupervisor for SimulatedConsole {
    fn is_running(&self) -> bool {
        self.state().running
    }

    fn launch(&self) -> Result<()> {
        let mut s = self.state();
        s.launches += 1;
        if s.launch_fails {
            return Err(Error::Fatal("launcher not available".into()));
        }
        if s.launch_noop {
            return Ok(());
        }
        logger::info_p("sim", "launched");
        s.running = true;
        s.screen = Screen::Loading;
        s.loading_frames = 2;
        s.login_clicks = 2;
        s.chat_open = false;
        s.buffer.clear();
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        let mut s = self.state();
        s.kills += 1;
        s.running = false;
        s.chat_open = false;
        s.pending_reply = None;
        logger::info_p("sim", "killed");
        Ok(())
    }
}

impl ResultSink for SimulatedConsole {
    fn publish(&self, category: &str, payload: &str) {
        self.state().published.push((category.to_string(), payload.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimulatedConsole {
        SimulatedConsole::in_game(KeyBindings::default())
    }

    #[test]
    fn test_activation_and_mode_cycle() {
        let sim = sim();
        sim.press_key("t").unwrap();
        assert!(sim.state().chat_open);
        sim.press_key("tab").unwrap();
        assert_eq!(sim.state().mode, ChatMode::Admin);
        sim.press_key("tab").unwrap();
        sim.press_key("tab").unwrap();
        assert_eq!(sim.state().mode, ChatMode::Global);
        sim.press_key("escape").unwrap();
        assert!(!sim.state().chat_open);
    }

    #[test]
    fn test_submit_schedules_reply() {
        let sim = sim();
        sim.reply("#ListPlayers", "1 player online");
        sim.press_key("t").unwrap();
        sim.type_text("#ListPlayers true").unwrap();
        sim.press_key("enter").unwrap();
        assert_eq!(sim.state().submitted, vec!["#ListPlayers true".to_string()]);
        assert_eq!(sim.read_clipboard().unwrap(), "1 player online");
    }

    #[test]
    fn test_region_recognition_is_crop_relative() {
        let sim = sim();
        sim.press_key("t").unwrap();
        let cap = sim.capture(Some(MUTE_BOX.padded(4))).unwrap();
        let hits = sim.recognize(&cap, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "MUTE");
        assert_eq!(hits[0].rect, Some(CaptureRect { l: 4, t: 4, w: 31, h: 15 }));
        assert_eq!(sim.state().region_scans, 1);
        assert_eq!(sim.state().full_scans, 0);
    }

    #[test]
    fn test_loading_turns_into_login() {
        let sim = SimulatedConsole::new(KeyBindings::default());
        sim.launch().unwrap();
        for _ in 0..3 {
            sim.capture(None).unwrap();
        }
        assert_eq!(sim.state().screen, Screen::Login);
        sim.click(426, 348).unwrap();
        sim.click(97, 405).unwrap();
        assert_eq!(sim.state().screen, Screen::Game);
    }
}
