use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Window identifier (CGWindowID on macOS)
pub type WindowId = u64;

/// Screen-coordinate bounding box of a window
#[derive(Debug, Clone, Copy, Default)]
pub struct Region {
    pub l: i32,
    pub t: i32,
    pub r: i32,
    pub b: i32,
    pub w: i32,
    pub h: i32,
    pub cx: i32,
    pub cy: i32,
}

/// Sub-region for partial capture (relative to window origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRect {
    pub l: i32,
    pub t: i32,
    pub w: i32,
    pub h: i32,
}

impl CaptureRect {
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let (l, r) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (t, b) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self { l, t, w: r - l, h: b - t }
    }

    pub fn right(&self) -> i32 {
        self.l + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.t + self.h
    }

    pub fn area(&self) -> i64 {
        self.w.max(0) as i64 * self.h.max(0) as i64
    }

    pub fn intersects(&self, other: &CaptureRect) -> bool {
        self.l < other.right() && other.l < self.right() && self.t < other.bottom() && other.t < self.bottom()
    }

    /// Grow by `margin` on every side, never past the window origin.
    pub fn padded(&self, margin: i32) -> Self {
        let l = (self.l - margin).max(0);
        let t = (self.t - margin).max(0);
        Self {
            l,
            t,
            w: self.right() + margin - l,
            h: self.bottom() + margin - t,
        }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self { l: self.l + dx, t: self.t + dy, w: self.w, h: self.h }
    }
}

/// Raw screenshot pixel data (BGRA).
///
/// `left`/`top` give the position of the captured area inside the window,
/// so hits recognised on a cropped capture can be mapped back.
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub left: i32,
    pub top: i32,
}

/// One piece of text found by a recognizer.
///
/// Recognizers report geometry either as a rectangle or as an arbitrary
/// polygon (or not at all, for "best match" responses).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextHit {
    pub text: String,
    pub confidence: f64,
    pub rect: Option<CaptureRect>,
    pub polygon: Vec<[f64; 2]>,
}

impl TextHit {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self { text: text.into(), confidence, rect: None, polygon: Vec::new() }
    }

    pub fn with_rect(mut self, rect: CaptureRect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_polygon(mut self, polygon: Vec<[f64; 2]>) -> Self {
        self.polygon = polygon;
        self
    }

    /// Bounding box of the hit, preferring the reported rectangle over the
    /// min/max envelope of the polygon.
    pub fn bounds(&self) -> Option<CaptureRect> {
        if let Some(rect) = self.rect {
            return Some(rect);
        }
        let first = self.polygon.first()?;
        let (mut x1, mut y1, mut x2, mut y2) = (first[0], first[1], first[0], first[1]);
        for p in &self.polygon[1..] {
            x1 = x1.min(p[0]);
            y1 = y1.min(p[1]);
            x2 = x2.max(p[0]);
            y2 = y2.max(p[1]);
        }
        Some(CaptureRect::from_corners(
            x1.floor() as i32,
            y1.floor() as i32,
            x2.ceil() as i32,
            y2.ceil() as i32,
        ))
    }
}

/// A named piece of expected on-screen text with its equivalent renderings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub variants: Vec<String>,
}

/// Last known position of a label inside the window.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRegion {
    pub label: String,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub found_at: Instant,
}

impl CachedRegion {
    pub fn rect(&self) -> CaptureRect {
        CaptureRect::from_corners(self.x1, self.y1, self.x2, self.y2)
    }
}

/// Sub-mode of the chat input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMode {
    Global,
    Local,
    Admin,
    Unknown,
}

impl ChatMode {
    /// Label that signals this mode on screen.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            ChatMode::Global => Some("mode-global"),
            ChatMode::Local => Some("mode-local"),
            ChatMode::Admin => Some("mode-admin"),
            ChatMode::Unknown => None,
        }
    }

    pub fn parse(s: &str) -> ChatMode {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => ChatMode::Global,
            "local" => ChatMode::Local,
            "admin" => ChatMode::Admin,
            _ => ChatMode::Unknown,
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatMode::Global => "global",
            ChatMode::Local => "local",
            ChatMode::Admin => "admin",
            ChatMode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Whether a command class expects a readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Query,
    Action,
}

/// Class of a console command, selected by prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandClass {
    pub name: String,
    pub kind: CommandKind,
    /// ResultSink category for captured output
    pub category: String,
}

impl CommandClass {
    pub fn expects_response(&self) -> bool {
        self.kind == CommandKind::Query
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub text: String,
    pub class: CommandClass,
}

/// State of the controlled process as seen by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    NotRunning,
    Loading,
    Login,
    InteractiveIdle,
    InteractiveActive,
    Unknown,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GameState::NotRunning => "not running",
            GameState::Loading => "loading",
            GameState::Login => "login",
            GameState::InteractiveIdle => "idle",
            GameState::InteractiveActive => "active",
            GameState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An input surface activation used for a batch of commands.
#[derive(Debug, Clone)]
pub struct Session {
    pub started_at: Instant,
    pub commands_sent: Vec<String>,
    pub active: bool,
}

/// Result of one SessionController batch.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub sent: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub reopened: usize,
    pub elapsed: Duration,
}

/// Snapshot of the control loop, published for the UI after every poll.
#[derive(Debug, Clone)]
pub struct LoopStatus {
    pub state: GameState,
    pub soft_errors: u32,
    pub hard_errors: u32,
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub pending: usize,
    pub cached_labels: usize,
    pub escalations: u32,
    pub last_batch: Option<String>,
    pub last_error: Option<String>,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            state: GameState::Unknown,
            soft_errors: 0,
            hard_errors: 0,
            soft_limit: 0,
            hard_limit: 0,
            pending: 0,
            cached_labels: 0,
            escalations: 0,
            last_batch: None,
            last_error: None,
        }
    }
}

/// Run state of the orchestrator thread, toggled from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Running,
    Stopped,
}

/// Command from TUI to orchestrator
pub enum Control {
    StartStop,
    ForceRestart,
    Enqueue(String),
    Quit,
}
