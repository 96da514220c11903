pub mod stub;
pub mod ocr;
pub mod backend;
pub mod process;

#[cfg(target_os = "macos")]
pub mod darwin;

use crate::error::Result;
use crate::logger;
use crate::settings::Settings;
use crate::types::*;

/// Injects simulated input into the controlled process.
pub trait Actuator: Send {
    fn press_key(&self, key: &str) -> Result<()>;
    fn type_text(&self, text: &str) -> Result<()>;
    fn click(&self, x: i32, y: i32) -> Result<()>;
    fn write_clipboard(&self, text: &str) -> Result<()>;
    fn read_clipboard(&self) -> Result<String>;
}

/// Captures the visible surface of the controlled process. `None` means the
/// whole window; a rect is relative to the window origin.
pub trait FrameSource: Send {
    fn capture(&self, rect: Option<CaptureRect>) -> Result<Capture>;
}

/// Optical text recognition. Hit geometry is relative to the capture.
pub trait TextRecognizer: Send {
    /// Bring the recognizer up if it lives outside this process.
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    fn recognize(&self, capture: &Capture, hint: Option<&str>) -> Result<Vec<TextHit>>;
}

pub trait ProcessSupervisor: Send {
    fn is_running(&self) -> bool;
    fn launch(&self) -> Result<()>;
    fn kill(&self) -> Result<()>;
}

/// Fire-and-forget upload of captured command output.
pub trait ResultSink: Send {
    fn publish(&self, category: &str, payload: &str);
}

/// Where pending operator commands come from besides the UI.
pub trait CommandSource: Send {
    fn fetch_pending(&self) -> Result<Vec<String>>;
}

/// The full set of external collaborators the engine drives.
pub struct Platform {
    pub actuator: Box<dyn Actuator>,
    pub frames: Box<dyn FrameSource>,
    pub recognizer: Box<dyn TextRecognizer>,
    pub supervisor: Box<dyn ProcessSupervisor>,
    pub sink: Box<dyn ResultSink>,
    pub source: Option<Box<dyn CommandSource>>,
}

impl Platform {
    /// Every collaborator backed by one simulated console.
    pub fn simulated(sim: &stub::SimulatedConsole) -> Self {
        Platform {
            actuator: Box::new(sim.clone()),
            frames: Box::new(sim.clone()),
            recognizer: Box::new(sim.clone()),
            supervisor: Box::new(sim.clone()),
            sink: Box::new(sim.clone()),
            source: None,
        }
    }
}

/// Create the platform appropriate for the current OS. Without a native
/// backend only the simulated console is available, and only on request.
pub fn create_platform(settings: &Settings, force_stub: bool) -> Result<Platform> {
    logger::register_engine_prefixes();
    if force_stub {
        logger::register_prefix("sim", logger::COLOR_GRAY);
        return Ok(Platform::simulated(&stub::SimulatedConsole::new(settings.keys.clone())));
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        let window = darwin::DarwinWindow::new(&settings.window_pattern, settings.channel.key_delay_ms);
        let (sink, source) = backend::from_settings(&settings.server);
        return Ok(Platform {
            actuator: Box::new(window.clone()),
            frames: Box::new(window),
            recognizer: Box::new(ocr::OcrRecognizer::new(&settings.ocr)),
            supervisor: Box::new(process::SystemSupervisor::new(&settings.process)),
            sink,
            source,
        });
    }
    #[cfg(not(target_os = "macos"))]
    {
        return Err(crate::error::Error::Fatal("no native backend on this platform, run with --stub".into()));
    }
}
