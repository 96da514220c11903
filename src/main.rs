use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use anyhow::Result;
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use consul_core::control::ControlLoop;
use consul_core::engine::Engine;
use consul_core::platform::create_platform;
use consul_core::sleep::SystemClock;
use consul_core::types::{Control, LoopStatus, OrchestratorState};
use consul_core::{logger, orchestrator, settings::Settings};

/// Value following `flag` on the command line.
fn arg_value(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1).cloned())
}

fn main() -> Result<()> {
    let force_stub = std::env::args().any(|a| a == "--stub");
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    logger::init(&cwd.join("logs"))?;

    let settings_path = arg_value("--config").map(PathBuf::from).unwrap_or_else(|| cwd.join("settings.json"));
    let settings = Settings::load(&settings_path);
    if !settings_path.exists() {
        settings.save(&settings_path);
    }

    let platform = create_platform(&settings, force_stub)?;
    if let Err(e) = platform.recognizer.ensure_ready() {
        logger::warn(&format!("text recognition not ready: {}", e));
    }
    let engine = Engine::new(platform, settings, Arc::new(SystemClock));
    let control = ControlLoop::new(engine);

    let status = Arc::new(Mutex::new(control.status()));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Running));

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Control>();

    logger::set_tui_sender(log_tx);
    logger::info(&format!("consul started, settings from {}", settings_path.display()));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = consul_tui::App::new(Arc::clone(&status), Arc::clone(&orch_state), log_rx, cmd_tx);

    let orch_status: Arc<Mutex<LoopStatus>> = Arc::clone(&status);
    let orch_run_state = Arc::clone(&orch_state);
    let handle = thread::spawn(move || {
        orchestrator::orchestrate(control, orch_status, orch_run_state, cmd_rx);
    });

    let result = consul_tui::event::run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    // a poll in flight finishes before the thread sees Quit
    if app.should_quit {
        handle.join().ok();
    }
    result
}
