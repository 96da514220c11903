use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use libtest_mimic::{Arguments, Failed, Trial};

use consul_core::error::Error;
use consul_core::orchestrator;
use consul_core::platform::stub::{Screen, SimulatedConsole};
use consul_core::settings::{KeyBindings, PeriodicSettings};
use consul_core::types::{Control, GameState, LoopStatus, OrchestratorState};
use consul_test::*;

fn idle_query_is_published() -> Outcome {
    let mut rig = in_game();
    rig.sim.reply("#ListPlayers", "Steam: 7656 Fame: 12");
    ensure_eq(rig.control.poll().map_err(|e| e.to_string())?, GameState::InteractiveIdle, "first poll")?;

    rig.control.enqueue("players").map_err(|e| e.to_string())?;
    let state = rig.control.poll().map_err(|e| e.to_string())?;
    ensure_eq(state, GameState::InteractiveIdle, "state after batch")?;

    let s = rig.sim.state();
    ensure_eq(s.activations, 1, "activations")?;
    ensure_eq(s.submitted.clone(), vec!["#ListPlayers true".to_string()], "submitted")?;
    ensure_eq(s.published.clone(), vec![("user".to_string(), "Steam: 7656 Fame: 12".to_string())], "published")?;
    ensure(!s.chat_open, "chat left open")?;
    drop(s);
    ensure_eq(rig.control.counters(), (0, 0), "counters")?;
    ensure_eq(rig.control.pending(), 0, "pending")
}

fn silent_query_feeds_hard_counter() -> Outcome {
    let mut rig = in_game();
    rig.sim.state().echo = true;
    rig.control.enqueue("#ListPlayers true").map_err(|e| e.to_string())?;
    rig.control.poll().map_err(|e| e.to_string())?;
    ensure_eq(rig.control.counters(), (0, 1), "counters")?;
    // at-most-once: a submitted command is not queued again
    ensure_eq(rig.control.pending(), 0, "pending")?;
    let status = rig.control.status();
    ensure(status.last_error.is_some_and(|e| e.contains("no response")), "last error")
}

fn blocked_chat_escalates_to_restart() -> Outcome {
    let mut rig = in_game();
    rig.sim.state().chat_blocked = true;
    rig.control.enqueue("#SetTime 08 00").map_err(|e| e.to_string())?;

    for i in 1..=16 {
        rig.control.poll().map_err(|e| e.to_string())?;
        ensure_eq(rig.control.counters(), (i, 0), "soft counter")?;
    }
    ensure_eq(rig.sim.state().kills, 0, "kills before limit")?;
    ensure_eq(rig.control.pending(), 1, "command kept for retry")?;

    let state = rig.control.poll().map_err(|e| e.to_string())?;
    ensure_eq(state, GameState::NotRunning, "state after escalation")?;
    ensure_eq(rig.sim.state().kills, 1, "kills")?;
    ensure_eq(rig.control.counters(), (0, 0), "counters after escalation")?;
    ensure_eq(rig.control.status().cached_labels, 0, "cache after escalation")?;
    ensure_eq(rig.control.escalations(), 1, "escalations")
}

fn cold_start_reaches_interactive() -> Outcome {
    let mut rig = cold();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rig.control.poll().map_err(|e| e.to_string())?);
    }
    ensure_eq(seen, vec![GameState::NotRunning, GameState::Login, GameState::InteractiveIdle], "states")?;
    let s = rig.sim.state();
    ensure_eq(s.launches, 1, "launches")?;
    ensure_eq(s.screen, Screen::Game, "screen")?;
    ensure_eq(s.clicks.clone(), vec![(426, 348), (97, 405)], "login clicks")?;
    drop(s);
    ensure(rig.clock.elapsed() >= Duration::from_secs(30), "launch wait not observed")
}

fn loading_screen_detected_by_pixels() -> Outcome {
    let sim = SimulatedConsole::new(KeyBindings::default());
    {
        let mut s = sim.state();
        s.running = true;
        s.loading_frames = 100;
    }
    let mut settings = quiet_settings();
    // no loading label, only the bright pixel probes
    settings.labels.remove("loading-marker");
    let mut rig = rig_with(sim, settings);
    ensure_eq(rig.control.poll().map_err(|e| e.to_string())?, GameState::Loading, "state")?;
    ensure_eq(rig.control.counters(), (0, 0), "counters")
}

fn paged_duty_walks_listing() -> Outcome {
    let sim = SimulatedConsole::in_game(KeyBindings::default());
    sim.reply("#listflags 1", "Flag 1 owner Ann\nPage 1/2");
    sim.reply("#listflags 2", "Flag 2 owner Bob\nPage 2/2");
    let mut settings = quiet_settings();
    settings.periodic = PeriodicSettings { enabled: true, commands: Vec::new(), ..PeriodicSettings::default() };
    let mut rig = rig_with(sim, settings);

    rig.control.poll().map_err(|e| e.to_string())?;
    rig.control.poll().map_err(|e| e.to_string())?;
    let s = rig.sim.state();
    ensure_eq(s.submitted.clone(), vec!["#listflags 1 true".to_string(), "#listflags 2 true".to_string()], "pages")?;
    ensure_eq(s.published.len(), 2, "published")?;
    ensure(s.published.iter().all(|(cat, _)| cat == "flags"), "category")
}

fn moved_layout_is_relocated() -> Outcome {
    let mut rig = in_game();
    rig.control.enqueue("morning").map_err(|e| e.to_string())?;
    rig.control.poll().map_err(|e| e.to_string())?;

    rig.sim.state().chat_offset = (40, -20);
    let scans = rig.sim.state().full_scans;
    rig.control.enqueue("noon").map_err(|e| e.to_string())?;
    rig.control.poll().map_err(|e| e.to_string())?;

    ensure_eq(rig.sim.state().submitted.clone(), vec!["#SetTime 08 00".to_string(), "#SetTime 12 00".to_string()], "submitted")?;
    ensure(rig.sim.state().full_scans > scans, "no rescan after the move")?;
    ensure_eq(rig.control.counters(), (0, 0), "counters")
}

fn fatal_launch_is_surfaced() -> Outcome {
    let mut rig = cold();
    rig.sim.state().launch_fails = true;
    match rig.control.poll() {
        Err(Error::Fatal(_)) => Ok(()),
        other => Err(format!("expected fatal, got {:?}", other.map(|s| s.to_string()))),
    }
}

fn fatal_launch_stops_orchestrator() -> Outcome {
    let rig = cold();
    rig.sim.state().launch_fails = true;
    let status = Arc::new(Mutex::new(LoopStatus::default()));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Running));
    let (cmd_tx, cmd_rx) = mpsc::channel();

    let (s, o) = (Arc::clone(&status), Arc::clone(&orch_state));
    let control = rig.control;
    let handle = thread::spawn(move || orchestrator::orchestrate(control, s, o, cmd_rx));

    let deadline = Instant::now() + Duration::from_secs(5);
    while *orch_state.lock().unwrap() == OrchestratorState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    let stopped = *orch_state.lock().unwrap() == OrchestratorState::Stopped;
    cmd_tx.send(Control::Quit).ok();
    handle.join().map_err(|_| "orchestrator panicked".to_string())?;

    ensure(stopped, "orchestrator kept running")?;
    let last = status.lock().unwrap().last_error.clone();
    ensure(last.is_some_and(|e| e.starts_with("fatal")), "fatal not published")
}

fn queued_from_ui_is_delivered() -> Outcome {
    let rig = in_game();
    let sim = rig.sim.clone();
    let status = Arc::new(Mutex::new(LoopStatus::default()));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Stopped));
    let (cmd_tx, cmd_rx) = mpsc::channel();

    let (s, o) = (Arc::clone(&status), Arc::clone(&orch_state));
    let control = rig.control;
    let handle = thread::spawn(move || orchestrator::orchestrate(control, s, o, cmd_rx));

    cmd_tx.send(Control::Enqueue("save".into())).ok();
    cmd_tx.send(Control::StartStop).ok();
    let deadline = Instant::now() + Duration::from_secs(5);
    while sim.state().submitted.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    cmd_tx.send(Control::Quit).ok();
    handle.join().map_err(|_| "orchestrator panicked".to_string())?;

    ensure_eq(sim.state().submitted.clone(), vec!["#Save".to_string()], "submitted")?;
    let result = ensure_eq(*orch_state.lock().unwrap(), OrchestratorState::Stopped, "state after quit");
    result
}

fn recognizer_outage_does_not_stop_orchestrator() -> Outcome {
    let mut settings = quiet_settings();
    settings.control.poll_interval_ms = 50;
    let rig = rig_with(SimulatedConsole::in_game(KeyBindings::default()), settings);
    let sim = rig.sim.clone();
    sim.state().recognizer_down = true;
    let status = Arc::new(Mutex::new(LoopStatus::default()));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Running));
    let (cmd_tx, cmd_rx) = mpsc::channel();

    let (s, o) = (Arc::clone(&status), Arc::clone(&orch_state));
    let control = rig.control;
    let handle = thread::spawn(move || orchestrator::orchestrate(control, s, o, cmd_rx));

    let deadline = Instant::now() + Duration::from_secs(5);
    while status.lock().unwrap().last_error.is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    let after_outage = *orch_state.lock().unwrap();

    sim.state().recognizer_down = false;
    cmd_tx.send(Control::Enqueue("save".into())).ok();
    let deadline = Instant::now() + Duration::from_secs(5);
    while sim.state().submitted.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    cmd_tx.send(Control::Quit).ok();
    handle.join().map_err(|_| "orchestrator panicked".to_string())?;

    ensure_eq(after_outage, OrchestratorState::Running, "state during outage")?;
    ensure_eq(sim.state().kills, 0, "kills")?;
    let result = ensure_eq(sim.state().submitted.clone(), vec!["#Save".to_string()], "submitted after recovery");
    result
}

fn trial(name: &'static str, f: fn() -> Outcome) -> Trial {
    Trial::test(name, move || f().map_err(Failed::from))
}

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        trial("idle_query_is_published", idle_query_is_published),
        trial("silent_query_feeds_hard_counter", silent_query_feeds_hard_counter),
        trial("blocked_chat_escalates_to_restart", blocked_chat_escalates_to_restart),
        trial("cold_start_reaches_interactive", cold_start_reaches_interactive),
        trial("loading_screen_detected_by_pixels", loading_screen_detected_by_pixels),
        trial("paged_duty_walks_listing", paged_duty_walks_listing),
        trial("moved_layout_is_relocated", moved_layout_is_relocated),
        trial("fatal_launch_is_surfaced", fatal_launch_is_surfaced),
        trial("fatal_launch_stops_orchestrator", fatal_launch_stops_orchestrator),
        trial("queued_from_ui_is_delivered", queued_from_ui_is_delivered),
        trial("recognizer_outage_does_not_stop_orchestrator", recognizer_outage_does_not_stop_orchestrator),
    ];
    libtest_mimic::run(&args, tests).exit();
}
