use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use crate::control::ControlLoop;
use crate::logger;
use crate::sleep;
use crate::types::{Control, LoopStatus, OrchestratorState};

/// Drain pending UI commands. Returns false on Quit.
fn process_commands(
    cmd_rx: &mpsc::Receiver<Control>,
    control: &mut ControlLoop,
    orch_state: &Mutex<OrchestratorState>,
) -> bool {
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            Control::Quit => {
                logger::info("shutting down");
                *orch_state.lock().unwrap() = OrchestratorState::Stopped;
                return false;
            }
            Control::StartStop => {
                let mut state = orch_state.lock().unwrap();
                *state = match *state {
                    OrchestratorState::Running => {
                        logger::info("control loop paused");
                        OrchestratorState::Stopped
                    }
                    OrchestratorState::Stopped => {
                        logger::info("control loop started");
                        OrchestratorState::Running
                    }
                };
            }
            Control::ForceRestart => control.force_restart(),
            Control::Enqueue(text) => match control.enqueue(&text) {
                Ok(n) => logger::info(&format!("queued {} command(s) from '{}'", n, text)),
                Err(e) => logger::warn(&format!("'{}': {}", text, e)),
            },
        }
    }
    true
}

fn publish(status: &Mutex<LoopStatus>, control: &ControlLoop) {
    *status.lock().unwrap() = control.status();
}

/// Main control thread: polls the loop on a jittered cadence while running
/// and keeps answering UI commands in between.
pub fn orchestrate(
    mut control: ControlLoop,
    status: Arc<Mutex<LoopStatus>>,
    orch_state: Arc<Mutex<OrchestratorState>>,
    cmd_rx: mpsc::Receiver<Control>,
) {
    let mut next_poll = Instant::now();

    loop {
        if !process_commands(&cmd_rx, &mut control, &orch_state) {
            publish(&status, &control);
            return;
        }
        publish(&status, &control);

        let running = *orch_state.lock().unwrap() == OrchestratorState::Running;
        if !running || Instant::now() < next_poll {
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }

        match control.poll() {
            Err(e) if e.is_fatal() => {
                logger::error(&format!("control loop halted: {}", e));
                *orch_state.lock().unwrap() = OrchestratorState::Stopped;
            }
            Err(e) => logger::warn(&format!("poll skipped: {}", e)),
            Ok(_) => {}
        }
        publish(&status, &control);
        next_poll = Instant::now() + sleep::jittered(control.poll_interval().as_secs_f64());
    }
}
