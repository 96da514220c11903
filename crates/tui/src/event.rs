use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::App;
use crate::ui;

fn handle_input_key(app: &mut App, key: KeyEvent) {
    let Some(line) = app.input.as_mut() else { return };
    match key.code {
        KeyCode::Enter => app.submit_input(),
        KeyCode::Esc => app.input = None,
        KeyCode::Backspace => {
            line.pop();
        }
        KeyCode::Char(c) => line.push(c),
        _ => {}
    }
}

fn handle_confirm_key(app: &mut App, key: KeyEvent) {
    let Some(dialog) = app.confirm.as_mut() else { return };
    match key.code {
        KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::Char('h') | KeyCode::Char('l') => dialog.toggle(),
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            dialog.selected = true;
            app.answer_confirm();
        }
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.confirm = None,
        KeyCode::Enter => app.answer_confirm(),
        _ => {}
    }
}

pub fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> anyhow::Result<()> {
    loop {
        if app.should_quit {
            return Ok(());
        }

        app.drain_logs();

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with 100ms timeout (keeps TUI responsive)
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if app.confirm.is_some() {
                        handle_confirm_key(app, key);
                        continue;
                    }
                    if app.input.is_some() {
                        handle_input_key(app, key);
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => {
                            app.quit();
                        }
                        KeyCode::Char('s') | KeyCode::Char('S') => {
                            app.start_stop();
                        }
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.ask_restart();
                        }
                        KeyCode::Char(':') | KeyCode::Char('i') => {
                            app.begin_input();
                        }
                        KeyCode::Char('l') | KeyCode::Char('L') => {
                            app.toggle_log();
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            app.scroll_log_up(1);
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            app.scroll_log_down(1);
                        }
                        _ => {}
                    }
                }
                Event::Mouse(mouse) => {
                    match mouse.kind {
                        MouseEventKind::ScrollUp => {
                            app.scroll_log_up(3);
                        }
                        MouseEventKind::ScrollDown => {
                            app.scroll_log_down(3);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }
}
