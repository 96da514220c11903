use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style, Modifier},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use consul_core::types::{GameState, LoopStatus, OrchestratorState};
use crate::App;

fn state_color(state: GameState) -> Color {
    match state {
        GameState::InteractiveIdle => Color::Green,
        GameState::InteractiveActive => Color::Cyan,
        GameState::Loading | GameState::Login => Color::Yellow,
        GameState::NotRunning | GameState::Unknown => Color::Red,
    }
}

/// Counter with its limit, red once past half.
fn counter(label: &str, value: u32, limit: u32) -> Line<'static> {
    let color = if limit > 0 && value * 2 > limit { Color::Red } else { Color::White };
    Line::from(vec![
        Span::styled(format!(" {:<10}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(format!("{}/{}", value, limit), Style::default().fg(color)),
    ])
}

fn field(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!(" {:<10}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn status_lines(status: &LoopStatus) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(vec![
            Span::styled(" s", Style::default().fg(Color::Yellow)),
            Span::raw(" start/stop, "),
            Span::styled("r", Style::default().fg(Color::Yellow)),
            Span::raw(" restart, "),
            Span::styled(":", Style::default().fg(Color::Yellow)),
            Span::raw(" command, "),
            Span::styled("l", Style::default().fg(Color::Yellow)),
            Span::raw(" logs"),
        ]),
        Line::from(""),
        field("state", status.state.to_string(), state_color(status.state)),
        counter("soft", status.soft_errors, status.soft_limit),
        counter("hard", status.hard_errors, status.hard_limit),
        field("pending", status.pending.to_string(), Color::White),
        field("labels", format!("{} cached", status.cached_labels), Color::White),
        field("restarts", status.escalations.to_string(), Color::White),
    ];
    if let Some(batch) = &status.last_batch {
        lines.push(field("last batch", batch.clone(), Color::Cyan));
    }
    if let Some(err) = &status.last_error {
        lines.push(field("last error", err.clone(), Color::Red));
    }
    lines
}

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let (banner_label, banner_bg) = match *app.orch_state.lock().unwrap() {
        OrchestratorState::Running => ("RUNNING (Press S to pause)", Color::Green),
        OrchestratorState::Stopped => ("PAUSED (Press S to start)", Color::Red),
    };

    let mut lines = {
        let status = app.status.lock().unwrap();
        status_lines(&status)
    };
    if let Some(input) = &app.input {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled(" > ", Style::default().fg(Color::Yellow)),
            Span::styled(format!("{}_", input), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        ]));
    }

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let banner_width = left_chunks[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let centered_banner = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_total - pad_left));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered_banner,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left_chunks[0]);

    let panel = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(panel, left_chunks[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible_height));
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end]
            .iter()
            .map(|m| parse_log_line(m))
            .collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }

    let (level, prefix, timestamp, message) = (parts[0], parts[1], parts[3], parts[4]);
    let color = match parts[2].parse::<u8>().unwrap_or(0) {
        1 => Color::DarkGray,     // COLOR_GRAY
        2 => Color::LightBlue,    // COLOR_BLUE
        3 => Color::LightGreen,   // COLOR_GREEN
        4 => Color::LightMagenta, // COLOR_MAGENTA
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_log_line() {
        let line = parse_log_line("WARN\x1fchannel\x1f2\x1f12:00:01\x1fchat did not open");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "12:00:01 warn channel chat did not open");
        assert_eq!(parse_log_line("plain").spans.len(), 1);
    }

    #[test]
    fn test_status_lines_show_last_error() {
        let status = LoopStatus { last_error: Some("boom".into()), soft_limit: 15, ..LoopStatus::default() };
        let lines = status_lines(&status);
        let last: String = lines.last().unwrap().spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(last.ends_with("boom"));
    }
}
