use crate::stats::{stat_color, time_color};
use crate::types::*;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

/// Prints session progress to the terminal, one line per event, with the
/// target's stats tinted by the same colour scale the stats view uses.
pub struct ConsoleDisplay {
    rx: Receiver<SessionEvent>,
    /// Print the target's name alongside its image key
    show_note_name: bool,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<SessionEvent>, show_note_name: bool) -> Self {
        Self { rx, show_note_name }
    }

    pub fn run(&self) {
        let mut stdout = io::stdout();
        for event in self.rx.iter() {
            if let Some(line) = self.render(&event) {
                println!("{}", line);
                let _ = stdout.flush();
            }
        }
    }

    fn render(&self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::StateChanged { state } => match state {
                PracticeState::Idle | PracticeState::Countdown => {
                    Some(format!("── {} ──", state))
                }
                _ => None,
            },
            SessionEvent::Countdown { remaining_secs } => {
                Some(format!("   {}...", remaining_secs))
            }
            SessionEvent::NewTarget { spelled, image, .. } => Some(if self.show_note_name {
                format!("♪ Play {:<4} [{}]", spelled.to_string(), image)
            } else {
                format!("♪ Play [{}]", image)
            }),
            SessionEvent::TrialResolved(report) => {
                let mark = if report.correct { "✔" } else { "✘" };
                let acc = report.target_accuracy;
                let acc_color = stat_color(acc).unwrap_or(crate::stats::NO_DATA_COLOR);
                let time_col = time_color(report.target_time_to_correct);
                Some(format!(
                    "{} {:<4} heard {:<4} {:>5.2}s  acc {}{}\x1b[0m  time {}{}\x1b[0m  score {}/{}",
                    mark,
                    report.target_spelled.to_string(),
                    report.detected.to_string(),
                    report.elapsed_secs,
                    ansi_fg(acc_color),
                    make_bar(acc.unwrap_or(0.0), 10),
                    ansi_fg(time_col),
                    format_secs(report.target_time_to_correct),
                    report.score.correct,
                    report.score.correct + report.score.incorrect,
                ))
            }
            SessionEvent::Timer { remaining_secs } if remaining_secs % 30 == 0 => Some(format!(
                "   {}:{:02} left",
                remaining_secs / 60,
                remaining_secs % 60
            )),
            SessionEvent::Timer { .. } => None,
            SessionEvent::Stopped { reason, score } => Some(format!(
                "╔══ Session over ({:?}) ══╗\n║ {} ║",
                reason, score
            )),
            SessionEvent::Error { message } => Some(format!("!! {}", message)),
        }
    }
}

/// 24-bit foreground escape for a `#rrggbb` colour. Unparseable input resets.
fn ansi_fg(hex: &str) -> String {
    let digits = hex.trim_start_matches('#');
    let channel = |i: usize| {
        digits
            .get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
    };
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) if digits.len() == 6 => format!("\x1b[38;2;{};{};{}m", r, g, b),
        _ => "\x1b[0m".to_string(),
    }
}

fn make_bar(val: f64, width: usize) -> String {
    let filled = (val.clamp(0.0, 1.0) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

fn format_secs(secs: Option<f64>) -> String {
    match secs {
        Some(t) => format!("{:.2}s", t),
        None => "---".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_ansi_from_hex() {
        assert_eq!(ansi_fg("#276419"), "\x1b[38;2;39;100;25m");
        assert_eq!(ansi_fg("nope"), "\x1b[0m");
    }

    #[test]
    fn test_bar_clamps() {
        assert_eq!(make_bar(0.5, 4), "[██░░]");
        assert_eq!(make_bar(3.0, 2), "[██]");
    }

    #[test]
    fn test_timer_rendered_every_half_minute() {
        let (_tx, rx) = unbounded();
        let display = ConsoleDisplay::new(rx, false);
        let at = |s| display.render(&SessionEvent::Timer { remaining_secs: s });
        assert_eq!(at(90).as_deref(), Some("   1:30 left"));
        assert!(at(89).is_none());
    }
}
