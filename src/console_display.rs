use crate::notes::{self, cents};
use crate::tuner::TunerState;
use crate::types::*;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Meter cells either side of centre; full scale is ±50 cents.
const METER_HALF_WIDTH: usize = 20;

/// Renders a live ASCII tuner in the terminal.
pub struct ConsoleDisplay {
    interval: Duration,
    last_draw: Option<Instant>,
}

impl ConsoleDisplay {
    pub fn new(update_hz: u32) -> Self {
        let interval = if update_hz == 0 {
            Duration::from_millis(50)
        } else {
            Duration::from_secs_f64(1.0 / update_hz as f64)
        };
        Self {
            interval,
            last_draw: None,
        }
    }

    /// Redraw if at least one display interval has passed since the last
    /// draw. `sustain` is the in-tune dwell progress, 0.0..=1.0.
    pub fn show(&mut self, state: &TunerState, sustain: f64) {
        let now = Instant::now();
        if let Some(last) = self.last_draw {
            if now.duration_since(last) < self.interval {
                return;
            }
        }
        self.last_draw = Some(now);

        let mut stdout = io::stdout();
        // Clear screen and move cursor home
        print!("\x1b[2J\x1b[H");
        print!("{}", render(state, sustain));
        let _ = stdout.flush();
    }
}

/// One full screen for `state`.
pub fn render(state: &TunerState, sustain: f64) -> String {
    let mut out = String::new();
    out.push_str("╔══════════════════════════════════════════════════════════╗\n");
    out.push_str("║  STRING TUNER                                            ║\n");
    out.push_str("╠══════════════════════════════════════════════════════════╣\n");

    let mode = match (state.chromatic, state.auto_detect) {
        (true, true) => "chromatic, auto",
        (true, false) => "chromatic, manual",
        (false, true) => "instrument, auto",
        (false, false) => "instrument, manual",
    };
    out.push_str(&format!(
        "║  Tuning: {}  ({})   A4 = {:.1} Hz\n",
        state.tuning, mode, state.a4_pitch
    ));

    let target = state.target_note();
    out.push_str(&format!(
        "║  Target: {:<4} {:>7.2} Hz\n",
        notes::symbol(target),
        state.target_frequency()
    ));

    match (state.note_offset, state.frequency) {
        (Some(offset), Some(freq)) => {
            let c = cents(offset);
            let verdict = if offset.abs() < TUNED_OFFSET_THRESHOLD {
                "in tune"
            } else if offset > 0.0 {
                "sharp"
            } else {
                "flat"
            };
            out.push_str(&format!(
                "║  Heard:  {:>7.2} Hz  {:+6.1} cents  {}\n",
                freq, c, verdict
            ));
            out.push_str(&format!("║  {}\n", make_meter(c)));
        }
        _ => {
            out.push_str("║  Heard:  ---\n");
            out.push_str(&format!("║  {}\n", make_meter(f64::NAN)));
        }
    }

    if state.is_target_tuned() {
        out.push_str("║  Hold:   confirmed\n");
    } else {
        out.push_str(&format!("║  Hold:   {}\n", make_bar(sustain, 20)));
    }

    if !state.chromatic {
        out.push_str("║\n║  Strings:\n");
        for (i, s) in state.tuning.strings().iter().enumerate() {
            let cursor = if i == state.selected_string { '▶' } else { ' ' };
            let mark = if state.tuned.get(i).copied().unwrap_or(false) {
                "✓"
            } else {
                " "
            };
            out.push_str(&format!(
                "║   {} {}: {:<4} {}\n",
                cursor,
                i + 1,
                s.symbol(),
                mark
            ));
        }
    }

    if let Some(err) = &state.error {
        out.push_str(&format!("║\n║  Error: {}\n", err));
    } else if !state.running {
        out.push_str("║\n║  (stopped)\n");
    }
    out.push_str("╚══════════════════════════════════════════════════════════╝\n");
    out
}

/// Needle meter over ±50 cents; NaN draws an empty meter.
fn make_meter(cents: f64) -> String {
    let width = 2 * METER_HALF_WIDTH + 1;
    let mut cells = vec!['─'; width];
    cells[METER_HALF_WIDTH] = '┼';
    if cents.is_finite() {
        let pos = (cents / 50.0 * METER_HALF_WIDTH as f64)
            .round()
            .clamp(-(METER_HALF_WIDTH as f64), METER_HALF_WIDTH as f64);
        cells[(METER_HALF_WIDTH as f64 + pos) as usize] = '▲';
    }
    format!("♭ {} ♯", cells.into_iter().collect::<String>())
}

fn make_bar(val: f64, width: usize) -> String {
    let filled = (val.clamp(0.0, 1.0) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunerConfig;
    use crate::tuner::Tuner;

    fn needle(meter: &str) -> usize {
        meter.chars().skip(2).position(|c| c == '▲').unwrap()
    }

    #[test]
    fn test_meter_needle_position() {
        assert_eq!(needle(&make_meter(0.0)), METER_HALF_WIDTH);
        assert_eq!(needle(&make_meter(50.0)), 2 * METER_HALF_WIDTH);
        assert_eq!(needle(&make_meter(-500.0)), 0, "clamped to the left edge");
        assert!(!make_meter(f64::NAN).contains('▲'));
    }

    #[test]
    fn test_render_instrument_mode() {
        let tuner = Tuner::new(TunerConfig::default());
        tuner.process_pitch(PitchResult::pitched(112.0));
        tuner.set_tuned(Some(0), true).unwrap();
        let screen = render(&tuner.snapshot(), 0.5);
        assert!(screen.contains("Standard"));
        assert!(screen.contains("Target: A2"), "{}", screen);
        assert!(screen.contains("sharp"));
        assert!(screen.contains("▶ 5: A2"));
        assert!(screen.contains("1: E4   ✓"));
        assert!(screen.contains("(stopped)"));
    }

    #[test]
    fn test_render_chromatic_without_pitch() {
        let tuner = Tuner::new(TunerConfig::default().with_chromatic(true));
        let screen = render(&tuner.snapshot(), 0.0);
        assert!(screen.contains("Target: E2"));
        assert!(screen.contains("Heard:  ---"));
        assert!(!screen.contains("Strings:"));
    }
}
