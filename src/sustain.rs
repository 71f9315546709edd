use crate::tuner::TunerState;
use std::time::{Duration, Instant};

/// Dwell timer that decides when a target has been held in tune long enough.
///
/// Feed it every snapshot; it returns true exactly once per dwell, when the
/// offset has stayed inside `threshold` semitones for `sustain`. The caller
/// then confirms with `Tuner::set_tuned`. The timer restarts whenever the
/// target changes, the offset leaves the band, or the pitch is lost, and it
/// stays quiet for a target already marked tuned.
pub struct TunedSustain {
    threshold: f64,
    sustain: Duration,
    target: Option<Target>,
    since: Option<Instant>,
    fired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    String(usize, i32),
    Note(i32),
}

impl TunedSustain {
    pub fn new(threshold: f64, sustain: Duration) -> Self {
        Self {
            threshold,
            sustain,
            target: None,
            since: None,
            fired: false,
        }
    }

    pub fn update(&mut self, state: &TunerState, now: Instant) -> bool {
        let target = if state.chromatic {
            Target::Note(state.selected_note)
        } else {
            Target::String(state.selected_string, state.target_note())
        };
        if self.target != Some(target) {
            self.target = Some(target);
            self.reset();
        }

        let inside = state
            .note_offset
            .map(|o| o.abs() < self.threshold)
            .unwrap_or(false);
        if !inside || state.is_target_tuned() {
            self.reset();
            return false;
        }

        let since = *self.since.get_or_insert(now);
        if !self.fired && now.duration_since(since) >= self.sustain {
            self.fired = true;
            return true;
        }
        false
    }

    /// Progress towards the dwell, 0.0..=1.0.
    pub fn progress(&self, now: Instant) -> f64 {
        match self.since {
            Some(since) if !self.sustain.is_zero() => {
                (now.duration_since(since).as_secs_f64() / self.sustain.as_secs_f64()).min(1.0)
            }
            Some(_) => 1.0,
            None => 0.0,
        }
    }

    fn reset(&mut self) {
        self.since = None;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunerConfig;
    use crate::tuner::Tuner;
    use crate::types::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn state_with_offset(offset: Option<f64>) -> TunerState {
        let tuner = Tuner::new(TunerConfig::default());
        let mut s = tuner.snapshot();
        s.note_offset = offset;
        s
    }

    #[test]
    fn test_fires_once_after_dwell() {
        let mut timer = TunedSustain::new(TUNED_OFFSET_THRESHOLD, TUNED_SUSTAIN_TIME);
        let s = state_with_offset(Some(0.01));
        let t0 = Instant::now();
        assert!(!timer.update(&s, t0));
        assert!(!timer.update(&s, t0 + ms(500)));
        assert!(timer.update(&s, t0 + ms(900)));
        assert!(!timer.update(&s, t0 + ms(1000)), "fires once per dwell");
    }

    #[test]
    fn test_leaving_band_restarts() {
        let mut timer = TunedSustain::new(0.05, ms(900));
        let good = state_with_offset(Some(-0.02));
        let off = state_with_offset(Some(0.2));
        let t0 = Instant::now();
        timer.update(&good, t0);
        timer.update(&off, t0 + ms(600));
        assert!(!timer.update(&good, t0 + ms(700)));
        assert!(!timer.update(&good, t0 + ms(1500)));
        assert!(timer.update(&good, t0 + ms(1600)));
    }

    #[test]
    fn test_lost_pitch_restarts() {
        let mut timer = TunedSustain::new(0.05, ms(900));
        let good = state_with_offset(Some(0.0));
        let t0 = Instant::now();
        timer.update(&good, t0);
        timer.update(&state_with_offset(None), t0 + ms(800));
        assert_eq!(timer.progress(t0 + ms(800)), 0.0);
        assert!(!timer.update(&good, t0 + ms(1000)));
    }

    #[test]
    fn test_target_change_restarts() {
        let mut timer = TunedSustain::new(0.05, ms(900));
        let mut s = state_with_offset(Some(0.0));
        let t0 = Instant::now();
        timer.update(&s, t0);
        s.selected_string = 3;
        assert!(!timer.update(&s, t0 + ms(900)), "new string starts a new dwell");
        assert!(timer.update(&s, t0 + ms(1800)));
    }

    #[test]
    fn test_already_tuned_target_never_fires() {
        let mut timer = TunedSustain::new(0.05, ms(900));
        let mut s = state_with_offset(Some(0.0));
        s.tuned[s.selected_string] = true;
        let t0 = Instant::now();
        assert!(!timer.update(&s, t0));
        assert!(!timer.update(&s, t0 + ms(5000)));
    }

    #[test]
    fn test_progress() {
        let mut timer = TunedSustain::new(0.05, ms(1000));
        let s = state_with_offset(Some(0.0));
        let t0 = Instant::now();
        timer.update(&s, t0);
        assert!((timer.progress(t0 + ms(250)) - 0.25).abs() < 1e-9);
        assert_eq!(timer.progress(t0 + ms(3000)), 1.0);
    }
}
