//! Note/frequency model.
//!
//! Notes are signed semitone indices relative to A4 (index 0). Frequencies
//! follow equal temperament against a configurable reference pitch:
//! `f = a4 * 2^(index / 12)`.

use std::ops::RangeInclusive;

use crate::error::MusicError;
use crate::types::{HIGHEST_NOTE, LOWEST_NOTE};

/// Standard concert pitch for A4.
pub const DEFAULT_A4_PITCH: f64 = 440.0;

/// Chromatic root names, starting at C (octave boundary).
pub const NOTE_SYMBOLS: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A is 9 semitones above C, so shifting an A4-relative index by 9 makes it
/// C4-relative, which lines the octave number up with the table.
const A_OFFSET_IN_OCTAVE: i32 = 9;

/// Frequency (Hz) of a note index at the given reference pitch.
pub fn pitch_of(index: i32, a4_pitch: f64) -> f64 {
    a4_pitch * 2.0_f64.powf(index as f64 / 12.0)
}

/// Continuous note position (fractional semitones from A4) of a frequency.
pub fn offset_from_a4(frequency: f64, a4_pitch: f64) -> f64 {
    12.0 * (frequency / a4_pitch).log2()
}

/// Nearest whole note index to a frequency.
pub fn nearest_index(frequency: f64, a4_pitch: f64) -> i32 {
    offset_from_a4(frequency, a4_pitch).round() as i32
}

/// Semitone offset expressed in cents.
pub fn cents(semitones: f64) -> f64 {
    semitones * 100.0
}

/// The range of note indices the engine accepts.
pub fn note_range() -> RangeInclusive<i32> {
    LOWEST_NOTE..=HIGHEST_NOTE
}

pub fn in_range(index: i32) -> bool {
    note_range().contains(&index)
}

/// Root name of a note index, e.g. `"C#"`. Works for negative indices.
pub fn root_name(index: i32) -> &'static str {
    NOTE_SYMBOLS[(index + A_OFFSET_IN_OCTAVE).rem_euclid(12) as usize]
}

/// Scientific octave number of a note index (A4 → 4, C4 → 4, B3 → 3).
pub fn octave(index: i32) -> i32 {
    4 + (index + A_OFFSET_IN_OCTAVE).div_euclid(12)
}

/// Full symbol of a note index, e.g. `"E2"`.
pub fn symbol(index: i32) -> String {
    format!("{}{}", root_name(index), octave(index))
}

/// Parse a symbol such as `"E2"`, `"C#3"` or `"A-1"` into a note index.
pub fn parse_symbol(symbol: &str) -> Result<i32, MusicError> {
    let invalid = || MusicError::InvalidSymbol(symbol.to_string());
    let s = symbol.trim();

    // Root is the longest table entry that prefixes the symbol ("C#" before "C").
    let root_len = if s.get(1..2) == Some("#") { 2 } else { 1 };
    let root = s.get(..root_len).ok_or_else(invalid)?;
    let within = NOTE_SYMBOLS
        .iter()
        .position(|&n| n == root)
        .ok_or_else(invalid)? as i32;

    let octave: i32 = s[root_len..].parse().map_err(|_| invalid())?;
    Ok((octave - 4) * 12 + within - A_OFFSET_IN_OCTAVE)
}
