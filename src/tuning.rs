use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MusicError;
use crate::notes;

/// Highest fret `InstrumentString::note_index` accepts.
pub const MAX_FRET: u32 = 24;

// ─── Strings ────────────────────────────────────────────────────────────────

/// One string of an instrument, identified by its open (root) note index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentString {
    pub root: i32,
}

impl InstrumentString {
    pub fn new(root: i32) -> Self {
        Self { root }
    }

    pub fn from_symbol(symbol: &str) -> Result<Self, MusicError> {
        notes::parse_symbol(symbol).map(Self::new)
    }

    pub fn higher(self) -> Self {
        Self::new(self.root + 1)
    }

    pub fn lower(self) -> Self {
        Self::new(self.root - 1)
    }

    /// Note index sounded at `fret`, or None past the last fret.
    pub fn note_index(&self, fret: u32) -> Option<i32> {
        (fret <= MAX_FRET).then(|| self.root + fret as i32)
    }

    /// Frequency (Hz) sounded at `fret`.
    pub fn pitch(&self, fret: u32, a4_pitch: f64) -> Option<f64> {
        self.note_index(fret).map(|i| notes::pitch_of(i, a4_pitch))
    }

    pub fn symbol(&self) -> String {
        notes::symbol(self.root)
    }

    pub fn root_name(&self) -> &'static str {
        notes::root_name(self.root)
    }
}

// ─── Instrument / category ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    #[default]
    Guitar,
    Bass,
}

impl Instrument {
    pub fn default_string_count(&self) -> usize {
        match self {
            Instrument::Guitar => 6,
            Instrument::Bass => 4,
        }
    }

    /// Case-insensitive lookup; anything unrecognised is a guitar.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("bass") {
            Instrument::Bass
        } else {
            Instrument::Guitar
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Common,
    Power,
    Open,
    Misc,
}

// ─── Tuning ─────────────────────────────────────────────────────────────────

/// An ordered, immutable set of strings, highest-pitched first.
///
/// Every transforming operation returns a new `Tuning`. Derived tunings
/// (transposed or with one string replaced) keep the instrument but drop
/// the name and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TuningRecord", into = "TuningRecord")]
pub struct Tuning {
    name: Option<String>,
    instrument: Instrument,
    category: Option<Category>,
    strings: Vec<InstrumentString>,
}

impl Tuning {
    pub fn new(
        name: Option<String>,
        instrument: Instrument,
        category: Option<Category>,
        strings: Vec<InstrumentString>,
    ) -> Result<Self, MusicError> {
        if strings.is_empty() {
            return Err(MusicError::EmptyTuning);
        }
        Ok(Self {
            name,
            instrument,
            category,
            strings,
        })
    }

    /// Build from space-separated symbols, e.g. `"E4 B3 G3 D3 A2 E2"`.
    pub fn from_symbols(
        name: Option<&str>,
        instrument: Instrument,
        category: Option<Category>,
        symbols: &str,
    ) -> Result<Self, MusicError> {
        let strings = symbols
            .split_whitespace()
            .map(InstrumentString::from_symbol)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name.map(str::to_string), instrument, category, strings)
    }

    /// Named tuning straight from root indices, for static preset tables.
    pub(crate) fn preset(
        name: &str,
        instrument: Instrument,
        category: Category,
        roots: &[i32],
    ) -> Self {
        debug_assert!(!roots.is_empty());
        Self {
            name: Some(name.to_string()),
            instrument,
            category: Some(category),
            strings: roots.iter().copied().map(InstrumentString::new).collect(),
        }
    }

    fn derived(&self, strings: Vec<InstrumentString>) -> Self {
        Self {
            name: None,
            instrument: self.instrument,
            category: None,
            strings,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn string(&self, index: usize) -> Option<InstrumentString> {
        self.strings.get(index).copied()
    }

    pub fn strings(&self) -> &[InstrumentString] {
        &self.strings
    }

    /// Copy with string `index` replaced. None if `index` is out of range.
    pub fn with_string(&self, index: usize, string: InstrumentString) -> Option<Tuning> {
        if index >= self.strings.len() {
            return None;
        }
        let mut strings = self.strings.clone();
        strings[index] = string;
        Some(self.derived(strings))
    }

    /// Every string one semitone up. Range checks are the caller's job.
    pub fn higher(&self) -> Tuning {
        self.derived(self.strings.iter().map(|s| s.higher()).collect())
    }

    /// Every string one semitone down.
    pub fn lower(&self) -> Tuning {
        self.derived(self.strings.iter().map(|s| s.lower()).collect())
    }

    /// Lowest-rooted string; the first one wins a tie.
    pub fn min(&self) -> InstrumentString {
        self.strings
            .iter()
            .copied()
            .reduce(|best, s| if s.root < best.root { s } else { best })
            .unwrap_or_default()
    }

    /// Highest-rooted string; the first one wins a tie.
    pub fn max(&self) -> InstrumentString {
        self.strings
            .iter()
            .copied()
            .reduce(|best, s| if s.root > best.root { s } else { best })
            .unwrap_or_default()
    }

    /// Index of the string whose root is nearest the continuous note
    /// position `note`. The first string wins a tie.
    pub fn closest_string(&self, note: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, s) in self.strings.iter().enumerate() {
            let dist = (s.root as f64 - note).abs();
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        best
    }

    /// Same instrument and same strings in the same order. Name and
    /// category are ignored.
    pub fn equivalent_to(&self, other: &Tuning) -> bool {
        self.instrument == other.instrument && self.strings == other.strings
    }

    pub fn has_equivalent_in<'a>(&self, tunings: impl IntoIterator<Item = &'a Tuning>) -> bool {
        self.find_equivalent_in(tunings).is_some()
    }

    pub fn find_equivalent_in<'a>(
        &self,
        tunings: impl IntoIterator<Item = &'a Tuning>,
    ) -> Option<&'a Tuning> {
        tunings.into_iter().find(|t| self.equivalent_to(t))
    }

    /// Space-separated symbols, highest string first: `"E4 B3 G3 D3 A2 E2"`.
    pub fn full_string(&self) -> String {
        self.strings
            .iter()
            .map(|s| s.symbol())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Root names low to high without octaves: `"EADGBE"`.
    pub fn compact_string(&self) -> String {
        self.strings.iter().rev().map(|s| s.root_name()).collect()
    }
}

impl Default for InstrumentString {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for Tuning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.compact_string()),
        }
    }
}

// ─── Serialized form ────────────────────────────────────────────────────────

/// One `tunings[]` record: `{name?, instrument, category?, strings}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub instrument: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strings: Option<String>,
}

impl TryFrom<TuningRecord> for Tuning {
    type Error = MusicError;

    fn try_from(r: TuningRecord) -> Result<Self, Self::Error> {
        let strings = r.strings.as_deref().unwrap_or("");
        Tuning::from_symbols(
            r.name.as_deref(),
            Instrument::from_name(&r.instrument),
            r.category,
            strings,
        )
    }
}

impl From<Tuning> for TuningRecord {
    fn from(t: Tuning) -> Self {
        let strings = Some(t.full_string());
        let instrument = match t.instrument {
            Instrument::Guitar => "GUITAR",
            Instrument::Bass => "BASS",
        };
        TuningRecord {
            name: t.name,
            instrument: instrument.to_string(),
            category: t.category,
            strings,
        }
    }
}
