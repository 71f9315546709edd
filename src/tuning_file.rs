//! Tunings document: the list of tunings a front-end offers, as JSON.
//!
//! ```json
//! {"tunings": [
//!   {"instrument": "chromatic"},
//!   {"name": "Standard", "instrument": "GUITAR", "category": "COMMON",
//!    "strings": "E4 B3 G3 D3 A2 E2"}
//! ]}
//! ```

use crate::error::TuningIoError;
use crate::tuning::{Tuning, TuningRecord};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

const CHROMATIC: &str = "chromatic";

/// One entry of the list: a tuning, or the chromatic (any-note) mode.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningEntry {
    Chromatic,
    Instrument(Tuning),
}

impl TuningEntry {
    pub fn name(&self) -> String {
        match self {
            TuningEntry::Chromatic => "Chromatic".to_string(),
            TuningEntry::Instrument(t) => t.to_string(),
        }
    }

    /// Stable identifier, e.g. `"chromatic"` or `"GUITAR E4 B3 G3 D3 A2 E2"`.
    pub fn key(&self) -> String {
        match self {
            TuningEntry::Chromatic => CHROMATIC.to_string(),
            TuningEntry::Instrument(t) => {
                let record = TuningRecord::from(t.clone());
                format!("{} {}", record.instrument, t.full_string())
            }
        }
    }

    pub fn tuning(&self) -> Option<&Tuning> {
        match self {
            TuningEntry::Chromatic => None,
            TuningEntry::Instrument(t) => Some(t),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TuningsDocument {
    #[serde(default)]
    tunings: Vec<TuningRecord>,
}

pub fn parse_tunings(json: &str) -> Result<Vec<TuningEntry>, TuningIoError> {
    let doc: TuningsDocument = serde_json::from_str(json)?;
    doc.tunings
        .into_iter()
        .map(|record| {
            if record.instrument.eq_ignore_ascii_case(CHROMATIC) {
                return Ok(TuningEntry::Chromatic);
            }
            if record.strings.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(TuningIoError::MissingStrings);
            }
            Ok(TuningEntry::Instrument(Tuning::try_from(record)?))
        })
        .collect()
}

pub fn encode_tunings(entries: &[TuningEntry]) -> Result<String, TuningIoError> {
    let tunings = entries
        .iter()
        .map(|e| match e {
            TuningEntry::Chromatic => TuningRecord {
                name: None,
                instrument: CHROMATIC.to_string(),
                category: None,
                strings: None,
            },
            TuningEntry::Instrument(t) => TuningRecord::from(t.clone()),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&TuningsDocument { tunings })?)
}

pub fn load_tunings(path: &Path) -> Result<Vec<TuningEntry>, TuningIoError> {
    let data = std::fs::read_to_string(path)?;
    let entries = parse_tunings(&data)?;
    info!("Loaded {} tunings from {:?}", entries.len(), path);
    Ok(entries)
}

pub fn save_tunings(path: &Path, entries: &[TuningEntry]) -> Result<(), TuningIoError> {
    std::fs::write(path, encode_tunings(entries)?)?;
    info!("Saved {} tunings to {:?}", entries.len(), path);
    Ok(())
}
