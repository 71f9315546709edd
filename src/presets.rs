//! Built-in tuning library.
//!
//! Roots are semitones from A4, listed highest-pitched string first
//! (string 1 = thinnest).

use crate::tuning::{Category, Instrument, Tuning};

/// Standard guitar tuning.
///
///   1:E4  2:B3  3:G3  4:D3  5:A2  6:E2
pub fn standard() -> Tuning {
    //        E4  B3   G3   D3   A2   E2
    let roots = [-5, -10, -14, -19, -24, -29];
    Tuning::preset("Standard", Instrument::Guitar, Category::Common, &roots)
}

/// Standard with string 6 dropped a whole step (E2 → D2).
pub fn drop_d() -> Tuning {
    //        E4  B3   G3   D3   A2   D2
    let roots = [-5, -10, -14, -19, -24, -31];
    Tuning::preset("Drop D", Instrument::Guitar, Category::Common, &roots)
}

/// Every string a semitone below standard (Eb tuning).
pub fn half_step_down() -> Tuning {
    //        D#4 A#3  F#3  C#3  G#2  D#2
    let roots = [-6, -11, -15, -20, -25, -30];
    Tuning::preset("Half Step Down", Instrument::Guitar, Category::Common, &roots)
}

/// Drop D taken down a further whole step.
pub fn drop_c() -> Tuning {
    //        D4  A3   F3   C3   G2   C2
    let roots = [-7, -12, -16, -21, -26, -33];
    Tuning::preset("Drop C", Instrument::Guitar, Category::Power, &roots)
}

pub fn open_g() -> Tuning {
    //        D4  B3   G3   D3   G2   D2
    let roots = [-7, -10, -14, -19, -26, -31];
    Tuning::preset("Open G", Instrument::Guitar, Category::Open, &roots)
}

pub fn open_d() -> Tuning {
    //        D4  A3   F#3  D3   A2   D2
    let roots = [-7, -12, -15, -19, -24, -31];
    Tuning::preset("Open D", Instrument::Guitar, Category::Open, &roots)
}

/// Open E: strings 3, 4 and 5 raised from standard (G→G#, D→E, A→B).
pub fn open_e() -> Tuning {
    //        E4  B3   G#3  E3   B2   E2
    let roots = [-5, -10, -13, -17, -22, -29];
    Tuning::preset("Open E", Instrument::Guitar, Category::Open, &roots)
}

pub fn dadgad() -> Tuning {
    //        D4  A3   G3   D3   A2   D2
    let roots = [-7, -12, -14, -19, -24, -31];
    Tuning::preset("DADGAD", Instrument::Guitar, Category::Misc, &roots)
}

/// Four-string bass.
///
///   1:G2  2:D2  3:A1  4:E1
pub fn bass_standard() -> Tuning {
    //         G2   D2   A1   E1
    let roots = [-26, -31, -36, -41];
    Tuning::preset("Bass Standard", Instrument::Bass, Category::Common, &roots)
}

/// Four-string bass with string 4 at D1, the lowest note the tuner handles.
pub fn bass_drop_d() -> Tuning {
    //         G2   D2   A1   D1
    let roots = [-26, -31, -36, -43];
    Tuning::preset("Bass Drop D", Instrument::Bass, Category::Common, &roots)
}

/// Every preset, guitar first.
pub fn all() -> Vec<Tuning> {
    vec![
        standard(),
        drop_d(),
        half_step_down(),
        drop_c(),
        open_g(),
        open_d(),
        open_e(),
        dadgad(),
        bass_standard(),
        bass_drop_d(),
    ]
}

/// Case-insensitive lookup by name. Spaces, dashes and underscores are
/// interchangeable, so `drop-d` finds "Drop D".
pub fn find(name: &str) -> Option<Tuning> {
    let key = normalize(name);
    all()
        .into_iter()
        .find(|t| t.name().map(normalize).as_deref() == Some(key.as_str()))
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}
