#[cfg(feature = "audio")]
use string_tuner::audio_input::CpalMicrophone;
use string_tuner::acquisition::Microphone;
use string_tuner::config::TunerConfig;
use string_tuner::console_display::ConsoleDisplay;
use string_tuner::presets;
use string_tuner::simulator::{demo_script, ToneMicrophone};
use string_tuner::sustain::TunedSustain;
use string_tuner::tuner::{Tuner, TunerState};
use string_tuner::tuning::{Instrument, Tuning};
use string_tuner::tuning_file::{self, TuningEntry};
use string_tuner::wav_player::WavMicrophone;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "string-tuner")]
#[command(about = "Real-time tuner for guitar, bass and other stringed instruments")]
struct Cli {
    /// JSON config file (see TunerConfig); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective config to this path and continue
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Reference pitch for A4 (Hz)
    #[arg(long)]
    a4: Option<f64>,

    /// Tuning as note symbols, highest string first, e.g. "E4 B3 G3 D3 A2 E2"
    #[arg(long)]
    tuning: Option<String>,

    /// Treat --tuning as a bass tuning
    #[arg(long)]
    bass: bool,

    /// Tuning by name, e.g. "Drop D" (searched in --tunings-file, then the
    /// built-in presets)
    #[arg(long)]
    preset: Option<String>,

    /// JSON tunings document to choose --preset from
    #[arg(long)]
    tunings_file: Option<PathBuf>,

    /// Chromatic mode: tune to the nearest note instead of a string
    #[arg(long)]
    chromatic: bool,

    /// Disable auto-detect; tune string --string (or note --note)
    #[arg(long)]
    manual: bool,

    /// String to select in manual mode (1 = highest-pitched)
    #[arg(long, default_value_t = 1)]
    string: usize,

    /// Note to select in manual chromatic mode, e.g. "A2"
    #[arg(long)]
    note: Option<String>,

    /// Analyse a WAV file instead of a live input
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Loop the WAV file
    #[arg(long)]
    looping: bool,

    /// Use the synthetic tone source (default when no other source is given)
    #[arg(long)]
    tone: bool,

    /// White noise added to the synthetic tone (peak amplitude)
    #[arg(long, default_value_t = 0.0)]
    noise: f32,

    /// Capture from the default input device
    #[cfg(feature = "audio")]
    #[arg(long)]
    mic: bool,

    /// Deliver WAV/tone audio as fast as it can be analysed instead of in
    /// real time
    #[arg(long)]
    fast: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Disable the console display (log output only)
    #[arg(long)]
    no_display: bool,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(msg) => {
            error!("{}", msg);
            std::process::exit(2);
        }
    };
    if let Some(path) = &cli.save_config {
        if let Err(e) = config.save(path) {
            error!("Cannot save config to {:?}: {}", path, e);
        }
    }

    info!("═══════════════════════════════════════════════");
    info!("  STRING TUNER v{}", env!("CARGO_PKG_VERSION"));
    info!("  Tuning: {} ({})", config.tuning, config.tuning.full_string());
    info!(
        "  Mode: {}, {}",
        if config.chromatic { "chromatic" } else { "instrument" },
        if config.auto_detect { "auto-detect" } else { "manual" }
    );
    info!("  A4 = {:.1} Hz", config.a4_pitch);
    info!("═══════════════════════════════════════════════");

    let microphone = select_source(&cli, &config);
    let tuner = Tuner::new(config.clone()).with_microphone(microphone);

    if cli.manual {
        let selected = if config.chromatic {
            match cli.note.as_deref().map(string_tuner::notes::parse_symbol) {
                Some(Ok(note)) => tuner.select_note(note),
                Some(Err(e)) => {
                    error!("{}", e);
                    std::process::exit(2);
                }
                None => tuner.select_note(tuner.snapshot().selected_note),
            }
        } else {
            tuner.select_string(cli.string.saturating_sub(1))
        };
        if let Err(e) = selected {
            error!("{}", e);
            std::process::exit(2);
        }
    }

    let updates = tuner.subscribe();

    // Microphone permission is the host platform's concern; a CLI that was
    // launched has it.
    if let Err(e) = tuner.start(|| true) {
        error!("Cannot start tuner: {}", e);
        std::process::exit(1);
    }

    let deadline = cli
        .seconds
        .map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    let mut sustain = TunedSustain::new(config.tuned_offset_threshold, config.tuned_sustain());
    let mut display = ConsoleDisplay::new(cli.display_hz);
    let mut reported_all_tuned = false;

    loop {
        // Identical states are not republished, so fall back to polling to
        // keep the sustain timer moving while the pitch holds steady.
        let mut state = match updates.recv_timeout(Duration::from_millis(50)) {
            Ok(s) => s,
            Err(RecvTimeoutError::Timeout) => tuner.snapshot(),
            Err(RecvTimeoutError::Disconnected) => break,
        };
        while let Ok(newer) = updates.try_recv() {
            state = newer;
        }

        let now = Instant::now();
        if sustain.update(&state, now) {
            confirm_tuned(&tuner, &state);
        }
        if !cli.no_display {
            display.show(&state, sustain.progress(now));
        }

        if !state.chromatic && state.all_strings_tuned() && !reported_all_tuned {
            info!("All {} strings in tune", state.num_strings());
            reported_all_tuned = true;
        }
        if !state.running {
            if let Some(e) = &state.error {
                error!("Tuner stopped: {}", e);
            }
            break;
        }
        if deadline.map(|d| now >= d).unwrap_or(false) {
            break;
        }
    }

    tuner.stop();
    let last = tuner.snapshot();
    let tuned: Vec<String> = last
        .tuning
        .strings()
        .iter()
        .zip(&last.tuned)
        .map(|(s, &t)| format!("{}{}", s.symbol(), if t { " ✓" } else { "" }))
        .collect();
    info!("Final: {}", tuned.join(", "));
}

fn confirm_tuned(tuner: &Tuner, state: &TunerState) {
    let string = (!state.chromatic).then_some(state.selected_string);
    match tuner.set_tuned(string, true) {
        Ok(()) => info!(
            "{} in tune ({:.2} Hz)",
            string_tuner::notes::symbol(state.target_note()),
            state.frequency.unwrap_or_default()
        ),
        Err(e) => warn!("Could not mark target tuned: {}", e),
    }
}

/// Config file, then flag overrides.
fn build_config(cli: &Cli) -> Result<TunerConfig, String> {
    let mut config = cli
        .config
        .as_deref()
        .and_then(TunerConfig::load)
        .unwrap_or_default();

    if let Some(a4) = cli.a4 {
        if !(a4.is_finite() && a4 > 0.0) {
            return Err(format!("--a4 must be a positive frequency, got {}", a4));
        }
        config = config.with_a4_pitch(a4);
    }

    if let Some(symbols) = &cli.tuning {
        let instrument = if cli.bass { Instrument::Bass } else { Instrument::Guitar };
        let tuning = Tuning::from_symbols(None, instrument, None, symbols)
            .map_err(|e| format!("--tuning: {}", e))?;
        config = config.with_tuning(tuning);
    } else if let Some(name) = &cli.preset {
        match find_named(cli, name)? {
            TuningEntry::Chromatic => config = config.with_chromatic(true),
            TuningEntry::Instrument(t) => config = config.with_tuning(t),
        }
    }

    if cli.chromatic {
        config = config.with_chromatic(true);
    }
    if cli.manual {
        config = config.with_auto_detect(false);
    }
    Ok(config)
}

fn find_named(cli: &Cli, name: &str) -> Result<TuningEntry, String> {
    if let Some(path) = &cli.tunings_file {
        let entries = tuning_file::load_tunings(path).map_err(|e| format!("{:?}: {}", path, e))?;
        if let Some(e) = entries.into_iter().find(|e| e.name().eq_ignore_ascii_case(name)) {
            return Ok(e);
        }
    }
    presets::find(name)
        .map(TuningEntry::Instrument)
        .ok_or_else(|| {
            let known: Vec<String> = presets::all().iter().map(|t| t.to_string()).collect();
            format!("unknown tuning {:?}; built-in: {}", name, known.join(", "))
        })
}

fn select_source(cli: &Cli, config: &TunerConfig) -> Arc<dyn Microphone> {
    #[cfg(feature = "audio")]
    if cli.mic {
        info!("Source: default input device");
        return Arc::new(CpalMicrophone::new());
    }

    if let Some(path) = &cli.wav {
        info!("Source: WAV file {:?}", path);
        return Arc::new(
            WavMicrophone::new(path)
                .with_realtime(!cli.fast)
                .with_looping(cli.looping),
        );
    }

    if !cli.tone {
        info!("No source given, using the synthetic tone demo");
    }
    let mic = ToneMicrophone::new(demo_script(&config.tuning, config.a4_pitch))
        .with_noise(cli.noise)
        .with_realtime(!cli.fast);
    info!("Source: tone demo, {:.1}s", mic.duration_ms() as f64 / 1000.0);
    Arc::new(mic)
}
