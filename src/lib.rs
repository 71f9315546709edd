pub mod acquisition;
pub mod config;
pub mod console_display;
pub mod dsp;
pub mod error;
pub mod notes;
pub mod pitch;
pub mod presets;
pub mod simulator;
pub mod sustain;
pub mod tuner;
pub mod tuning;
pub mod tuning_file;
pub mod types;
pub mod wav_player;

#[cfg(feature = "audio")]
pub mod audio_input;
