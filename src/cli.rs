//! Command-line interface for sotto.
//!
//! Provides argument parsing using clap derive macros.

use clap::Parser;
use std::path::PathBuf;

/// Real-time transcription with speaker diarization
#[derive(Parser, Debug)]
#[command(name = "sotto", version, about = "Real-time transcription with speaker diarization")]
pub struct Cli {
    /// WAV file to transcribe (omit for live capture)
    #[arg(value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Audio input device id (see --list-devices; default: system default)
    #[arg(long, value_name = "ID")]
    pub device: Option<String>,

    /// List available audio input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// ASR model name or path (default: tiny.en)
    #[arg(long, value_name = "NAME-OR-PATH")]
    pub model: Option<String>,

    /// Language code for transcription (e.g. en, de; auto = detect)
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Stop after this much audio (e.g. 30, 90s, 5m, 1h30m)
    #[arg(long, value_name = "N", value_parser = parse_limit_secs)]
    pub limit_seconds: Option<u64>,

    /// Disable transcription (diarization frames only)
    #[arg(long)]
    pub no_asr: bool,

    /// Disable speaker diarization
    #[arg(long)]
    pub no_diar: bool,

    /// Maximum number of speakers to track (1-10)
    #[arg(long, value_name = "N")]
    pub max_speakers: Option<usize>,

    /// Inference threads (0 = auto)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Record the captured 16kHz stream to this WAV file
    #[arg(long, value_name = "PATH")]
    pub save_audio: Option<PathBuf>,

    /// Pace file input at real time, as if it were playing aloud
    #[arg(long)]
    pub play_file: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: status updates, -vv: full diagnostics)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse an audio-limit string into seconds.
///
/// Accepts bare numbers (seconds) and any duration format `humantime`
/// understands: single-unit (`30s`, `5m`, `2h`) and compound (`1h30m`).
fn parse_limit_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}
