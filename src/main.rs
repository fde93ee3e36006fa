//! Terminal front-end: transcribe a WAV file or live capture, printing
//! speaker-tagged chunks as they are emitted.
//!
//! Exit codes: 0 on success, 1 on initialization failure, 2 when processing
//! produced no output.

use clap::Parser;
use sotto::audio::source::{SourceConfig, TimeLimitedSource};
use sotto::audio::{open_source, WavFileSource};
use sotto::cli::Cli;
use sotto::config::TranscriptionConfig;
use sotto::controller::{SessionState, Severity, TranscriptionController};

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    std::process::exit(match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sotto: {}", e);
            1
        }
    });
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut controller = TranscriptionController::new();

    if cli.list_devices {
        for device in controller.list_audio_devices()? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!(
                "{:<32} {} {}Hz{}",
                device.id, device.driver, device.native_rate_hz, marker
            );
        }
        return Ok(0);
    }

    let mut config = match &cli.config {
        Some(path) => TranscriptionConfig::load(path)?,
        None => TranscriptionConfig::load_or_default(&TranscriptionConfig::default_path())?,
    }
    .with_env_overrides();

    if let Some(model) = &cli.model {
        config.asr_model = model.clone();
    }
    if let Some(language) = &cli.language {
        config.language = language.clone();
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(max_speakers) = cli.max_speakers {
        config.max_speakers = max_speakers;
    }
    config.enable_asr = !cli.no_asr;
    config.enable_diarization = !cli.no_diar;
    config.save_audio_path = cli.save_audio.clone();

    // Resolve the audio source: positional file beats device selection
    if let Some(path) = &cli.input {
        let source_config = SourceConfig {
            file_path: Some(path.clone()),
            playback_to_output: cli.play_file,
            ..SourceConfig::default()
        };
        let source = WavFileSource::open(path, &source_config)?;
        log::info!(
            "transcribing {} ({:.1}s at {}Hz)",
            path.display(),
            source.duration_seconds(),
            source.sample_rate()
        );
        match cli.limit_seconds {
            Some(limit) => {
                controller.set_source(Box::new(TimeLimitedSource::new(source, limit)))
            }
            None => controller.set_source(Box::new(source)),
        }
    } else {
        if let Some(device) = &cli.device {
            controller.select_audio_device(device)?;
        }
        if let Some(limit) = cli.limit_seconds {
            let source_config = SourceConfig {
                device_id: cli.device.clone().unwrap_or_default(),
                ..SourceConfig::default()
            };
            let source = open_source(&source_config)?;
            controller.set_source(Box::new(TimeLimitedSource::new(source, limit)));
        }
    }

    let chunks = controller.subscribe_chunks();
    let reclassifications = controller.subscribe_reclassifications();
    let errors = controller.subscribe_errors();
    let status_rx = controller.subscribe_status();

    let asr_enabled = config.enable_asr;
    controller.start(config)?;

    // Printing loop: drain events until the session reaches a terminal state
    let mut chunks_printed = 0u64;
    let mut terminal_state = None;
    while terminal_state.is_none() {
        crossbeam_channel::select! {
            recv(chunks) -> chunk => {
                if let Ok(chunk) = chunk {
                    println!(
                        "[{:>7.1}s] [S{}] {}",
                        chunk.start_ms as f64 / 1000.0,
                        chunk.speaker_id,
                        chunk.text
                    );
                    chunks_printed += 1;
                }
            }
            recv(reclassifications) -> event => {
                if let Ok(event) = event {
                    eprintln!(
                        "sotto: reassigned {} chunk(s) S{} -> S{} ({})",
                        event.chunk_ids.len(),
                        event.old_speaker_id,
                        event.new_speaker_id,
                        event.reason
                    );
                }
            }
            recv(errors) -> error => {
                if let Ok(error) = error {
                    let tag = match error.severity {
                        Severity::Warning => "warning",
                        Severity::Error => "error",
                        Severity::Fatal => "fatal",
                    };
                    eprintln!("sotto: {}: {} ({})", tag, error.message, error.details);
                }
            }
            recv(status_rx) -> status => {
                if let Ok(status) = status {
                    log::info!(
                        "status: {} rtf={:.2} buffered={}ms",
                        status.state, status.realtime_factor, status.audio_buffer_ms
                    );
                    if matches!(status.state, SessionState::Idle | SessionState::Error) {
                        terminal_state = Some(status.state);
                    }
                }
            }
        }
    }
    controller.stop();

    let metrics = controller.metrics();
    log::info!(
        "processed {} windows, {} segments, rtf {:.2}, {} dropped chunks",
        metrics.windows_processed,
        metrics.segments_processed,
        metrics.realtime_factor,
        metrics.dropped_chunks
    );
    for stats in controller.speaker_stats() {
        log::info!(
            "S{}: {:.1}s over {} segments",
            stats.speaker_id,
            stats.total_speaking_time_ms as f64 / 1000.0,
            stats.segment_count
        );
    }

    if terminal_state == Some(SessionState::Error) {
        return Ok(1);
    }
    if asr_enabled && chunks_printed == 0 {
        return Ok(2);
    }
    Ok(0)
}
