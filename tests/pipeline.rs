//! End-to-end pipeline scenarios driven by mock sources, a scripted ASR
//! engine, and the deterministic amplitude-keyed speaker embedder.

use sotto::asr::{AsrSegment, MockAsrEngine};
use sotto::audio::{AudioQueue, MockAudioSource};
use sotto::config::TranscriptionConfig;
use sotto::controller::{SessionState, TranscriptionChunk, TranscriptionController};
use sotto::diar::MockSpeakerEmbedder;

/// One second of constant-amplitude 16kHz audio.
fn second(amplitude: i16) -> Vec<i16> {
    vec![amplitude; 16_000]
}

/// Session invariants that hold for every run: chunks are time-ordered and
/// non-overlapping, ids strictly increase, and the transcript never covers
/// more time than the audio contained.
fn assert_session_invariants(chunks: &[TranscriptionChunk], total_audio_ms: u64) {
    for pair in chunks.windows(2) {
        assert!(
            pair[0].end_ms <= pair[1].start_ms,
            "chunks overlap: {:?} then {:?}",
            pair[0],
            pair[1]
        );
        assert!(pair[0].id < pair[1].id, "ids not strictly increasing");
    }
    let covered: u64 = chunks.iter().map(|c| c.duration_ms()).sum();
    assert!(
        covered <= total_audio_ms,
        "transcript covers {}ms of {}ms of audio",
        covered,
        total_audio_ms
    );
    for chunk in chunks {
        assert!(chunk.start_ms < chunk.end_ms);
    }
}

fn run_to_completion(
    controller: &mut TranscriptionController,
    config: TranscriptionConfig,
) -> Vec<TranscriptionChunk> {
    controller.start(config).expect("start failed");
    controller.wait();
    controller.all_chunks()
}

#[test]
fn two_alternating_speakers_are_separated_after_recluster() {
    // Speaker A (quiet) 0-5s and 10-15s; speaker B (loud) 5-10s and 15-20s
    let mut audio = Vec::new();
    for _ in 0..5 {
        audio.push(second(1000));
    }
    for _ in 0..5 {
        audio.push(second(8000));
    }
    for _ in 0..5 {
        audio.push(second(1000));
    }
    for _ in 0..5 {
        audio.push(second(8000));
    }

    // One utterance per turn. Window 10s/overlap 5s: windows are
    // [0,10), [5,15), [10,20); everything past the first emit zone holds
    // one window before release.
    let engine = MockAsrEngine::new().with_script(vec![
        vec![
            AsrSegment::new("alpha", 500, 4_500),
            AsrSegment::new("bravo", 5_200, 9_800),
        ],
        vec![AsrSegment::new("charlie", 5_200, 9_700)],
        vec![AsrSegment::new("delta", 5_300, 9_800)],
    ]);

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(MockAudioSource::new().with_chunks(audio)));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
    let reclassifications = controller.subscribe_reclassifications();

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert_session_invariants(&chunks, 20_000);
    assert_eq!(chunks.len(), 4);

    // Exactly two distinct speakers after the terminal recluster
    let mut speakers: Vec<i32> = chunks.iter().map(|c| c.speaker_id).collect();
    let by_text = |t: &str| chunks.iter().find(|c| c.text == t).unwrap();
    speakers.sort_unstable();
    speakers.dedup();
    assert_eq!(speakers.len(), 2, "expected two speakers, got {:?}", chunks);

    // A-turns share one label, B-turns the other
    assert_eq!(by_text("alpha").speaker_id, by_text("charlie").speaker_id);
    assert_eq!(by_text("bravo").speaker_id, by_text("delta").speaker_id);
    assert_ne!(by_text("alpha").speaker_id, by_text("bravo").speaker_id);

    // The online pass mislabels at least one B-turn (hysteresis); the
    // terminal recluster must have corrected it with an event.
    let events: Vec<_> = reclassifications.try_iter().collect();
    assert!(!events.is_empty(), "expected terminal reclassification");
    for event in &events {
        assert_eq!(event.reason, "terminal_recluster");
        assert_ne!(event.old_speaker_id, event.new_speaker_id);
    }
}

#[test]
fn overlap_zone_phrase_is_emitted_exactly_once() {
    // Window 1 segments the phrase at 2-6s (held); window 2, starting at
    // 5s, re-produces a fragment of it which the watermark must drop.
    let engine = MockAsrEngine::new().with_script(vec![
        vec![AsrSegment::new("the quick brown fox", 2_000, 6_000)],
        vec![AsrSegment::new("the quick brown fox", 0, 1_000)],
    ]);

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 15]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert_session_invariants(&chunks, 15_000);

    let occurrences = chunks
        .iter()
        .filter(|c| c.text.contains("quick brown fox"))
        .count();
    assert_eq!(occurrences, 1, "phrase duplicated or lost: {:?}", chunks);
}

#[test]
fn queue_drops_oldest_under_backpressure() {
    // Queue-level contract: 120 pushes into a capacity-50 queue drop the
    // 70 oldest; survivors are a contiguous suffix in push order.
    let queue = AudioQueue::with_capacity(50);
    for i in 0..120u64 {
        queue.push(sotto::audio::AudioChunk {
            sequence: i,
            sample_rate: 16_000,
            channels: 1,
            samples: vec![0i16; 320],
        });
    }
    assert!(queue.dropped_count() >= 70);

    let mut expected = 120 - queue.len() as u64;
    queue.stop();
    while let Some(chunk) = queue.pop() {
        assert_eq!(chunk.sequence, expected);
        expected += 1;
    }
    assert_eq!(expected, 120);
}

#[test]
fn pipeline_recovers_from_backpressure() {
    // A slow engine plus burst capture overflows the queue; the session
    // must survive, keep ordering, and finish cleanly.
    let engine = MockAsrEngine::new()
        .with_script(vec![vec![AsrSegment::new("survived", 100, 900)]])
        .with_latency_ms(300);
    let engine_handle = engine.clone();

    let mut config = TranscriptionConfig::default();
    config.window_ms = 1_000;
    config.overlap_ms = 500;

    let mut controller = TranscriptionController::new();
    // 6s of audio delivered as a burst of 20ms chunks
    controller.set_source(Box::new(
        MockAudioSource::new().with_samples(vec![3000i16; 96_000]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, config);
    assert_session_invariants(&chunks, 6_000);

    let metrics = controller.metrics();
    assert!(
        metrics.dropped_chunks > 0,
        "expected overflow, metrics: {:?}",
        metrics
    );
    assert!(engine_handle.calls() >= 1);
    assert!(!controller.is_running());
}

#[test]
fn pause_and_resume_do_not_corrupt_the_session() {
    let engine = MockAsrEngine::new().with_script(vec![vec![AsrSegment::new(
        "paused and resumed",
        100,
        900,
    )]]);

    let mut config = TranscriptionConfig::default();
    config.window_ms = 1_000;
    config.overlap_ms = 500;

    let mut controller = TranscriptionController::new();
    // 2s of audio paced at ~real time in 20ms chunks
    controller.set_source(Box::new(
        MockAudioSource::new()
            .with_samples(vec![3000i16; 32_000])
            .with_chunk_delay_ms(5),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    controller.start(config).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(50));
    controller.pause().unwrap();
    assert_eq!(controller.status().state, SessionState::Paused);
    std::thread::sleep(std::time::Duration::from_millis(100));
    controller.resume().unwrap();
    controller.wait();

    let chunks = controller.all_chunks();
    assert_session_invariants(&chunks, 2_000);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "paused and resumed");
    assert!(!controller.is_running());
}

#[test]
fn ambiguous_opening_is_reclassified_at_terminal_time() {
    // The first 3s are an untranscribed speaker (quiet); the first text
    // comes from the loud speaker, which the online clusterer seeds as S0.
    // Frame evidence makes the quiet opening cluster 0, so the terminal
    // pass must move the chunk to S1.
    let mut audio = Vec::new();
    for _ in 0..3 {
        audio.push(second(1000));
    }
    for _ in 0..10 {
        audio.push(second(8000));
    }

    // Window 2s/overlap 1s: the third window covers [2,4)s
    let engine = MockAsrEngine::new().with_script(vec![
        vec![],
        vec![],
        vec![AsrSegment::new("first words", 1_200, 1_900)],
    ]);

    let mut config = TranscriptionConfig::default();
    config.window_ms = 2_000;
    config.overlap_ms = 1_000;

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(MockAudioSource::new().with_chunks(audio)));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunk_rx = controller.subscribe_chunks();
    let reclassification_rx = controller.subscribe_reclassifications();

    let chunks = run_to_completion(&mut controller, config);
    assert_session_invariants(&chunks, 13_000);
    assert_eq!(chunks.len(), 1);

    // As originally emitted: speaker 0
    let emitted: Vec<_> = chunk_rx.try_iter().collect();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].speaker_id, 0);

    // After the terminal pass: speaker 1, with a matching event
    assert_eq!(chunks[0].speaker_id, 1);
    assert!(chunks[0].finalized);

    let events: Vec<_> = reclassification_rx.try_iter().collect();
    let flip = events
        .iter()
        .find(|e| e.old_speaker_id == 0 && e.new_speaker_id == 1)
        .expect("expected a 0 -> 1 reclassification");
    assert!(flip.chunk_ids.contains(&chunks[0].id));
    assert_eq!(flip.reason, "terminal_recluster");
}

#[test]
fn held_segment_is_emitted_after_next_window() {
    // First window's segment crosses the 5s emit boundary and must wait
    // for the second window; the second window's own segment follows it.
    let engine = MockAsrEngine::new().with_script(vec![
        vec![AsrSegment::new("early", 4_700, 5_300)],
        vec![AsrSegment::new("later", 300, 2_100)],
    ]);
    let engine_handle = engine.clone();

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 15]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert_session_invariants(&chunks, 15_000);

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "early");
    assert_eq!(chunks[0].start_ms, 4_700);
    assert_eq!(chunks[0].end_ms, 5_300);
    assert_eq!(chunks[1].text, "later");
    assert_eq!(chunks[1].start_ms, 5_300);
    assert_eq!(chunks[1].end_ms, 7_100);

    // Both windows ran; the watermark ended past the second segment
    assert_eq!(engine_handle.calls(), 2);
}

#[test]
fn silent_audio_produces_no_chunks_and_no_errors() {
    let engine = MockAsrEngine::new();
    let engine_handle = engine.clone();

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(0); 12]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
    let errors = controller.subscribe_errors();

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert!(chunks.is_empty());
    // The silence gate skips the engine entirely
    assert_eq!(engine_handle.calls(), 0);
    assert!(errors.try_iter().next().is_none());
}

#[test]
fn single_chunk_session_terminates_cleanly() {
    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(MockAudioSource::new().with_chunks(vec![vec![42i16]])));
    controller.set_engine(Box::new(MockAsrEngine::new()));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert!(chunks.is_empty());
    assert!(!controller.is_running());
}

#[test]
fn exactly_one_window_flushes_held_segments() {
    // 10s of audio = exactly one full window; the held tail segment is
    // released by the end-of-stream sequence.
    let engine = MockAsrEngine::new().with_script(vec![vec![
        AsrSegment::new("emitted now", 1_000, 2_000),
        AsrSegment::new("held until the end", 6_000, 9_000),
    ]]);
    let engine_handle = engine.clone();

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 10]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert_session_invariants(&chunks, 10_000);

    assert_eq!(engine_handle.calls(), 1);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "emitted now");
    assert_eq!(chunks[1].text, "held until the end");
}

#[test]
fn audio_shorter_than_overlap_takes_the_flush_path() {
    // 3s of audio never fills the 10s window; the drain/flush path
    // transcribes the whole tail.
    let engine =
        MockAsrEngine::new().with_script(vec![vec![AsrSegment::new("short tail", 500, 2_500)]]);
    let engine_handle = engine.clone();

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 3]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, TranscriptionConfig::default());
    assert_session_invariants(&chunks, 3_000);

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "short tail");
    assert_eq!(chunks[0].start_ms, 500);
    // The flush saw the full 3s tail
    assert_eq!(engine_handle.call_lengths(), vec![48_000]);
}

#[test]
fn disabling_reclassification_finalizes_immediately() {
    let engine =
        MockAsrEngine::new().with_script(vec![vec![AsrSegment::new("final at once", 100, 900)]]);

    let mut config = TranscriptionConfig::default();
    config.window_ms = 2_000;
    config.overlap_ms = 1_000;
    config.enable_reclassification = false;

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 4]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
    let chunk_rx = controller.subscribe_chunks();
    let reclassification_rx = controller.subscribe_reclassifications();

    let chunks = run_to_completion(&mut controller, config);
    assert_eq!(chunks.len(), 1);

    let emitted: Vec<_> = chunk_rx.try_iter().collect();
    assert!(emitted[0].finalized, "chunk should be born finalized");
    assert!(reclassification_rx.try_iter().next().is_none());
}

#[test]
fn deferred_chunks_arrive_finalized_when_partials_disabled() {
    let engine =
        MockAsrEngine::new().with_script(vec![vec![AsrSegment::new("deferred", 100, 900)]]);

    let mut config = TranscriptionConfig::default();
    config.window_ms = 2_000;
    config.overlap_ms = 1_000;
    config.enable_partial_results = false;

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 4]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
    let chunk_rx = controller.subscribe_chunks();

    controller.start(config).unwrap();
    controller.wait();

    // The only chunk event arrives after the terminal pass, finalized
    let emitted: Vec<_> = chunk_rx.try_iter().collect();
    assert_eq!(emitted.len(), 1);
    assert!(emitted[0].finalized);
}

#[test]
fn engine_failure_is_a_warning_not_a_crash() {
    let engine = MockAsrEngine::new()
        .with_script(vec![
            vec![AsrSegment::new("before failure", 100, 900)],
            vec![],
            vec![AsrSegment::new("after failure", 100, 900)],
        ])
        .with_failure_on_call(1);

    // Window 2s with 0.5s overlap: every window has at least 1.5s of new
    // audio, so the engine runs (and fails) on the second window too.
    let mut config = TranscriptionConfig::default();
    config.window_ms = 2_000;
    config.overlap_ms = 500;

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new().with_chunks(vec![second(3000); 4]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
    let errors = controller.subscribe_errors();

    let chunks = run_to_completion(&mut controller, config);

    // The failed window was skipped; the session continued
    assert!(chunks.iter().any(|c| c.text == "before failure"));
    let warnings: Vec<_> = errors.try_iter().collect();
    assert!(warnings
        .iter()
        .any(|e| e.severity == sotto::controller::Severity::Warning));
    assert!(!controller.is_running());
}

#[test]
fn speaker_stats_follow_reclassification() {
    // Same shape as the ambiguous-opening scenario: stats must be
    // rebuilt under the corrected labels.
    let mut audio = Vec::new();
    for _ in 0..3 {
        audio.push(second(1000));
    }
    for _ in 0..10 {
        audio.push(second(8000));
    }
    let engine = MockAsrEngine::new().with_script(vec![
        vec![],
        vec![],
        vec![AsrSegment::new("first words", 1_200, 1_900)],
    ]);

    let mut config = TranscriptionConfig::default();
    config.window_ms = 2_000;
    config.overlap_ms = 1_000;

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(MockAudioSource::new().with_chunks(audio)));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, config);
    assert_eq!(chunks[0].speaker_id, 1);

    let stats = controller.speaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].speaker_id, 1);
    assert_eq!(stats[0].segment_count, 1);
    assert_eq!(stats[0].last_text, "first words");
    assert_eq!(stats[0].total_speaking_time_ms, 700);
}

#[test]
fn resampled_source_feeds_the_pipeline() {
    // A 48kHz source is resampled to 16kHz before windowing: 2s of 48k
    // audio still produces a 2s window timeline.
    let engine =
        MockAsrEngine::new().with_script(vec![vec![AsrSegment::new("from 48k", 100, 900)]]);
    let engine_handle = engine.clone();

    let mut config = TranscriptionConfig::default();
    config.window_ms = 2_000;
    config.overlap_ms = 1_000;

    let mut controller = TranscriptionController::new();
    controller.set_source(Box::new(
        MockAudioSource::new()
            .with_sample_rate(48_000)
            .with_chunks(vec![vec![3000i16; 48_000]; 3]),
    ));
    controller.set_engine(Box::new(engine));
    controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

    let chunks = run_to_completion(&mut controller, config);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "from 48k");
    // The engine saw 16kHz windows: 2s = 32000 samples
    assert_eq!(engine_handle.call_lengths()[0], 32_000);

    let metrics = controller.metrics();
    assert_eq!(metrics.audio_processed_ms, 3_000);
}
