//! Edna, a fully local voice assistant.
//!
//! Single executable, no flags. Configuration comes from the `EDNA_*`
//! environment (see `edna_core::config`) plus an optional settings file in
//! the top directory. Diagnostics go to stderr; transcripts and replies go
//! to stdout. Exit code 0 on SIGINT shutdown, 1 on fatal initialization or
//! capture failure.

mod settings;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use edna_core::{
    create_audio_ring, AudioCapture, ChatterHandle, CommandPlayer, EdnaConfig, EdnaEngine,
    EngineParts, LlamaChatter, MicFrameSource, SpeechStage, SynthWorker, WebRtcVad,
    WhisperTranscriber,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("edna=info,edna_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = EdnaConfig::from_env().context("bad environment")?;
    let settings_path = settings::default_settings_path(&config.top_dir);
    settings::load_settings(&settings_path).apply(&mut config);

    // Heavyweight engines load up front so a missing model fails fast.
    let transcriber = WhisperTranscriber::new(&config.asr).context("speech recognizer init")?;
    let chatter = ChatterHandle::new(LlamaChatter::new(&config.brain).context("language model init")?);
    let speech = SpeechStage::new(
        Box::new(SynthWorker::new(config.speech.clone())),
        Box::new(CommandPlayer::new(&config.speech)),
    );
    let vad = WebRtcVad::new(config.engine.vad_mode);

    let engine = EdnaEngine::new(config.engine.clone());
    let running = engine.running();

    // The cpal stream must be created and dropped on this thread; only the
    // ring consumer crosses into the capture loop.
    let (producer, consumer) = create_audio_ring();
    let capture = AudioCapture::open(
        producer,
        Arc::clone(&running),
        config.engine.capture_device.as_deref(),
    )
    .context("capture device open")?;
    let frames = MicFrameSource::new(
        consumer,
        Arc::clone(&running),
        capture.sample_rate,
        config.engine.sample_rate,
    )
    .context("frame source init")?;

    let sigint_running = Arc::clone(&running);
    ctrlc::set_handler(move || {
        sigint_running.store(false, Ordering::SeqCst);
    })
    .context("SIGINT handler install")?;

    engine.machine().set_observer(Arc::new(|from, to, event, note| {
        if note.is_empty() {
            info!(target: "edna::sm", "{} --({})--> {}", from.as_str(), event.as_str(), to.as_str());
        } else {
            info!(target: "edna::sm", "{} --({})--> {} : {note}", from.as_str(), event.as_str(), to.as_str());
        }
    }));

    engine.run(EngineParts {
        frames: Box::new(frames),
        vad: Box::new(vad),
        transcriber: Box::new(transcriber),
        chatter,
        speech,
    })?;

    drop(capture);
    Ok(())
}
