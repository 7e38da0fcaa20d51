//! Fireside console host.
//!
//! Wires the engine together for a terminal storytelling session: settings →
//! session config → live client + director, microphone capture gated by the
//! speaking flag, streamed audio into the playback scheduler, finished turns
//! and illustrations rendered to the console.

mod prompt;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info, trace, warn};

use fireside_core::audio::device::list_input_devices;
use fireside_core::live::StubStoryteller;
use fireside_core::{
    CaptureRecorder, DirectorConfig, IllustrationConfig, Illustrator, LiveClient, LiveEvent,
    MeterTap, PlaybackEvent, PlaybackScheduler, RecorderConfig, Role, SessionConfig,
    StoryDirector,
};
use settings::{default_settings_path, illustrations_dir, load_settings};

/// Meter lane carrying the storyteller's output level.
const OUTPUT_LANE: &str = "storyteller-out";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fireside=info".parse().unwrap()),
        )
        .init();

    info!("Fireside starting");

    // The credential is required at process start; nothing works without it.
    let api_key = std::env::var("FIRESIDE_API_KEY")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .context("FIRESIDE_API_KEY (or GEMINI_API_KEY) must be set")?;

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    if !settings_path.exists() {
        if let Err(e) = settings::save_settings(&settings_path, &app_settings) {
            warn!("could not write default settings: {e}");
        }
    }
    info!(
        settings_path = ?settings_path,
        voice = %app_settings.voice,
        story_level = app_settings.story_level,
        listeners = app_settings.listeners.len(),
        response_window_secs = app_settings.response_window_secs,
        "runtime settings loaded"
    );

    for device in list_input_devices() {
        debug!(
            name = %device.name,
            is_default = device.is_default,
            is_recommended = device.is_recommended,
            "input device"
        );
    }

    // ── Session wiring ────────────────────────────────────────────────────
    let instruction = prompt::build_system_instruction(&app_settings);
    let session_config = SessionConfig::for_voice(&app_settings.voice, &instruction);

    let illustrator = Arc::new(Illustrator::new(IllustrationConfig {
        character_notes: prompt::character_notes(&app_settings.listeners),
        ..IllustrationConfig::new(api_key)
    }));

    let tap = Arc::new(MeterTap::new());
    let scheduler = match PlaybackScheduler::open_default(Arc::clone(&tap), OUTPUT_LANE) {
        Ok(s) => Some(Arc::new(s)),
        Err(e) => {
            warn!("playback unavailable, continuing without sound: {e}");
            None
        }
    };

    // The remote live backend plugs in behind LiveTransport; until one is
    // configured the offline storyteller carries the session.
    info!("using the offline storyteller backend");
    let client = LiveClient::new(Box::new(StubStoryteller::default()));

    let director = StoryDirector::new(
        DirectorConfig {
            response_window: Duration::from_secs(app_settings.response_window_secs),
        },
        Some(Arc::clone(&illustrator)),
    );
    director.spawn(client.subscribe());

    // ── Streamed audio → playback ─────────────────────────────────────────
    if let Some(scheduler) = &scheduler {
        let mut events = client.subscribe();
        let scheduler = Arc::clone(scheduler);
        let audio_scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LiveEvent::Audio(bytes)) => audio_scheduler.enqueue(&bytes),
                    Ok(LiveEvent::Close { reason }) => {
                        audio_scheduler.stop();
                        info!(%reason, "session closed, playback stopped");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("audio loop lagged by {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut playback_events = scheduler.subscribe();
        tokio::spawn(async move {
            while let Ok(PlaybackEvent::Completed { seq }) = playback_events.recv().await {
                debug!(seq, "storyteller finished speaking");
            }
        });
    }

    // ── Turn rendering ────────────────────────────────────────────────────
    let user_label = if app_settings.listeners.is_empty() {
        "You".to_string()
    } else {
        app_settings
            .listeners
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(" & ")
    };
    let mut turns = director.subscribe_turns();
    tokio::spawn(async move {
        loop {
            match turns.recv().await {
                Ok(event) => {
                    if event.turn.is_final {
                        let label = match event.turn.role {
                            Role::User => user_label.as_str(),
                            Role::Agent => "Storyteller",
                            Role::System => "System",
                        };
                        println!("{label}: {}", event.turn.text);
                    } else {
                        debug!(role = ?event.turn.role, len = event.turn.text.len(), "turn growing");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("turn rendering lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Illustrations → PNG files ─────────────────────────────────────────
    let mut art = illustrator.subscribe();
    tokio::spawn(async move {
        let dir = illustrations_dir();
        let mut count = 0usize;
        while let Ok(event) = art.recv().await {
            count += 1;
            match save_data_url(&dir, count, &event.data_url) {
                Ok(path) => println!("(illustration saved to {})", path.display()),
                Err(e) => warn!("could not save illustration: {e}"),
            }
        }
    });

    // ── Output level ──────────────────────────────────────────────────────
    let mut volume = tap.subscribe(OUTPUT_LANE);
    tokio::spawn(async move {
        while let Ok(event) = volume.recv().await {
            trace!(seq = event.seq, volume = event.volume, "output level");
        }
    });

    // ── Response-window hint ──────────────────────────────────────────────
    let timer = director.timer();
    let window_secs = app_settings.response_window_secs;
    tokio::spawn(async move {
        let mut was_active = false;
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let active = timer.is_active();
            if active && !was_active {
                println!("(waiting for an answer — {window_secs}s)");
            }
            was_active = active;
        }
    });

    // ── Connect, then open the microphone ─────────────────────────────────
    client.connect(&session_config)?;
    if let Some(scheduler) = &scheduler {
        scheduler.resume();
    }

    let recorder = CaptureRecorder::new(RecorderConfig::default());
    match recorder.start_with_device(app_settings.preferred_input_device.clone()) {
        Ok(()) => {
            director.forward_capture(recorder.subscribe(), client.clone());
        }
        Err(e) => warn!("microphone unavailable, listening only: {e}"),
    }

    println!("Story time! Speak to the storyteller. Press Ctrl-C to finish.");
    tokio::signal::ctrl_c().await?;

    // ── Teardown ──────────────────────────────────────────────────────────
    recorder.stop();
    client.disconnect();
    if let Some(scheduler) = &scheduler {
        scheduler.stop();
    }
    info!("Fireside stopped");
    Ok(())
}

/// Decode a `data:image/png;base64,…` URL and write it under `dir`.
fn save_data_url(
    dir: &std::path::Path,
    index: usize,
    data_url: &str,
) -> anyhow::Result<std::path::PathBuf> {
    let payload = data_url
        .split_once("base64,")
        .map(|(_, tail)| tail)
        .context("unexpected data URL shape")?;
    let bytes = BASE64.decode(payload).context("invalid image payload")?;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("story-{index:03}.png"));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::save_data_url;

    #[test]
    fn save_data_url_rejects_malformed_input() {
        let dir = std::env::temp_dir().join("fireside-test-art");
        assert!(save_data_url(&dir, 1, "not a data url").is_err());
    }

    #[test]
    fn save_data_url_writes_decoded_bytes() {
        let dir = std::env::temp_dir().join(format!("fireside-test-art-{}", std::process::id()));
        let path = save_data_url(&dir, 7, "data:image/png;base64,aGVsbG8=")
            .expect("well-formed data url");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
