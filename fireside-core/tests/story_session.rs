//! End-to-end session tests: live client, turn reconciliation, speaking-gate
//! capture forwarding, and the offline storyteller backend.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use fireside_core::capture::{CaptureChunk, REALTIME_AUDIO_MIME};
use fireside_core::live::{
    pair, LiveClient, LiveEvent, ServerEvent, SessionConfig, StubStoryteller,
};
use fireside_core::pcm;
use fireside_core::story::{DirectorConfig, Role, StoryDirector};

fn voice_config() -> SessionConfig {
    SessionConfig::for_voice("Aoede", "You are a storyteller for young children.")
}

fn capture_chunk(seq: u64) -> CaptureChunk {
    CaptureChunk {
        seq,
        mime_type: REALTIME_AUDIO_MIME.into(),
        data: pcm::encode_pcm16_base64(&vec![0.05; 800]),
    }
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn speaking_gate_blocks_capture_until_the_agent_finishes() {
    let (transport, mut remotes) = pair();
    let client = LiveClient::new(Box::new(transport));
    let director = StoryDirector::new(DirectorConfig::default(), None);
    director.spawn(client.subscribe());

    let (chunk_tx, chunk_rx) = broadcast::channel(64);
    director.forward_capture(chunk_rx, client.clone());

    client.connect(&voice_config()).expect("connect");
    let mut remote = remotes.recv().await.expect("remote end");

    // Agent starts speaking.
    remote
        .to_client
        .send(ServerEvent::OutputTranscription {
            text: "Once upon a time".into(),
            is_final: false,
        })
        .await
        .unwrap();
    settle().await;
    assert!(director.speaking().is_agent_speaking());

    // Microphone chunks produced during the agent's turn must never reach
    // the connection.
    for seq in 0..5 {
        chunk_tx.send(capture_chunk(seq)).unwrap();
    }
    settle().await;
    assert!(
        remote.from_client.try_recv().is_err(),
        "sent chunk count during agent-speaking window must be 0"
    );
    assert_eq!(director.gated_chunk_count(), 5);

    // Turn completes; the gate drops.
    remote.to_client.send(ServerEvent::TurnComplete).await.unwrap();
    settle().await;
    assert!(!director.speaking().is_agent_speaking());

    chunk_tx.send(capture_chunk(5)).unwrap();
    let forwarded = timeout(Duration::from_secs(1), remote.from_client.recv())
        .await
        .expect("chunk should flow after the gate drops")
        .expect("message");
    let fireside_core::live::ClientMessage::RealtimeInput { mime_type, .. } = forwarded;
    assert_eq!(mime_type, REALTIME_AUDIO_MIME);
}

#[tokio::test]
async fn interleaved_lanes_and_question_timer_over_a_real_session() {
    let (transport, mut remotes) = pair();
    let client = LiveClient::new(Box::new(transport));
    let director = StoryDirector::new(
        DirectorConfig {
            response_window: Duration::from_secs(60),
        },
        None,
    );
    director.spawn(client.subscribe());

    client.connect(&voice_config()).expect("connect");
    let remote = remotes.recv().await.expect("remote end");

    // Agent opens a turn, the user interjects, the agent keeps going: two
    // independent lanes, three turns.
    let script = [
        ServerEvent::OutputTranscription {
            text: "What should our hero find?".into(),
            is_final: false,
        },
        ServerEvent::TurnComplete,
        ServerEvent::InputTranscription {
            text: "A treasure ".into(),
            is_final: false,
        },
        ServerEvent::InputTranscription {
            text: "map!".into(),
            is_final: true,
        },
    ];
    for event in script {
        remote.to_client.send(event).await.unwrap();
    }
    settle().await;

    let log = director.log_snapshot();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, Role::Agent);
    assert!(log[0].is_final);
    assert_eq!(log[1].role, Role::User);
    assert_eq!(log[1].text, "A treasure map!");
    assert!(log[1].is_final);

    // The question armed the timer; the user fragment disarmed it.
    assert!(!director.timer().is_active());
    // But the arm did happen — the activation key moved.
    assert_eq!(director.timer().activation_key(), 1);
}

#[tokio::test]
async fn offline_storyteller_drives_the_full_pipeline() {
    let client = LiveClient::new(Box::new(StubStoryteller { chunks_per_turn: 4 }));
    let director = StoryDirector::new(
        DirectorConfig {
            response_window: Duration::from_secs(60),
        },
        None,
    );
    director.spawn(client.subscribe());
    let mut events = client.subscribe();

    client.connect(&voice_config()).expect("connect");

    // Pretend to talk until the storyteller answers.
    for _ in 0..4 {
        client.send_realtime_audio(
            REALTIME_AUDIO_MIME,
            pcm::encode_pcm16_base64(&vec![0.1; 800]),
        );
        sleep(Duration::from_millis(10)).await;
    }

    // The scripted exchange must deliver playable audio and a completed turn.
    let mut saw_audio = false;
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.expect("live event") {
                LiveEvent::Audio(bytes) => {
                    assert_eq!(bytes.len() % 2, 0, "whole PCM16 samples");
                    saw_audio = true;
                }
                LiveEvent::TurnComplete => break,
                _ => {}
            }
        }
    })
    .await
    .expect("scripted exchange should complete");
    assert!(saw_audio);
    settle().await;

    let log = director.log_snapshot();
    assert!(log.len() >= 2, "user + agent turns, got {}", log.len());
    let agent_turn = log
        .iter()
        .find(|t| t.role == Role::Agent)
        .expect("agent turn");
    assert!(agent_turn.is_final);
    assert!(agent_turn.text.contains("fox"));

    // The stub's first line ends with a question → countdown armed.
    assert!(director.timer().is_active());

    // New story boundary clears everything.
    director.reset();
    assert!(director.log_snapshot().is_empty());
    assert!(!director.timer().is_active());
}
