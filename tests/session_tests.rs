// Integration tests for the voice session lifecycle
//
// A MemoryConnector stands in for the realtime endpoint and a ManualPlayer
// for the speaker, so every transition can be driven step by step.

mod common;

use async_trait::async_trait;
use base64::Engine;
use common::{audio_delta, eventually, within, write_wav, ManualPlayer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use voice_coach::audio::{CaptureBackend, CaptureConstraints, CaptureSource};
use voice_coach::realtime::{OpenBehavior, RemoteErrorPayload, RemotePeer, OUTBOUND_CAPACITY};
use voice_coach::{
    ClientMessage, MemoryConnector, ProfileContext, ServerMessage, SessionConfig, SessionEvent,
    SessionStatus, VoiceError, VoiceSession,
};

struct Harness {
    session: VoiceSession,
    connector: Arc<MemoryConnector>,
    peers: mpsc::UnboundedReceiver<RemotePeer>,
    player: ManualPlayer,
}

fn harness(config: SessionConfig) -> Harness {
    harness_with(config, MemoryConnector::new())
}

fn harness_with(
    config: SessionConfig,
    (connector, peers): (MemoryConnector, mpsc::UnboundedReceiver<RemotePeer>),
) -> Harness {
    let connector = Arc::new(connector);
    let player = ManualPlayer::new();
    let session = VoiceSession::builder(config, connector.clone())
        .player(player.boxed())
        .spawn();

    Harness {
        session,
        connector,
        peers,
        player,
    }
}

/// Connect and answer `session.ready`
async fn connect(h: &mut Harness) -> RemotePeer {
    h.session
        .connect(ProfileContext::with_goal("muscle_gain"))
        .await
        .unwrap();

    let mut peer = within("channel open", h.peers.recv()).await.unwrap();
    let init = within("session.init", peer.recv()).await.unwrap();
    assert!(matches!(init, ClientMessage::SessionInit { .. }));

    peer.send(&ServerMessage::SessionReady).await;
    within("connected", h.session.wait_for_status(SessionStatus::Connected))
        .await
        .unwrap();
    peer
}

async fn send_delta(peer: &RemotePeer, value: i16) {
    peer.send(&ServerMessage::AudioDelta {
        delta: audio_delta(value, 480),
    })
    .await;
}

async fn wait_until_silent(session: &VoiceSession) {
    let mut state = session.watch();
    within("playback drained", state.wait_for(|s| !s.is_speaking))
        .await
        .unwrap();
}

/// Poll stats until `done` holds
async fn stats_until(
    session: &VoiceSession,
    what: &str,
    done: impl Fn(&voice_coach::SessionStats) -> bool,
) -> voice_coach::SessionStats {
    for _ in 0..500 {
        let stats = session.stats().await.unwrap();
        if done(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn write_speech(dir: &TempDir, name: &str, sample_count: usize) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let samples: Vec<i16> = (0..sample_count).map(|i| ((i % 200) as i16 - 100) * 50).collect();
    write_wav(&path, 24000, &samples);
    path
}

async fn next_error(events: &mut broadcast::Receiver<SessionEvent>) -> String {
    loop {
        match within("error event", events.recv()).await {
            Ok(SessionEvent::Error(message)) => return message,
            Ok(_) => continue,
            Err(e) => panic!("event stream ended: {}", e),
        }
    }
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_sends_profile_and_reaches_connected() {
    let mut h = harness(SessionConfig::text_only());
    assert_eq!(h.session.status(), SessionStatus::Disconnected);

    h.session
        .connect(ProfileContext::with_goal("muscle_gain"))
        .await
        .unwrap();
    assert_eq!(h.session.status(), SessionStatus::Connecting);

    let mut peer = within("channel open", h.peers.recv()).await.unwrap();
    let init = within("session.init", peer.recv()).await.unwrap();
    match init {
        ClientMessage::SessionInit { profile } => {
            assert_eq!(profile.goal.as_deref(), Some("muscle_gain"));
        }
        other => panic!("expected session.init, got {:?}", other),
    }

    peer.send(&ServerMessage::SessionReady).await;
    within("connected", h.session.wait_for_status(SessionStatus::Connected))
        .await
        .unwrap();

    assert!(h.session.is_connected());
    assert!(!h.session.is_speaking());
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let mut h = harness(SessionConfig::text_only());
    let _peer = connect(&mut h).await;

    let result = h.session.connect(ProfileContext::default()).await;
    assert!(matches!(result, Err(VoiceError::SessionActive { .. })));

    // Still exactly one channel
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.connector.open_count(), 1);
    assert!(h.peers.try_recv().is_err());
    assert_eq!(h.session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_connect_while_connecting_is_rejected() {
    let (connector, peers) = MemoryConnector::new();
    let mut h = harness_with(
        SessionConfig::text_only(),
        (connector.with_open_delay(Duration::from_millis(200)), peers),
    );

    h.session.connect(ProfileContext::default()).await.unwrap();
    let second = h.session.connect(ProfileContext::default()).await;
    assert!(matches!(second, Err(VoiceError::SessionActive { .. })));

    let _peer = within("channel open", h.peers.recv()).await.unwrap();
    assert_eq!(h.connector.open_count(), 1);
}

#[tokio::test]
async fn test_refused_channel_moves_to_error_then_retry_succeeds() {
    let mut h = harness(SessionConfig::text_only());
    let mut events = h.session.subscribe();
    h.connector
        .set_behavior(OpenBehavior::Refuse("handshake rejected".to_string()));

    h.session.connect(ProfileContext::default()).await.unwrap();
    within("error", h.session.wait_for_status(SessionStatus::Error))
        .await
        .unwrap();
    assert!(next_error(&mut events).await.contains("handshake rejected"));

    // No channel exists, so a new attempt is allowed
    h.connector.set_behavior(OpenBehavior::Accept);
    let _peer = connect(&mut h).await;
    assert!(h.session.is_connected());
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_without_connect_is_safe() {
    let h = harness(SessionConfig::text_only());

    h.session.disconnect().await.unwrap();
    h.session.disconnect().await.unwrap();

    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert!(!h.session.is_speaking());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_abandons_channel() {
    let (connector, peers) = MemoryConnector::new();
    let mut h = harness_with(
        SessionConfig::text_only(),
        (connector.with_open_delay(Duration::from_secs(1)), peers),
    );

    h.session.connect(ProfileContext::default()).await.unwrap();
    assert_eq!(h.session.status(), SessionStatus::Connecting);

    h.session.disconnect().await.unwrap();
    assert_eq!(h.session.status(), SessionStatus::Disconnected);

    // Long after the handshake would have finished
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert_eq!(h.connector.open_count(), 0);
    assert!(h.peers.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_mid_playback_silences_immediately() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    send_delta(&peer, 1000).await;
    send_delta(&peer, 2000).await;
    eventually("first frame playing", || h.player.played_count() == 1).await;
    assert!(h.session.is_speaking());

    h.session.disconnect().await.unwrap();

    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert!(!h.session.is_speaking());
    assert!(h.player.stops() >= 1);
    eventually("channel closed", || peer.is_closed()).await;

    // The completion for the silenced frame arrives late and is ignored
    assert!(h.player.finish_one());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.player.played_count(), 1);
    assert!(!h.session.is_speaking());

    let stats = h.session.stats().await.unwrap();
    assert_eq!(stats.frames_played, 0);
}

#[tokio::test]
async fn test_dropping_last_handle_closes_channel() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    drop(h.session);

    eventually("channel closed", || peer.is_closed()).await;
}

// ============================================================================
// Playback
// ============================================================================

#[tokio::test]
async fn test_speaking_until_last_queued_frame_completes() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    send_delta(&peer, 100).await;
    send_delta(&peer, 200).await;
    send_delta(&peer, 300).await;
    peer.send(&ServerMessage::ResponseDone).await;

    eventually("first frame playing", || h.player.played_count() == 1).await;
    assert!(h.session.is_speaking());

    // Frames are handed to the player one at a time, in arrival order
    assert!(h.player.finish_one());
    eventually("second frame playing", || h.player.played_count() == 2).await;
    assert!(h.session.is_speaking());

    assert!(h.player.finish_one());
    eventually("third frame playing", || h.player.played_count() == 3).await;
    assert!(h.session.is_speaking());

    assert!(h.player.finish_one());
    wait_until_silent(&h.session).await;

    let played = h.player.played();
    let first: Vec<f32> = played.iter().map(|b| b.samples[0]).collect();
    assert_eq!(first, vec![100.0 / 32768.0, 200.0 / 32768.0, 300.0 / 32768.0]);
    assert!(played.iter().all(|b| b.sample_rate == 24000));

    let stats = h.session.stats().await.unwrap();
    assert_eq!(stats.frames_played, 3);
    assert_eq!(stats.frames_failed, 0);
}

#[tokio::test]
async fn test_speaking_events_bracket_playback() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;
    let mut events = h.session.subscribe();

    send_delta(&peer, 500).await;
    eventually("frame playing", || h.player.played_count() == 1).await;
    h.player.finish_one();
    wait_until_silent(&h.session).await;

    let mut speaking = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SpeakingChanged(value) = event {
            speaking.push(value);
        }
    }
    assert_eq!(speaking, vec![true, false]);
}

#[tokio::test]
async fn test_bad_frames_are_skipped() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    peer.send(&ServerMessage::AudioDelta {
        delta: "not base64!".to_string(),
    })
    .await;
    // Odd byte count cannot be PCM16
    peer.send(&ServerMessage::AudioDelta {
        delta: base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]),
    })
    .await;
    send_delta(&peer, 42).await;

    eventually("good frame playing", || h.player.played_count() == 1).await;
    h.player.finish_one();
    wait_until_silent(&h.session).await;

    let stats = h.session.stats().await.unwrap();
    assert_eq!(stats.frames_played, 1);
    assert_eq!(stats.frames_failed, 2);
    assert_eq!(h.session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_player_failure_continues_with_next_frame() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    send_delta(&peer, 1).await;
    send_delta(&peer, 2).await;
    eventually("first frame playing", || h.player.played_count() == 1).await;

    assert!(h.player.fail_one("underrun"));
    eventually("second frame playing", || h.player.played_count() == 2).await;
    h.player.finish_one();
    wait_until_silent(&h.session).await;

    let stats = h.session.stats().await.unwrap();
    assert_eq!(stats.frames_played, 1);
    assert_eq!(stats.frames_failed, 1);
}

// ============================================================================
// Inbound messages
// ============================================================================

#[tokio::test]
async fn test_transcripts_are_emitted_and_finals_kept() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;
    let mut events = h.session.subscribe();

    peer.send(&ServerMessage::TranscriptDelta {
        delta: "Aim for".to_string(),
    })
    .await;
    peer.send(&ServerMessage::TranscriptDone {
        transcript: "Aim for 140g of protein.".to_string(),
    })
    .await;

    let mut transcripts = Vec::new();
    while transcripts.len() < 2 {
        if let SessionEvent::Transcript(t) = within("transcript", events.recv()).await.unwrap() {
            transcripts.push(t);
        }
    }
    assert!(!transcripts[0].is_final);
    assert_eq!(transcripts[0].text, "Aim for");
    assert!(transcripts[1].is_final);

    let transcript = h.session.transcript().await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].text, "Aim for 140g of protein.");
    assert_eq!(h.session.stats().await.unwrap().transcript_segments_count, 1);
}

#[tokio::test]
async fn test_malformed_and_unknown_messages_are_ignored() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    peer.send_raw("{not json").await;
    peer.send_raw(r#"{"type":"rate_limits.updated","limits":[]}"#).await;
    send_delta(&peer, 7).await;

    eventually("frame playing", || h.player.played_count() == 1).await;
    assert_eq!(h.session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_remote_error_sets_error_status() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;
    let mut events = h.session.subscribe();

    peer.send(&ServerMessage::Error {
        error: Some(RemoteErrorPayload::Text("quota exceeded".to_string())),
    })
    .await;

    within("error", h.session.wait_for_status(SessionStatus::Error))
        .await
        .unwrap();
    assert!(next_error(&mut events).await.contains("quota exceeded"));
    assert!(!peer.is_closed());

    // Text is refused outside the connected state
    assert!(!h.session.send_text("hello?").await.unwrap());
}

#[tokio::test]
async fn test_abnormal_close_lets_playback_drain() {
    let mut h = harness(SessionConfig::text_only());
    let peer = connect(&mut h).await;

    send_delta(&peer, 10).await;
    eventually("frame playing", || h.player.played_count() == 1).await;

    peer.close(Some("server restarting".to_string())).await;
    within(
        "disconnected",
        h.session.wait_for_status(SessionStatus::Disconnected),
    )
    .await
    .unwrap();
    assert!(h.session.is_speaking());

    h.player.finish_one();
    wait_until_silent(&h.session).await;
    assert_eq!(h.session.stats().await.unwrap().frames_played, 1);
}

// ============================================================================
// Outbound
// ============================================================================

#[tokio::test]
async fn test_send_text_requires_connection() {
    let mut h = harness(SessionConfig::text_only());

    assert!(!h.session.send_text("too early").await.unwrap());

    let mut peer = connect(&mut h).await;
    assert!(peer.try_recv().is_none());

    assert!(h.session.send_text("How much protein?").await.unwrap());

    let item = within("conversation item", peer.recv()).await.unwrap();
    assert_eq!(item, ClientMessage::user_text("How much protein?"));
    let response = within("response.create", peer.recv()).await.unwrap();
    assert_eq!(response, ClientMessage::ResponseCreate);
}

#[tokio::test]
async fn test_file_capture_streams_frames_while_connected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("question.wav");
    let samples: Vec<i16> = (0..4096 * 3).map(|i| ((i % 200) as i16 - 100) * 50).collect();
    write_wav(&path, 24000, &samples);

    let config = SessionConfig {
        capture: Some(CaptureSource::FileUnpaced(path)),
        ..SessionConfig::default()
    };
    let mut h = harness(config);
    let mut peer = connect(&mut h).await;

    let mut frames = Vec::new();
    while frames.len() < 3 {
        match within("audio frame", peer.recv()).await.unwrap() {
            ClientMessage::InputAudioBufferAppend { audio } => frames.push(audio),
            other => panic!("unexpected message {:?}", other),
        }
    }

    for audio in &frames {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(audio)
            .unwrap();
        assert_eq!(bytes.len(), 4096 * 2);
    }
    let first = base64::engine::general_purpose::STANDARD
        .decode(&frames[0])
        .unwrap();
    assert_eq!(i16::from_le_bytes([first[0], first[1]]), samples[0]);

    let session = h.session.clone();
    let mut sent = 0;
    for _ in 0..100 {
        sent = session.stats().await.unwrap().frames_sent;
        if sent == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sent, 3);
}

struct DeniedCapture;

#[async_trait]
impl CaptureBackend for DeniedCapture {
    async fn start(
        &mut self,
        _constraints: &CaptureConstraints,
    ) -> voice_coach::Result<mpsc::Receiver<Vec<f32>>> {
        Err(VoiceError::PermissionDenied {
            message: "user declined microphone access".to_string(),
        })
    }

    async fn stop(&mut self) -> voice_coach::Result<()> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "denied"
    }
}

#[tokio::test]
async fn test_microphone_permission_denied_sets_error() {
    let (connector, mut peers) = MemoryConnector::new();
    let session = VoiceSession::builder(SessionConfig::default(), Arc::new(connector))
        .player(ManualPlayer::new().boxed())
        .capture_backend(|| Ok(Box::new(DeniedCapture) as Box<dyn CaptureBackend>))
        .spawn();
    let mut events = session.subscribe();

    session.connect(ProfileContext::default()).await.unwrap();
    let mut peer = within("channel open", peers.recv()).await.unwrap();
    within("session.init", peer.recv()).await.unwrap();
    peer.send(&ServerMessage::SessionReady).await;

    within("error", session.wait_for_status(SessionStatus::Error))
        .await
        .unwrap();
    assert!(next_error(&mut events).await.contains("permission denied"));
}

#[tokio::test]
async fn test_stalled_peer_drops_audio_but_keeps_control_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_speech(&temp_dir, "long.wav", 4096 * 100);

    let config = SessionConfig {
        capture: Some(CaptureSource::FileUnpaced(path)),
        ..SessionConfig::default()
    };
    let mut h = harness(config);
    // The peer reads session.init and then stops reading
    let mut peer = connect(&mut h).await;

    let stats = stats_until(&h.session, "all frames accounted", |s| {
        s.frames_sent + s.frames_dropped == 100
    })
    .await;
    assert!(stats.frames_dropped > 0);
    assert!(stats.frames_sent <= OUTBOUND_CAPACITY);

    // Control messages still fit while audio is backed up
    assert!(h.session.send_text("still there?").await.unwrap());

    let mut appended = 0;
    loop {
        match within("queued message", peer.recv()).await.unwrap() {
            ClientMessage::InputAudioBufferAppend { .. } => appended += 1,
            item => {
                assert_eq!(item, ClientMessage::user_text("still there?"));
                break;
            }
        }
    }
    assert_eq!(appended, stats.frames_sent);
    let response = within("response.create", peer.recv()).await.unwrap();
    assert_eq!(response, ClientMessage::ResponseCreate);
}

#[tokio::test]
async fn test_trailing_partial_frame_counts_as_dropped() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_speech(&temp_dir, "ragged.wav", 4096 * 3 + 100);

    let config = SessionConfig {
        capture: Some(CaptureSource::FileUnpaced(path)),
        ..SessionConfig::default()
    };
    let mut h = harness(config);
    let mut peer = connect(&mut h).await;

    for _ in 0..3 {
        let message = within("audio frame", peer.recv()).await.unwrap();
        assert!(matches!(message, ClientMessage::InputAudioBufferAppend { .. }));
    }

    let stats = stats_until(&h.session, "capture finished", |s| {
        s.frames_sent + s.frames_dropped == 4
    })
    .await;
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(stats.frames_dropped, 1);
}

/// Capture backend fed by the test through a channel
struct ScriptedCapture {
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    capturing: bool,
}

#[async_trait]
impl CaptureBackend for ScriptedCapture {
    async fn start(
        &mut self,
        _constraints: &CaptureConstraints,
    ) -> voice_coach::Result<mpsc::Receiver<Vec<f32>>> {
        let blocks = self.blocks.take().ok_or_else(|| VoiceError::DeviceUnavailable {
            message: "scripted capture already used".to_string(),
        })?;
        self.capturing = true;
        Ok(blocks)
    }

    async fn stop(&mut self) -> voice_coach::Result<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn test_frames_after_remote_error_are_dropped() {
    let (block_tx, block_rx) = mpsc::channel(8);
    let slot = Arc::new(std::sync::Mutex::new(Some(block_rx)));

    let (connector, mut peers) = MemoryConnector::new();
    let session = VoiceSession::builder(SessionConfig::default(), Arc::new(connector))
        .player(ManualPlayer::new().boxed())
        .capture_backend(move || {
            let blocks = slot.lock().unwrap().take();
            Ok(Box::new(ScriptedCapture {
                blocks,
                capturing: false,
            }) as Box<dyn CaptureBackend>)
        })
        .spawn();

    session.connect(ProfileContext::default()).await.unwrap();
    let mut peer = within("channel open", peers.recv()).await.unwrap();
    within("session.init", peer.recv()).await.unwrap();
    peer.send(&ServerMessage::SessionReady).await;
    within("connected", session.wait_for_status(SessionStatus::Connected))
        .await
        .unwrap();

    peer.send(&ServerMessage::Error {
        error: Some(RemoteErrorPayload::Text("rate limited".to_string())),
    })
    .await;
    within("error", session.wait_for_status(SessionStatus::Error))
        .await
        .unwrap();

    block_tx.send(vec![0.25; 4096]).await.unwrap();
    block_tx.send(vec![-0.25; 4096]).await.unwrap();

    let stats = stats_until(&session, "frames dropped", |s| s.frames_dropped == 2).await;
    assert_eq!(stats.frames_sent, 0);
    assert!(peer.try_recv().is_none());
    assert!(!peer.is_closed());
}
