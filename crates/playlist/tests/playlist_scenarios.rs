//! End-to-end playlist scenarios against the mock engine
//!
//! All tests run under paused tokio time, so duration timers, grace delays
//! and the switch settle delay elapse deterministically.

use std::sync::Arc;
use std::time::Duration;

use playout_core::engine::mock::MockEngine;
use playout_core::engine::MediaEngine;
use playout_core::keys::{StreamKey, StreamMetadata};
use playout_core::model::{ImageFormat, PlaylistItem, PlaylistSource, SrtMode};
use playout_playlist::{Playlist, PlaylistConfig, PlaylistEvent};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mp4(name: &str) -> PlaylistItem {
    PlaylistItem::new(PlaylistSource::LocalMp4File {
        file_name: name.into(),
    })
}

fn ts(name: &str) -> PlaylistItem {
    PlaylistItem::new(PlaylistSource::LocalTsFile {
        file_name: name.into(),
    })
}

fn image(name: &str) -> PlaylistItem {
    PlaylistItem::new(PlaylistSource::Image {
        file_name: name.into(),
        format: ImageFormat::Png,
    })
}

fn srt_listener(port: u16) -> PlaylistItem {
    PlaylistItem::new(PlaylistSource::Srt {
        mode: SrtMode::Listener,
        ip: "0.0.0.0".into(),
        port,
    })
}

fn rtmp(port: u16, app: &str, stream: &str) -> PlaylistItem {
    PlaylistItem::new(PlaylistSource::Rtmp {
        port,
        app: Some(app.into()),
        stream: Some(stream.into()),
    })
}

fn av_streams(source: &str) -> Vec<StreamMetadata> {
    vec![
        StreamMetadata::audio(StreamKey::new(1, "default", 257, source)),
        StreamMetadata::video(StreamKey::new(1, "default", 256, source)),
    ]
}

fn video_only_streams(source: &str) -> Vec<StreamMetadata> {
    vec![StreamMetadata::video(StreamKey::new(1, "default", 256, source))]
}

async fn create(engine: &Arc<MockEngine>, items: Vec<PlaylistItem>) -> Playlist {
    init_tracing();
    let engine_dyn: Arc<dyn MediaEngine> = engine.clone();
    Playlist::create(engine_dyn, items, PlaylistConfig::default())
        .await
        .expect("playlist creation")
}

/// Let the controller drain its queue and any due timers fire
async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

// Scenario 1: two files, the first bounded to 5 s. The advance fires at
// duration - transition, the outgoing node closes a grace delay later.
#[tokio::test(start_paused = true)]
async fn test_timed_advance_between_files() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(
        &engine,
        vec![
            mp4("a.mp4").with_duration(Duration::from_millis(5000)),
            mp4("b.mp4"),
        ],
    )
    .await;

    playlist.start();
    settle().await;
    engine.deliver_streams("input-0", av_streams("a"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    // Not yet: the timer fires at 5000 - 300 = 4700 ms.
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert!(engine.node("input-1").is_none());

    tokio::time::sleep(Duration::from_millis(800)).await;
    let b = engine.node("input-1").expect("b created after timer");
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);
    assert!(!engine.node("input-0").unwrap().is_closed());

    engine.deliver_streams("input-1", av_streams("b"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "1"]);
    assert!(!b.is_closed());

    // Grace delay: a closes roughly one second after the advance.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let a = engine.node("input-0").unwrap();
    assert!(a.is_closed());
    assert_eq!(a.close_count(), 1);

    // prev was cleared when its node closed; only the current sub remains.
    assert_eq!(engine.switcher().subscription_count(), 1);
}

// Scenario 2: a shared SRT listener with a publisher already connected,
// followed by a file. The file is not prewarmed; the publisher's disconnect
// advances onto it.
#[tokio::test(start_paused = true)]
async fn test_srt_listener_then_file() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(&engine, vec![srt_listener(5000), ts("c.ts")]).await;

    // Listener pre-created; publisher already connected.
    assert!(engine.node("srt-5000").is_some());
    engine.deliver_streams("srt-5000", av_streams("pub"));

    playlist.start();
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    // Files are not prewarmed.
    assert!(engine.node("input-1").is_none());

    engine.disconnect_publisher("srt-5000", "pub");
    settle().await;
    assert!(engine.node("input-1").is_some());

    engine.deliver_streams("input-1", av_streams("c"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "1"]);

    // The SRT handler detached itself on the first disconnect; a repeat
    // reaches nobody and nothing advances again.
    engine.fire_disconnect("srt-5000", None);
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "1"]);

    // The shared listener stays alive for later items.
    assert!(!engine.node("srt-5000").unwrap().is_closed());
}

// Scenario 3: a video-only image with a silence feed, prewarming an RTMP
// item that becomes ready only when its publisher arrives.
#[tokio::test(start_paused = true)]
async fn test_image_with_silence_then_rtmp() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(
        &engine,
        vec![
            image("logo.png").with_duration(Duration::from_millis(2000)),
            rtmp(1935, "live", "x"),
        ],
    )
    .await;

    assert!(engine.node("rtmp-1935").is_some());

    playlist.start();
    settle().await;
    engine.deliver_streams("input-0", video_only_streams("logo"));
    settle().await;

    // Ready with no audio delivered: the silence sub supplies the pin's
    // audio track.
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);
    let keys = engine.switcher().pin_keys("0").expect("pin 0 mapped");
    assert!(keys.iter().any(|k| k.source_name == "logo"));
    assert!(keys.iter().any(|k| k.source_name == "silence"));

    // Past the 1700 ms advance: promoted but not ready, so no switch yet.
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    assert!(engine.publish("rtmp-1935", "live", "x"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "1"]);

    // The image node was released at the advance and closed a grace delay
    // later.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(engine.node("input-0").unwrap().is_closed());
}

// Scenario 4: two RTMP items sharing one listener, demultiplexed by
// app/stream. A disconnect of the other item's publisher has no effect.
#[tokio::test(start_paused = true)]
async fn test_rtmp_items_share_one_listener() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(&engine, vec![rtmp(1935, "a", "1"), rtmp(1935, "a", "2")]).await;

    assert_eq!(engine.input_ids(), vec!["rtmp-1935", "silence-source"]);

    playlist.start();
    settle().await;

    assert!(engine.publish("rtmp-1935", "a", "1"));
    assert!(engine.publish("rtmp-1935", "a", "2"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    // Slot 0 maps only its own publish.
    let keys = engine.switcher().pin_keys("0").expect("pin 0 mapped");
    assert!(keys.iter().all(|k| k.source_name == "a/1"));
    let keys = engine.switcher().pin_keys("1").expect("pin 1 mapped (prewarmed)");
    assert!(keys.iter().all(|k| k.source_name == "a/2"));

    // a/2 disconnecting before slot 1 is active must not advance anything.
    engine.disconnect_publisher("rtmp-1935", "a/2");
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    // Publisher returns, then a/1 drops: now slot 0 ends and slot 1 takes
    // over.
    assert!(engine.publish("rtmp-1935", "a", "2"));
    engine.disconnect_publisher("rtmp-1935", "a/1");
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "1"]);

    assert!(!engine.node("rtmp-1935").unwrap().is_closed());
}

// Scenario 5: two rapid manual switches advance by exactly two items, and
// the first item's duration timer must not fire an extra advance later.
#[tokio::test(start_paused = true)]
async fn test_manual_double_switch() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(
        &engine,
        vec![
            mp4("a.mp4").with_duration(Duration::from_millis(10_000)),
            mp4("b.mp4").with_duration(Duration::from_millis(10_000)),
            ts("c.ts"),
        ],
    )
    .await;
    let mut events = playlist.subscribe_events();

    playlist.start();
    settle().await;
    engine.deliver_streams("input-0", av_streams("a"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    playlist.switch();
    playlist.switch();
    settle().await;

    // Advanced by two: both b and c were created.
    assert!(engine.node("input-1").is_some());
    assert!(engine.node("input-2").is_some());

    engine.deliver_streams("input-2", av_streams("c"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "2"]);

    // Far past both cancelled timers: nothing advances past c.
    tokio::time::sleep(Duration::from_millis(25_000)).await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "2"]);
    assert!(events.try_recv().is_err(), "no exhaustion, no failure");
}

// Scenario 6: an empty playlist exhausts on the first update.
#[tokio::test(start_paused = true)]
async fn test_empty_playlist_exhausts_immediately() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(&engine, vec![]).await;
    let mut events = playlist.subscribe_events();

    playlist.start();
    settle().await;

    assert!(matches!(events.try_recv(), Ok(PlaylistEvent::Exhausted)));
    assert!(engine.switcher().switch_calls().is_empty());
}

// A playlist of length 1 plays item 0 and signals exhaustion at its EOF
// without ever populating the next slot.
#[tokio::test(start_paused = true)]
async fn test_single_item_plays_then_exhausts() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(&engine, vec![ts("a.ts")]).await;
    let mut events = playlist.subscribe_events();

    playlist.start();
    settle().await;
    engine.deliver_streams("input-0", av_streams("a"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    // Nothing was prewarmed.
    assert_eq!(engine.input_ids(), vec!["input-0", "silence-source"]);

    engine.fire_eof("input-0");
    settle().await;
    assert!(matches!(events.try_recv(), Ok(PlaylistEvent::Exhausted)));
}

// A duration shorter than the transition clamps the timer to zero; the
// advance still happens.
#[tokio::test(start_paused = true)]
async fn test_duration_shorter_than_transition_advances_immediately() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(
        &engine,
        vec![mp4("a.mp4").with_duration(Duration::from_millis(200)), mp4("b.mp4")],
    )
    .await;

    playlist.start();
    settle().await;

    // The zero-delay timer already advanced onto b.
    assert!(engine.node("input-1").is_some());

    // a became prev before it was ever active; with nothing active yet it
    // still activates once its streams appear.
    engine.deliver_streams("input-0", av_streams("a"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    engine.deliver_streams("input-1", av_streams("b"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0", "1"]);
}

// The engine rejecting node creation surfaces as a Failed notification;
// listener nodes survive.
#[tokio::test(start_paused = true)]
async fn test_creation_failure_notifies_owner() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(&engine, vec![ts("a.ts"), srt_listener(5000)]).await;
    let mut events = playlist.subscribe_events();

    engine.fail_next_create("decoder unavailable");
    playlist.start();
    settle().await;

    match events.try_recv() {
        Ok(PlaylistEvent::Failed(message)) => assert!(message.contains("input-0")),
        other => panic!("expected failure notification, got {other:?}"),
    }
    assert!(!engine.node("srt-5000").unwrap().is_closed());
}

// An MP4 with no explicit duration learns its natural duration from the
// engine probe and times out on it.
#[tokio::test(start_paused = true)]
async fn test_mp4_natural_duration_drives_advance() {
    let engine = Arc::new(MockEngine::new());
    engine.set_file_duration("a.mp4", Some(Duration::from_millis(3000)));
    let playlist = create(&engine, vec![mp4("a.mp4"), ts("b.ts")]).await;

    playlist.start();
    settle().await;
    engine.deliver_streams("input-0", av_streams("a"));
    settle().await;
    assert_eq!(engine.switcher().switch_calls(), vec!["0"]);

    // 3000 - 300 = 2700 ms.
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert!(engine.node("input-1").is_none());
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(engine.node("input-1").is_some());
}

// Shutdown closes everything the controller owns: the slots' sources,
// listeners included.
#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_owned_nodes() {
    let engine = Arc::new(MockEngine::new());
    let playlist = create(&engine, vec![ts("a.ts"), srt_listener(5000)]).await;

    playlist.start();
    settle().await;
    assert!(engine.node("input-0").is_some());

    playlist.shutdown().await;

    assert!(engine.node("srt-5000").unwrap().is_closed());
    assert!(engine.node("silence-source").unwrap().is_closed());

    // The current slot's standalone node goes down after the grace delay.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(engine.node("input-0").unwrap().is_closed());
}
