//! GET.WATCH subscriptions and the notifications they produce.

use bytes::Bytes;
use flint_protocol::Frame;

use crate::helpers::{ServerOptions, TestServer};

fn bulk(s: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

fn note(fingerprint: &str, result: Frame) -> Frame {
    Frame::Array(vec![bulk("GET"), Frame::Simple(fingerprint.into()), result])
}

#[tokio::test]
async fn watch_returns_current_value() {
    let server = TestServer::start();
    let mut c = server.connect();

    let (_, initial) = c.watch("k").await;
    assert_eq!(initial, Frame::Null);

    c.ok(&["SET", "n", "5"]).await;
    let (_, initial) = c.watch("n").await;
    assert_eq!(initial, Frame::Integer(5));
}

#[tokio::test]
async fn writes_from_other_sessions_are_pushed() {
    let server = TestServer::start();
    let mut watcher = server.connect();
    let mut writer = server.connect();

    let (fp, _) = watcher.watch("k").await;

    writer.ok(&["SET", "k", "v1"]).await;
    assert_eq!(watcher.read_notification().await, note(&fp, bulk("v1")));

    writer.ok(&["SET", "k", "7"]).await;
    assert_eq!(watcher.read_notification().await, note(&fp, Frame::Integer(7)));

    assert_eq!(writer.get_int(&["INCR", "k"]).await, 8);
    assert_eq!(watcher.read_notification().await, note(&fp, Frame::Integer(8)));

    assert_eq!(writer.get_int(&["DEL", "k"]).await, 1);
    assert_eq!(watcher.read_notification().await, note(&fp, Frame::Null));
}

#[tokio::test]
async fn unchanged_results_are_not_pushed_again() {
    let server = TestServer::start();
    let mut watcher = server.connect();
    let mut writer = server.connect();

    let (fp, _) = watcher.watch("k").await;
    writer.ok(&["SET", "k", "same"]).await;
    assert_eq!(watcher.read_notification().await, note(&fp, bulk("same")));

    writer.ok(&["SET", "k", "same"]).await;
    assert!(watcher.pending_notifications().await.is_empty());
}

#[tokio::test]
async fn skipped_writes_do_not_notify() {
    let server = TestServer::start();
    let mut watcher = server.connect();
    let mut writer = server.connect();

    watcher.watch("k").await;
    writer.null(&["SET", "k", "v", "XX"]).await;
    assert_eq!(writer.get_int(&["DEL", "k"]).await, 0);
    writer.ok(&["SET", "other", "v"]).await;
    assert!(watcher.pending_notifications().await.is_empty());
}

#[tokio::test]
async fn flushdb_reevaluates_every_watch() {
    let server = TestServer::start_with(ServerOptions {
        shards: 4,
        ..ServerOptions::default()
    });
    let mut watcher = server.connect();
    let mut writer = server.connect();

    writer.ok(&["SET", "a", "1"]).await;
    writer.ok(&["SET", "b", "2"]).await;
    let (fa, _) = watcher.watch("a").await;
    let (fb, _) = watcher.watch("b").await;

    writer.ok(&["FLUSHDB"]).await;
    let mut got = vec![
        watcher.read_notification().await,
        watcher.read_notification().await,
    ];
    got.sort_by_key(|f| format!("{f}"));
    let mut want = vec![note(&fa, Frame::Null), note(&fb, Frame::Null)];
    want.sort_by_key(|f| format!("{f}"));
    assert_eq!(got, want);
}

#[tokio::test]
async fn sessions_watching_the_same_key_share_a_fingerprint() {
    let server = TestServer::start();
    let mut a = server.connect();
    let mut b = server.connect();
    let mut writer = server.connect();

    let (fa, _) = a.watch("k").await;
    let (fb, _) = b.watch("k").await;
    assert_eq!(fa, fb);

    writer.ok(&["SET", "k", "v"]).await;
    assert_eq!(a.read_notification().await, note(&fa, bulk("v")));
    assert_eq!(b.read_notification().await, note(&fb, bulk("v")));
}

#[tokio::test]
async fn unwatch_stops_notifications() {
    let server = TestServer::start();
    let mut watcher = server.connect();
    let mut writer = server.connect();

    let (fp, _) = watcher.watch("k").await;
    assert_eq!(watcher.get_int(&["UNWATCH", &fp]).await, 1);
    assert_eq!(watcher.get_int(&["UNWATCH", &fp]).await, 0);

    writer.ok(&["SET", "k", "v"]).await;
    assert!(watcher.pending_notifications().await.is_empty());

    assert_eq!(
        watcher.err(&["UNWATCH", "not-a-number"]).await,
        "invalid value for a parameter in 'UNWATCH' command for FINGERPRINT parameter"
    );
}

#[tokio::test]
async fn closing_a_session_drops_its_watches() {
    let server = TestServer::start();
    let engine = server.executor().engine().clone();

    let mut watcher = server.connect();
    watcher.watch("a").await;
    watcher.watch("b").await;
    assert_eq!(engine.watch_count(), 2);

    drop(watcher);
    assert_eq!(engine.watch_count(), 0);

    let mut writer = server.connect();
    writer.ok(&["SET", "a", "v"]).await;
}

#[tokio::test]
async fn full_queue_delivers_latest_result_once_drained() {
    let server = TestServer::start_with(ServerOptions {
        watch_queue_capacity: 1,
        ..ServerOptions::default()
    });
    let mut watcher = server.connect();
    let mut writer = server.connect();

    let (fp, _) = watcher.watch("k").await;
    writer.ok(&["SET", "k", "v1"]).await;
    // let v1 land before v2 finds the queue full
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    writer.ok(&["SET", "k", "v2"]).await;

    // v2 found the queue full, so only v1 is queued so far
    let pending = watcher.pending_notifications().await;
    assert_eq!(pending, vec![note(&fp, bulk("v1"))]);

    // no further writes: v2 still arrives once there is room
    assert_eq!(watcher.read_notification().await, note(&fp, bulk("v2")));
    assert!(watcher.pending_notifications().await.is_empty());
}
