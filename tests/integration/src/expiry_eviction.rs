//! Memory and key limits, eviction policies and active expiry.

use std::time::Duration;

use crate::helpers::{ServerOptions, TestServer};

const OOM: &str = "OOM command not allowed when used memory > 'maxmemory'";

#[tokio::test]
async fn noeviction_rejects_writes_over_the_key_limit() {
    let server = TestServer::start_with(ServerOptions {
        shards: 1,
        maxkeys: Some(2),
        ..ServerOptions::default()
    });
    let mut c = server.connect();

    c.ok(&["SET", "a", "1"]).await;
    c.ok(&["SET", "b", "2"]).await;
    assert_eq!(c.err(&["SET", "c", "3"]).await, OOM);
    assert_eq!(c.err(&["INCR", "c"]).await, OOM);

    // replacing and deleting still work
    c.ok(&["SET", "a", "10"]).await;
    assert_eq!(c.get_int(&["DEL", "b"]).await, 1);
    c.ok(&["SET", "c", "3"]).await;
}

#[tokio::test]
async fn noeviction_rejects_writes_over_the_memory_limit() {
    let server = TestServer::start_with(ServerOptions {
        shards: 1,
        maxmemory: Some("4K".into()),
        ..ServerOptions::default()
    });
    let mut c = server.connect();

    let big = "x".repeat(1024);
    let mut rejected = false;
    for i in 0..16 {
        let key = format!("k{i}");
        match c.cmd(&["SET", &key, &big]).await {
            flint_protocol::Frame::Simple(_) => {}
            flint_protocol::Frame::Error(msg) => {
                assert_eq!(msg, OOM);
                rejected = true;
                break;
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
    assert!(rejected, "memory limit never enforced");
}

#[tokio::test]
async fn lru_keeps_the_key_count_at_the_limit() {
    let server = TestServer::start_with(ServerOptions {
        shards: 1,
        maxkeys: Some(10),
        policy: "allkeys-lru",
        ..ServerOptions::default()
    });
    let mut c = server.connect();

    for i in 0..50 {
        c.ok(&["SET", &format!("k{i}"), "v"]).await;
    }
    assert_eq!(c.get_int(&["DBSIZE"]).await, 10);
}

#[tokio::test]
async fn lfu_keeps_the_key_count_at_the_limit() {
    let server = TestServer::start_with(ServerOptions {
        shards: 1,
        maxkeys: Some(10),
        policy: "allkeys-lfu",
        ..ServerOptions::default()
    });
    let mut c = server.connect();

    for i in 0..50 {
        c.ok(&["SET", &format!("k{i}"), "v"]).await;
    }
    assert_eq!(c.get_int(&["DBSIZE"]).await, 10);
}

#[tokio::test]
async fn active_expiry_removes_untouched_keys() {
    let server = TestServer::start_with(ServerOptions {
        shards: 2,
        expiry_tick_ms: 10,
        ..ServerOptions::default()
    });
    let mut c = server.connect();

    for i in 0..20 {
        c.ok(&["SET", &format!("t{i}"), "v", "PX", "20"]).await;
    }
    c.ok(&["SET", "keep", "v"]).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    // stats read the counters without purging, so only the tick can have
    // removed these
    let stats = server.executor().engine().stats().await.unwrap();
    assert_eq!(stats.key_count, 1);
    assert_eq!(stats.keys_expired, 20);
    assert_eq!(c.get_bulk(&["GET", "keep"]).await, Some("v".into()));
}

#[tokio::test]
async fn dbsize_ignores_expired_keys_before_the_tick() {
    let server = TestServer::start_with(ServerOptions {
        shards: 1,
        expiry_tick_ms: 60_000,
        ..ServerOptions::default()
    });
    let mut c = server.connect();

    c.ok(&["SET", "k", "v", "PX", "20"]).await;
    c.ok(&["SET", "keep", "v"]).await;
    assert_eq!(c.get_int(&["DBSIZE"]).await, 2);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(c.get_int(&["DBSIZE"]).await, 1);
    assert_eq!(c.get_int(&["EXISTS", "k"]).await, 0);
}

#[tokio::test]
async fn ttl_reports() {
    let server = TestServer::start();
    let mut c = server.connect();

    assert_eq!(c.get_int(&["TTL", "nope"]).await, -2);
    assert_eq!(c.get_int(&["PTTL", "nope"]).await, -2);
    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_int(&["TTL", "k"]).await, -1);
    c.ok(&["SET", "k", "v", "EX", "100"]).await;
    let ttl = c.get_int(&["TTL", "k"]).await;
    assert!((99..=100).contains(&ttl), "ttl was {ttl}");
}
