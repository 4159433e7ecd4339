//! INCR, DECR and friends.

use std::time::Duration;

use crate::helpers::TestServer;

#[tokio::test]
async fn decr_walks_below_zero() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "key1", "2"]).await;
    assert_eq!(c.get_int(&["DECR", "key1"]).await, 1);
    assert_eq!(c.get_int(&["DECR", "key1"]).await, 0);
    assert_eq!(c.get_int(&["DECR", "key1"]).await, -1);
    assert_eq!(c.get_int(&["GET", "key1"]).await, -1);
}

#[tokio::test]
async fn missing_key_starts_from_zero() {
    let server = TestServer::start();
    let mut c = server.connect();

    assert_eq!(c.get_int(&["DECR", "a"]).await, -1);
    assert_eq!(c.get_int(&["INCR", "b"]).await, 1);
    assert_eq!(c.get_int(&["INCRBY", "c", "10"]).await, 10);
    assert_eq!(c.get_int(&["DECRBY", "d", "10"]).await, -10);
}

#[tokio::test]
async fn string_values_are_rejected() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "s", "abc"]).await;
    assert_eq!(
        c.err(&["DECR", "s"]).await,
        "value is not an integer or out of range"
    );

    // a numeric-looking string that isn't canonical stays a string
    c.ok(&["SET", "z", "007"]).await;
    assert_eq!(
        c.err(&["INCR", "z"]).await,
        "value is not an integer or out of range"
    );
    assert_eq!(c.get_bulk(&["GET", "z"]).await, Some("007".into()));
}

#[tokio::test]
async fn overflow_is_an_error_and_leaves_the_value() {
    let server = TestServer::start();
    let mut c = server.connect();

    let min = i64::MIN.to_string();
    c.ok(&["SET", "m", &min]).await;
    assert_eq!(
        c.err(&["DECR", "m"]).await,
        "increment or decrement would overflow"
    );
    assert_eq!(c.get_int(&["GET", "m"]).await, i64::MIN);

    let max = i64::MAX.to_string();
    c.ok(&["SET", "x", &max]).await;
    assert_eq!(
        c.err(&["INCR", "x"]).await,
        "increment or decrement would overflow"
    );
}

#[tokio::test]
async fn bad_delta_is_not_an_integer() {
    let server = TestServer::start();
    let mut c = server.connect();

    assert_eq!(
        c.err(&["INCRBY", "k", "ten"]).await,
        "value is not an integer or out of range"
    );
}

#[tokio::test]
async fn decr_keeps_the_deadline() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "10", "PX", "300"]).await;
    assert_eq!(c.get_int(&["DECR", "k"]).await, 9);
    let pttl = c.get_int(&["PTTL", "k"]).await;
    assert!(pttl > 0 && pttl <= 300, "pttl was {pttl}");

    tokio::time::sleep(Duration::from_millis(350)).await;
    c.null(&["GET", "k"]).await;
}
