//! SET and GET, option by option.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flint_protocol::Frame;

use crate::helpers::TestServer;

fn ms_from_now(offset: Duration) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    (now + offset).as_millis().to_string()
}

#[tokio::test]
async fn set_get_roundtrip() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("v".into()));
}

#[tokio::test]
async fn integer_values_come_back_as_integers() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "123456789"]).await;
    assert_eq!(c.get_int(&["GET", "k"]).await, 123456789);

    c.ok(&["SET", "k", "v1"]).await;
    c.ok(&["SET", "k", "5"]).await;
    assert_eq!(c.get_int(&["GET", "k"]).await, 5);
}

#[tokio::test]
async fn non_canonical_numbers_stay_strings() {
    let server = TestServer::start();
    let mut c = server.connect();

    for raw in ["007", "+5", "-0", " 1"] {
        c.ok(&["SET", "k", raw]).await;
        assert_eq!(c.get_bulk(&["GET", "k"]).await, Some(raw.to_string()));
    }
}

#[tokio::test]
async fn get_missing_key() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.null(&["GET", "nonexistent"]).await;
}

#[tokio::test]
async fn ex_and_px_expire() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "a", "v", "EX", "1"]).await;
    c.ok(&["SET", "b", "v", "PX", "300"]).await;
    assert_eq!(c.get_bulk(&["GET", "a"]).await, Some("v".into()));
    assert_eq!(c.get_bulk(&["GET", "b"]).await, Some("v".into()));

    tokio::time::sleep(Duration::from_millis(400)).await;
    c.null(&["GET", "b"]).await;
    assert_eq!(c.get_bulk(&["GET", "a"]).await, Some("v".into()));

    tokio::time::sleep(Duration::from_millis(800)).await;
    c.null(&["GET", "a"]).await;
}

#[tokio::test]
async fn two_expiry_options_are_a_syntax_error() {
    let server = TestServer::start();
    let mut c = server.connect();

    let msg = c.err(&["SET", "k", "v", "EX", "2", "PX", "2000"]).await;
    assert_eq!(msg, "invalid syntax for 'SET' command");
    c.null(&["GET", "k"]).await;
}

#[tokio::test]
async fn rejected_expiry_combinations_leave_existing_key_alone() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "orig", "EX", "100"]).await;
    for args in [
        vec!["SET", "k", "v", "EX", "2", "PX", "2000"],
        vec!["SET", "k", "v", "EX", "2", "KEEPTTL"],
    ] {
        assert_eq!(c.err(&args).await, "invalid syntax for 'SET' command");
        assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("orig".into()));
        let pttl = c.get_int(&["PTTL", "k"]).await;
        assert!(pttl > 2000 && pttl <= 100_000, "pttl was {pttl}");
    }
}

#[tokio::test]
async fn xx_and_nx() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.null(&["SET", "k99", "v", "XX"]).await;
    c.null(&["GET", "k99"]).await;

    c.ok(&["SET", "k1729", "v", "NX"]).await;
    assert_eq!(c.get_bulk(&["GET", "k1729"]).await, Some("v".into()));
    c.null(&["SET", "k1729", "v2", "NX"]).await;
    assert_eq!(c.get_bulk(&["GET", "k1729"]).await, Some("v".into()));

    c.ok(&["SET", "k1729", "v3", "XX"]).await;
    c.ok(&["SET", "k1729", "v4", "XX"]).await;
    assert_eq!(c.get_bulk(&["GET", "k1729"]).await, Some("v4".into()));
}

#[tokio::test]
async fn nx_on_expired_key_writes() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "old", "PX", "50"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.ok(&["SET", "k", "new", "NX"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("new".into()));
}

#[tokio::test]
async fn pxat_in_the_future() {
    let server = TestServer::start();
    let mut c = server.connect();

    let at = ms_from_now(Duration::from_secs(60));
    c.ok(&["SET", "k", "v", "PXAT", &at]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("v".into()));
    let ttl = c.get_int(&["TTL", "k"]).await;
    assert!((58..=60).contains(&ttl), "ttl was {ttl}");
    assert_eq!(c.get_int(&["DEL", "k"]).await, 1);
}

#[tokio::test]
async fn exat_expires_at_the_given_second() {
    let server = TestServer::start();
    let mut c = server.connect();

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let at = (now + 2).to_string();
    c.ok(&["SET", "k", "v", "EXAT", &at]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("v".into()));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    c.null(&["GET", "k"]).await;
}

#[tokio::test]
async fn pxat_below_floor_is_rejected() {
    let server = TestServer::start();
    let mut c = server.connect();

    let msg = c.err(&["SET", "k2", "v2", "PXAT", "123123"]).await;
    assert_eq!(
        msg,
        "invalid value for a parameter in 'SET' command for PXAT parameter"
    );
    c.null(&["GET", "k2"]).await;
}

#[tokio::test]
async fn elapsed_pxat_writes_an_expired_key() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "v"]).await;
    let past = ms_from_now(Duration::ZERO)
        .parse::<u64>()
        .unwrap()
        .saturating_sub(10_000)
        .to_string();
    c.ok(&["SET", "k", "v2", "PXAT", &past]).await;
    c.null(&["GET", "k"]).await;
    assert_eq!(c.get_int(&["EXISTS", "k"]).await, 0);
}

#[tokio::test]
async fn bad_relative_ttls_name_the_option() {
    let server = TestServer::start();
    let mut c = server.connect();

    for (opt, raw) in [("EX", "0"), ("EX", "-1"), ("PX", "abc"), ("EX", "1.5")] {
        let msg = c.err(&["SET", "k", "v", opt, raw]).await;
        assert_eq!(
            msg,
            format!("invalid value for a parameter in 'SET' command for {opt} parameter")
        );
    }
    let msg = c.err(&["SET", "k", "v", "EX"]).await;
    assert_eq!(msg, "invalid syntax for 'SET' command");
}

#[tokio::test]
async fn get_flag_returns_previous_value() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_bulk(&["SET", "k", "vv", "GET"]).await, Some("v".into()));
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("vv".into()));

    c.null(&["SET", "k10", "vv", "GET"]).await;
    assert_eq!(c.get_bulk(&["GET", "k10"]).await, Some("vv".into()));

    c.ok(&["SET", "n", "12"]).await;
    assert_eq!(c.get_int(&["SET", "n", "x", "GET"]).await, 12);
}

#[tokio::test]
async fn keepttl() {
    let server = TestServer::start();
    let mut c = server.connect();

    c.ok(&["SET", "k", "v", "EX", "2"]).await;
    c.ok(&["SET", "k", "vv", "KEEPTTL"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("vv".into()));
    let pttl = c.get_int(&["PTTL", "k"]).await;
    assert!(pttl > 0 && pttl <= 2000, "pttl was {pttl}");

    c.ok(&["SET", "kk", "vv"]).await;
    c.ok(&["SET", "kk", "vvv", "KEEPTTL"]).await;
    assert_eq!(c.get_bulk(&["GET", "kk"]).await, Some("vvv".into()));
    assert_eq!(c.get_int(&["TTL", "kk"]).await, -1);

    // a plain SET clears the deadline
    c.ok(&["SET", "k", "plain"]).await;
    assert_eq!(c.get_int(&["TTL", "k"]).await, -1);

    let at = ms_from_now(Duration::from_secs(60));
    for args in [
        vec!["SET", "K", "V", "EX", "2", "KEEPTTL"],
        vec!["SET", "K1", "vv", "PX", "2000", "KEEPTTL"],
        vec!["SET", "K2", "vv", "EXAT", at.as_str(), "KEEPTTL"],
    ] {
        assert_eq!(c.err(&args).await, "invalid syntax for 'SET' command");
    }
}

#[tokio::test]
async fn arity() {
    let server = TestServer::start();
    let mut c = server.connect();

    assert_eq!(
        c.err(&["SET"]).await,
        "wrong number of arguments for 'SET' command"
    );
    assert_eq!(
        c.err(&["GET"]).await,
        "wrong number of arguments for 'GET' command"
    );
    assert_eq!(
        c.err(&["GET", "a", "b"]).await,
        "wrong number of arguments for 'GET' command"
    );
}

#[tokio::test]
async fn command_lines_are_tokenized_on_whitespace() {
    let server = TestServer::start();
    let mut c = server.connect();

    assert_eq!(c.line("  set   spaced\tvalue ").await, Frame::ok());
    assert_eq!(
        c.line("get spaced").await,
        Frame::Bulk(bytes::Bytes::from("value"))
    );
    assert_eq!(c.line("PING").await, Frame::Simple("PONG".into()));
}
