//! Query sessions expire after their ttl and are removed by a sweep.

use crate::e2e_tests::helpers::*;
use crate::proto::google::rpc::Code;

#[test]
fn test_sweep_removes_idle_session() {
    let test = TestClient::new();
    test.build_sensors("s", 50);

    let resp = test.send(start_query_request(
        1,
        "s",
        (0.0, 0.0, 0),
        (90.0, 180.0, 1_000),
        (true, true, true),
        5,
    ));
    let started = start_query_payload(&resp);
    assert_eq!(started.ttl, 5);

    // Still inside the ttl: a fetch succeeds.
    test.clock.advance(4_000);
    assert_eq!(test.sweep(), 0);
    let resp = test.send(query_request(2, started.query_id, 5));
    assert_eq!(query_payload(&resp).elements.len(), 5);

    // The fetch reset the idle timer.
    test.clock.advance(4_000);
    assert_eq!(test.sweep(), 0);

    // A later query with a longer ttl outlives the first one.
    let resp = test.send(start_query_request(
        3,
        "s",
        (0.0, 0.0, 0),
        (90.0, 180.0, 1_000),
        (true, true, true),
        60,
    ));
    let later = start_query_payload(&resp);
    assert!(later.query_id > started.query_id);

    test.clock.advance(1_001);
    assert_eq!(test.sweep(), 1);

    let resp = test.send(query_request(4, started.query_id, 5));
    assert_eq!(code(&resp), Code::NotFound);
    assert!(
        message(&resp).contains("expired and was cleaned up"),
        "{}",
        message(&resp)
    );
    let resp = test.send(query_request(5, later.query_id, 5));
    assert_eq!(query_payload(&resp).elements.len(), 5);
}

#[test]
fn test_latest_query_reads_as_missing_once_swept() {
    let test = TestClient::new();
    test.build_sensors("s", 10);

    let resp = test.send(start_query_request(
        1,
        "s",
        (0.0, 0.0, 0),
        (90.0, 180.0, 1_000),
        (true, true, true),
        5,
    ));
    let started = start_query_payload(&resp);

    test.clock.advance(5_001);
    assert_eq!(test.sweep(), 1);

    // Only ids below the newest issued one are known to have expired.
    let resp = test.send(query_request(2, started.query_id, 5));
    assert_eq!(code(&resp), Code::NotFound);
    assert!(message(&resp).contains("does not exist"), "{}", message(&resp));
}

#[test]
fn test_unknown_query_id() {
    let test = TestClient::new();
    test.build_sensors("s", 5);
    let id = test.start_full_query("s");

    let resp = test.send(query_request(1, id + 100, 5));
    assert_eq!(code(&resp), Code::NotFound);
    assert!(message(&resp).contains("does not exist"), "{}", message(&resp));
}

#[test]
fn test_ttl_is_clamped() {
    let test = TestClient::new();
    test.build_sensors("s", 5);

    let resp = test.send(start_query_request(
        1,
        "s",
        (0.0, 0.0, 0),
        (90.0, 180.0, 100),
        (true, true, true),
        10_000,
    ));
    assert_eq!(start_query_payload(&resp).ttl, 300);

    test.clock.advance(300_000);
    assert_eq!(test.sweep(), 0);
    test.clock.advance(1);
    assert_eq!(test.sweep(), 1);
}

#[test]
fn test_query_ids_are_distinct() {
    let test = TestClient::new();
    test.build_sensors("s", 5);

    let first = test.start_full_query("s");
    let second = test.start_full_query("s");
    assert!(second > first);
}
