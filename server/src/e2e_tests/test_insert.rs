//! Inserting into a built structure.

use crate::e2e_tests::helpers::*;
use crate::proto::{self, google::rpc::Code};

fn element(oid: u8, x: f32, y: f32, time: i64) -> proto::Element {
    let mut bytes = vec![0u8; 12];
    bytes[11] = oid;
    proto::Element {
        oid: Some(bytes),
        location: Some(proto::Location { x, y }),
        time: Some(time),
        ..Default::default()
    }
}

#[test]
fn test_inserted_records_are_queryable() {
    let test = TestClient::new();
    test.build_sensors("s", 50);

    let elements = (0..20).map(|i| element(200 + i, 50.0, 60.0, 500 + i64::from(i))).collect();
    let resp = test.send(insert_request(1, "s", elements));
    assert_eq!(code(&resp), Code::Ok);
    match resp.payload {
        Some(proto::server_response::Payload::Insert(insert)) => assert_eq!(insert.inserted, 20),
        other => panic!("Expected Insert response, got {other:?}"),
    }

    let resp = test.send(start_query_request(
        2,
        "s",
        (49.0, 59.0, 0),
        (51.0, 61.0, 1_000),
        (true, true, true),
        0,
    ));
    let started = start_query_payload(&resp);
    assert_eq!(started.elements_in_range, 20);

    let resp = test.send(query_request(3, started.query_id, 100));
    let page = query_payload(&resp);
    assert_eq!(page.elements.len(), 20);
    assert!(page.done);

    let resp = test.send(list_request(4));
    match resp.payload {
        Some(proto::server_response::Payload::List(list)) => assert_eq!(list.structures[0].count, 70),
        other => panic!("Expected List response, got {other:?}"),
    }
}

#[test]
fn test_insert_invalidates_open_queries() {
    let test = TestClient::new();
    test.build_sensors("s", 50);
    let id = test.start_full_query("s");

    let resp = test.send(query_request(1, id, 10));
    assert_eq!(query_payload(&resp).elements.len(), 10);

    let resp = test.send(insert_request(2, "s", vec![element(1, 3.0, 3.0, 3)]));
    assert_eq!(code(&resp), Code::Ok);

    let resp = test.send(query_request(3, id, 10));
    assert_eq!(code(&resp), Code::FailedPrecondition);

    // A query started after the insert sees every record.
    let id = test.start_full_query("s");
    let resp = test.send(query_request(4, id, 100));
    assert_eq!(query_payload(&resp).elements.len(), 51);
}

#[test]
fn test_insert_errors() {
    let test = TestClient::new();

    let resp = test.send(insert_request(1, "missing", vec![element(1, 1.0, 1.0, 1)]));
    assert_eq!(code(&resp), Code::NotFound);

    test.build_sensors("s", 10);

    let no_location = proto::Element {
        oid: Some(vec![1; 12]),
        ..Default::default()
    };
    let resp = test.send(insert_request(2, "s", vec![no_location]));
    assert_eq!(code(&resp), Code::InvalidArgument);

    let with_payload = proto::Element {
        int_payload: Some(7),
        ..element(2, 1.0, 1.0, 1)
    };
    let resp = test.send(insert_request(3, "s", vec![with_payload]));
    assert_eq!(code(&resp), Code::InvalidArgument);
}
