//! Malformed requests are rejected with InvalidArgument.

use crate::e2e_tests::helpers::*;
use crate::proto::{self, google::rpc::Code};

#[test]
fn test_missing_payload() {
    let test = TestClient::new();
    let resp = test.send(proto::ClientMessage {
        request_id: Some(1),
        payload: None,
    });
    assert_eq!(code(&resp), Code::InvalidArgument);
    assert!(resp.payload.is_none());
}

#[test]
fn test_start_query_missing_corner() {
    let test = TestClient::new();
    test.build_sensors("s", 10);

    let resp = test.send(proto::ClientMessage {
        request_id: Some(2),
        payload: Some(proto::client_message::Payload::StartQuery(
            proto::StartQueryRequest {
                structure_name: "s".to_string(),
                min_point: Some(proto::Point::default()),
                max_point: None,
                ..Default::default()
            },
        )),
    });
    assert_eq!(code(&resp), Code::InvalidArgument);
}

#[test]
fn test_inverted_region() {
    let test = TestClient::new();
    test.build_sensors("s", 10);

    let resp = test.send(start_query_request(
        3,
        "s",
        (5.0, 0.0, 0),
        (1.0, 10.0, 10),
        (true, true, true),
        0,
    ));
    assert_eq!(code(&resp), Code::InvalidArgument);
}

#[test]
fn test_build_without_input_location() {
    let test = TestClient::new();
    let resp = test.send(proto::ClientMessage {
        request_id: Some(4),
        payload: Some(proto::client_message::Payload::Build(proto::BuildRequest {
            name: "s".to_string(),
            ..Default::default()
        })),
    });
    assert_eq!(code(&resp), Code::InvalidArgument);
}

#[test]
fn test_out_of_range_coordinates_only_warn() {
    let test = TestClient::new();
    test.build_sensors("s", 10);

    let resp = test.send(start_query_request(
        5,
        "s",
        (-100.0, -200.0, 0),
        (100.0, 200.0, 100),
        (true, true, true),
        0,
    ));
    let started = start_query_payload(&resp);
    assert_eq!(started.elements_in_range, 10);
}
