//! Test that request IDs are correctly echoed in responses.

use crate::e2e_tests::helpers::*;
use crate::proto::{self, google::rpc::Code};

#[test]
fn test_request_id_preserved() {
    let test = TestClient::new();

    for request_id in [1, 100, 999, u32::MAX] {
        let resp = test.send(list_request(request_id));
        assert_eq!(resp.request_id, Some(request_id));
        assert_eq!(code(&resp), Code::Ok);
    }
}

#[test]
fn test_request_id_echoed_on_error() {
    let test = TestClient::new();

    let resp = test.send(query_request(42, 7, 1));
    assert_eq!(resp.request_id, Some(42));
    assert_eq!(code(&resp), Code::NotFound);
}

#[test]
fn test_request_id_none() {
    let test = TestClient::new();

    let req = proto::ClientMessage {
        request_id: None,
        payload: Some(proto::client_message::Payload::List(proto::ListRequest {})),
    };

    let resp = test.send(req);
    assert_eq!(resp.request_id, None);
    assert_eq!(code(&resp), Code::InvalidArgument);
}
