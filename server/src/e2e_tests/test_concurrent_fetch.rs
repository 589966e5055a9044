//! Concurrent fetches on one query never share or lose records.

use std::collections::HashSet;

use futures::future::join_all;

use crate::e2e_tests::helpers::*;
use crate::proto::google::rpc::Code;

#[test]
fn test_simultaneous_fetches_on_one_query() {
    let test = TestClient::new();
    test.build_sensors("s", 400);
    let id = test.start_full_query("s");

    let responses = test.runtime.block_on(join_all(
        (0..8).map(|i| test.client.handle_message(query_request(i, id, 20))),
    ));

    let mut seen = HashSet::new();
    let mut successes: usize = 0;
    let mut aborted: usize = 0;
    for server_message in responses {
        let Some(resp) = server_message.response else {
            panic!("Response should be present");
        };
        match code(&resp) {
            Code::Ok => {
                successes += 1;
                for element in &query_payload(&resp).elements {
                    let oid = element.oid.as_deref().map_or(0, oid_number);
                    assert!(seen.insert(oid), "oid {oid} returned twice");
                }
            }
            Code::Aborted => {
                aborted += 1;
                assert!(message(&resp).contains("already has a fetch in progress"));
            }
            other => panic!("unexpected status {other:?}: {resp:?}"),
        }
    }
    assert!(successes >= 1);
    assert_eq!(successes + aborted, 8);
    assert_eq!(seen.len(), successes * 20);

    // The query is usable again once the fetches have finished.
    let resp = test.send(query_request(100, id, 1_000));
    let page = query_payload(&resp);
    assert_eq!(seen.len() + page.elements.len(), 400);
    assert!(page.done);
}

#[test]
fn test_fetch_while_another_is_running_is_aborted() {
    let test = TestClient::new();
    test.build_sensors("s", 30);
    let id = test.start_full_query("s");

    let resp = test.with_fetch_in_progress(id, || test.send(query_request(1, id, 10)));
    assert_eq!(code(&resp), Code::Aborted);
    assert!(
        message(&resp).contains("already has a fetch in progress"),
        "{}",
        message(&resp)
    );

    // Nothing was consumed by the rejected fetch.
    let resp = test.send(query_request(2, id, 100));
    let page = query_payload(&resp);
    assert_eq!(page.elements.len(), 30);
    assert!(page.done);
}

#[test]
fn test_fetches_on_different_queries() {
    let test = TestClient::new();
    test.build_sensors("s", 100);
    let ids: Vec<u64> = (0..4).map(|_| test.start_full_query("s")).collect();

    let responses = test.runtime.block_on(join_all(
        ids.iter()
            .zip(0u32..)
            .map(|(id, i)| test.client.handle_message(query_request(i, *id, 100))),
    ));

    for server_message in responses {
        let Some(resp) = server_message.response else {
            panic!("Response should be present");
        };
        let page = query_payload(&resp);
        assert_eq!(page.elements.len(), 100);
        assert!(page.done);
    }
}
