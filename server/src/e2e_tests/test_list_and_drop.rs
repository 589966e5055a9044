//! Listing and dropping structures.

use crate::e2e_tests::helpers::*;
use crate::proto::{self, google::rpc::Code};

fn list(test: &TestClient) -> Vec<proto::StructureInfo> {
    let resp = test.send(list_request(1));
    assert_eq!(code(&resp), Code::Ok);
    match resp.payload {
        Some(proto::server_response::Payload::List(list)) => list.structures,
        other => panic!("Expected List response, got {other:?}"),
    }
}

fn tree_files(test: &TestClient, name: &str) -> usize {
    std::fs::read_dir(test.data_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| {
                    let file_name = entry.file_name().to_string_lossy().into_owned();
                    file_name.starts_with(&format!("{name}.")) && file_name.ends_with(".tree")
                })
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_list_structures() {
    let test = TestClient::new();
    assert!(list(&test).is_empty());

    test.build_sensors("beta", 12);
    test.clock.advance(3_000);
    test.build_sensors("alpha", 7);
    test.clock.advance(2_000);

    let structures = list(&test);
    assert_eq!(structures.len(), 2);
    assert_eq!(structures[0].name, "alpha");
    assert_eq!(structures[0].count, 7);
    assert_eq!(structures[0].sec_since_rebuild, 2);
    assert_eq!(structures[1].name, "beta");
    assert_eq!(structures[1].count, 12);
    assert_eq!(structures[1].sec_since_rebuild, 5);
    assert_eq!(
        structures[1].payload_type,
        i32::from(proto::PayloadType::NoPayload)
    );
}

#[test]
fn test_drop_structure() {
    let test = TestClient::new();
    test.build_sensors("s", 10);
    assert_eq!(tree_files(&test, "s"), 1);

    let resp = test.send(drop_request(2, "s"));
    assert_eq!(code(&resp), Code::Ok);
    assert!(list(&test).is_empty());
    assert_eq!(tree_files(&test, "s"), 0);

    let resp = test.send(drop_request(3, "s"));
    assert_eq!(code(&resp), Code::NotFound);
}

#[test]
fn test_dropped_structure_outlives_open_queries() {
    let test = TestClient::new();
    test.build_sensors("s", 30);
    let id = test.start_full_query("s");

    let resp = test.send(drop_request(2, "s"));
    assert_eq!(code(&resp), Code::Ok);

    // New queries no longer see it, but the open one still reads.
    let resp = test.send(start_query_request(
        3,
        "s",
        (0.0, 0.0, 0),
        (1.0, 1.0, 1),
        (true, true, true),
        0,
    ));
    assert_eq!(code(&resp), Code::NotFound);
    let resp = test.send(query_request(4, id, 10));
    assert_eq!(query_payload(&resp).elements.len(), 10);
    assert_eq!(tree_files(&test, "s"), 1);

    // Once the query is swept the file goes with it.
    test.clock.advance(61_000);
    assert_eq!(test.sweep(), 1);
    assert_eq!(tree_files(&test, "s"), 0);
}

#[test]
fn test_rebuild_replaces_file() {
    let test = TestClient::new();
    test.build_sensors("s", 10);
    test.clock.advance(1_000);
    test.build_sensors("s", 20);

    assert_eq!(tree_files(&test, "s"), 1);
    assert_eq!(list(&test)[0].count, 20);
}
