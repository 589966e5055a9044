//! Build a structure, query a region with a projection, and page through it.

use std::collections::HashSet;

use crate::e2e_tests::helpers::*;
use crate::proto::google::rpc::Code;

#[test]
fn test_city_sensors_projection() {
    let test = TestClient::new();
    let info = test.build_sensors("city.sensors", 200);
    assert_eq!(info.name, "city.sensors");
    assert_eq!(info.count, 200);
    assert_eq!(info.sec_since_rebuild, 0);

    let resp = test.send(start_query_request(
        10,
        "city.sensors",
        (0.0, 0.0, 0),
        (10.0, 10.0, 100),
        (true, true, false),
        30,
    ));
    let started = start_query_payload(&resp);
    assert_eq!(started.ttl, 30);
    // Rows 1..=100 have time <= 100; every row lies inside the 10x10 box.
    assert_eq!(started.elements_in_range, 100);

    let resp = test.send(query_request(11, started.query_id, 5));
    let page = query_payload(&resp);
    assert_eq!(page.elements.len(), 5);
    assert!(!page.done);
    for element in &page.elements {
        assert!(element.oid.is_some(), "oid requested and non-empty");
        assert!(element.location.is_some(), "location requested and non-zero");
        assert_eq!(element.time, None, "time not requested");
    }
}

#[test]
fn test_paging_returns_every_match_once() {
    let test = TestClient::new();
    test.build_sensors("city.sensors", 200);

    let resp = test.send(start_query_request(
        1,
        "city.sensors",
        (0.0, 0.0, 0),
        (4.9, 90.0, 150),
        (true, false, true),
        0,
    ));
    let started = start_query_payload(&resp);
    // x in {0.5..4.5} is half of each group of ten; times 1..=150.
    assert_eq!(started.elements_in_range, 75);
    assert_eq!(started.ttl, 60);

    let mut seen = HashSet::new();
    let mut done = false;
    let mut request_id = 2;
    while !done {
        let resp = test.send(query_request(request_id, started.query_id, 7));
        let page = query_payload(&resp);
        assert!(page.elements.len() <= 7);
        for element in &page.elements {
            let oid = element.oid.as_deref().map_or(0, oid_number);
            let time = element.time.unwrap_or_default();
            assert_eq!(i64::try_from(oid).unwrap_or(-1), time);
            assert!(time <= 150);
            assert!(seen.insert(oid), "oid {oid} returned twice");
        }
        done = page.done;
        request_id += 1;
        assert!(request_id < 100, "query never finished");
    }
    assert_eq!(seen.len(), 75);

    // A finished query keeps answering with empty pages until it expires.
    let resp = test.send(query_request(request_id, started.query_id, 7));
    let page = query_payload(&resp);
    assert!(page.elements.is_empty());
    assert!(page.done);
}

#[test]
fn test_query_unknown_structure() {
    let test = TestClient::new();
    let resp = test.send(start_query_request(
        1,
        "nowhere",
        (0.0, 0.0, 0),
        (1.0, 1.0, 1),
        (true, true, true),
        0,
    ));
    assert_eq!(code(&resp), Code::NotFound);
}
