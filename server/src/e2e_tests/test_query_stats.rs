//! Statistics carried by query pages.

use crate::e2e_tests::helpers::*;

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-6, "{a} != {b}");
}

#[test]
fn test_page_and_total_statistics() {
    let test = TestClient::new();
    test.build_sensors("s", 20);
    let id = test.start_full_query("s");

    let resp = test.send(query_request(1, id, 8));
    let first = query_payload(&resp).clone();
    assert_eq!(first.sample_count_last, 8);
    assert_eq!(first.sample_count_total, 8);

    let resp = test.send(query_request(2, id, 100));
    let rest = query_payload(&resp);
    assert_eq!(rest.sample_count_last, 12);
    assert_eq!(rest.sample_count_total, 20);
    assert!(rest.done);

    let Some(total) = rest.stats_total else {
        panic!("total statistics should be present");
    };
    let Some(x) = total.x else {
        panic!("x statistics should be present");
    };
    // x cycles 0.5..=9.5 twice.
    assert_eq!(x.count, 20);
    assert_close(x.mean, 5.0);
    assert_close(x.min, 0.5);
    assert_close(x.max, 9.5);
    assert_close(x.variance, 8.25);

    let Some(time) = total.time else {
        panic!("time statistics should be present");
    };
    assert_close(time.mean, 10.5);
    assert_close(time.min, 1.0);
    assert_close(time.max, 20.0);

    // No payload column in this structure.
    assert!(total.payload.is_none());
}
