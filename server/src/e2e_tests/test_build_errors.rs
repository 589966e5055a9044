//! BuildStructure failure modes.

use crate::e2e_tests::helpers::*;
use crate::proto::google::rpc::Code;

#[test]
fn test_invalid_name() {
    let test = TestClient::new();
    let input = test.write_input("in.csv", &sensor_rows(5));

    for name in ["", "bad name", "../escape", "a/b"] {
        let resp = test.send(build_request(1, name, &input, true));
        assert_eq!(code(&resp), Code::InvalidArgument, "name {name:?}");
    }
}

#[test]
fn test_missing_input() {
    let test = TestClient::new();
    let input = test.data_dir().join("does-not-exist.csv");
    let resp = test.send(build_request(1, "s", &input, false));
    assert_eq!(code(&resp), Code::NotFound);
}

#[test]
fn test_existing_structure_requires_force() {
    let test = TestClient::new();
    test.build_sensors("s", 20);

    let input = test.write_input("more.csv", &sensor_rows(30));
    let resp = test.send(build_request(2, "s", &input, false));
    assert_eq!(code(&resp), Code::AlreadyExists);

    let resp = test.send(build_request(3, "s", &input, true));
    assert_eq!(code(&resp), Code::Ok);
    let id = test.start_full_query("s");
    let resp = test.send(query_request(4, id, 100));
    assert_eq!(query_payload(&resp).elements.len(), 30);
}

#[test]
fn test_unparseable_line_fails_build() {
    let test = TestClient::new();
    let mut rows = sensor_rows(5);
    rows.push("not-an-oid,1,2,3".to_string());
    let input = test.write_input("broken.csv", &rows);

    let resp = test.send(build_request(1, "s", &input, false));
    assert_eq!(code(&resp), Code::InvalidArgument);
    assert!(message(&resp).contains("line 6"), "{}", message(&resp));

    // The failed build leaves no structure behind.
    let resp = test.send(drop_request(2, "s"));
    assert_eq!(code(&resp), Code::NotFound);
}

#[test]
fn test_invalid_coordinates_become_null_records() {
    let test = TestClient::new();
    let mut rows = sensor_rows(4);
    rows.push(format!("{:024x},95.0,10.0,7", 99));
    let input = test.write_input("odd.csv", &rows);

    let resp = test.send(build_request(1, "s", &input, false));
    assert_eq!(code(&resp), Code::Ok);

    let id = test.start_full_query("s");
    let resp = test.send(query_request(2, id, 10));
    let page = query_payload(&resp);
    // The null record sits at (0, 0, 0) and carries no visible fields.
    assert_eq!(page.elements.len(), 5);
    assert_eq!(
        page.elements.iter().filter(|e| e.oid.is_none()).count(),
        1
    );
}
