//! End-to-end tests at the proto request/response level.
//!
//! Each test file covers a specific scenario, driving a `ClientConnection`
//! with protobuf messages against a temporary data directory.

#![cfg(test)]

mod helpers;

mod test_build_errors;
mod test_city_sensors;
mod test_concurrent_fetch;
mod test_insert;
mod test_list_and_drop;
mod test_missing_fields;
mod test_query_stats;
mod test_request_id;
mod test_session_expiry;
