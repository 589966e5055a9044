// Life of a request:
// 1. Protobuf comes in over the websocket
// 2. Convert / validate proto into internal command format
// 3. Run the command on the blocking pool:
//     - Build / Drop / Insert go through the structure registry
//     - StartQuery opens a session over a structure's R-tree
//     - Query advances that session's cursor and returns one page
// 4. Respond with a status and the payload
//
// System components:
//  - Page cache and page stores (storage)
//  - Sampling R-tree and its cursors (rtree)
//  - Structure registry (structure)
//  - Session manager and sweeper (query)

mod client_connection;
pub mod config;
#[cfg(test)]
mod e2e_tests;
pub mod proto;
pub mod query;
pub mod rtree;
mod service;
pub mod storage;
pub mod structure;
pub mod testing;
pub mod types;

pub use client_connection::ClientConnection;
pub use service::{SamplingService, ServiceError};
