//! Query sessions: resumable, paginated, time-limited region queries.
//!
//! - `manager`: the session table (start, fetch, sweep)
//! - `session`: one query's cursor, projection, and statistics
//! - `stats`: streaming statistics over returned samples
//! - `sweeper`: periodic background sweep

mod manager;
mod session;
mod stats;
mod sweeper;

pub use manager::{
    DEFAULT_TTL_SECS, MAX_TTL_SECS, SessionConfig, SessionManager, StartedQuery,
};
pub use session::{QueryId, QueryPage, QuerySession, SessionError, SessionState};
pub use stats::{RecordStats, RunningStats};
pub use sweeper::spawn_sweeper;
