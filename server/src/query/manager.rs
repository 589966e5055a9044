//! Table of live query sessions.
//!
//! Sessions live in an arena keyed by `QueryId`. A fetch checks its session
//! out of the table for the duration of the traversal, so the table lock is
//! never held while pages are read; a second fetch on the same id finds the
//! slot checked out and fails fast. The sweep removes idle sessions and
//! skips checked-out ones.
//!
//! # Invariants
//!
//! - Ids are issued in increasing order starting at 1 and never reused.
//! - A checked-out session returns to the table when its fetch ends, even
//!   if the fetch fails or panics.
//! - The table lock is never held while a structure's tree lock is taken.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::query::session::{QueryId, QueryPage, QuerySession, SessionError};
use crate::storage::TimeSource;
use crate::structure::SamplingStructure;
use crate::types::{BoundingBox, Projection};

/// Idle timeout used when a query asks for 0.
pub const DEFAULT_TTL_SECS: u32 = 60;

/// Upper bound on a query's idle timeout.
pub const MAX_TTL_SECS: u32 = 300;

/// Session timeout settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub default_ttl_secs: u32,
    pub max_ttl_secs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            max_ttl_secs: MAX_TTL_SECS,
        }
    }
}

impl SessionConfig {
    /// The ttl granted for a requested one: 0 selects the default, and
    /// anything above the maximum is clamped.
    #[must_use]
    pub fn effective_ttl(&self, requested_secs: u32) -> u32 {
        let ttl = if requested_secs == 0 {
            self.default_ttl_secs
        } else {
            requested_secs
        };
        ttl.min(self.max_ttl_secs)
    }
}

/// Result of starting a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedQuery {
    pub id: QueryId,
    /// Records inside the query region.
    pub elements_in_range: u64,
    /// Granted idle timeout.
    pub ttl_secs: u32,
}

enum Slot {
    Idle(Box<QuerySession>),
    InFlight,
}

struct Table {
    last_issued: QueryId,
    sessions: BTreeMap<QueryId, Slot>,
}

/// Owns every live query session.
pub struct SessionManager {
    table: Mutex<Table>,
    clock: Arc<dyn TimeSource>,
    config: SessionConfig,
}

/// Returns a checked-out session to the table when dropped.
pub(crate) struct CheckedOut<'a> {
    manager: &'a SessionManager,
    session: Option<Box<QuerySession>>,
}

impl Drop for CheckedOut<'_> {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.touch(self.manager.clock.now_ms());
            let id = session.id();
            let mut table = self.manager.lock_ignoring_poison();
            table.sessions.insert(id, Slot::Idle(session));
        }
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>, config: SessionConfig) -> Self {
        Self {
            table: Mutex::new(Table {
                last_issued: 0,
                sessions: BTreeMap::new(),
            }),
            clock,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().expect("lock poisoned")
    }

    /// Used from `Drop`, where panicking again would abort.
    fn lock_ignoring_poison(&self) -> MutexGuard<'_, Table> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Open a query over `region` of `structure`.
    pub fn start(
        &self,
        structure: Arc<SamplingStructure>,
        region: BoundingBox,
        projection: Projection,
        requested_ttl_secs: u32,
    ) -> Result<StartedQuery, SessionError> {
        let elements_in_range = structure
            .tree()
            .count_in_region(&region)
            .map_err(SessionError::Tree)?;
        let ttl_secs = self.config.effective_ttl(requested_ttl_secs);
        let now_ms = self.clock.now_ms();

        let id = {
            let mut table = self.lock();
            table.last_issued += 1;
            table.last_issued
        };
        // Opening the cursor reads the tree, which must not happen under the
        // table lock.
        let session = QuerySession::new(
            id,
            structure,
            region,
            projection,
            u64::from(ttl_secs) * 1000,
            now_ms,
            rand::random(),
        );
        self.lock()
            .sessions
            .insert(id, Slot::Idle(Box::new(session)));

        Ok(StartedQuery {
            id,
            elements_in_range,
            ttl_secs,
        })
    }

    /// Fetch up to `max` more records of query `id`.
    pub fn fetch(&self, id: QueryId, max: usize) -> Result<QueryPage, SessionError> {
        let mut checked_out = self.check_out(id)?;
        let session = checked_out
            .session
            .as_mut()
            .ok_or(SessionError::AlreadyInFlight(id))?;
        let page = session.fetch(max)?;
        debug!(
            query_id = id,
            requested = max,
            returned = page.elements.len(),
            done = page.done,
            "Fetched query page"
        );
        Ok(page)
    }

    /// Take session `id` out of the table until the guard is dropped.
    pub(crate) fn check_out(&self, id: QueryId) -> Result<CheckedOut<'_>, SessionError> {
        let mut table = self.lock();
        let last_issued = table.last_issued;
        let Some(slot) = table.sessions.get_mut(&id) else {
            debug!(query_id = id, "Query requested but not in the table");
            return Err(SessionError::NotFound {
                id,
                expired: id < last_issued,
            });
        };
        match std::mem::replace(slot, Slot::InFlight) {
            Slot::Idle(session) => Ok(CheckedOut {
                manager: self,
                session: Some(session),
            }),
            Slot::InFlight => Err(SessionError::AlreadyInFlight(id)),
        }
    }

    /// Remove every idle session whose ttl has elapsed at `now_ms`.
    ///
    /// Sessions with a fetch in progress are skipped; they are touched when
    /// the fetch ends. Returns the number removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut table = self.lock();
        let before = table.sessions.len();
        table.sessions.retain(|_, slot| match slot {
            Slot::Idle(session) => !session.is_expired(now_ms),
            Slot::InFlight => true,
        });
        let removed = before - table.sessions.len();
        drop(table);
        if removed > 0 {
            info!(removed, "Cleaned up expired queries");
        }
        removed
    }

    /// `sweep` at the current time.
    pub fn sweep_expired(&self) -> usize {
        self.sweep(self.clock.now_ms())
    }

    /// Number of live sessions, in flight or idle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last id issued, 0 if none.
    #[must_use]
    pub fn last_issued(&self) -> QueryId {
        self.lock().last_issued
    }
}
