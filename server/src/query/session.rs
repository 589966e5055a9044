//! One outstanding client query.

use std::sync::Arc;

use crate::proto;
use crate::query::stats::RecordStats;
use crate::rtree::{Cursor, TreeError};
use crate::structure::SamplingStructure;
use crate::types::{BoundingBox, Projection};

/// Server-assigned query identifier.
pub type QueryId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// More matching records may remain.
    Active,
    /// The traversal is complete; further fetches return nothing.
    Done,
}

/// Errors from query session operations.
#[derive(Debug)]
pub enum SessionError {
    /// Unknown or expired query id.
    NotFound { id: QueryId, expired: bool },
    /// Another fetch on the same query is executing.
    AlreadyInFlight(QueryId),
    /// The structure was modified after the query started.
    StructureModified(QueryId),
    Tree(TreeError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { id, expired: true } => {
                write!(f, "query {id} expired and was cleaned up")
            }
            Self::NotFound { id, expired: false } => write!(f, "query {id} does not exist"),
            Self::AlreadyInFlight(id) => {
                write!(f, "query {id} already has a fetch in progress")
            }
            Self::StructureModified(id) => write!(
                f,
                "the structure read by query {id} was modified; start a new query"
            ),
            Self::Tree(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::NotFound { .. } | Self::AlreadyInFlight(_) | Self::StructureModified(_) => None,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub elements: Vec<proto::Element>,
    pub done: bool,
    /// Statistics over this page.
    pub last: RecordStats,
    /// Statistics over every page returned so far.
    pub total: RecordStats,
}

impl QueryPage {
    #[must_use]
    pub fn to_proto(&self) -> proto::QueryResponse {
        proto::QueryResponse {
            elements: self.elements.clone(),
            sample_count_last: self.last.count(),
            sample_count_total: self.total.count(),
            done: self.done,
            stats_last: Some(self.last.to_proto()),
            stats_total: Some(self.total.to_proto()),
        }
    }
}

/// A resumable, projected region query over one structure.
pub struct QuerySession {
    id: QueryId,
    structure: Arc<SamplingStructure>,
    cursor: Cursor,
    projection: Projection,
    ttl_ms: u64,
    last_touched_ms: u64,
    state: SessionState,
    total: RecordStats,
}

impl QuerySession {
    /// Open a session at `now_ms` with a traversal seeded by `seed`.
    #[must_use]
    pub fn new(
        id: QueryId,
        structure: Arc<SamplingStructure>,
        region: BoundingBox,
        projection: Projection,
        ttl_ms: u64,
        now_ms: u64,
        seed: u64,
    ) -> Self {
        let cursor = Cursor::open(&structure.tree(), region, seed);
        Self {
            id,
            structure,
            cursor,
            projection,
            ttl_ms,
            last_touched_ms: now_ms,
            state: SessionState::Active,
            total: RecordStats::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> QueryId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    #[must_use]
    pub const fn last_touched_ms(&self) -> u64 {
        self.last_touched_ms
    }

    pub const fn touch(&mut self, now_ms: u64) {
        self.last_touched_ms = now_ms;
    }

    /// True if the session has been idle longer than its ttl at `now_ms`.
    #[must_use]
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_touched_ms) > self.ttl_ms
    }

    #[must_use]
    pub fn structure(&self) -> &SamplingStructure {
        &self.structure
    }

    /// Return up to `max` more matching records, projected.
    ///
    /// A `max` of 0 or a done session yields an empty page.
    pub fn fetch(&mut self, max: usize) -> Result<QueryPage, SessionError> {
        let records = if self.state == SessionState::Done {
            Vec::new()
        } else {
            let tree = self.structure.tree();
            self.cursor.advance(&tree, max).map_err(|e| match e {
                TreeError::StaleCursor => SessionError::StructureModified(self.id),
                e => SessionError::Tree(e),
            })?
        };

        if self.cursor.is_exhausted() {
            self.state = SessionState::Done;
        }
        let last = RecordStats::from_records(&records);
        self.total.merge_records(&records);

        Ok(QueryPage {
            elements: records.iter().map(|r| self.projection.apply(r)).collect(),
            done: self.state == SessionState::Done,
            last,
            total: self.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtree::RTree;
    use crate::storage::{MemoryStore, Superblock};
    use crate::types::{ObjectId, Payload, PayloadKind, Point3, Record};
    use std::path::PathBuf;

    #[allow(clippy::cast_precision_loss)]
    fn structure(n: i64) -> Arc<SamplingStructure> {
        let store = MemoryStore::new(Superblock::new(PayloadKind::Int, 4, 4));
        let records = (1..=n)
            .map(|i| Record {
                oid: ObjectId([7; 12]),
                location: Point3::new(i as f32, 1.0, i),
                payload: Payload::Int(i * 2),
            })
            .collect();
        let tree = RTree::bulk_load(Box::new(store), records, 0, 0).expect("bulk load");
        Arc::new(SamplingStructure::new(
            "s".to_string(),
            PathBuf::from("unused"),
            tree,
        ))
    }

    fn region() -> BoundingBox {
        BoundingBox::new(Point3::new(0.0, 0.0, 0), Point3::new(20.0, 2.0, 100)).expect("box")
    }

    #[test]
    fn test_fetch_pages_until_done() {
        let mut session = QuerySession::new(
            1,
            structure(10),
            region(),
            Projection::new(true, false, true),
            1_000,
            0,
            9,
        );

        let first = session.fetch(4).expect("fetch");
        assert_eq!(first.elements.len(), 4);
        assert!(!first.done);
        assert!(first.elements.iter().all(|e| e.oid.is_some() && e.location.is_none()));
        assert!(first.elements.iter().all(|e| e.time.is_some()));

        let second = session.fetch(100).expect("fetch");
        assert_eq!(second.elements.len(), 6);
        assert!(second.done);
        assert_eq!(session.state(), SessionState::Done);

        let response = second.to_proto();
        assert_eq!(response.sample_count_last, 6);
        assert_eq!(response.sample_count_total, 10);
        let total = response.stats_total.expect("stats").time.expect("time");
        assert!((total.mean - 5.5).abs() < 1e-9);

        let after = session.fetch(5).expect("fetch");
        assert!(after.elements.is_empty());
        assert!(after.done);
    }

    #[test]
    fn test_page_ending_on_last_record_is_done() {
        let mut session = QuerySession::new(
            1,
            structure(10),
            region(),
            Projection::default(),
            1_000,
            0,
            3,
        );
        let page = session.fetch(10).expect("fetch");
        assert_eq!(page.elements.len(), 10);
        assert!(page.done);
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn test_zero_max_returns_nothing() {
        let mut session = QuerySession::new(
            1,
            structure(3),
            region(),
            Projection::default(),
            1_000,
            0,
            0,
        );
        let page = session.fetch(0).expect("fetch");
        assert!(page.elements.is_empty());
        assert!(!page.done);
        assert_eq!(session.fetch(3).expect("fetch").elements.len(), 3);
    }

    #[test]
    fn test_expiry_is_strictly_after_ttl() {
        let session = QuerySession::new(
            1,
            structure(1),
            region(),
            Projection::default(),
            1_000,
            500,
            0,
        );
        assert!(!session.is_expired(1_500));
        assert!(session.is_expired(1_501));
    }

    #[test]
    fn test_insert_makes_session_stale() {
        let s = structure(5);
        #[allow(clippy::disallowed_methods)]
        let mut session = QuerySession::new(
            4,
            Arc::clone(&s),
            region(),
            Projection::default(),
            1_000,
            0,
            0,
        );
        s.tree_mut()
            .insert(Record {
                location: Point3::new(1.0, 1.0, 1),
                payload: Payload::Int(0),
                ..Record::default()
            })
            .expect("insert");

        assert!(matches!(
            session.fetch(1),
            Err(SessionError::StructureModified(4))
        ));
    }
}
