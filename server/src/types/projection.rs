//! Field selection for query results.

use crate::proto;
use crate::types::record::Record;

/// Which record fields a query returns.
///
/// Fields holding their empty sentinel are suppressed even when requested:
/// an all-zero object id, a location of exactly `(0, 0)`, a time of `0`.
/// Clients cannot distinguish a genuine zero from "absent" for these fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Projection {
    pub oid: bool,
    pub location: bool,
    pub time: bool,
}

impl Projection {
    #[must_use]
    pub const fn new(oid: bool, location: bool, time: bool) -> Self {
        Self {
            oid,
            location,
            time,
        }
    }

    /// Project a record onto the requested, non-empty fields.
    #[must_use]
    #[allow(clippy::float_cmp)] // the sentinel is exactly zero
    pub fn apply(&self, record: &Record) -> proto::Element {
        let oid = (self.oid && !record.oid.is_empty()).then(|| record.oid.0.to_vec());
        let location = (self.location
            && !(record.location.x == 0.0 && record.location.y == 0.0))
            .then_some(proto::Location {
                x: record.location.x,
                y: record.location.y,
            });
        let time = (self.time && record.location.time != 0).then_some(record.location.time);

        proto::Element {
            oid,
            location,
            time,
            ..Default::default()
        }
    }
}
