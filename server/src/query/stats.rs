//! Streaming summary statistics over returned samples.

use crate::proto;
use crate::types::Record;

/// Running count, mean, variance, min, and max of one value (Welford).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RunningStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0 for fewer than two values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// `None` until at least one value has been pushed.
    #[must_use]
    pub fn to_proto(&self) -> Option<proto::Statistics> {
        (self.count > 0).then(|| proto::Statistics {
            count: self.count,
            mean: self.mean,
            variance: self.variance(),
            min: self.min,
            max: self.max,
        })
    }
}

/// Statistics for each field of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordStats {
    pub x: RunningStats,
    pub y: RunningStats,
    pub time: RunningStats,
    pub payload: RunningStats,
}

impl RecordStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, record: &Record) {
        self.x.push(f64::from(record.location.x));
        self.y.push(f64::from(record.location.y));
        self.time.push(record.location.time as f64);
        if let Some(value) = record.payload.as_f64() {
            self.payload.push(value);
        }
    }

    #[must_use]
    pub fn from_records(records: &[Record]) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.push(record);
        }
        stats
    }

    pub fn merge_records(&mut self, records: &[Record]) {
        for record in records {
            self.push(record);
        }
    }

    #[must_use]
    pub const fn count(&self) -> u64 {
        self.x.count()
    }

    #[must_use]
    pub fn to_proto(&self) -> proto::ElementStatistics {
        proto::ElementStatistics {
            x: self.x.to_proto(),
            y: self.y.to_proto(),
            time: self.time.to_proto(),
            payload: self.payload.to_proto(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, Point3};

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        assert_eq!(stats.to_proto(), None);

        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }
        assert_eq!(stats.count(), 8);
        assert_close(stats.mean(), 5.0);
        assert_close(stats.variance(), 4.0);

        let proto = stats.to_proto().expect("stats");
        assert_close(proto.min, 2.0);
        assert_close(proto.max, 9.0);
    }

    #[test]
    fn test_single_value_has_zero_variance() {
        let mut stats = RunningStats::default();
        stats.push(3.5);
        assert_close(stats.variance(), 0.0);
        assert_close(stats.mean(), 3.5);
    }

    #[test]
    fn test_record_stats_skip_missing_payload() {
        let records = [
            Record {
                location: Point3::new(1.0, 10.0, 100),
                payload: Payload::Int(3),
                ..Record::default()
            },
            Record {
                location: Point3::new(3.0, 20.0, 300),
                payload: Payload::None,
                ..Record::default()
            },
        ];
        let stats = RecordStats::from_records(&records);
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.payload.count(), 1);

        let proto = stats.to_proto();
        assert_close(proto.x.expect("x").mean, 2.0);
        assert_close(proto.time.expect("time").max, 300.0);
        assert_close(proto.payload.expect("payload").mean, 3.0);
    }
}
