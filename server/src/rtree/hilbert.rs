//! Three-dimensional Hilbert curve keys for bulk loading.
//!
//! Sorting records by their position along a Hilbert curve keeps records
//! that are close in space and time close in the sort order, so packing the
//! sorted sequence into consecutive leaves yields tight leaf boxes.
//!
//! Uses John Skilling's transpose algorithm ("Programming the Hilbert
//! curve", AIP Conf. Proc. 707, 2004).

use crate::types::Record;

/// Bits per axis; a key fits in 96 bits.
pub const BITS: u32 = 32;

/// Scale applied to degrees before truncating to an integer axis.
const DEGREE_SCALE: f64 = 1e7;

/// Position of `coords` along a Hilbert curve of order `bits`.
///
/// # Pre-conditions
///
/// - `1 <= bits <= 32`
/// - every coordinate is below `2^bits`
#[must_use]
pub fn index(coords: [u32; 3], bits: u32) -> u128 {
    let mut x = coords;
    let m = 1u32 << (bits - 1);

    // Inverse undo
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..3 {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode
    for i in 1..3 {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    let mut q = m;
    while q > 1 {
        if x[2] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for axis in &mut x {
        *axis ^= t;
    }

    // Interleave the transposed bits, most significant first.
    let mut key = 0u128;
    for b in (0..bits).rev() {
        for axis in &x {
            key = (key << 1) | u128::from((axis >> b) & 1);
        }
    }
    key
}

/// Maps records onto the integer grid used for Hilbert ordering.
///
/// Latitude and longitude are shifted to be non-negative and scaled by 1e7.
/// Time is taken relative to the earliest record and shifted right just
/// enough for the span to fit in 32 bits.
#[derive(Debug, Clone, Copy)]
pub struct HilbertMapper {
    time_base: i64,
    time_shift: u32,
}

impl HilbertMapper {
    /// Build a mapper covering every record in `records`.
    #[must_use]
    pub fn for_records(records: &[Record]) -> Self {
        let min = records.iter().map(|r| r.location.time).min().unwrap_or(0);
        let max = records.iter().map(|r| r.location.time).max().unwrap_or(0);
        let span = max.abs_diff(min);
        let time_shift = (u64::BITS - span.leading_zeros()).saturating_sub(BITS);
        Self {
            time_base: min,
            time_shift,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn degrees(value: f32, offset: f64) -> u32 {
        // `as` saturates, so out-of-range values clamp to the grid edge.
        ((f64::from(value) + offset) * DEGREE_SCALE) as u32
    }

    /// Hilbert key for one record.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn key(&self, record: &Record) -> u128 {
        let time = (record.location.time.abs_diff(self.time_base) >> self.time_shift) as u32;
        index(
            [
                Self::degrees(record.location.x, 90.0),
                Self::degrees(record.location.y, 180.0),
                time,
            ],
            BITS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectId, Payload, Point3};

    #[test]
    fn test_curve_visits_neighbours_in_order() {
        let bits = 2;
        let side = 1u32 << bits;
        let mut cells = Vec::new();
        for x in 0..side {
            for y in 0..side {
                for z in 0..side {
                    cells.push(([x, y, z], index([x, y, z], bits)));
                }
            }
        }
        cells.sort_by_key(|(_, key)| *key);

        let keys: Vec<u128> = cells.iter().map(|(_, k)| *k).collect();
        let expected: Vec<u128> = (0..u128::from(side * side * side)).collect();
        assert_eq!(keys, expected);

        for pair in cells.windows(2) {
            let (a, b) = (pair[0].0, pair[1].0);
            let distance: u32 = (0..3).map(|i| a[i].abs_diff(b[i])).sum();
            assert_eq!(distance, 1, "{a:?} -> {b:?} is not a unit step");
        }
    }

    #[test]
    fn test_mapper_orders_nearby_records_together() {
        let record = |x: f32, y: f32, time: i64| Record {
            oid: ObjectId::default(),
            location: Point3::new(x, y, time),
            payload: Payload::None,
        };
        let records = vec![
            record(10.0, 10.0, 1_000),
            record(-60.0, 120.0, 5_000),
            record(10.000_1, 10.000_1, 1_001),
        ];
        let mapper = HilbertMapper::for_records(&records);

        let near = mapper.key(&records[0]).abs_diff(mapper.key(&records[2]));
        let far = mapper.key(&records[0]).abs_diff(mapper.key(&records[1]));
        assert!(near < far);
    }

    #[test]
    fn test_mapper_handles_wide_time_span() {
        let records = vec![
            Record {
                location: Point3::new(0.0, 0.0, i64::MIN),
                ..Record::default()
            },
            Record {
                location: Point3::new(0.0, 0.0, i64::MAX),
                ..Record::default()
            },
        ];
        let mapper = HilbertMapper::for_records(&records);
        assert_eq!(mapper.time_shift, 32);
        assert_ne!(mapper.key(&records[0]), mapper.key(&records[1]));
    }
}
