//! Bulk-load input parsing.
//!
//! Input is a text file with one record per line:
//!
//! ```text
//! oid,x,y,time[,payload]
//! ```
//!
//! `oid` is 24 hex digits, `x` a latitude and `y` a longitude in degrees,
//! `time` an integer. The payload column is required for int and float
//! structures and ignored otherwise. Blank lines are skipped.

use std::io::BufRead;

use tracing::warn;

use crate::types::{ObjectId, Payload, PayloadKind, Point3, Record};

/// Failure reading or parsing bulk-load input.
#[derive(Debug)]
pub enum IngestError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse { .. } => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

fn field<'a>(fields: &[&'a str], index: usize, name: &str) -> Result<&'a str, String> {
    fields
        .get(index)
        .map(|s| s.trim())
        .ok_or_else(|| format!("missing {name}"))
}

fn number<T: std::str::FromStr>(text: &str, name: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("invalid {name} '{text}'"))
}

/// Parse one non-blank input line.
pub fn parse_line(line: &str, kind: PayloadKind) -> Result<Record, String> {
    let fields: Vec<&str> = line.split(',').collect();
    let oid = ObjectId::from_hex(field(&fields, 0, "oid")?)?;
    let x: f32 = number(field(&fields, 1, "x")?, "x")?;
    let y: f32 = number(field(&fields, 2, "y")?, "y")?;
    let time: i64 = number(field(&fields, 3, "time")?, "time")?;
    let payload = match kind {
        PayloadKind::None => Payload::None,
        PayloadKind::Int => Payload::Int(number(field(&fields, 4, "payload")?, "payload")?),
        PayloadKind::Float => Payload::Float(number(field(&fields, 4, "payload")?, "payload")?),
    };
    Ok(Record {
        oid,
        location: Point3::new(x, y, time),
        payload,
    })
}

/// Read every record from `input`.
///
/// Records with coordinates outside the valid latitude/longitude ranges are
/// replaced by the null record and logged.
pub fn read_records(input: impl BufRead, kind: PayloadKind) -> Result<Vec<Record>, IngestError> {
    let mut records = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let number = index + 1;
        let record = parse_line(&line, kind).map_err(|message| IngestError::Parse {
            line: number,
            message,
        })?;
        if record.has_valid_coordinates() {
            records.push(record);
        } else {
            warn!(
                line = number,
                oid = %record.oid,
                x = record.location.x,
                y = record.location.y,
                "Invalid lat/lon in input, storing null record"
            );
            records.push(Record::null(kind));
        }
    }
    Ok(records)
}
