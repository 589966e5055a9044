//! Records stored in the leaves of a sampling structure.

use std::fmt;

use crate::proto;
use crate::types::geometry::Point3;
use crate::types::{ProtoDeserializable, ProtoSerializable};

/// A 12-byte object identifier, written as 24 hex digits in input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    pub const LEN: usize = 12;

    /// Parse a 24-digit hex string.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the string has the wrong
    /// length or contains a non-hex character.
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("object id {s:?} is not hex"));
        }
        if s.len() != Self::LEN * 2 {
            return Err(format!(
                "object id must be {} hex digits, got {}",
                Self::LEN * 2,
                s.len()
            ));
        }
        let mut bytes = [0u8; Self::LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| format!("invalid hex digits {pair:?} in object id"))?;
        }
        Ok(Self(bytes))
    }

    /// Whether every byte is zero (the "empty" identifier).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Kind of auxiliary sample value a structure stores with each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PayloadKind {
    #[default]
    None = 0,
    Int = 1,
    Float = 2,
}

impl TryFrom<u8> for PayloadKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Int),
            2 => Ok(Self::Float),
            _ => Err(value),
        }
    }
}

impl From<proto::PayloadType> for PayloadKind {
    fn from(value: proto::PayloadType) -> Self {
        match value {
            proto::PayloadType::NoPayload => Self::None,
            proto::PayloadType::IntPayload => Self::Int,
            proto::PayloadType::FloatPayload => Self::Float,
        }
    }
}

impl From<PayloadKind> for proto::PayloadType {
    fn from(value: PayloadKind) -> Self {
        match value {
            PayloadKind::None => Self::NoPayload,
            PayloadKind::Int => Self::IntPayload,
            PayloadKind::Float => Self::FloatPayload,
        }
    }
}

/// An auxiliary sample value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Payload {
    #[default]
    None,
    Int(i64),
    Float(f32),
}

impl Payload {
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::None => PayloadKind::None,
            Self::Int(_) => PayloadKind::Int,
            Self::Float(_) => PayloadKind::Float,
        }
    }

    /// The value as a float, for statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::None => None,
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
        }
    }

    /// Encode into the fixed 8-byte slot used by leaf pages.
    #[must_use]
    pub fn to_bits(&self) -> u64 {
        match self {
            Self::None => 0,
            #[allow(clippy::cast_sign_loss)]
            Self::Int(v) => *v as u64,
            Self::Float(v) => u64::from(v.to_bits()),
        }
    }

    /// Decode the fixed 8-byte slot according to the structure's kind.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn from_bits(kind: PayloadKind, bits: u64) -> Self {
        match kind {
            PayloadKind::None => Self::None,
            PayloadKind::Int => Self::Int(bits as i64),
            PayloadKind::Float => Self::Float(f32::from_bits(bits as u32)),
        }
    }
}

/// One sampled observation: who, where, when, and an optional value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Record {
    pub oid: ObjectId,
    pub location: Point3,
    pub payload: Payload,
}

impl Record {
    /// The null record substituted for inputs with invalid coordinates.
    #[must_use]
    pub fn null(kind: PayloadKind) -> Self {
        Self {
            oid: ObjectId::default(),
            location: Point3::default(),
            payload: Payload::from_bits(kind, 0),
        }
    }

    /// Whether `x` is a valid latitude and `y` a valid longitude.
    #[must_use]
    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.location.x) && (-180.0..=180.0).contains(&self.location.y)
    }
}

impl ProtoSerializable<proto::Element> for Record {
    fn to_proto(self) -> proto::Element {
        let (int_payload, float_payload) = match self.payload {
            Payload::None => (None, None),
            Payload::Int(v) => (Some(v), None),
            Payload::Float(v) => (None, Some(v)),
        };
        proto::Element {
            oid: Some(self.oid.0.to_vec()),
            location: Some(proto::Location {
                x: self.location.x,
                y: self.location.y,
            }),
            time: Some(self.location.time),
            int_payload,
            float_payload,
        }
    }
}

impl ProtoDeserializable<proto::Element> for Record {
    fn from_proto(element: proto::Element) -> Result<Self, String> {
        let oid = match element.oid {
            None => ObjectId::default(),
            Some(bytes) => {
                let bytes: [u8; ObjectId::LEN] = bytes.as_slice().try_into().map_err(|_| {
                    format!(
                        "element oid must be {} bytes, got {}",
                        ObjectId::LEN,
                        bytes.len()
                    )
                })?;
                ObjectId(bytes)
            }
        };
        let location = element
            .location
            .ok_or_else(|| "element must have a location".to_string())?;
        let payload = match (element.int_payload, element.float_payload) {
            (None, None) => Payload::None,
            (Some(v), None) => Payload::Int(v),
            (None, Some(v)) => Payload::Float(v),
            (Some(_), Some(_)) => {
                return Err("element cannot carry both an int and a float payload".to_string());
            }
        };
        Ok(Self {
            oid,
            location: Point3::new(location.x, location.y, element.time.unwrap_or(0)),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex() {
        let id = ObjectId::from_hex("0123456789abcdefABCDEF00").expect("valid hex");
        assert_eq!(id.0[0], 0x01);
        assert_eq!(id.0[7], 0xef);
        assert_eq!(id.to_string(), "0123456789abcdefabcdef00");

        assert!(ObjectId::from_hex("0123").is_err());
        assert!(ObjectId::from_hex("zz23456789abcdefABCDEF00").is_err());
        assert!(ObjectId::default().is_empty());
        assert!(!id.is_empty());
    }

    #[test]
    fn test_payload_bits() {
        let p = Payload::Int(-7);
        assert_eq!(Payload::from_bits(PayloadKind::Int, p.to_bits()), p);

        let p = Payload::Float(2.5);
        assert_eq!(Payload::from_bits(PayloadKind::Float, p.to_bits()), p);

        assert_eq!(Payload::from_bits(PayloadKind::None, 99), Payload::None);
    }

    #[test]
    fn test_coordinate_validity() {
        let mut r = Record::null(PayloadKind::None);
        assert!(r.has_valid_coordinates());
        r.location.x = 90.5;
        assert!(!r.has_valid_coordinates());
        r.location.x = 0.0;
        r.location.y = -180.5;
        assert!(!r.has_valid_coordinates());
    }

    #[test]
    fn test_element_conversion() {
        let element = proto::Element {
            oid: Some(vec![1; 12]),
            location: Some(proto::Location { x: 1.0, y: 2.0 }),
            time: Some(3),
            int_payload: Some(4),
            float_payload: None,
        };
        let record = Record::from_proto(element.clone()).expect("valid element");
        assert_eq!(record.oid, ObjectId([1; 12]));
        assert_eq!(record.location, Point3::new(1.0, 2.0, 3));
        assert_eq!(record.payload, Payload::Int(4));
        assert_eq!(record.to_proto(), element);

        let bad = proto::Element {
            oid: Some(vec![1; 5]),
            ..element
        };
        assert!(Record::from_proto(bad).is_err());
        assert!(Record::from_proto(proto::Element::default()).is_err());
    }
}
