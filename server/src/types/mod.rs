pub mod client_message;
pub mod geometry;
pub mod projection;
pub mod record;

pub use geometry::{BoundingBox, Point3};
pub use projection::Projection;
pub use record::{ObjectId, Payload, PayloadKind, Record};

pub trait ProtoDeserializable<T> {
    fn from_proto(proto_obj: T) -> Result<Self, String>
    where
        Self: Sized;
}

pub trait ProtoSerializable<T> {
    fn to_proto(self) -> T;
}
