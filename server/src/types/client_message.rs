use std::path::PathBuf;

use crate::{
    proto,
    types::{BoundingBox, PayloadKind, Point3, ProtoDeserializable, Projection, Record},
};

#[derive(Debug)]
pub struct BuildCommand {
    pub name: String,
    pub force: bool,
    pub payload_kind: PayloadKind,
    pub input: PathBuf,
    pub remove_input: bool,
}

#[derive(Debug)]
pub struct StartQueryCommand {
    pub structure: String,
    pub region: BoundingBox,
    pub projection: Projection,
    /// Requested idle timeout in seconds, `0` for the default.
    pub suggested_ttl_secs: u32,
}

#[derive(Debug)]
pub enum ClientMessagePayload {
    Build(BuildCommand),
    List,
    Drop { name: String },
    Insert { name: String, records: Vec<Record> },
    StartQuery(StartQueryCommand),
    Query { query_id: u64, max_elements: u32 },
}

#[derive(Debug)]
pub struct ClientMessage {
    pub payload: ClientMessagePayload,
}

fn payload_kind_from_proto(value: i32) -> Result<PayloadKind, String> {
    proto::PayloadType::try_from(value)
        .map(PayloadKind::from)
        .map_err(|_| format!("unknown payload type {value}"))
}

impl ProtoDeserializable<proto::BuildRequest> for BuildCommand {
    fn from_proto(request: proto::BuildRequest) -> Result<Self, String> {
        if request.input_location.is_empty() {
            return Err("build request must have an input_location".to_string());
        }
        Ok(Self {
            payload_kind: payload_kind_from_proto(request.payload_type)?,
            name: request.name,
            force: request.force,
            input: PathBuf::from(request.input_location),
            remove_input: request.remove_input,
        })
    }
}

impl ProtoDeserializable<proto::StartQueryRequest> for StartQueryCommand {
    fn from_proto(request: proto::StartQueryRequest) -> Result<Self, String> {
        let min = request
            .min_point
            .ok_or_else(|| "start query request must have a min_point".to_string())?;
        let max = request
            .max_point
            .ok_or_else(|| "start query request must have a max_point".to_string())?;
        let region = BoundingBox::new(Point3::from(min), Point3::from(max))?;
        Ok(Self {
            structure: request.structure_name,
            region,
            projection: Projection::new(
                request.return_oid,
                request.return_location,
                request.return_time,
            ),
            suggested_ttl_secs: request.suggested_ttl,
        })
    }
}

impl ProtoDeserializable<proto::ClientMessage> for ClientMessage {
    fn from_proto(proto_message: proto::ClientMessage) -> Result<Self, String> {
        if proto_message.request_id.is_none() {
            return Err("Client message must have a request_id".to_string());
        }
        let payload = match proto_message.payload {
            Some(proto::client_message::Payload::Build(request)) => {
                ClientMessagePayload::Build(BuildCommand::from_proto(request)?)
            }
            Some(proto::client_message::Payload::List(_)) => ClientMessagePayload::List,
            Some(proto::client_message::Payload::Drop(request)) => {
                ClientMessagePayload::Drop { name: request.name }
            }
            Some(proto::client_message::Payload::Insert(request)) => {
                let records = request
                    .elements
                    .into_iter()
                    .map(Record::from_proto)
                    .collect::<Result<Vec<_>, _>>()?;
                ClientMessagePayload::Insert {
                    name: request.name,
                    records,
                }
            }
            Some(proto::client_message::Payload::StartQuery(request)) => {
                ClientMessagePayload::StartQuery(StartQueryCommand::from_proto(request)?)
            }
            Some(proto::client_message::Payload::Query(request)) => ClientMessagePayload::Query {
                query_id: request.query_id,
                max_elements: request.elements_to_return,
            },
            None => return Err("Client message must have a payload".to_string()),
        };
        Ok(Self { payload })
    }
}
