use std::sync::Arc;

use crate::{
    proto,
    service::SamplingService,
    types::{ProtoDeserializable, client_message::ClientMessage},
};

/// One client's view of the sampling service.
///
/// Every connection shares the same service; the connection only decodes
/// messages and shapes responses.
pub struct ClientConnection {
    service: Arc<SamplingService>,
}

fn status(code: proto::google::rpc::Code, message: String) -> proto::google::rpc::Status {
    proto::google::rpc::Status {
        code: code.into(),
        message,
        ..Default::default()
    }
}

impl ClientConnection {
    #[must_use]
    pub const fn new(service: Arc<SamplingService>) -> Self {
        Self { service }
    }

    pub async fn handle_message(
        &self,
        proto_message: proto::ClientMessage,
    ) -> proto::ServerMessage {
        let request_id = proto_message.request_id;
        let response = match ClientMessage::from_proto(proto_message) {
            Ok(message) => self.dispatch(message).await,
            Err(err) => proto::ServerResponse {
                status: Some(status(proto::google::rpc::Code::InvalidArgument, err)),
                ..Default::default()
            },
        };
        proto::ServerMessage {
            response: Some(proto::ServerResponse {
                request_id,
                ..response
            }),
        }
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    async fn dispatch(&self, message: ClientMessage) -> proto::ServerResponse {
        let service = Arc::clone(&self.service);
        let result =
            tokio::task::spawn_blocking(move || service.handle(message.payload)).await;

        match result {
            Ok(Ok(payload)) => proto::ServerResponse {
                status: Some(status(proto::google::rpc::Code::Ok, String::new())),
                payload: Some(payload),
                ..Default::default()
            },
            Ok(Err(err)) => {
                tracing::debug!(code = ?err.code(), "request failed: {err}");
                proto::ServerResponse {
                    status: Some(err.to_status()),
                    ..Default::default()
                }
            }
            Err(err) => {
                tracing::error!("request handler panicked: {err}");
                proto::ServerResponse {
                    status: Some(status(
                        proto::google::rpc::Code::Internal,
                        format!("request handler failed: {err}"),
                    )),
                    ..Default::default()
                }
            }
        }
    }
}
