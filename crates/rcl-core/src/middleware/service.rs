//! Service servers: drain requests with `take_request`, answer with
//! `send_response` using the header the request arrived with.

use crate::domain::{EntityId, EntityKind, RclError, RclResult, RequestHeader, TakeStatus};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::state::{push_keep_last, EntityBody};
use crate::ports::{ReadinessSource, Waitable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct Service {
    handle: EntityHandle,
    service_name: String,
}

impl Service {
    pub(crate) fn new(context: Context, id: EntityId, service_name: String) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
            service_name,
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Drain one request. On `Taken`, `header` identifies the caller and must
    /// be passed back unchanged to [`send_response`](Self::send_response).
    pub fn take_request<Req: DeserializeOwned>(
        &self,
        header: &mut RequestHeader,
        request: &mut Req,
    ) -> RclResult<TakeStatus> {
        match self.take_raw(None)? {
            Some((taken, bytes)) => {
                *header = taken;
                *request = bincode::deserialize(&bytes)?;
                Ok(TakeStatus::Taken)
            }
            None => Ok(TakeStatus::NoDataAvailable),
        }
    }

    pub fn take_request_serialized(
        &self,
        header: &mut RequestHeader,
        buffer: &mut Vec<u8>,
    ) -> RclResult<TakeStatus> {
        match self.take_raw(None)? {
            Some((taken, bytes)) => {
                *header = taken;
                *buffer = bytes;
                Ok(TakeStatus::Taken)
            }
            None => Ok(TakeStatus::NoDataAvailable),
        }
    }

    pub(crate) fn take_raw(
        &self,
        limit: Option<usize>,
    ) -> RclResult<Option<(RequestHeader, Vec<u8>)>> {
        let id = self.handle.id();
        let mut state = self.handle.context().lock();
        let EntityBody::Service(service) = state.body_mut(id)? else {
            return Err(RclError::invalid_handle(EntityKind::Service, "not a service"));
        };
        match (service.requests.front().map(|(_, bytes)| bytes.len()), limit) {
            (None, _) => Ok(None),
            (Some(len), Some(limit)) if len > limit => Err(RclError::InvalidArgument(format!(
                "buffer of {} bytes too small for {}-byte request",
                limit, len
            ))),
            _ => {
                let entry = service.requests.pop_front();
                if let Some((header, _)) = &entry {
                    trace!(
                        service = %self.service_name,
                        sequence = header.sequence_number(),
                        "Took request"
                    );
                }
                Ok(entry)
            }
        }
    }

    /// Route `response` to the client identified by `header`.
    ///
    /// # Errors
    /// - `InvalidHandle` (client): the header was never populated, or the
    ///   requesting client is gone
    /// - `Failed`: serialization failed
    pub fn send_response<Resp: Serialize>(
        &self,
        header: &RequestHeader,
        response: &Resp,
    ) -> RclResult<()> {
        let bytes = bincode::serialize(response)?;
        self.send_response_serialized(header, &bytes)
    }

    pub fn send_response_serialized(&self, header: &RequestHeader, bytes: &[u8]) -> RclResult<()> {
        if !header.is_populated() {
            return Err(RclError::invalid_handle(
                EntityKind::Client,
                "request header was never populated by take_request",
            ));
        }
        let id = self.handle.id();
        let guid = header.writer_guid();
        let sequence = header.sequence_number();
        let service_name = self.service_name.as_str();

        self.handle.context().mutate(|state| {
            state.check_live(id)?;
            let client = state.iter_mut().find_map(|(_, record)| match &mut record.body {
                EntityBody::Client(client)
                    if client.guid == guid && client.service_name == service_name =>
                {
                    Some(client)
                }
                _ => None,
            });
            let Some(client) = client else {
                return Err(RclError::invalid_handle(
                    EntityKind::Client,
                    format!("client {} of {} no longer exists", guid, service_name),
                ));
            };
            let depth = client.depth;
            let reply = (RequestHeader::stamped(guid, sequence), bytes.to_vec());
            if push_keep_last(&mut client.responses, depth, reply) {
                debug!(client = %guid, depth, "Response queue full, dropped oldest response");
            }
            Ok(())
        })?;

        trace!(service = %self.service_name, client = %guid, sequence, "Sent response");
        Ok(())
    }

    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

impl Waitable for Service {
    fn entity_id(&self) -> EntityId {
        self.handle.id()
    }

    fn readiness_source(&self) -> Arc<dyn ReadinessSource> {
        self.handle.context().readiness_source()
    }
}
