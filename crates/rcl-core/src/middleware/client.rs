//! Service clients: `send_request` stamps the next sequence number,
//! `take_response` returns it in the response header.

use crate::domain::{
    EntityId, EntityKind, RclError, RclResult, RequestHeader, TakeStatus, WriterGuid,
};
use crate::middleware::context::{Context, EntityHandle};
use crate::middleware::state::{push_keep_last, EntityBody};
use crate::ports::{ReadinessSource, Waitable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct Client {
    handle: EntityHandle,
    service_name: String,
    guid: WriterGuid,
}

impl Client {
    pub(crate) fn new(
        context: Context,
        id: EntityId,
        service_name: String,
        guid: WriterGuid,
    ) -> Self {
        Self {
            handle: EntityHandle::new(context, id),
            service_name,
            guid,
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Identity stamped into every request of this client.
    #[must_use]
    pub fn writer_guid(&self) -> WriterGuid {
        self.guid
    }

    /// Send `request`; returns the sequence number its response will carry.
    ///
    /// Sequence numbers start at 1 and grow by one per request. A request
    /// sent while no server exists is dropped, but still consumes a number.
    pub fn send_request<Req: Serialize>(&self, request: &Req) -> RclResult<i64> {
        let bytes = bincode::serialize(request)?;
        self.send_request_serialized(&bytes)
    }

    pub fn send_request_serialized(&self, bytes: &[u8]) -> RclResult<i64> {
        let id = self.handle.id();
        let guid = self.guid;
        let service_name = self.service_name.as_str();

        let (sequence, servers) = self.handle.context().mutate(|state| {
            let EntityBody::Client(client) = state.body_mut(id)? else {
                return Err(RclError::invalid_handle(EntityKind::Client, "not a client"));
            };
            let sequence = client.next_sequence;
            client.next_sequence += 1;

            let mut servers = 0usize;
            for (key, record) in state.iter_mut() {
                if let EntityBody::Service(service) = &mut record.body {
                    if service.service_name != service_name {
                        continue;
                    }
                    let depth = service.depth;
                    let entry = (RequestHeader::stamped(guid, sequence), bytes.to_vec());
                    if push_keep_last(&mut service.requests, depth, entry) {
                        debug!(service = %key, depth, "Request queue full, dropped oldest request");
                    }
                    servers += 1;
                }
            }
            Ok((sequence, servers))
        })?;

        if servers == 0 {
            warn!(service = %self.service_name, sequence, "No server available, request dropped");
        } else {
            trace!(service = %self.service_name, sequence, servers, "Sent request");
        }
        Ok(sequence)
    }

    /// Drain one response. On `Taken`, `header.sequence_number()` names the
    /// request it answers.
    pub fn take_response<Resp: DeserializeOwned>(
        &self,
        header: &mut RequestHeader,
        response: &mut Resp,
    ) -> RclResult<TakeStatus> {
        match self.take_raw(None)? {
            Some((taken, bytes)) => {
                *header = taken;
                *response = bincode::deserialize(&bytes)?;
                Ok(TakeStatus::Taken)
            }
            None => Ok(TakeStatus::NoDataAvailable),
        }
    }

    pub fn take_response_serialized(
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
        let EntityBody::Client(client) = state.body_mut(id)? else {
            return Err(RclError::invalid_handle(EntityKind::Client, "not a client"));
        };
        match (client.responses.front().map(|(_, bytes)| bytes.len()), limit) {
            (None, _) => Ok(None),
            (Some(len), Some(limit)) if len > limit => Err(RclError::InvalidArgument(format!(
                "buffer of {} bytes too small for {}-byte response",
                limit, len
            ))),
            _ => {
                let entry = client.responses.pop_front();
                if let Some((header, _)) = &entry {
                    trace!(
                        service = %self.service_name,
                        sequence = header.sequence_number(),
                        "Took response"
                    );
                }
                Ok(entry)
            }
        }
    }

    /// Whether a server for this service name exists in the context.
    pub fn service_is_available(&self) -> RclResult<bool> {
        let state = self.handle.context().lock();
        state.check_live(self.handle.id())?;
        let available = state.iter().any(|(_, record)| {
            matches!(&record.body, EntityBody::Service(service) if service.service_name == self.service_name)
        });
        Ok(available)
    }

    pub fn destroy(mut self) -> RclResult<()> {
        self.handle.release()
    }
}

impl Waitable for Client {
    fn entity_id(&self) -> EntityId {
        self.handle.id()
    }

    fn readiness_source(&self) -> Arc<dyn ReadinessSource> {
        self.handle.context().readiness_source()
    }
}
