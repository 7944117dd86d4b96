//! Peer RPC surface of the channel layer.
//!
//! Nodes forward create, delete and rename work to the leaseholder through
//! typed unary clients. Handlers report failures as [`ErrorResponse`] so the
//! caller sees the same [`ErrorKind`] the peer raised.
//!
//! [`InMemoryNetwork`] connects services inside one process. Every request
//! and response is round-tripped through the postcard wire encoding.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::debug;

use crate::channel::Channel;
use crate::cluster::NodeAddress;
use crate::error::ChannelError;
use crate::error::ErrorKind;
use crate::key::Key;

/// Behaviour switches for channel creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Return the stored channel instead of creating a same-named one.
    pub retrieve_if_name_exists: bool,
    /// Replace a same-named channel whose properties differ.
    pub overwrite_if_name_exists_and_different_properties: bool,
    /// Skip linking new channels under the channel group.
    pub create_without_group_relationship: bool,
}

impl CreateOptions {
    pub fn retrieve_if_name_exists(mut self) -> Self {
        self.retrieve_if_name_exists = true;
        self
    }

    pub fn overwrite_if_name_exists_and_different_properties(mut self) -> Self {
        self.overwrite_if_name_exists_and_different_properties = true;
        self
    }

    pub fn without_group_relationship(mut self) -> Self {
        self.create_without_group_relationship = true;
        self
    }

    /// Whether collisions with stored names are resolved rather than rejected.
    pub fn tolerates_existing_names(&self) -> bool {
        self.retrieve_if_name_exists || self.overwrite_if_name_exists_and_different_properties
    }
}

/// Create request and response. The response carries the keyed channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMessage {
    pub channels: Vec<Channel>,
    pub opts: CreateOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub keys: Vec<Key>,
    pub allow_internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub keys: Vec<Key>,
    pub names: Vec<String>,
    pub allow_internal: bool,
}

/// Empty success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack;

/// Error payload returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: ErrorKind,
    /// Error message.
    pub message: String,
}

impl From<&ChannelError> for ErrorResponse {
    fn from(err: &ChannelError) -> Self {
        Self {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Failures of a unary call.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum RpcError {
    /// The target could not be reached or has no handler bound.
    #[snafu(display("{address} unreachable: {reason}"))]
    Unreachable { address: NodeAddress, reason: String },

    /// A message failed to encode or decode.
    #[snafu(display("codec error: {reason}"))]
    Codec { reason: String },

    /// The handler ran and returned an error.
    #[snafu(display("remote error ({kind}): {message}"))]
    Remote { kind: ErrorKind, message: String },
}

/// Sends one request and awaits one response.
#[async_trait]
pub trait UnaryClient<Req: Send + 'static, Res: Send + 'static>: Send + Sync {
    async fn send(&self, target: &NodeAddress, request: Req) -> Result<Res, RpcError>;
}

/// Serves one request type.
#[async_trait]
pub trait UnaryHandler<Req: Send + 'static, Res: Send + 'static>: Send + Sync {
    async fn handle(&self, request: Req) -> Result<Res, ChannelError>;
}

/// Accepts a handler for incoming requests. Binding replaces any previous handler.
pub trait UnaryServer<Req: Send + 'static, Res: Send + 'static>: Send + Sync {
    fn bind_handler(&self, handler: Arc<dyn UnaryHandler<Req, Res>>);
}

/// The three channel RPCs, client and server side.
pub trait Transport: Send + Sync {
    fn create_client(&self) -> &dyn UnaryClient<CreateMessage, CreateMessage>;
    fn create_server(&self) -> &dyn UnaryServer<CreateMessage, CreateMessage>;
    fn delete_client(&self) -> &dyn UnaryClient<DeleteRequest, Ack>;
    fn delete_server(&self) -> &dyn UnaryServer<DeleteRequest, Ack>;
    fn rename_client(&self) -> &dyn UnaryClient<RenameRequest, Ack>;
    fn rename_server(&self) -> &dyn UnaryServer<RenameRequest, Ack>;
}

type HandlerSlot<Req, Res> = RwLock<Option<Arc<dyn UnaryHandler<Req, Res>>>>;

#[derive(Default)]
struct NodeServers {
    create: HandlerSlot<CreateMessage, CreateMessage>,
    delete: HandlerSlot<DeleteRequest, Ack>,
    rename: HandlerSlot<RenameRequest, Ack>,
}

fn create_slot(servers: &NodeServers) -> &HandlerSlot<CreateMessage, CreateMessage> {
    &servers.create
}

fn delete_slot(servers: &NodeServers) -> &HandlerSlot<DeleteRequest, Ack> {
    &servers.delete
}

fn rename_slot(servers: &NodeServers) -> &HandlerSlot<RenameRequest, Ack> {
    &servers.rename
}

/// Process-local network of channel services.
#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<NodeAddress, Arc<NodeServers>>>,
    partitioned: RwLock<HashSet<NodeAddress>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node at `address` and return its transport.
    pub fn transport(self: &Arc<Self>, address: NodeAddress) -> Arc<InMemoryTransport> {
        let servers = Arc::clone(self.nodes.write().entry(address).or_default());
        Arc::new(InMemoryTransport {
            create: InMemoryEndpoint::new(self, &servers, create_slot),
            delete: InMemoryEndpoint::new(self, &servers, delete_slot),
            rename: InMemoryEndpoint::new(self, &servers, rename_slot),
        })
    }

    /// Make `address` unreachable until [`heal`](Self::heal) is called.
    pub fn partition(&self, address: &NodeAddress) {
        self.partitioned.write().insert(address.clone());
    }

    pub fn heal(&self, address: &NodeAddress) {
        self.partitioned.write().remove(address);
    }

    fn servers(&self, address: &NodeAddress) -> Result<Arc<NodeServers>, RpcError> {
        if self.partitioned.read().contains(address) {
            return Err(RpcError::Unreachable {
                address: address.clone(),
                reason: "partitioned".to_string(),
            });
        }
        self.nodes.read().get(address).cloned().ok_or_else(|| RpcError::Unreachable {
            address: address.clone(),
            reason: "no such node".to_string(),
        })
    }
}

/// One RPC endpoint of an [`InMemoryTransport`].
pub struct InMemoryEndpoint<Req, Res> {
    network: Arc<InMemoryNetwork>,
    local: Arc<NodeServers>,
    slot: fn(&NodeServers) -> &HandlerSlot<Req, Res>,
}

impl<Req, Res> InMemoryEndpoint<Req, Res> {
    fn new(
        network: &Arc<InMemoryNetwork>,
        local: &Arc<NodeServers>,
        slot: fn(&NodeServers) -> &HandlerSlot<Req, Res>,
    ) -> Self {
        Self {
            network: Arc::clone(network),
            local: Arc::clone(local),
            slot,
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RpcError> {
    postcard::to_stdvec(value).map_err(|e| RpcError::Codec { reason: e.to_string() })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RpcError> {
    postcard::from_bytes(bytes).map_err(|e| RpcError::Codec { reason: e.to_string() })
}

#[async_trait]
impl<Req, Res> UnaryClient<Req, Res> for InMemoryEndpoint<Req, Res>
where
    Req: Serialize + DeserializeOwned + Send + Sync + 'static,
    Res: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn send(&self, target: &NodeAddress, request: Req) -> Result<Res, RpcError> {
        let servers = self.network.servers(target)?;
        let handler = (self.slot)(&servers).read().clone().ok_or_else(|| RpcError::Unreachable {
            address: target.clone(),
            reason: "no handler bound".to_string(),
        })?;

        let request_bytes = encode(&request)?;
        debug!(target = %target, bytes = request_bytes.len(), "sending unary request");
        let request: Req = decode(&request_bytes)?;

        let response: Result<Res, ErrorResponse> = handler.handle(request).await.map_err(|e| ErrorResponse::from(&e));
        let response_bytes = encode(&response)?;
        match decode::<Result<Res, ErrorResponse>>(&response_bytes)? {
            Ok(res) => Ok(res),
            Err(err) => Err(RpcError::Remote {
                kind: err.code,
                message: err.message,
            }),
        }
    }
}

impl<Req, Res> UnaryServer<Req, Res> for InMemoryEndpoint<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    fn bind_handler(&self, handler: Arc<dyn UnaryHandler<Req, Res>>) {
        *(self.slot)(&self.local).write() = Some(handler);
    }
}

/// Transport for one node of an [`InMemoryNetwork`].
pub struct InMemoryTransport {
    create: InMemoryEndpoint<CreateMessage, CreateMessage>,
    delete: InMemoryEndpoint<DeleteRequest, Ack>,
    rename: InMemoryEndpoint<RenameRequest, Ack>,
}

impl Transport for InMemoryTransport {
    fn create_client(&self) -> &dyn UnaryClient<CreateMessage, CreateMessage> {
        &self.create
    }

    fn create_server(&self) -> &dyn UnaryServer<CreateMessage, CreateMessage> {
        &self.create
    }

    fn delete_client(&self) -> &dyn UnaryClient<DeleteRequest, Ack> {
        &self.delete
    }

    fn delete_server(&self) -> &dyn UnaryServer<DeleteRequest, Ack> {
        &self.delete
    }

    fn rename_client(&self) -> &dyn UnaryClient<RenameRequest, Ack> {
        &self.rename
    }

    fn rename_server(&self) -> &dyn UnaryServer<RenameRequest, Ack> {
        &self.rename
    }
}
