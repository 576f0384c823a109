//! # Sync Server Module
//!
//! This module abstracts over the networking side of the wheel executable. The server accepts
//! requests from one guidance peer at a time and must answer every request it accepts with
//! exactly one reply, even if the request couldn't be decoded.
//!
//! The socket is a ROUTER so that the peer behind each request is known. The first peer to send a
//! request is served until it goes quiet for a full receive timeout. Requests from any other peer
//! in the meantime are dropped without a reply, so that peer's REQ socket times out and backs off.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{
        decode_json, encode_json, zmq, JsonMsgError, MonitoredSocket, MonitoredSocketError,
        NetParams, SocketOptions
    },
    sync::{SyncReply, SyncRequest},
};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the wheel executable.
pub struct SyncServer {
    ctx: zmq::Context,

    endpoint: String,

    socket_options: SocketOptions,

    /// ROUTER socket which accepts requests from the peer, `None` if it needs reopening
    socket: Option<MonitoredSocket>,

    /// Peer being served and when it last sent a request
    peer: Option<(Vec<u8>, Instant)>,

    /// How long the served peer may go without a request before another peer can take over
    peer_timeout: Duration,

    /// Envelope of the request which hasn't been replied to yet
    pending: Option<Vec<Vec<u8>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What [`SyncServer::get_request`] found on the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A valid request, which must be replied to.
    Request(SyncRequest),

    /// A request which couldn't be decoded. It must still be replied to.
    Malformed,

    /// A message from a peer other than the one being served, or one that can't be replied to.
    /// It has been dropped.
    Refused,

    /// Nothing arrived within the receive timeout.
    Silence,
}

/// Errors which can occur in the [`SyncServer`]
#[derive(thiserror::Error, Debug)]
pub enum SyncServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not receive from the peer: {0}")]
    RecvError(JsonMsgError),

    #[error("Could not send reply to the peer: {0}")]
    SendError(JsonMsgError),

    #[error("Attempted to reply with no request pending")]
    NoPendingRequest,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SyncServer {
    /// Create a new instance of the sync server.
    ///
    /// This function will not wait for a connection from the peer before returning.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, SyncServerError> {
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: params.host_recv_timeout_ms,
            send_timeout: params.send_timeout_ms,
            linger: 0,
            ..Default::default()
        };

        let mut server = Self {
            ctx: ctx.clone(),
            endpoint: params.sync_bind_endpoint.clone(),
            socket_options,
            socket: None,
            peer: None,
            peer_timeout: Duration::from_millis(params.host_recv_timeout_ms.max(0) as u64),
            pending: None,
        };

        server.open()?;

        Ok(server)
    }

    /// Wait up to the receive timeout for a request from the peer.
    ///
    /// If this returns [`Incoming::Request`] or [`Incoming::Malformed`] the user should call
    /// [`SyncServer::send_reply`] before calling this function again, otherwise that request goes
    /// unanswered.
    pub fn get_request(&mut self) -> Result<Incoming, SyncServerError> {
        if self.socket.is_none() {
            self.open()?;
        }

        if self.pending.take().is_some() {
            warn!("Previous request was never replied to");
        }

        let frames = match self.socket()?.recv_multipart(0) {
            Ok(f) => f,
            Err(zmq::Error::EAGAIN) => {
                if self.peer.take().is_some() {
                    debug!("Served peer released after silence");
                }
                return Ok(Incoming::Silence)
            },
            Err(e) => {
                self.reset();
                return Err(SyncServerError::RecvError(JsonMsgError::RecvError(e)))
            }
        };

        let (envelope, payload) = match split_envelope(frames) {
            Some(parts) => parts,
            None => {
                warn!("Dropping message without a reply envelope");
                return Ok(Incoming::Refused)
            }
        };

        if !self.accept_peer(&envelope[0]) {
            return Ok(Incoming::Refused)
        }

        self.pending = Some(envelope);

        match decode_json::<SyncRequest>(&payload) {
            Ok(req) => Ok(Incoming::Request(req)),
            Err(e) => {
                warn!("Could not decode request: {}", e);
                Ok(Incoming::Malformed)
            }
        }
    }

    /// Send the reply to the pending request.
    pub fn send_reply(&mut self, reply: &SyncReply) -> Result<(), SyncServerError> {
        let envelope = self.pending.take().ok_or(SyncServerError::NoPendingRequest)?;

        let payload = encode_json(reply).map_err(SyncServerError::SendError)?;

        let mut frames = envelope;
        frames.push(payload.into_bytes());

        self.socket()?
            .send_multipart(frames, 0)
            .map_err(|e| SyncServerError::SendError(JsonMsgError::SendError(e)))
    }

    /// Whether a peer is currently connected.
    pub fn connected(&self) -> bool {
        self.socket.as_ref().map(|s| s.connected()).unwrap_or(false)
    }

    /// Decide whether a request from `id` is served, pinning to it if so.
    fn accept_peer(&mut self, id: &[u8]) -> bool {
        let now = Instant::now();

        match self.peer {
            Some((ref current, last_seen)) if current.as_slice() != id => {
                if now.duration_since(last_seen) < self.peer_timeout {
                    debug!("Refusing request from a second peer");
                    return false
                }
                info!("Served peer went quiet, switching to a new peer");
            },
            None => info!("Serving a new peer"),
            _ => ()
        }

        self.peer = Some((id.to_vec(), now));
        true
    }

    fn socket(&self) -> Result<&MonitoredSocket, SyncServerError> {
        self.socket
            .as_ref()
            .ok_or(SyncServerError::SocketError(MonitoredSocketError::CouldNotConnect(None)))
    }

    fn open(&mut self) -> Result<(), SyncServerError> {
        let socket = MonitoredSocket::new(
            &self.ctx,
            zmq::ROUTER,
            self.socket_options.clone(),
            &self.endpoint
        )?;

        info!("Sync server bound to {}", self.endpoint);

        self.socket = Some(socket);

        Ok(())
    }

    /// Close the socket and try to rebind it, dropping any half finished exchange.
    ///
    /// If the rebind fails the next call to [`SyncServer::get_request`] tries again.
    fn reset(&mut self) {
        warn!("Resetting sync socket");
        self.socket = None;
        self.peer = None;
        self.pending = None;

        if let Err(e) = self.open() {
            warn!("Could not rebind the sync socket: {}", e);
        }
    }
}

impl From<MonitoredSocketError> for SyncServerError {
    fn from(e: MonitoredSocketError) -> Self {
        SyncServerError::SocketError(e)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Split a message received on a ROUTER socket into its reply envelope and payload.
///
/// The envelope is the peer's routing id, any further routing frames, and the empty delimiter.
/// REQ peers with request correlation add a request id frame before the delimiter.
fn split_envelope(mut frames: Vec<Vec<u8>>) -> Option<(Vec<Vec<u8>>, Vec<u8>)> {
    if frames.len() < 3 || !frames[frames.len() - 2].is_empty() {
        return None
    }

    let payload = frames.pop()?;

    Some((frames, payload))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
