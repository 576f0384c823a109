//! # Sync Client
//!
//! This module provides networking abstractions to exchange state with the wheel host. Each
//! exchange is one request followed by one reply.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, JsonMsgError, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
    sync::{SyncReply, SyncRequest},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SyncClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum SyncClientError {

    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the request to the host: {0}")]
    SendError(JsonMsgError),

    #[error("Could not recieve a reply from the host: {0}")]
    RecvError(JsonMsgError),

    #[error("The host did not reply in time")]
    Timeout,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SyncClient {
    /// Create a new instance of the sync client.
    ///
    /// This function does not wait for the host to be available.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, SyncClientError> {

        // Correlated and relaxed so a lost reply doesn't wedge the socket, the next request just
        // replaces the old one.
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: params.peer_recv_timeout_ms,
            send_timeout: params.send_timeout_ms,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            socket_options,
            &params.sync_connect_endpoint
        ).map_err(SyncClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Whether the host is connected.
    pub fn connected(&self) -> bool {
        self.socket.connected()
    }

    /// Send a request to the host and wait for its reply.
    pub fn exchange(&mut self, request: &SyncRequest) -> Result<SyncReply, SyncClientError> {
        self.socket.send_json(request)
            .map_err(SyncClientError::SendError)?;

        match self.socket.recv_json() {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(SyncClientError::Timeout),
            Err(e) => Err(SyncClientError::RecvError(e)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::sync::PoseMsg;
    use std::{sync::mpsc::channel, thread};

    fn test_params(endpoint: &str) -> NetParams {
        NetParams {
            sync_connect_endpoint: endpoint.into(),
            peer_recv_timeout_ms: 200,
            ..Default::default()
        }
    }

    fn reply_with_x(x: f64) -> String {
        serde_json::to_string(&SyncReply {
            vehicle: PoseMsg { x, ..Default::default() },
            telemetry_valid: true,
            ..Default::default()
        }).unwrap()
    }

    #[test]
    fn test_exchange() {
        let ctx = zmq::Context::new();
        let endpoint = "inproc://sync_client_exchange";

        let host = ctx.socket(zmq::REP).unwrap();
        host.bind(endpoint).unwrap();

        let mut client = SyncClient::new(&ctx, &test_params(endpoint)).unwrap();

        let handle = thread::spawn(move || {
            let req: SyncRequest = serde_json::from_slice(&host.recv_bytes(0).unwrap()).unwrap();
            host.send(reply_with_x(1.0).as_str(), 0).unwrap();
            req
        });

        let request = SyncRequest {
            autosteer_status: true,
            desired_wheel_rotation: Some(0.25),
            ..Default::default()
        };
        let reply = client.exchange(&request).unwrap();

        assert_eq!(reply.vehicle.x, 1.0);
        assert_eq!(handle.join().unwrap(), request);
    }

    #[test]
    fn test_recovers_after_timeout() {
        let ctx = zmq::Context::new();
        let endpoint = "inproc://sync_client_timeout";

        let host = ctx.socket(zmq::REP).unwrap();
        host.bind(endpoint).unwrap();

        let mut client = SyncClient::new(&ctx, &test_params(endpoint)).unwrap();

        let (go_tx, go_rx) = channel::<()>();

        // The host sits on the first request until the client has given up on it, then answers
        // both requests in order.
        let handle = thread::spawn(move || {
            host.recv_bytes(0).unwrap();
            go_rx.recv().unwrap();
            host.send(reply_with_x(1.0).as_str(), 0).unwrap();

            host.recv_bytes(0).unwrap();
            host.send(reply_with_x(2.0).as_str(), 0).unwrap();
        });

        assert!(matches!(
            client.exchange(&SyncRequest::default()),
            Err(SyncClientError::Timeout)
        ));

        go_tx.send(()).unwrap();

        // The late reply to the first request is discarded
        let reply = client.exchange(&SyncRequest::default()).unwrap();
        assert_eq!(reply.vehicle.x, 2.0);

        handle.join().unwrap();
    }
}
