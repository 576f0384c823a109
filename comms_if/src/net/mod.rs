//! # Network Module
//!
//! This module provides networking abstractions over ZMQ. Each ZMQ message carries exactly one
//! JSON encoded object, so message boundaries never depend on how the underlying TCP stream is
//! split up.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod backoff;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::{Arc, atomic::{AtomicBool, AtomicUsize}, atomic::Ordering}, thread};
use zmq::{Socket, Context, SocketType, SocketEvent};

// Export zmq
pub use zmq;

pub use backoff::Backoff;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout used by the monitor thread so it can notice a shutdown request.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of monitors that are registered. Used to provide unique IDs for each mointor endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters shared by the wheel and guidance executables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetParams {
    /// Endpoint the wheel host binds its sync socket to, e.g. `"tcp://*:5001"`.
    pub sync_bind_endpoint: String,

    /// Endpoint the guidance peer connects to, e.g. `"tcp://localhost:5001"`.
    pub sync_connect_endpoint: String,

    /// How long the host waits for a request before deciding the peer has gone quiet.
    pub host_recv_timeout_ms: i32,

    /// How long the peer waits for a reply before treating the exchange as lost.
    pub peer_recv_timeout_ms: i32,

    /// Send timeout used on both ends.
    pub send_timeout_ms: i32,

    /// Initial delay before the peer retries after a lost exchange.
    pub reconnect_backoff_ms: u64,

    /// Upper bound on the peer's retry delay.
    pub reconnect_backoff_max_ms: u64,
}

/// A zmq socket which is monitored providing additional information.
///
/// A background thread is run in order to monitor activity on the socket and update visible
/// information to the user. Currently this is only whether or not the socket is actually connected.
pub struct MonitoredSocket {
    socket: Socket,

    join_handle: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    connected: Arc<AtomicBool>
}

/// Represents options which can be set on a monitored socket.
///
/// Most options here correspond to those found in the
/// [`zmq_setsockopt`](http://api.zeromq.org/2-1:zmq-setsockopt) documentation.
#[derive(Debug, Clone)]
pub struct SocketOptions {

    /// Indicates if the socket should bind itself to the endpoint. Servers should have this value
    /// set as `true`, clients should have it set as `false`.
    ///
    /// The default value is `false`.
    pub bind: bool,

    /// If true the `MonitoredSocket::new()` function will block until the socket is connected, or
    /// until the connect_timeout elapses. If the timeout elapses this function will return a
    /// `MonitoredSocketError::CouldNotConnect` error.
    ///
    /// The default value is `true`.
    pub block_on_first_connect: bool,

    /// `ZMQ_REQ_CORRELATE`: Match replies with requests
    pub req_correlate: bool,

    /// `ZMQ_REQ_RELAXED`: relax strict alternation between request and reply
    pub req_relaxed: bool,

    /// `ZMQ_LINGER`: Set linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`: Set reconnection interval
    pub reconnect_ivl: i32,

    /// `ZMQ_RECONNECT_IVL_MAX`: Set maximum reconnection interval
    pub reconnect_ivl_max: i32,

    /// `ZMQ_CONNECT_TIMEOUT`: Set `connect()` timeout
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`: Maximum time before a recv operation returns with `EAGAIN`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: Maximum time before a send operation returns with `EAGAIN`
    pub send_timeout: i32,

    /// `ZMQ_HEARTBEAT_IVL`: Set interval between sending ZMTP heartbeats
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`: Set timeout for ZMTP heartbeats
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`: Set the TTL (time to live) value for ZMTP heartbeats
    pub heartbeat_ttl: i32
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error)
}

/// Errors from sending or receiving a JSON message.
#[derive(thiserror::Error, Debug)]
pub enum JsonMsgError {
    #[error("Could not send the message: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the message: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the message: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The message was not valid UTF-8")]
    NonUtf8Message
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket.
    ///
    /// ## Socket options
    ///
    /// The `socket_options` argument specifies the options that will be passed to the underlying
    /// zmq socket. For these options the defaults used by zmq are used.
    ///
    /// In addition some other options are available:
    /// - `bind`: If set the socket will bind itself to the endpoint rather than connect.
    ///    Servers should set this value to `true`. The default value is `false`.
    /// - `block_on_first_connect`: If set this function will block until a connection is
    ///    established or the `connect_timeout` expires. Servers should set this value to `false`.
    ///    the default value is `true`.
    ///
    /// ## Arguments
    /// - `ctx`: the zmq context which will be used to create the socket
    /// - `socket_type`: the type of zmq socket to create
    /// - `socket_options`: a [`SocketOptions`] struct specifying how to configure the socket
    /// - `endpoint`: a zmq endpoint string, such as `"tcp://localhost:5001"`
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str
    ) -> Result<Self, MonitoredSocketError> {
        // Create atomics
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        // Create socket
        let socket = ctx.socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // Create monitor endpoint
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );

        // Enable, create, and connect monitor
        socket.monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx.socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor.connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // Set the options on the socket
        socket_options.set(&socket)?;

        // Connect or bind the socket to it's endpoint
        match socket_options.bind {
            false => socket.connect(endpoint),
            true => socket.bind(endpoint)
        }.map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // If the block on first connect flag is set wait for the monitor to signal connection
        if socket_options.block_on_first_connect {
            loop {
                let event = read_event(&monitor)
                    .map_err(MonitoredSocketError::EventReadError)?;

                match event {
                    SocketEvent::CONNECTED => break,
                    SocketEvent::CONNECT_DELAYED => continue,
                    _ => return Err(MonitoredSocketError::CouldNotConnect(None))
                }
            }

            connected.store(true, Ordering::Relaxed);
        }

        // From here on the monitor only polls, so it can notice the shutdown flag
        monitor.set_rcvtimeo(MONITOR_POLL_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("set_rcvtimeo".into(), e))?;

        // Create clones for use by the monitor thread
        let shutdown_clone = shutdown.clone();
        let connected_clone = connected.clone();

        // Spawn the monitor thread
        let join_handle = thread::spawn(move || monitor_socket(
            monitor,
            monitor_endpoint,
            shutdown_clone,
            connected_clone
        ));

        Ok(Self {
            socket,
            join_handle: Some(join_handle),
            shutdown,
            connected
        })
    }

    /// Return if the socket is connected or not.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Serialize `msg` as JSON and send it as a single message.
    pub fn send_json<T: Serialize>(&self, msg: &T) -> Result<(), JsonMsgError> {
        let msg_str = encode_json(msg)?;

        self.socket.send(msg_str.as_str(), 0)
            .map_err(JsonMsgError::SendError)
    }

    /// Recieve a single message and deserialize it from JSON.
    ///
    /// Returns `Ok(None)` if no message arrived within the socket's recieve timeout.
    pub fn recv_json<T: DeserializeOwned>(&self) -> Result<Option<T>, JsonMsgError> {
        match self.socket.recv_bytes(0) {
            Ok(bytes) => decode_json(&bytes).map(Some),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(JsonMsgError::RecvError(e))
        }
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {

        // Set all the socket options, we use a macro here to make the error handling nice and
        // easy
        set_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_heartbeat_ivl, self.heartbeat_ivl),
            (set_heartbeat_timeout, self.heartbeat_timeout),
            (set_heartbeat_ttl, self.heartbeat_ttl),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_reconnect_ivl_max, self.reconnect_ivl_max),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout)
        );

        // If the socket is a req type set the req-specific options
        if let Ok(SocketType::REQ) = socket.get_socket_type() {
            set_sockopts!(
                socket,
                (set_req_correlate, self.req_correlate),
                (set_req_relaxed, self.req_relaxed)
            );
        }

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // Defaults for sockopts taken from http://api.zeromq.org/4-2:zmq-setsockopt
        Self {
            bind: false,
            block_on_first_connect: true,
            connect_timeout: 0,
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            linger: 30_000,
            reconnect_ivl: 100,
            reconnect_ivl_max: 0,
            recv_timeout: -1,
            req_correlate: false,
            req_relaxed: false,
            send_timeout: 0
        }
    }
}

impl Default for NetParams {
    fn default() -> Self {
        Self {
            sync_bind_endpoint: "tcp://*:5001".into(),
            sync_connect_endpoint: "tcp://localhost:5001".into(),
            host_recv_timeout_ms: 1000,
            peer_recv_timeout_ms: 500,
            send_timeout_ms: 100,
            reconnect_backoff_ms: 250,
            reconnect_backoff_max_ms: 4000,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Serialize `msg` into the JSON text carried by one message.
pub fn encode_json<T: Serialize>(msg: &T) -> Result<String, JsonMsgError> {
    serde_json::to_string(msg)
        .map_err(JsonMsgError::SerializationError)
}

/// Deserialize the JSON text carried by one message.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, JsonMsgError> {
    let msg_str = std::str::from_utf8(bytes)
        .map_err(|_| JsonMsgError::NonUtf8Message)?;

    serde_json::from_str(msg_str)
        .map_err(JsonMsgError::DeserializeError)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a socket.
fn read_event(socket: &Socket) -> Result<SocketEvent, zmq::Error> {

    let msg = socket.recv_msg(0)?;

    if msg.len() < 2 {
        return Err(zmq::Error::EINVAL)
    }

    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Monitor events come in two parts, the second is the address which we ignore
    if socket.get_rcvmore()? {
        let _ = socket.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

fn monitor_socket(
    monitor: Socket,
    monitor_endpoint: String,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>
) {
    // So long as the shutdown isn't requested
    while !shutdown.load(Ordering::Relaxed) {
        // Read the next event from the monitor
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                log::debug!("Monitor {} stopped: {}", monitor_endpoint, e);
                break
            }
        };

        // Raise any flags required by the event
        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => connected.store(true, Ordering::Relaxed),
            SocketEvent::DISCONNECTED => connected.store(false, Ordering::Relaxed),
            _ => ()
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    fn pair(ctx: &Context, endpoint: &str, recv_timeout: i32) -> (MonitoredSocket, MonitoredSocket) {
        let server = MonitoredSocket::new(
            ctx,
            zmq::REP,
            SocketOptions {
                bind: true,
                block_on_first_connect: false,
                recv_timeout,
                linger: 0,
                ..Default::default()
            },
            endpoint
        ).unwrap();

        let client = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            SocketOptions {
                block_on_first_connect: false,
                recv_timeout,
                linger: 0,
                ..Default::default()
            },
            endpoint
        ).unwrap();

        (server, client)
    }

    #[test]
    fn test_json_exchange() {
        let ctx = Context::new();
        let (server, client) = pair(&ctx, "inproc://net_json_exchange", 1000);

        client.send_json(&Ping { seq: 7 }).unwrap();
        assert_eq!(server.recv_json::<Ping>().unwrap(), Some(Ping { seq: 7 }));

        server.send_json(&Ping { seq: 8 }).unwrap();
        assert_eq!(client.recv_json::<Ping>().unwrap(), Some(Ping { seq: 8 }));
    }

    #[test]
    fn test_recv_timeout_is_none() {
        let ctx = Context::new();
        let (server, _client) = pair(&ctx, "inproc://net_recv_timeout", 20);

        assert!(server.recv_json::<Ping>().unwrap().is_none());
    }

    #[test]
    fn test_bad_payloads() {
        let ctx = Context::new();
        let (server, client) = pair(&ctx, "inproc://net_bad_payloads", 1000);

        client.send(&[0xff, 0xfe, 0x00][..], 0).unwrap();
        assert!(matches!(server.recv_json::<Ping>(), Err(JsonMsgError::NonUtf8Message)));
        server.send("", 0).unwrap();
        client.recv_bytes(0).unwrap();

        client.send("{\"seq\": \"seven\"}", 0).unwrap();
        assert!(matches!(server.recv_json::<Ping>(), Err(JsonMsgError::DeserializeError(_))));
    }

    #[test]
    fn test_decode_json() {
        assert_eq!(decode_json::<Ping>(b"{\"seq\": 1}").unwrap(), Ping { seq: 1 });
        assert!(matches!(decode_json::<Ping>(b"seq"), Err(JsonMsgError::DeserializeError(_))));
        assert!(matches!(decode_json::<Ping>(&[0xc3, 0x28]), Err(JsonMsgError::NonUtf8Message)));
        assert_eq!(encode_json(&Ping { seq: 2 }).unwrap(), "{\"seq\":2}");
    }
}
