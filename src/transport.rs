//! Interface to the secure transport that carries the session.
//!
//! Everything below the connection layer is reached through the traits in this module: the wire
//! protocol with its key exchange and ciphers implements [`Transport`], and whatever performs
//! name resolution and the initial handshake implements [`Dial`]. This crate submits
//! [commands][TransportCommand] and reacts to [events][TransportEvent]; it never touches sockets
//! itself.
use bytes::Bytes;
use futures_core::future::BoxFuture;
use std::fmt;
use std::task::{Context, Poll};
use crate::client::{AuthResult, Credential};
use crate::error::{ChannelOpenError, Error, Result};
use crate::pubkey::Pubkey;

/// Remote endpoint of an SSH connection or of a forwarded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint { host: host.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Command submitted by the client to the transport.
///
/// Channel ids are allocated by the client and echoed back by the transport in the
/// channel-related [`TransportEvent`]s.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Submit one credential to the server.
    ///
    /// The transport answers with [`TransportEvent::AuthResult`]. The client never submits a
    /// credential while another one is outstanding.
    SendAuth(Credential),
    /// Open a direct-tcpip channel forwarded to `target`.
    OpenChannel {
        /// Channel id chosen by the client.
        id: u32,
        /// Remote host and port the channel should be forwarded to.
        target: Endpoint,
    },
    /// Send data on an open channel.
    SendData {
        /// Channel id.
        id: u32,
        /// The bytes to forward.
        data: Bytes,
    },
    /// Close a channel.
    CloseChannel {
        /// Channel id.
        id: u32,
    },
    /// Disconnect the whole transport.
    Disconnect,
}

/// Event delivered by the transport to the client.
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility.
#[derive(Debug)]
#[non_exhaustive]
pub enum TransportEvent {
    /// Key exchange completed and the server presented its host key.
    ///
    /// The transport has already verified that the server owns the corresponding private key;
    /// whether the key itself is trusted is decided by this crate.
    KeyExchanged {
        /// The host key presented by the server.
        server_key: Pubkey,
        /// The session identifier established by the key exchange.
        session_id: Bytes,
    },
    /// The server answered the credential from [`TransportCommand::SendAuth`].
    AuthResult(AuthResult),
    /// The server confirmed a channel open.
    ChannelOpened {
        /// Channel id from [`TransportCommand::OpenChannel`].
        id: u32,
    },
    /// The server refused a channel open.
    ChannelRejected {
        /// Channel id from [`TransportCommand::OpenChannel`].
        id: u32,
        /// The reason the server gave.
        error: ChannelOpenError,
    },
    /// Data arrived on a channel.
    ChannelData {
        /// Channel id.
        id: u32,
        /// The received bytes.
        data: Bytes,
    },
    /// A channel was closed by the remote side.
    ChannelClosed {
        /// Channel id.
        id: u32,
    },
    /// The transport is gone.
    ///
    /// This is the last meaningful event: `error` is `None` when the closure was clean (remote
    /// disconnect after our own [`TransportCommand::Disconnect`], or an orderly remote close) and
    /// carries the failure otherwise.
    TransportClosed {
        /// The reason the transport failed, if it did.
        error: Option<Error>,
    },
}

/// The secure session layer underneath the client.
///
/// An implementation owns the wire protocol: key exchange, encryption, packet framing and the
/// actual channel multiplexing. The client feeds it [commands][TransportCommand] and consumes
/// [events][TransportEvent] from it inside the connection future's poll loop.
pub trait Transport {
    /// Submits a command to the transport.
    ///
    /// This only enqueues work; it must not block. The transport performs the I/O as it is
    /// polled by its own driver.
    fn submit(&mut self, cmd: TransportCommand) -> Result<()>;

    /// Polls for the next event.
    ///
    /// After [`TransportEvent::TransportClosed`] has been delivered, this returns
    /// `Poll::Ready(None)`.
    fn poll_event(&mut self, cx: &mut Context) -> Poll<Option<TransportEvent>>;
}

/// Opens transports to remote endpoints.
///
/// The dialer covers name resolution, the TCP connection and the startup of the wire protocol.
/// [`SshClient`][crate::SshClient] dials once per `connect()` call and then waits for the
/// resulting transport to report its key exchange.
pub trait Dial {
    /// The transport this dialer produces.
    type Transport: Transport;

    /// Opens a transport to `endpoint`.
    fn dial(&mut self, endpoint: &Endpoint) -> BoxFuture<'_, Result<Self::Transport>>;
}
