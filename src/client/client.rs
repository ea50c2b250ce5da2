use bytes::Bytes;
use parking_lot::Mutex;
use pin_project::{pin_project, pinned_drop};
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use crate::error::{AuthFailedError, Error, Result};
use crate::hostkeys::{HostKeySource, HostKeyStore};
use crate::policy::{HostKeyPolicy, HostKeyVerdict};
use crate::pubkey::Pubkey;
use crate::transport::{Dial, Endpoint, Transport, TransportCommand, TransportEvent};
use super::auth::{AuthRejection, AuthResult, Credential};
use super::conn::{self, ConnState, Phase};
use super::tunnel::{self, ProtocolFactory, TunnelProtocol};

/// Entry point for making SSH connections.
///
/// The client owns a dialer, which produces the transports that carry the SSH
/// protocol, and two stores of known host keys: the system store, which we
/// treat as read-only, and the local store, to which the
/// [`AutoAdd`][HostKeyPolicy::AutoAdd] policy saves keys of hosts that we have
/// not seen before. Load the stores with
/// [`.load_system_host_keys()`][Self::load_system_host_keys()] and
/// [`.load_host_keys()`][Self::load_host_keys()] before connecting.
///
/// Call [`.connect()`][Self::connect()] to open, verify and authenticate a
/// connection.
pub struct SshClient<D> {
    dialer: D,
    system_host_keys: HostKeyStore,
    host_keys: HostKeyStore,
}

impl<D: Dial> SshClient<D> {
    /// Creates a client with empty host key stores.
    pub fn new(dialer: D) -> SshClient<D> {
        SshClient {
            dialer,
            system_host_keys: HostKeyStore::new(),
            host_keys: HostKeyStore::new(),
        }
    }

    /// Load host keys into the system store.
    ///
    /// Keys in the system store take precedence over the local store when a
    /// host key is verified, and the store is never modified by a policy.
    pub fn load_system_host_keys(&mut self, source: &mut dyn HostKeySource) -> Result<()> {
        self.system_host_keys.load(source)
    }

    /// Load host keys into the local store.
    ///
    /// The local store also receives the keys recorded by the
    /// [`AutoAdd`][HostKeyPolicy::AutoAdd] policy.
    pub fn load_host_keys(&mut self, source: &mut dyn HostKeySource) -> Result<()> {
        self.host_keys.load(source)
    }

    /// The store of system host keys.
    pub fn system_host_keys(&self) -> &HostKeyStore {
        &self.system_host_keys
    }

    /// The store of local host keys.
    pub fn host_keys(&self) -> &HostKeyStore {
        &self.host_keys
    }

    /// Mutable access to the store of local host keys.
    ///
    /// You can use this to persist keys added by the
    /// [`AutoAdd`][HostKeyPolicy::AutoAdd] policy, or to edit the store by
    /// hand.
    pub fn host_keys_mut(&mut self) -> &mut HostKeyStore {
        &mut self.host_keys
    }

    /// Connect and authenticate to an SSH server.
    ///
    /// This dials the server, waits for the key exchange, checks the host key
    /// that the server presented against the host key stores using `policy`,
    /// and then tries the given `credentials` one after another, in order,
    /// until the server accepts one of them.
    ///
    /// On success, you should use the returned objects as follows:
    ///
    /// - [`Connection`] allows you to open forwarding channels and to close
    /// the connection.
    /// - [`ConnectionFuture`] is a future that you must poll to drive the
    /// connection forward. You will usually spawn a task for this future.
    ///
    /// If the host key is not accepted, the key does not match the stored key,
    /// or all credentials are rejected, the connection is torn down and an
    /// error is returned.
    pub async fn connect(
        &mut self,
        host: impl Into<String>,
        port: u16,
        credentials: Vec<Credential>,
        policy: HostKeyPolicy,
    ) -> Result<(Connection, ConnectionFuture<D::Transport>)> {
        let endpoint = Endpoint::new(host, port);
        log::debug!("connecting to {}", endpoint);
        let mut transport = self.dialer.dial(&endpoint).await?;

        let (server_key, session_id) = wait_key_exchange(&mut transport).await?;

        let hostname = HostKeyStore::host_port_to_hostname(&endpoint.host, endpoint.port);
        if let Err(err) = self.verify_host_key(&hostname, &server_key, policy) {
            let _ = transport.submit(TransportCommand::Disconnect);
            return Err(err)
        }

        authenticate(&mut transport, credentials).await?;
        log::debug!("connection to {} is authenticated and ready", endpoint);

        let conn_st = Arc::new(Mutex::new(conn::new_conn(endpoint, session_id)));
        let conn = Connection { conn_st: Arc::downgrade(&conn_st) };
        let conn_fut = ConnectionFuture { conn_st, transport };
        Ok((conn, conn_fut))
    }

    fn verify_host_key(&mut self, hostname: &str, server_key: &Pubkey, policy: HostKeyPolicy) -> Result<()> {
        // the system store takes precedence over the local store
        let known_key = self.system_host_keys.get(hostname, &server_key.key_type)
            .or_else(|| self.host_keys.get(hostname, &server_key.key_type));

        match policy.decide(hostname, server_key, known_key) {
            HostKeyVerdict::Accept | HostKeyVerdict::AcceptAndWarn => Ok(()),
            HostKeyVerdict::AcceptAndStore => {
                self.host_keys.insert(hostname, server_key.clone());
                Ok(())
            },
            HostKeyVerdict::Reject => {
                let expected_key = self.system_host_keys.get(hostname, &server_key.key_type)
                    .or_else(|| self.host_keys.get(hostname, &server_key.key_type));
                match expected_key {
                    Some(expected_key) => {
                        log::debug!("{} host key for {} does not match the known key",
                            server_key.key_type, hostname);
                        Err(Error::HostKeyMismatch {
                            hostname: hostname.into(),
                            key: server_key.clone(),
                            expected_key: expected_key.clone(),
                        })
                    },
                    None => Err(Error::HostKeyUnknown {
                        hostname: hostname.into(),
                        key: server_key.clone(),
                    }),
                }
            },
        }
    }
}

async fn next_event<T: Transport>(transport: &mut T) -> Option<TransportEvent> {
    poll_fn(|cx| transport.poll_event(cx)).await
}

async fn wait_key_exchange<T: Transport>(transport: &mut T) -> Result<(Pubkey, Bytes)> {
    match next_event(transport).await {
        Some(TransportEvent::KeyExchanged { server_key, session_id }) => {
            log::debug!("server presented {} host key {}",
                server_key.key_type, server_key.fingerprint());
            Ok((server_key, session_id))
        },
        Some(TransportEvent::TransportClosed { error }) =>
            Err(error.unwrap_or(Error::PeerClosed)),
        Some(_) =>
            Err(Error::Transport("received unexpected event before key exchange")),
        None =>
            Err(Error::PeerClosed),
    }
}

async fn authenticate<T: Transport>(transport: &mut T, credentials: Vec<Credential>) -> Result<()> {
    let mut rejections = Vec::new();
    for credential in credentials {
        let described = credential.describe();
        log::debug!("trying to authenticate with {}", described);
        transport.submit(TransportCommand::SendAuth(credential))?;

        loop {
            match next_event(transport).await {
                Some(TransportEvent::AuthResult(AuthResult::Success)) => {
                    log::debug!("authentication with {} succeeded", described);
                    return Ok(())
                },
                Some(TransportEvent::AuthResult(AuthResult::Failure(failure))) => {
                    log::debug!("server rejected {}, methods that can continue: {:?}",
                        described, failure.methods_can_continue);
                    rejections.push(AuthRejection { credential: described, failure });
                    break
                },
                Some(TransportEvent::KeyExchanged { .. }) => {
                    log::debug!("ignoring key re-exchange during authentication");
                    continue
                },
                Some(TransportEvent::TransportClosed { error }) =>
                    return Err(error.unwrap_or(Error::PeerClosed)),
                Some(_) =>
                    return Err(Error::Transport("received unexpected channel event during authentication")),
                None =>
                    return Err(Error::PeerClosed),
            }
        }
    }

    let _ = transport.submit(TransportCommand::Disconnect);
    Err(Error::AuthFailed(AuthFailedError { rejections }))
}

/// Handle to an authenticated SSH connection.
///
/// Use this object to open forwarding channels over the connection with
/// [`.open_forward()`][Self::open_forward()] and to close the connection with
/// [`.close()`][Self::close()]. You obtain it from [`SshClient::connect()`],
/// together with a [`ConnectionFuture`] that performs the actual I/O and that
/// you must keep polling, usually by spawning a task for it.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Connection {
    pub(super) conn_st: Weak<Mutex<ConnState>>,
}

impl Connection {
    pub(super) fn upgrade(&self) -> Result<Arc<Mutex<ConnState>>> {
        self.conn_st.upgrade().ok_or(Error::ConnectionClosed)
    }

    /// Open a forwarding channel to `host`:`port` behind the server.
    ///
    /// This asks the server to connect to the given address and to relay the
    /// data in both directions. Once the server confirms the open, `factory`
    /// is called to build the [`TunnelProtocol`] that will receive the data
    /// and closure of the channel, and the same instance is returned to you.
    ///
    /// The factory is invoked only after the server confirms the open: if the
    /// server refuses the channel, if `timeout` elapses first, or if the
    /// connection dies while the request is in flight, no protocol instance is
    /// ever built and the respective error is returned. When the request times
    /// out, a confirmation that arrives later is discarded and the channel is
    /// closed right away.
    ///
    /// You can open any number of channels concurrently.
    pub async fn open_forward(
        &self,
        host: impl Into<String>,
        port: u16,
        factory: impl ProtocolFactory,
        timeout: Duration,
    ) -> Result<Arc<dyn TunnelProtocol>> {
        tunnel::open_forward(self, Endpoint::new(host, port), Box::new(factory), timeout).await
    }

    /// Close the connection.
    ///
    /// All pending open requests are resolved with
    /// [`Error::ConnectionTerminated`], all open channels are force-closed and
    /// their protocols are notified, and a disconnect is sent to the server.
    /// After that, the [`ConnectionFuture`] returns.
    ///
    /// This method is idempotent: if the connection is already closed or
    /// closing, we do nothing.
    pub fn close(&self) {
        let Some(conn_st) = self.conn_st.upgrade() else { return };
        let mut st = conn_st.lock();
        let protos = conn::close_conn(&mut st);
        drop(st);

        for proto in protos {
            proto.on_close();
        }
    }

    /// Address of the server that this connection is connected to.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Ok(self.upgrade()?.lock().endpoint.clone())
    }

    /// Session identifier from the key exchange.
    pub fn session_id(&self) -> Result<Bytes> {
        Ok(self.upgrade()?.lock().session_id.clone())
    }

    /// Whether the connection is authenticated and not closed or closing.
    pub fn is_authenticated(&self) -> bool {
        match self.conn_st.upgrade() {
            Some(conn_st) => matches!(conn_st.lock().phase, Phase::Authenticated),
            None => false,
        }
    }
}

/// Future that drives a [`Connection`].
///
/// This future moves commands and events between the connection state and the
/// transport. You must poll this future, usually by spawning a task for it.
/// The future completes when the connection is closed (with `Ok`) or when it
/// fails (with the error that killed it).
///
/// Dropping the future before it completes kills the connection: pending open
/// requests are resolved with [`Error::ConnectionTerminated`] and the bound
/// protocols are notified.
#[pin_project(PinnedDrop)]
pub struct ConnectionFuture<T: Transport> {
    conn_st: Arc<Mutex<ConnState>>,
    transport: T,
}

impl<T: Transport> Future for ConnectionFuture<T> {
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        let this = self.project();
        conn::poll_conn(this.conn_st, this.transport, cx)
    }
}

#[pinned_drop]
impl<T: Transport> PinnedDrop for ConnectionFuture<T> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        let protos = {
            let mut st = this.conn_st.lock();
            conn::abort_conn(&mut st)
        };

        for proto in protos {
            proto.on_close();
        }
    }
}
