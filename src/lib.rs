//! Asynchronous SSH client layer over a pluggable transport.
//!
//! This crate takes care of the connection life cycle of an SSH client: it
//! verifies the host key that the server presents against stores of known
//! keys, tries a sequence of credentials until the server accepts one, and
//! then multiplexes forwarded TCP/IP channels over the authenticated
//! connection. The SSH wire protocol itself is not implemented here, it is
//! supplied by a [`Transport`] that the crate drives through a narrow
//! interface of commands and events.
//!
//! - Entry point for making SSH connections is the [`SshClient`].
//! - Trust decisions about unknown host keys are made by a [`HostKeyPolicy`].
//! - Data on a forwarded channel is handled by your [`TunnelProtocol`],
//! created by a [`ProtocolFactory`] once the server confirms the channel.
#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

pub use crate::client::{AuthFailure, AuthRejection, AuthResult, Credential, Prompt, PromptHandler};
pub use crate::client::{Channel, Connection, ConnectionFuture, SshClient};
pub use crate::client::{ProtocolFactory, TunnelProtocol};
pub use crate::error::{AuthFailedError, ChannelOpenError, DisconnectError, Error, Result};
pub use crate::hostkeys::{HostKeyRecord, HostKeySource, HostKeyStore};
pub use crate::policy::{HostKeyPolicy, HostKeyVerdict};
pub use crate::pubkey::{Privkey, Pubkey};
pub use crate::transport::{Dial, Endpoint, Transport, TransportCommand, TransportEvent};

pub use bytes;

mod client;
pub mod codes;
mod error;
mod hostkeys;
mod policy;
mod pubkey;
mod transport;

/// Default port of the SSH protocol.
pub const SSH_PORT: u16 = 22;
