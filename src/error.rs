use std::fmt;
use std::time::Duration;
use crate::client::AuthRejection;
use crate::codes::{disconnect, open};
use crate::pubkey::Pubkey;

/// Result type for our [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error that occured while establishing or using an SSH connection.
///
/// This enum is `#[non_exhaustive]`, so we reserve the right to add more variants and don't
/// consider this to break backwards compatibility.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    #[error("could not resolve endpoint: {0}")]
    Resolution(String),
    #[error("transport error: {0}")]
    Transport(&'static str),
    #[error("IO error on the transport")]
    TransportIo(#[source] std::io::Error),
    #[error("connection unexpectedly closed by peer")]
    PeerClosed,
    #[error("peer disconnected: {0}")]
    PeerDisconnected(DisconnectError),
    #[error("unknown {} host key for {}", .key.key_type, .hostname)]
    HostKeyUnknown { hostname: String, key: Pubkey },
    #[error("{} host key for {} does not match the known key", .key.key_type, .hostname)]
    HostKeyMismatch { hostname: String, key: Pubkey, expected_key: Pubkey },
    #[error("authentication failed: {0}")]
    AuthFailed(AuthFailedError),
    #[error("could not open channel: {0}")]
    ChannelOpen(ChannelOpenError),
    #[error("channel open timed out after {0:?}")]
    ChannelOpenTimeout(Duration),
    #[error("channel is closed")]
    ChannelClosed,
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("connection terminated with request in flight")]
    ConnectionTerminated,
}

/// Error that occured because the server rejected all our credentials.
///
/// The engine submits the credentials one by one and collects the server's answer for each of
/// them; this error carries those answers once the whole sequence has been exhausted.
#[derive(Debug, Clone, thiserror::Error)]
pub struct AuthFailedError {
    /// The rejections collected from the server, one per attempted credential, in order.
    pub rejections: Vec<AuthRejection>,
}

impl fmt::Display for AuthFailedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "server rejected all {} credentials", self.rejections.len())
    }
}

/// Error that occured because the server disconnected.
///
/// This corresponds to the `SSH_MSG_DISCONNECT` packet described in RFC 4253, section 11.1.
#[derive(Debug, Clone, thiserror::Error)]
pub struct DisconnectError {
    /// Machine-readable reason code (see [`codes::disconnect`][crate::codes::disconnect]).
    pub reason_code: u32,
    /// Human-readable description of the error.
    pub description: String,
    /// Language tag of `description` (per RFC 3066).
    pub description_lang: String,
}

impl DisconnectError {
    /// Disconnect that we produce when the application closes the connection.
    pub fn by_application() -> DisconnectError {
        DisconnectError {
            reason_code: disconnect::BY_APPLICATION,
            description: "connection closed by application".into(),
            description_lang: "".into(),
        }
    }

    /// Translates the [`reason_code`][Self::reason_code] into a string.
    pub fn reason_to_str(&self) -> Option<&'static str> {
        disconnect::to_str(self.reason_code)
    }
}

impl fmt::Display for DisconnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_reason(f, disconnect::to_str(self.reason_code), self.reason_code, &self.description)
    }
}

/// Error that occured when opening a channel.
///
/// This corresponds to the `SSH_MSG_CHANNEL_OPEN_FAILURE` packet described in RFC 4254, section
/// 5.1.
#[derive(Debug, Clone, thiserror::Error)]
pub struct ChannelOpenError {
    /// Machine-readable reason code (see [`codes::open`][crate::codes::open]).
    pub reason_code: u32,
    /// Human-readable description of the error.
    pub description: String,
    /// Language tag of `description` (per RFC 3066).
    pub description_lang: String,
}

impl ChannelOpenError {
    /// Translates the [`reason_code`][Self::reason_code] into a string.
    pub fn reason_to_str(&self) -> Option<&'static str> {
        open::to_str(self.reason_code)
    }
}

impl fmt::Display for ChannelOpenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_reason(f, open::to_str(self.reason_code), self.reason_code, &self.description)
    }
}

fn fmt_reason(
    f: &mut fmt::Formatter,
    reason: Option<&'static str>,
    reason_code: u32,
    description: &str,
) -> fmt::Result {
    write!(f, "server returned error ")?;
    if let Some(reason) = reason {
        write!(f, "`{}` ({})", reason, reason_code)?;
    } else {
        write!(f, "{}", reason_code)?;
    }
    if !description.is_empty() {
        write!(f, ": {:?}", description)?;
    }
    Ok(())
}
