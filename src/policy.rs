//! Trust policies for unknown server host keys.
use crate::pubkey::Pubkey;

/// Policy applied when a server presents a host key that is not in our stores.
///
/// The policy is consulted only for servers with no key on record. A presented key that matches
/// the stored key is always accepted, and a presented key that differs from the stored key is
/// always rejected, no matter which policy is in use; see [`HostKeyPolicy::decide()`].
///
/// The default policy is [`RejectUnknown`][Self::RejectUnknown].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Rejects servers whose host key is unknown.
    #[default]
    RejectUnknown,
    /// Accepts an unknown host key, logging a warning with the key fingerprint.
    WarnAndAccept,
    /// Accepts an unknown host key and stores it in the local host key store.
    AutoAdd,
}

/// Decision produced by [`HostKeyPolicy::decide()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyVerdict {
    /// The key is trusted, proceed with the connection.
    Accept,
    /// The key is trusted, but it was not on record and the user should be warned.
    AcceptAndWarn,
    /// The key is trusted and should be added to the local host key store.
    AcceptAndStore,
    /// The key is not trusted, the connection must be aborted.
    Reject,
}

impl HostKeyVerdict {
    /// Returns true unless the verdict is [`Reject`][Self::Reject].
    pub fn is_accept(&self) -> bool {
        !matches!(self, HostKeyVerdict::Reject)
    }
}

impl HostKeyPolicy {
    /// Decides whether to trust the `key` presented by the server at `hostname`.
    ///
    /// `known_key` is the key of the same type that we have on record for `hostname`, if any.
    /// When it is present, the policy itself never runs: a matching key yields
    /// [`Accept`][HostKeyVerdict::Accept] and a differing key yields
    /// [`Reject`][HostKeyVerdict::Reject]. Only when `known_key` is absent does the decision
    /// depend on the policy variant.
    pub fn decide(&self, hostname: &str, key: &Pubkey, known_key: Option<&Pubkey>) -> HostKeyVerdict {
        match known_key {
            Some(known_key) if known_key == key => HostKeyVerdict::Accept,
            Some(_) => HostKeyVerdict::Reject,
            None => match self {
                HostKeyPolicy::RejectUnknown => {
                    log::debug!("rejecting {} host key for {}: {}",
                        key.key_type, hostname, key.fingerprint());
                    HostKeyVerdict::Reject
                },
                HostKeyPolicy::WarnAndAccept => {
                    log::warn!("unknown {} host key for {}: {}",
                        key.key_type, hostname, key.fingerprint());
                    HostKeyVerdict::AcceptAndWarn
                },
                HostKeyPolicy::AutoAdd => {
                    log::debug!("adding {} host key for {}: {}",
                        key.key_type, hostname, key.fingerprint());
                    HostKeyVerdict::AcceptAndStore
                },
            },
        }
    }
}
