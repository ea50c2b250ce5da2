//! In-memory store of known server host keys.
use std::collections::HashMap;
use crate::error::Result;
use crate::pubkey::Pubkey;

/// One hostname-to-key association.
///
/// This is the unit that a [`HostKeySource`] produces and that a [`HostKeyStore`] stores. The
/// key type is carried inside the [`key`][Self::key].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyRecord {
    /// Hostname in the OpenSSH convention (see
    /// [`host_port_to_hostname()`][HostKeyStore::host_port_to_hostname()]).
    pub hostname: String,
    /// The host key.
    pub key: Pubkey,
}

/// Source of host key records, such as a parsed `known_hosts` file.
///
/// We do not read or parse any on-disk format ourselves. Implement this trait for whatever
/// representation of known hosts you have and pass it to
/// [`SshClient::load_system_host_keys()`][crate::SshClient::load_system_host_keys()] or
/// [`SshClient::load_host_keys()`][crate::SshClient::load_host_keys()].
pub trait HostKeySource {
    /// Produces the records to merge into a [`HostKeyStore`].
    fn load(&mut self) -> Result<Vec<HostKeyRecord>>;
}

impl HostKeySource for Vec<HostKeyRecord> {
    fn load(&mut self) -> Result<Vec<HostKeyRecord>> {
        Ok(self.clone())
    }
}

/// In-memory set of host keys, keyed by hostname and key type.
///
/// The store keeps at most one key per `(hostname, key type)` pair; inserting another key for the
/// same pair replaces the previous one. [`SshClient`][crate::SshClient] consults two of these
/// stores when it verifies a server: a read-only "system" store and a "local" store that the
/// [`AutoAdd`][crate::HostKeyPolicy::AutoAdd] policy appends to.
#[derive(Debug, Clone, Default)]
pub struct HostKeyStore {
    keys: HashMap<(String, String), Pubkey>,
}

impl HostKeyStore {
    /// Creates an empty store.
    pub fn new() -> HostKeyStore {
        HostKeyStore::default()
    }

    /// Merges all records from `source` into this store.
    ///
    /// This can be called multiple times; records loaded later replace earlier records with the
    /// same `(hostname, key type)` pair.
    pub fn load(&mut self, source: &mut dyn HostKeySource) -> Result<()> {
        for record in source.load()? {
            self.insert(record.hostname, record.key);
        }
        Ok(())
    }

    /// Adds a key for a hostname, replacing any previous key of the same type.
    pub fn insert(&mut self, hostname: impl Into<String>, key: Pubkey) {
        self.keys.insert((hostname.into(), key.key_type.clone()), key);
    }

    /// Looks up the key of type `key_type` for `hostname`.
    pub fn get(&self, hostname: &str, key_type: &str) -> Option<&Pubkey> {
        self.keys.get(&(hostname.to_owned(), key_type.to_owned()))
    }

    /// Removes the key of type `key_type` for `hostname` and returns it.
    pub fn remove(&mut self, hostname: &str, key_type: &str) -> Option<Pubkey> {
        self.keys.remove(&(hostname.to_owned(), key_type.to_owned()))
    }

    /// Iterates over all `(hostname, key)` pairs in the store, in unspecified order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Pubkey)> {
        self.keys.iter().map(|((hostname, _), key)| (hostname.as_str(), key))
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the store contains no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Converts a host and port to an OpenSSH-compatible hostname.
    ///
    /// If the port is not 22, this returns `[host]:port`, otherwise the `host` is returned as-is.
    /// `host` can be either a domain name or an IP address.
    pub fn host_port_to_hostname(host: &str, port: u16) -> String {
        if port == crate::SSH_PORT {
            host.into()
        } else {
            format!("[{}]:{}", host, port)
        }
    }
}
