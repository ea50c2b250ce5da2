//! Public and private keys in their SSH wire form.
//!
//! The keys are opaque to this crate: we compare, store and fingerprint them, but decoding and
//! all cryptographic operations belong to the transport layer underneath us.
use bytes::Bytes;
use derivative::Derivative;
use std::fmt;

/// Public key of an SSH server or user.
///
/// The key is kept in the SSH wire encoding (the format of the `public key blob` from RFC 4253,
/// section 6.6). Two keys are equal iff both the algorithm name and the encoded bytes are equal,
/// which is exactly the comparison that host key verification needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pubkey {
    /// Name of the key algorithm, such as `"ssh-ed25519"`.
    pub key_type: String,
    /// The key in the SSH wire encoding.
    pub key_blob: Bytes,
}

impl Pubkey {
    /// Computes the fingerprint of the public key.
    ///
    /// This is the OpenSSH-compatible SHA-256 fingerprint in base64, prefixed with `SHA256:`, the
    /// same string that `ssh` prints when it asks you whether to trust a host.
    pub fn fingerprint(&self) -> String {
        use base64::Engine as _;
        use sha2::Digest as _;
        let digest = sha2::Sha256::digest(&self.key_blob);
        format!("SHA256:{}", base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.key_type, self.fingerprint())
    }
}

/// Private key used for public key authentication.
///
/// Like [`Pubkey`], the key material is opaque to this crate; the transport layer interprets it
/// when it performs the authentication exchange. The `Debug` implementation does not print the
/// private data (enable feature `debug_less_secure` to print it).
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct Privkey {
    /// The public half of the key pair.
    pub pubkey: Pubkey,
    /// The private key material.
    #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
    pub key_data: Bytes,
}

impl Privkey {
    /// Computes the fingerprint of the associated public key.
    pub fn fingerprint(&self) -> String {
        self.pubkey.fingerprint()
    }
}
