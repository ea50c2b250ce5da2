use derivative::Derivative;
use std::sync::Arc;
use crate::pubkey::Privkey;

/// One credential in the ordered sequence passed to
/// [`SshClient::connect()`][crate::SshClient::connect()].
///
/// The credentials are tried in the order given, one at a time, until the server accepts one or
/// the sequence runs out (see RFC 4252 for the methods). A credential is immutable once
/// submitted; if you want to retry one, connect again with a different sequence.
///
/// The `Debug` implementation does not print passwords or private key material (enable feature
/// `debug_less_secure` to print passwords).
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub enum Credential {
    /// Authenticate with the "publickey" method.
    Pubkey {
        /// Username to authenticate as.
        username: String,
        /// The key pair to authenticate with.
        privkey: Privkey,
    },
    /// Authenticate with the "password" method.
    Password {
        /// Username to authenticate as.
        username: String,
        /// The password.
        #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
        password: String,
    },
    /// Authenticate with the "keyboard-interactive" method.
    Interactive {
        /// Username to authenticate as.
        username: String,
        /// Handler that answers the server's prompts.
        #[derivative(Debug = "ignore")]
        handler: Arc<dyn PromptHandler>,
    },
}

impl Credential {
    /// The username this credential authenticates as.
    pub fn username(&self) -> &str {
        match self {
            Credential::Pubkey { username, .. } => username,
            Credential::Password { username, .. } => username,
            Credential::Interactive { username, .. } => username,
        }
    }

    /// Name of the authentication method, as it appears on the wire.
    pub fn method_name(&self) -> &'static str {
        match self {
            Credential::Pubkey { .. } => "publickey",
            Credential::Password { .. } => "password",
            Credential::Interactive { .. } => "keyboard-interactive",
        }
    }

    pub(crate) fn describe(&self) -> String {
        format!("{} for {:?}", self.method_name(), self.username())
    }
}

/// Handler that answers the prompts of a keyboard-interactive exchange.
///
/// The transport calls this during the authentication round-trips of a
/// [`Credential::Interactive`]; this crate only carries the handler to the transport and
/// consumes the final [`AuthResult`].
pub trait PromptHandler: Send + Sync {
    /// Answers one round of prompts, in order. The returned vector must have one response per
    /// prompt.
    fn answer(&self, name: &str, instruction: &str, prompts: &[Prompt]) -> Vec<String>;
}

/// One prompt of a keyboard-interactive exchange (RFC 4256, section 3.2).
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Text to show to the user.
    pub prompt: String,
    /// True if the user's answer may be echoed back while typing.
    pub echo: bool,
}

/// The server's answer to one submitted credential.
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// The server accepted the credential; the session is authenticated.
    Success,
    /// The server rejected the credential.
    Failure(AuthFailure),
}

/// Message sent by the server when an authentication attempt fails.
///
/// This corresponds to `SSH_MSG_USERAUTH_FAILURE` (RFC 4252, section 5.1). Note that this may
/// actually represent a [partial success][Self::partial_success].
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// Authentication methods that may productively continue the authentication.
    ///
    /// Note that the server must not list the `"none"` method here, even if it is supported.
    pub methods_can_continue: Vec<String>,

    /// True if the authentication request was successful, but the authentication should continue.
    ///
    /// For example, this might be used if the server requires that you pass multiple
    /// authentications before continuing.
    pub partial_success: bool,
}

/// Rejection of one credential, collected while the sequence runs.
///
/// When every credential has been rejected, the collected rejections are reported in
/// [`AuthFailedError`][crate::AuthFailedError], in submission order.
#[derive(Debug, Clone)]
pub struct AuthRejection {
    /// Description of the rejected credential, such as `publickey for "alice"`.
    pub credential: String,
    /// The failure message the server answered with.
    pub failure: AuthFailure,
}
