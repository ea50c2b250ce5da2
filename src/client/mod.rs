pub use self::auth::{AuthFailure, AuthRejection, AuthResult, Credential, Prompt, PromptHandler};
pub use self::channel::Channel;
pub use self::client::{Connection, ConnectionFuture, SshClient};
pub use self::tunnel::{ProtocolFactory, TunnelProtocol};

mod auth;
mod channel;
mod client;
mod conn;
mod tunnel;
