use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use crate::error::{Error, Result};
use crate::transport::Endpoint;
use super::channel::Channel;
use super::client::Connection;
use super::conn::{self, CancelOpen};

/// Protocol bound to a forwarded TCP/IP channel.
///
/// A protocol instance is created by a [`ProtocolFactory`] when the server
/// confirms a channel open requested with
/// [`Connection::open_forward()`][super::Connection::open_forward()]. From that
/// point on, the instance receives everything that happens on the channel:
///
/// - [`.on_data()`][Self::on_data()] is called for data from the target, in
/// the order in which the data arrived.
/// - [`.on_close()`][Self::on_close()] is called exactly once when the channel
/// stops existing, whether it was closed locally, closed by the server, or torn
/// down together with the connection.
///
/// The callbacks are invoked outside of any internal lock, so they may freely
/// use the [`Channel`] handle (or any other handle of this crate).
pub trait TunnelProtocol: Send + Sync {
    /// Handle data received from the target of the channel.
    fn on_data(&self, data: Bytes);

    /// Handle the end of the channel's life.
    fn on_close(&self);
}

/// Factory that binds a [`TunnelProtocol`] to a newly opened channel.
///
/// The factory is invoked only after the server confirms the channel open, so
/// a refused or timed out open never produces a protocol instance.
///
/// Closures of type `FnMut(Channel) -> Arc<dyn TunnelProtocol>` implement this
/// trait, so you will usually not need to implement it by hand.
pub trait ProtocolFactory: Send + 'static {
    /// Build the protocol instance for the freshly opened `channel`.
    fn build(&mut self, channel: Channel) -> Arc<dyn TunnelProtocol>;
}

impl<F> ProtocolFactory for F
    where F: FnMut(Channel) -> Arc<dyn TunnelProtocol> + Send + 'static
{
    fn build(&mut self, channel: Channel) -> Arc<dyn TunnelProtocol> {
        self(channel)
    }
}

pub(super) async fn open_forward(
    conn: &Connection,
    target: Endpoint,
    factory: Box<dyn ProtocolFactory>,
    timeout: Duration,
) -> Result<Arc<dyn TunnelProtocol>> {
    let conn_st = conn.upgrade()?;
    let (result_tx, mut result_rx) = oneshot::channel();
    let id = conn::register_open(&mut conn_st.lock(), target, factory, result_tx)?;

    tokio::select! {
        biased;
        result = &mut result_rx => match result {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTerminated),
        },
        _ = tokio::time::sleep(timeout) => {
            // bind the outcome first, the lock must not be held across the await below
            let cancel = conn::cancel_open(&mut conn_st.lock(), id);
            match cancel {
                CancelOpen::Cancelled => {
                    log::debug!("opening of channel {} timed out after {:?}", id, timeout);
                    Err(Error::ChannelOpenTimeout(timeout))
                },
                // the open was resolved just as the timeout fired, so the
                // result takes precedence over the timeout
                CancelOpen::Resolved => match result_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::ConnectionTerminated),
                },
            }
        },
    }
}
