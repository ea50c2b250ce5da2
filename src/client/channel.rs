use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Weak;
use crate::error::{Error, Result};
use crate::transport::Endpoint;
use super::conn::{self, ConnState};

/// Handle to a forwarded TCP/IP channel.
///
/// Use this object to send data to the target of a forwarding channel opened
/// with [`Connection::open_forward()`][super::Connection::open_forward()]. Data
/// and closure coming from the other direction are delivered to the
/// [`TunnelProtocol`][super::TunnelProtocol] that is bound to the channel.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Debug, Clone)]
pub struct Channel {
    pub(super) conn_st: Weak<Mutex<ConnState>>,
    pub(super) id: u32,
    pub(super) target: Endpoint,
}

impl Channel {
    /// Identifier of this channel, unique within its connection.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Address that the server was asked to connect to.
    pub fn target(&self) -> &Endpoint {
        &self.target
    }

    /// Send data to the target of the channel.
    ///
    /// We simply enqueue the data and return without any blocking. Returns
    /// [`Error::ChannelClosed`] if the channel is closed or closing, and
    /// [`Error::ConnectionClosed`] if the whole connection is gone.
    pub fn send(&self, data: Bytes) -> Result<()> {
        let conn_st = self.conn_st.upgrade().ok_or(Error::ConnectionClosed)?;
        let mut st = conn_st.lock();
        conn::send_data(&mut st, self.id, data)
    }

    /// Close the channel.
    ///
    /// The bound protocol is notified once the server acknowledges the close.
    /// This method is idempotent: if the channel is already closed or closing,
    /// we do nothing.
    pub fn close(&self) {
        if let Some(conn_st) = self.conn_st.upgrade() {
            let mut st = conn_st.lock();
            conn::close_channel(&mut st, self.id);
        }
    }
}
