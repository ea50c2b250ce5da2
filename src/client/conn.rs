use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::mem::replace;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::sync::oneshot;
use crate::error::{ChannelOpenError, Error, Result};
use crate::transport::{Endpoint, Transport, TransportCommand, TransportEvent};
use super::channel::Channel;
use super::tunnel::{ProtocolFactory, TunnelProtocol};

pub(super) struct ConnState {
    pub(super) endpoint: Endpoint,
    pub(super) session_id: Bytes,
    pub(super) phase: Phase,
    channels: HashMap<u32, ChannelSlot>,
    next_channel_id: u32,
    cmd_queue: VecDeque<TransportCommand>,
    conn_waker: Option<Waker>,
}

pub(super) enum Phase {
    Authenticated,
    Closing,
    Closed,
    Failed,
}

enum ChannelSlot {
    /// We sent the open request and wait for the server to confirm or refuse it.
    Opening(PendingOpen),
    /// The open was confirmed and the protocol instance is being built outside the lock.
    Binding,
    /// The channel is open and bound to a protocol instance.
    Open { proto: Arc<dyn TunnelProtocol> },
    /// We sent a close and wait for the server to acknowledge it.
    Closing { proto: Arc<dyn TunnelProtocol> },
    /// The open request was cancelled, but the server might still answer it.
    Cancelled,
}

struct PendingOpen {
    target: Endpoint,
    factory: Box<dyn ProtocolFactory>,
    result_tx: oneshot::Sender<Result<Arc<dyn TunnelProtocol>>>,
}

pub(super) fn new_conn(endpoint: Endpoint, session_id: Bytes) -> ConnState {
    ConnState {
        endpoint,
        session_id,
        phase: Phase::Authenticated,
        channels: HashMap::new(),
        next_channel_id: 0,
        cmd_queue: VecDeque::new(),
        conn_waker: None,
    }
}

pub(super) fn wakeup_conn(st: &mut ConnState) {
    if let Some(waker) = st.conn_waker.take() {
        waker.wake();
    }
}

pub(super) fn register_open(
    st: &mut ConnState,
    target: Endpoint,
    factory: Box<dyn ProtocolFactory>,
    result_tx: oneshot::Sender<Result<Arc<dyn TunnelProtocol>>>,
) -> Result<u32> {
    if !matches!(st.phase, Phase::Authenticated) {
        return Err(Error::ConnectionClosed)
    }

    // channel ids are never reused, so a late answer to a cancelled open can
    // always be matched to its tombstone
    let id = st.next_channel_id;
    st.next_channel_id += 1;

    st.channels.insert(id, ChannelSlot::Opening(PendingOpen { target: target.clone(), factory, result_tx }));
    st.cmd_queue.push_back(TransportCommand::OpenChannel { id, target: target.clone() });
    log::debug!("requesting forwarding channel {} to {}", id, target);
    wakeup_conn(st);
    Ok(id)
}

pub(super) enum CancelOpen {
    /// The open request was still pending and has now been cancelled.
    Cancelled,
    /// The open request was already resolved (or taken over by the connection).
    Resolved,
}

pub(super) fn cancel_open(st: &mut ConnState, id: u32) -> CancelOpen {
    match st.channels.get_mut(&id) {
        Some(slot @ ChannelSlot::Opening(_)) => {
            // dropping the pending open also drops the factory, so no protocol
            // instance can be built for this channel anymore
            let _pending = replace(slot, ChannelSlot::Cancelled);
            CancelOpen::Cancelled
        },
        _ => CancelOpen::Resolved,
    }
}

pub(super) fn send_data(st: &mut ConnState, id: u32, data: Bytes) -> Result<()> {
    match st.channels.get(&id) {
        Some(ChannelSlot::Open { .. }) => {
            st.cmd_queue.push_back(TransportCommand::SendData { id, data });
            wakeup_conn(st);
            Ok(())
        },
        _ => Err(Error::ChannelClosed),
    }
}

pub(super) fn close_channel(st: &mut ConnState, id: u32) {
    let Some(slot) = st.channels.get_mut(&id) else { return };
    if !matches!(slot, ChannelSlot::Open { .. }) {
        return
    }

    // use `replace()` only after we are sure that `*slot` is `Open`
    let ChannelSlot::Open { proto } = replace(slot, ChannelSlot::Cancelled) else { unreachable!() };
    *slot = ChannelSlot::Closing { proto };

    st.cmd_queue.push_back(TransportCommand::CloseChannel { id });
    log::debug!("closing channel {}", id);
    wakeup_conn(st);
}

pub(super) fn close_conn(st: &mut ConnState) -> Vec<Arc<dyn TunnelProtocol>> {
    if !matches!(st.phase, Phase::Authenticated) {
        return Vec::new()
    }
    st.phase = Phase::Closing;
    log::debug!("closing connection to {}", st.endpoint);

    let mut protos = Vec::new();
    let channels = replace(&mut st.channels, HashMap::new());
    for (id, slot) in channels {
        match slot {
            ChannelSlot::Opening(pending) => {
                let _: Result<_, _> = pending.result_tx.send(Err(Error::ConnectionTerminated));
                st.channels.insert(id, ChannelSlot::Cancelled);
            },
            ChannelSlot::Open { proto } | ChannelSlot::Closing { proto } =>
                protos.push(proto),
            slot @ (ChannelSlot::Binding | ChannelSlot::Cancelled) => {
                st.channels.insert(id, slot);
            },
        }
    }

    st.cmd_queue.push_back(TransportCommand::Disconnect);
    wakeup_conn(st);
    protos
}

pub(super) fn abort_conn(st: &mut ConnState) -> Vec<Arc<dyn TunnelProtocol>> {
    if matches!(st.phase, Phase::Closed | Phase::Failed) {
        return Vec::new()
    }
    log::debug!("dropping connection to {}", st.endpoint);
    st.phase = Phase::Failed;
    drain_channels(st)
}

fn drain_channels(st: &mut ConnState) -> Vec<Arc<dyn TunnelProtocol>> {
    let mut protos = Vec::new();
    for (_, slot) in st.channels.drain() {
        match slot {
            ChannelSlot::Opening(pending) => {
                let _: Result<_, _> = pending.result_tx.send(Err(Error::ConnectionTerminated));
            },
            ChannelSlot::Open { proto } | ChannelSlot::Closing { proto } =>
                protos.push(proto),
            ChannelSlot::Binding | ChannelSlot::Cancelled => {},
        }
    }
    protos
}

pub(super) fn poll_conn<T: Transport>(
    conn_st: &Arc<Mutex<ConnState>>,
    transport: &mut T,
    cx: &mut Context,
) -> Poll<Result<()>> {
    loop {
        let mut st = conn_st.lock();
        let cmds = replace(&mut st.cmd_queue, VecDeque::new());
        // the waker must be in place before the lock is released, otherwise a
        // command enqueued between the drain and the return could go unnoticed
        st.conn_waker = Some(cx.waker().clone());
        drop(st);

        for cmd in cmds {
            if let Err(err) = transport.submit(cmd) {
                log::debug!("transport rejected a command: {}", err);
                return finish_conn(conn_st, Some(err))
            }
        }

        match transport.poll_event(cx) {
            Poll::Pending =>
                return Poll::Pending,
            Poll::Ready(Some(TransportEvent::TransportClosed { error })) =>
                return finish_conn(conn_st, error),
            Poll::Ready(Some(event)) =>
                if let Err(err) = recv_event(conn_st, event) {
                    return finish_conn(conn_st, Some(err))
                },
            Poll::Ready(None) =>
                return finish_conn(conn_st, Some(Error::PeerClosed)),
        }
    }
}

fn finish_conn(conn_st: &Arc<Mutex<ConnState>>, error: Option<Error>) -> Poll<Result<()>> {
    let mut st = conn_st.lock();
    let protos = drain_channels(&mut st);
    let result = match error {
        None => {
            log::debug!("connection to {} closed", st.endpoint);
            st.phase = Phase::Closed;
            Ok(())
        },
        Some(error) => {
            log::debug!("connection to {} failed: {}", st.endpoint, error);
            st.phase = Phase::Failed;
            Err(error)
        },
    };
    drop(st);

    for proto in protos {
        proto.on_close();
    }
    Poll::Ready(result)
}

fn recv_event(conn_st: &Arc<Mutex<ConnState>>, event: TransportEvent) -> Result<()> {
    match event {
        TransportEvent::KeyExchanged { .. } => {
            log::debug!("ignoring key re-exchange on an established connection");
            Ok(())
        },
        TransportEvent::AuthResult(_) => {
            log::debug!("ignoring authentication result on an established connection");
            Ok(())
        },
        TransportEvent::ChannelOpened { id } =>
            recv_channel_opened(conn_st, id),
        TransportEvent::ChannelRejected { id, error } =>
            recv_channel_rejected(conn_st, id, error),
        TransportEvent::ChannelData { id, data } =>
            recv_channel_data(conn_st, id, data),
        TransportEvent::ChannelClosed { id } =>
            recv_channel_closed(conn_st, id),
        // handled in `poll_conn()` before we get here
        TransportEvent::TransportClosed { .. } => Ok(()),
    }
}

fn recv_channel_opened(conn_st: &Arc<Mutex<ConnState>>, id: u32) -> Result<()> {
    let mut st = conn_st.lock();
    let pending = match st.channels.remove(&id) {
        Some(ChannelSlot::Opening(pending)) => {
            // NOTE: we leave a `Binding` placeholder in the map while the
            // protocol instance is built outside of the lock, remember to
            // replace it with the final state!
            st.channels.insert(id, ChannelSlot::Binding);
            pending
        },
        Some(ChannelSlot::Cancelled) => {
            log::debug!("discarding late open confirmation for cancelled channel {}", id);
            st.channels.insert(id, ChannelSlot::Cancelled);
            st.cmd_queue.push_back(TransportCommand::CloseChannel { id });
            wakeup_conn(&mut st);
            return Ok(())
        },
        Some(slot) => {
            // put the slot back, the teardown that follows this error must still find it
            st.channels.insert(id, slot);
            return Err(Error::Transport("received open confirmation for a channel that is not being opened"))
        },
        None if matches!(st.phase, Phase::Authenticated) =>
            return Err(Error::Transport("received open confirmation for unknown channel")),
        None =>
            return Ok(()),
    };
    let PendingOpen { target, mut factory, result_tx } = pending;

    let channel = Channel {
        conn_st: Arc::downgrade(conn_st),
        id,
        target: target.clone(),
    };

    // build the protocol instance without holding the lock, so that it can use
    // the channel handle right away
    drop(st);
    let proto = factory.build(channel);

    let mut st = conn_st.lock();
    if !matches!(st.phase, Phase::Authenticated) {
        // the connection started closing while the instance was being built
        st.channels.remove(&id);
        let _: Result<_, _> = result_tx.send(Ok(proto.clone()));
        drop(st);
        proto.on_close();
        return Ok(())
    }

    match result_tx.send(Ok(proto.clone())) {
        Ok(()) => {
            st.channels.insert(id, ChannelSlot::Open { proto });
            log::debug!("opened forwarding channel {} to {}", id, target);
        },
        Err(_) => {
            // the caller dropped the pending open, close the channel right away
            st.channels.insert(id, ChannelSlot::Cancelled);
            st.cmd_queue.push_back(TransportCommand::CloseChannel { id });
            wakeup_conn(&mut st);
            drop(st);
            proto.on_close();
        },
    }
    Ok(())
}

fn recv_channel_rejected(conn_st: &Arc<Mutex<ConnState>>, id: u32, error: ChannelOpenError) -> Result<()> {
    let mut st = conn_st.lock();
    match st.channels.remove(&id) {
        Some(ChannelSlot::Opening(pending)) => {
            log::debug!("server refused forwarding channel {}: {}", id, error);
            let _: Result<_, _> = pending.result_tx.send(Err(Error::ChannelOpen(error)));
            Ok(())
        },
        Some(ChannelSlot::Cancelled) => {
            log::debug!("discarding late open failure for cancelled channel {}", id);
            Ok(())
        },
        Some(slot) => {
            st.channels.insert(id, slot);
            Err(Error::Transport("received open failure for a channel that is not being opened"))
        },
        None if matches!(st.phase, Phase::Authenticated) =>
            Err(Error::Transport("received open failure for unknown channel")),
        None =>
            Ok(()),
    }
}

fn recv_channel_data(conn_st: &Arc<Mutex<ConnState>>, id: u32, data: Bytes) -> Result<()> {
    let st = conn_st.lock();
    let proto = match st.channels.get(&id) {
        Some(ChannelSlot::Open { proto }) => proto.clone(),
        // data for a channel that is not (or no longer) bound is dropped, the
        // transport has already accounted for it
        _ => return Ok(()),
    };

    // deliver outside of the lock, the protocol may call back into the channel
    drop(st);
    proto.on_data(data);
    Ok(())
}

fn recv_channel_closed(conn_st: &Arc<Mutex<ConnState>>, id: u32) -> Result<()> {
    let mut st = conn_st.lock();
    let proto = match st.channels.remove(&id) {
        Some(ChannelSlot::Open { proto } | ChannelSlot::Closing { proto }) => {
            log::debug!("channel {} closed", id);
            Some(proto)
        },
        Some(ChannelSlot::Cancelled) =>
            None,
        Some(slot) => {
            st.channels.insert(id, slot);
            return Err(Error::Transport("received close for a channel that is not open"))
        },
        None if matches!(st.phase, Phase::Authenticated) =>
            return Err(Error::Transport("received close for unknown channel")),
        None =>
            None,
    };

    drop(st);
    if let Some(proto) = proto {
        proto.on_close();
    }
    Ok(())
}
