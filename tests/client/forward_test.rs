use bytes::Bytes;
use std::time::Duration;
use minato::{DisconnectError, Endpoint, Error, HostKeyPolicy, TransportCommand};
use crate::mock::{self, FactoryLog};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_open_forward_builds_protocol_once() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();

    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");
    assert_eq!(log.count(), 1);

    let channel = log.get(0).channel().clone();
    assert_eq!(channel.id(), 0);
    assert_eq!(channel.target(), &Endpoint::new("10.0.0.5", 8080));

    let open_cmd = tc.handle.commands().into_iter()
        .find_map(|cmd| match cmd {
            TransportCommand::OpenChannel { id, target } => Some((id, target)),
            _ => None,
        })
        .expect("no OpenChannel command was submitted");
    assert_eq!(open_cmd, (0, Endpoint::new("10.0.0.5", 8080)));
}

#[tokio::test]
async fn test_channel_ids_are_sequential() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();

    tc.conn.open_forward("10.0.0.5", 80, log.factory(), TIMEOUT).await
        .expect("could not open first channel");
    tc.conn.open_forward("10.0.0.6", 80, log.factory(), TIMEOUT).await
        .expect("could not open second channel");
    assert_eq!(log.get(0).channel().id(), 0);
    assert_eq!(log.get(1).channel().id(), 1);
}

#[tokio::test]
async fn test_open_forward_rejected_by_server() {
    let tc = mock::connected().await;
    tc.handle.respond(|cmd| match cmd {
        TransportCommand::OpenChannel { id, .. } =>
            vec![mock::channel_rejected(*id, minato::codes::open::CONNECT_FAILED)],
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    let res = tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await;
    match res {
        Err(Error::ChannelOpen(err)) =>
            assert_eq!(err.reason_code, minato::codes::open::CONNECT_FAILED),
        res => panic!("expected ChannelOpen error, got {:?}", res.map(|_| ())),
    }

    // the factory must not run when the server refuses the channel
    assert_eq!(log.count(), 0);
    assert!(tc.conn.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_open_forward_timeout() {
    let tc = mock::connected().await;
    tc.handle.respond(|cmd| match cmd {
        TransportCommand::OpenChannel { .. } => vec![],
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    let res = tc.conn.open_forward("10.0.0.5", 8080, log.factory(), Duration::from_secs(10)).await;
    assert!(matches!(res, Err(Error::ChannelOpenTimeout(t)) if t == Duration::from_secs(10)));
    assert_eq!(log.count(), 0);

    // a confirmation that arrives after the timeout must not bind a protocol,
    // the channel is closed instead
    tc.handle.push_event(mock::channel_opened(0));
    mock::settle().await;
    assert_eq!(log.count(), 0);
    assert!(tc.handle.has_close_channel(0));
    assert!(tc.conn.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_late_rejection_after_timeout() {
    let tc = mock::connected().await;
    tc.handle.respond(|cmd| match cmd {
        TransportCommand::OpenChannel { .. } => vec![],
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    let res = tc.conn.open_forward("10.0.0.5", 8080, log.factory(), Duration::from_secs(10)).await;
    assert!(matches!(res, Err(Error::ChannelOpenTimeout(_))));

    tc.handle.push_event(mock::channel_rejected(0, minato::codes::open::CONNECT_FAILED));
    mock::settle().await;
    assert!(!tc.handle.has_close_channel(0));

    // the id of the timed out open is not reused
    tc.handle.respond(mock::echo_responder);
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel after a timed out open");
    assert_eq!(log.get(0).channel().id(), 1);
}

#[tokio::test]
async fn test_data_is_delivered_in_order() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");

    tc.handle.push_event(mock::channel_data(0, b"hello, "));
    tc.handle.push_event(mock::channel_data(0, b"world"));
    mock::settle().await;
    assert_eq!(log.get(0).received(), b"hello, world");
}

#[tokio::test]
async fn test_send_data_on_channel() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");

    let channel = log.get(0).channel().clone();
    channel.send(Bytes::from_static(b"payload")).expect("could not send");
    mock::settle().await;

    let sent = tc.handle.commands().into_iter()
        .filter_map(|cmd| match cmd {
            TransportCommand::SendData { id: 0, data } => Some(data),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(sent, vec![Bytes::from_static(b"payload")]);
}

#[tokio::test]
async fn test_local_close_waits_for_server_echo() {
    let tc = mock::connected().await;
    tc.handle.respond(|cmd| match cmd {
        TransportCommand::CloseChannel { .. } => vec![],
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");
    let channel = log.get(0).channel().clone();

    channel.close();
    channel.close();
    mock::settle().await;

    // the protocol learns about the close only from the server echo
    assert_eq!(log.get(0).close_count(), 0);
    let close_cmds = tc.handle.commands().iter()
        .filter(|cmd| matches!(cmd, TransportCommand::CloseChannel { .. }))
        .count();
    assert_eq!(close_cmds, 1, "close must be sent only once");

    // data that arrives while the close is in flight is dropped
    tc.handle.push_event(mock::channel_data(0, b"late data"));
    mock::settle().await;
    assert!(log.get(0).received().is_empty());
    assert!(matches!(channel.send(Bytes::from_static(b"x")), Err(Error::ChannelClosed)));

    tc.handle.push_event(mock::channel_closed(0));
    mock::settle().await;
    assert_eq!(log.get(0).close_count(), 1);
}

#[tokio::test]
async fn test_remote_close_notifies_protocol() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");

    tc.handle.push_event(mock::channel_closed(0));
    mock::settle().await;
    assert_eq!(log.get(0).close_count(), 1);

    let channel = log.get(0).channel().clone();
    assert!(matches!(channel.send(Bytes::from_static(b"x")), Err(Error::ChannelClosed)));

    // closing an already closed channel does nothing
    channel.close();
    mock::settle().await;
    assert!(!tc.handle.has_close_channel(0));
}

#[tokio::test]
async fn test_connection_close() {
    let tc = mock::connected().await;
    let mut opened = 0;
    tc.handle.respond(move |cmd| match cmd {
        TransportCommand::OpenChannel { id, .. } => {
            opened += 1;
            if opened <= 3 { vec![mock::channel_opened(*id)] } else { vec![] }
        },
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    for port in [8080, 8081, 8082] {
        tc.conn.open_forward("10.0.0.5", port, log.factory(), TIMEOUT).await
            .expect("could not open channel");
    }

    // two more opens stay pending, the server never answers them
    let mut pending = Vec::new();
    for port in [9090, 9091] {
        let conn = tc.conn.clone();
        let factory = log.factory();
        pending.push(tokio::task::spawn(async move {
            conn.open_forward("10.0.0.5", port, factory, Duration::from_secs(60)).await
        }));
    }
    mock::settle().await;

    tc.conn.close();
    assert!(!tc.conn.is_authenticated());

    // every bound protocol is closed exactly once
    for i in 0..3 {
        assert_eq!(log.get(i).close_count(), 1);
    }
    // pending opens fail without building an instance
    for task in pending {
        let res = task.await.expect("open task panicked");
        assert!(matches!(res, Err(Error::ConnectionTerminated)));
    }
    assert_eq!(log.count(), 3);

    // new opens are refused right away
    let res = tc.conn.open_forward("10.0.0.5", 7070, log.factory(), TIMEOUT).await;
    assert!(matches!(res, Err(Error::ConnectionClosed)));

    mock::settle().await;
    assert!(tc.handle.has_disconnect());
    let task_res = tc.task.await.expect("connection task panicked");
    assert!(matches!(task_res, Ok(())));
}

#[tokio::test]
async fn test_transport_failure() {
    let tc = mock::connected().await;
    let mut opened = 0;
    tc.handle.respond(move |cmd| match cmd {
        TransportCommand::OpenChannel { id, .. } => {
            opened += 1;
            if opened == 1 { vec![mock::channel_opened(*id)] } else { vec![] }
        },
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");
    let pending = tokio::task::spawn({
        let conn = tc.conn.clone();
        let factory = log.factory();
        async move { conn.open_forward("10.0.0.5", 9090, factory, Duration::from_secs(60)).await }
    });
    mock::settle().await;

    tc.handle.close(Some(Error::Transport("mock transport broke")));
    let task_res = tc.task.await.expect("connection task panicked");
    assert!(matches!(task_res, Err(Error::Transport(_))));

    assert_eq!(log.get(0).close_count(), 1);
    let res = pending.await.expect("open task panicked");
    assert!(matches!(res, Err(Error::ConnectionTerminated)));
    assert!(!tc.conn.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_beats_open_timeout() {
    let tc = mock::connected().await;
    tc.handle.respond(|cmd| match cmd {
        TransportCommand::OpenChannel { .. } => vec![],
        cmd => mock::echo_responder(cmd),
    });

    let log = FactoryLog::new();
    let open_task = tokio::task::spawn({
        let conn = tc.conn.clone();
        let factory = log.factory();
        async move { conn.open_forward("10.0.0.5", 8080, factory, TIMEOUT).await }
    });
    mock::settle().await;

    tc.handle.close(None);
    let res = open_task.await.expect("open task panicked");
    assert!(matches!(res, Err(Error::ConnectionTerminated)), "the open must fail with the connection, not time out");
    assert!(matches!(tc.task.await, Ok(Ok(()))));
}

#[tokio::test]
async fn test_peer_disconnect_surfaces_reason() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");

    tc.handle.respond(|cmd| match cmd {
        TransportCommand::OpenChannel { .. } => vec![],
        cmd => mock::echo_responder(cmd),
    });
    let pending = tokio::task::spawn({
        let conn = tc.conn.clone();
        let factory = log.factory();
        async move { conn.open_forward("10.0.0.5", 9090, factory, Duration::from_secs(60)).await }
    });
    mock::settle().await;

    tc.handle.close(Some(Error::PeerDisconnected(DisconnectError::by_application())));
    let task_res = tc.task.await.expect("connection task panicked");
    match task_res {
        Err(Error::PeerDisconnected(err)) => {
            assert_eq!(err.reason_code, minato::codes::disconnect::BY_APPLICATION);
            assert_eq!(err.reason_to_str(), Some("by application"));
            assert_eq!(err.to_string(),
                "server returned error `by application` (11): \"connection closed by application\"");
        },
        res => panic!("expected PeerDisconnected, got {:?}", res),
    }

    assert_eq!(log.get(0).close_count(), 1);
    let res = pending.await.expect("open task panicked");
    assert!(matches!(res, Err(Error::ConnectionTerminated)));
    assert!(!tc.conn.is_authenticated());
}

#[tokio::test]
async fn test_data_for_unknown_channel_is_discarded() {
    let tc = mock::connected().await;
    tc.handle.push_event(mock::channel_data(99, b"stray data"));
    mock::settle().await;
    assert!(tc.conn.is_authenticated());

    // the connection is still usable
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_confirmation_for_open_channel_fails_connection() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");

    // a second confirmation for channel 0 is a protocol error
    tc.handle.push_event(mock::channel_opened(0));
    mock::settle().await;
    let task_res = tc.task.await.expect("connection task panicked");
    assert!(matches!(task_res, Err(Error::Transport(_))));

    // the bound protocol still gets its close notification
    assert_eq!(log.get(0).close_count(), 1);
    assert!(!tc.conn.is_authenticated());
}

#[tokio::test]
async fn test_rejection_for_open_channel_fails_connection() {
    let tc = mock::connected().await;
    let log = FactoryLog::new();
    tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await
        .expect("could not open channel");

    tc.handle.push_event(mock::channel_rejected(0, minato::codes::open::CONNECT_FAILED));
    mock::settle().await;
    let task_res = tc.task.await.expect("connection task panicked");
    assert!(matches!(task_res, Err(Error::Transport(_))));

    assert_eq!(log.get(0).close_count(), 1);
    assert!(!tc.conn.is_authenticated());
}

#[tokio::test]
async fn test_dropping_connection_future_closes_protocols() {
    let (mut client, handle) = mock::mock_client();
    handle.push_event(mock::key_exchanged(&mock::test_key(b"server-key")));
    handle.respond(mock::echo_responder);
    let (conn, mut conn_fut) = client
        .connect("example.com", 22, vec![mock::password_cred("alice", "password")],
            HostKeyPolicy::WarnAndAccept)
        .await
        .expect("could not establish mock connection");

    let log = FactoryLog::new();
    let _proto = tokio::select! {
        res = conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT) =>
            res.expect("could not open channel"),
        res = &mut conn_fut => panic!("connection future finished early: {:?}", res),
    };

    drop(conn_fut);
    assert_eq!(log.get(0).close_count(), 1);
    assert!(!conn.is_authenticated());
    let channel = log.get(0).channel().clone();
    assert!(matches!(channel.send(Bytes::from_static(b"x")), Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_rejected_submit_fails_connection() {
    let tc = mock::connected().await;
    tc.handle.fail_submits();

    let log = FactoryLog::new();
    let res = tc.conn.open_forward("10.0.0.5", 8080, log.factory(), TIMEOUT).await;
    assert!(matches!(res, Err(Error::ConnectionTerminated)));
    let task_res = tc.task.await.expect("connection task panicked");
    assert!(matches!(task_res, Err(Error::Transport(_))));
    assert!(!tc.conn.is_authenticated());
}
