//! Connection lifecycle: handshake, failover, resume and teardown.

mod common;

use common::{
    ack, connect, connect_with, event, eventually, recorder, resumed_welcome, welcome, within,
    Collector, Events, URL,
};
use relay_link::{
    op, Completion, ConnectionOptions, ConnectionState, Envelope, EventHandlers, MemoryConnector,
    MemoryServer, Message, RelayLinkError, SubscriptionOptions,
};
use serde_json::json;
use std::time::Duration;

fn ops(server: &MemoryServer, code: u16) -> Vec<Envelope> {
    server.envelopes().into_iter().filter(|e| e.op == code).collect()
}

#[tokio::test]
async fn test_handshake_negotiates_session() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 4096));
    let events = Events::new();
    let options = ConnectionOptions::default()
        .with_credentials("alice", "secret")
        .with_max_pending_acks(64)
        .with_extra("region", "eu-west");
    let connection = connect_with(&connector, &[URL], options, events.handlers())
        .await
        .expect("connect");
    let server = connector.latest().expect("server");

    let login = within(server.wait_for_op(op::LOGIN)).await;
    assert_eq!(login.username.as_deref(), Some("alice"));
    assert_eq!(login.password.as_deref(), Some("secret"));
    assert_eq!(login.qos, Some(true));
    assert_eq!(login.max_pending_acks, Some(64));
    assert_eq!(login.id_token, None);
    assert_eq!(login.extra.get("region"), Some(&json!("eu-west")));

    let session = connection.session();
    assert_eq!(session.client_id.as_deref(), Some("client-1"));
    assert_eq!(session.reconnect_token.as_deref(), Some("token-1"));
    assert_eq!((session.protocol, session.qos, session.max_size), (1, true, 4096));
    assert!(!session.resumed);

    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(events.connects(), 1);
    assert_eq!(events.reconnects(), 0);
    assert_eq!(
        *events.states.lock(),
        vec![
            (ConnectionState::Init, ConnectionState::Connecting),
            (ConnectionState::Connecting, ConnectionState::Connected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_url_failover_then_backoff() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    connector.refuse_next(3);
    let connection = connect_with(
        &connector,
        &["ws://a.test", "ws://b.test", "ws://c.test"],
        ConnectionOptions::default(),
        EventHandlers::new(),
    )
    .await
    .expect("connect");

    let order = connection.urls();
    let attempts = connector.attempts();
    let urls: Vec<&str> = attempts.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(urls, vec![order[0].as_str(), order[1].as_str(), order[2].as_str(), order[0].as_str()]);
    let accepted: Vec<bool> = attempts.iter().map(|a| a.accepted).collect();
    assert_eq!(accepted, vec![false, false, false, true]);

    // Untried URLs are attempted back to back; only the wrap backs off.
    assert_eq!(attempts[2].at - attempts[0].at, Duration::ZERO);
    let backoff = attempts[3].at - attempts[2].at;
    assert!(backoff >= Duration::from_secs(1), "backoff {:?}", backoff);
    assert!(backoff < Duration::from_secs(3), "backoff {:?}", backoff);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_budget_exhaustion_is_fatal() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    connector.refuse_next(100);
    let events = Events::new();
    let options = ConnectionOptions::default().with_auto_reconnect_attempts(2);

    let result = connect_with(&connector, &[URL], options, events.handlers()).await;
    assert!(matches!(result, Err(RelayLinkError::ConnectionClosed { .. })));
    assert_eq!(connector.attempts().len(), 3);

    let errors = events.errors.lock().clone();
    assert!(errors.iter().any(|e| !e.recoverable && e.message.contains("Max reconnection attempts")));
    assert_eq!(events.disconnects.lock().len(), 1);
    assert_eq!(
        events.states.lock().last().copied(),
        Some((ConnectionState::Connecting, ConnectionState::Disconnected))
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_welcome_fails_login() {
    let connector = MemoryConnector::new();
    let options = ConnectionOptions::default().with_auto_reconnect_attempts(0);

    let result = connect_with(&connector, &[URL], options, EventHandlers::new()).await;
    match result {
        Err(RelayLinkError::ConnectionClosed { reason, .. }) => assert!(reason.contains("WELCOME")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    let server = connector.latest().expect("server");
    assert_eq!(server.written_ops(), vec![op::LOGIN]);
}

#[tokio::test]
async fn test_resume_resends_pending_in_seq_order() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");
    let first = connector.latest().expect("server");

    let listener = Collector::new();
    let sub = connection
        .subscribe(None, Some("orders"), SubscriptionOptions::default(), listener.clone())
        .expect("subscribe");
    first.send(&event(sub, 5, json!("seen")));
    eventually(|| ops(&first, op::ACK).len() == 1).await;

    let (callback, outcomes) = recorder();
    for n in 0..3 {
        connection
            .publish(Message::new(json!(n)), Some(callback.clone()))
            .expect("publish");
    }
    eventually(|| ops(&first, op::MESSAGE).len() == 3).await;
    first.send(&ack(2));
    eventually(|| outcomes.lock().len() == 1).await;

    connector.set_welcome(Some(resumed_welcome(true)));
    first.close(1006, "network lost");

    let second = within(connector.wait_for_server(2)).await;
    let login = within(second.wait_for_op(op::LOGIN)).await;
    assert_eq!(login.id_token.as_deref(), Some("token-1"));
    assert_eq!(login.client_id.as_deref(), Some("client-1"));

    eventually(|| ops(&second, op::MESSAGE).len() == 2).await;
    assert_eq!(
        second.written_ops(),
        vec![op::LOGIN, op::SUBSCRIBE, op::MESSAGE, op::MESSAGE]
    );
    let resent: Vec<Option<u64>> = ops(&second, op::MESSAGE).iter().map(|e| e.seq).collect();
    assert_eq!(resent, vec![Some(1), Some(3)]);
    let resubscribe = &ops(&second, op::SUBSCRIBE)[0];
    assert_eq!((resubscribe.id, resubscribe.seq), (Some(sub), Some(5)));

    eventually(|| events.reconnects() == 1).await;
    assert_eq!(events.connects(), 1);
    assert!(connection.session().resumed);
    assert_eq!(connection.session().reconnect_token.as_deref(), Some("token-2"));

    second.send(&ack(1));
    second.send(&ack(3));
    eventually(|| outcomes.lock().len() == 3).await;
    assert!(outcomes.lock().iter().all(|o| matches!(o, Ok(Completion::Published(_)))));
    assert!(connection.pending_requests().is_empty());
}

#[tokio::test]
async fn test_fresh_session_fails_pending_and_resets_subscriptions() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let connection = connect(&connector).await;
    let first = connector.latest().expect("server");

    let listener = Collector::new();
    let sub = connection
        .subscribe(None, None, SubscriptionOptions::default(), listener.clone())
        .expect("subscribe");
    first.send(&event(sub, 5, json!("seen")));
    eventually(|| ops(&first, op::ACK).len() == 1).await;

    let (callback, outcomes) = recorder();
    connection.publish(Message::new(json!("lost")), Some(callback)).expect("publish");
    eventually(|| ops(&first, op::MESSAGE).len() == 1).await;

    first.close(1006, "network lost");
    let second = within(connector.wait_for_server(2)).await;

    eventually(|| outcomes.lock().len() == 1).await;
    assert!(matches!(&outcomes.lock()[0], Err(RelayLinkError::ConnectionClosed { .. })));
    assert!(connection.pending_requests().is_empty());

    let resubscribe = within(second.wait_for_op(op::SUBSCRIBE)).await;
    assert_eq!((resubscribe.id, resubscribe.seq), (Some(sub), None));
    assert_eq!(connection.subscriptions()[0].last_seq, 0);
    assert!(ops(&second, op::MESSAGE).is_empty());

    // The server starts counting again; low sequence numbers are new.
    second.send(&event(sub, 1, json!("fresh")));
    eventually(|| listener.message_count() == 2).await;
}

#[tokio::test]
async fn test_service_restart_always_reconnects() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let options = ConnectionOptions::default().with_auto_reconnect_attempts(0);
    let connection = connect_with(&connector, &[URL], options, events.handlers())
        .await
        .expect("connect");

    connector.latest().expect("server").close(1012, "restarting");
    within(connector.wait_for_server(2)).await;
    eventually(|| events.reconnects() == 1).await;
    assert!(connection.is_connected());
    assert!(events.disconnects.lock().is_empty());
}

#[tokio::test]
async fn test_lost_connection_without_budget_tears_down() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let options = ConnectionOptions::default().with_auto_reconnect_attempts(0);
    let connection = connect_with(&connector, &[URL], options, events.handlers())
        .await
        .expect("connect");

    connector.latest().expect("server").close(1006, "gone");
    eventually(|| connection.state() == ConnectionState::Disconnected).await;

    let disconnects = events.disconnects.lock().clone();
    assert_eq!(disconnects.len(), 1);
    assert_eq!(disconnects[0].code, Some(1006));
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test]
async fn test_goodbye_tears_down_and_fails_pending() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");
    let server = connector.latest().expect("server");

    let (callback, outcomes) = recorder();
    connection.publish(Message::new(json!("late")), Some(callback)).expect("publish");
    within(server.wait_for_op(op::MESSAGE)).await;

    server.send(&Envelope {
        err: Some(4000),
        reason: Some("maintenance".to_string()),
        ..Envelope::new(op::GOODBYE)
    });
    eventually(|| connection.state() == ConnectionState::Disconnected).await;

    assert!(matches!(
        &outcomes.lock()[0],
        Err(RelayLinkError::ConnectionClosed { code: Some(4000), reason }) if reason == "maintenance"
    ));
    let disconnects = events.disconnects.lock().clone();
    assert_eq!(disconnects.len(), 1);
    assert_eq!(disconnects[0].code, Some(4000));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test]
async fn test_graceful_disconnect_then_reconnect() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");
    let server = connector.latest().expect("server");

    let (callback, outcomes) = recorder();
    connection.publish(Message::new(json!("unacked")), Some(callback)).expect("publish");
    connection.disconnect();
    connection.disconnect();
    assert_eq!(connection.state(), ConnectionState::Disconnecting);

    eventually(|| !events.disconnects.lock().is_empty()).await;
    assert_eq!(server.written_ops(), vec![op::LOGIN, op::MESSAGE, op::DISCONNECT]);
    assert_eq!(server.client_close(), Some((1000, "client disconnect".to_string())));
    assert_eq!(events.disconnects.lock()[0].code, Some(1000));
    assert!(matches!(
        &outcomes.lock()[0],
        Err(RelayLinkError::ConnectionClosed { code: Some(1000), .. })
    ));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(
        events.states.lock()[2..].to_vec(),
        vec![
            (ConnectionState::Connected, ConnectionState::Disconnecting),
            (ConnectionState::Disconnecting, ConnectionState::Disconnected),
        ]
    );

    within(connection.reconnect()).await.expect("reconnect");
    assert!(connection.is_connected());
    assert_eq!(connector.servers().len(), 2);
    assert_eq!(events.reconnects(), 1);

    // Reconnecting a live connection is a no-op.
    within(connection.reconnect()).await.expect("reconnect");
    assert_eq!(connector.attempts().len(), 2);
}

#[tokio::test]
async fn test_concurrent_reconnects_share_one_attempt() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");

    connection.disconnect();
    eventually(|| connection.state() == ConnectionState::Disconnected).await;

    let (first, second) = within(async { tokio::join!(connection.reconnect(), connection.reconnect()) }).await;
    first.expect("first reconnect");
    second.expect("second reconnect");
    assert!(connection.is_connected());
    assert_eq!(connector.attempts().len(), 2);
    assert_eq!(events.reconnects(), 1);
}

#[tokio::test]
async fn test_goodbye_code_outside_close_range_is_kept_in_reason() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");
    let server = connector.latest().expect("server");

    server.send(&Envelope {
        err: Some(70000),
        reason: Some("evicted".to_string()),
        ..Envelope::new(op::GOODBYE)
    });
    eventually(|| !events.disconnects.lock().is_empty()).await;

    let disconnect = events.disconnects.lock()[0].clone();
    assert_eq!(disconnect.code, None);
    assert_eq!(disconnect.message, "evicted (code 70000)");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_force_disconnect_triggers_reconnect() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");
    let first = connector.latest().expect("server");

    connection.force_disconnect();
    within(first.wait_closed()).await;
    assert!(ops(&first, op::DISCONNECT).is_empty());

    within(connector.wait_for_server(2)).await;
    eventually(|| events.reconnects() == 1).await;
    assert!(connection.is_connected());
    assert!(events
        .states
        .lock()
        .contains(&(ConnectionState::Connected, ConnectionState::Reconnecting)));
}

#[tokio::test]
async fn test_heartbeat_echo_and_server_errors() {
    let connector = MemoryConnector::new().with_welcome(welcome(true, 0));
    let events = Events::new();
    let connection = connect_with(&connector, &[URL], ConnectionOptions::default(), events.handlers())
        .await
        .expect("connect");
    let server = connector.latest().expect("server");

    server.send_text(r#"{"op":0}"#);
    within(server.wait_for_op(op::HEARTBEAT)).await;

    server.send_text("this is not an envelope");
    server.send(&Envelope {
        err: Some(42),
        reason: Some("quota exceeded".to_string()),
        ..Envelope::new(op::ERROR)
    });
    eventually(|| !events.errors.lock().is_empty()).await;

    let error = events.errors.lock()[0].clone();
    assert_eq!(error.code, Some(42));
    assert_eq!(error.message, "quota exceeded");
    assert!(connection.is_connected());
}
