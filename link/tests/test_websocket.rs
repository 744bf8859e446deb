//! WebSocket transport against a local tokio-tungstenite server.

mod common;

use common::{init_logging, recorder, welcome, within};
use futures_util::{SinkExt, Stream, StreamExt};
use relay_link::{op, Completion, Connection, ConnectionOptions, ConnectionState, Envelope, Message};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn next_envelope<S>(ws: &mut S) -> Envelope
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await.expect("client frame").expect("read") {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).expect("envelope"),
            WsMessage::Close(_) => panic!("client closed early"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_websocket_round_trip() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");

        let login = next_envelope(&mut ws).await;
        assert_eq!(login.op, op::LOGIN);
        let text = serde_json::to_string(&welcome(true, 0)).expect("encode");
        ws.send(WsMessage::Text(text.into())).await.expect("welcome");

        let published = next_envelope(&mut ws).await;
        assert_eq!(published.op, op::MESSAGE);
        let ack = Envelope {
            seq: published.seq,
            ..Envelope::new(op::ACK)
        };
        // Binary frames carry the same envelope text.
        let bytes = serde_json::to_vec(&ack).expect("encode");
        ws.send(WsMessage::Binary(bytes.into())).await.expect("ack");

        let goodbye = next_envelope(&mut ws).await;
        assert_eq!(goodbye.op, op::DISCONNECT);
    });

    // http:// is mapped to ws://
    let connection = within(Connection::connect([format!("http://{}", addr)], ConnectionOptions::default()))
        .await
        .expect("connect");
    assert_eq!(connection.session().client_id.as_deref(), Some("client-1"));

    let (callback, outcomes) = recorder();
    connection
        .publish(Message::new(json!({ "over": "websocket" })), Some(callback))
        .expect("publish");
    common::eventually(|| outcomes.lock().len() == 1).await;
    assert!(matches!(&outcomes.lock()[0], Ok(Completion::Published(_))));

    connection.disconnect();
    within(server).await.expect("server task");
    common::eventually(|| connection.state() == ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_websocket_refused_connection_fails() {
    init_logging();
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr")
    };

    let options = ConnectionOptions::default().with_auto_reconnect_attempts(0);
    let result = within(Connection::connect([format!("ws://{}", addr)], options)).await;
    assert!(matches!(result, Err(relay_link::RelayLinkError::ConnectionClosed { .. })));
}
