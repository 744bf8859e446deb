//! Key-value map operations.

mod common;

use common::{connect, eventually, recorder, welcome, within};
use relay_link::{op, Completion, Envelope, ExtendedOpCodes, MemoryConnector, RelayLinkError};
use serde_json::json;

fn map_response(seq: u64) -> Envelope {
    Envelope {
        seq: Some(seq),
        ..Envelope::new(op::MAP_RESPONSE)
    }
}

#[tokio::test]
async fn test_set_get_remove_destroy() {
    let connector = MemoryConnector::new().with_welcome(welcome(false, 0));
    let connection = connect(&connector).await;
    let server = connector.latest().expect("server");
    let map = connection.create_map("sessions");
    assert_eq!(map.name(), "sessions");

    // Map operations are sequenced even when the session runs without QoS.
    let (set_cb, set_outcomes) = recorder();
    let set_seq = map.set("alice", json!({ "node": 3 }), Some(set_cb)).expect("set");
    let set = within(server.wait_for_op(op::MAP_SET)).await;
    assert_eq!(set.seq, Some(set_seq));
    assert_eq!(set.map.as_deref(), Some("sessions"));
    assert_eq!(set.key.as_deref(), Some("alice"));
    assert_eq!(set.value, Some(json!({ "node": 3 })));

    let (get_cb, get_outcomes) = recorder();
    let get_seq = map.get("alice", get_cb).expect("get");
    let get = within(server.wait_for_op(op::MAP_GET)).await;
    assert_eq!(get.value, None);

    server.send(&map_response(set_seq));
    server.send(&Envelope {
        value: Some(json!({ "node": 3 })),
        ..map_response(get_seq)
    });
    eventually(|| set_outcomes.lock().len() == 1 && get_outcomes.lock().len() == 1).await;

    assert!(matches!(
        &set_outcomes.lock()[0],
        Ok(Completion::Map { map, key: Some(key), value: None }) if map == "sessions" && key == "alice"
    ));
    assert!(matches!(
        &get_outcomes.lock()[0],
        Ok(Completion::Map { value: Some(value), .. }) if *value == json!({ "node": 3 })
    ));

    let (remove_cb, remove_outcomes) = recorder();
    let remove_seq = map.remove("alice", Some(remove_cb)).expect("remove");
    within(server.wait_for_op(op::MAP_REMOVE)).await;
    server.send(&Envelope {
        err: Some(404),
        reason: Some("no such key".to_string()),
        ..map_response(remove_seq)
    });
    eventually(|| remove_outcomes.lock().len() == 1).await;
    assert!(matches!(
        &remove_outcomes.lock()[0],
        Err(RelayLinkError::ServerError { code: 404, .. })
    ));

    let destroy_seq = map.destroy(None).expect("destroy");
    let destroy = within(server.wait_for_op(ExtendedOpCodes::default().map_destroy)).await;
    assert_eq!(destroy.seq, Some(destroy_seq));
    assert_eq!(destroy.key, None);
    assert_eq!(connection.pending_requests(), vec![destroy_seq]);
}
