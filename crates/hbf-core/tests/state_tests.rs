//! State coordinator tests
//!
//! Covers translation fan-out, per-node republish deduplication, the kill
//! switch and failure isolation inside a batch.

use hbf_core::{
    CoordinatorOutputs, Error, HubConfig, MqttUpdate, StateCoordinator, StateUpdate,
};
use std::collections::BTreeMap;

const CONFIG: &str = r#"{
    "mqtt": {"host": "localhost"},
    "nodes": [
        {
            "type": "dfnode",
            "topic": "/haspa/esp/1",
            "espid": "esp1",
            "mappings": {"/haspa/licht/c": 0, "/haspa/licht/w": 1, "/haspa/licht/tisch": 2}
        },
        {
            "type": "dfnode",
            "topic": "/haspa/esp/2",
            "espid": "esp2",
            "mappings": {"/haspa/licht/2/c": 0, "/haspa/licht/2/w": 1}
        },
        {
            "type": "delock",
            "topic": "/haspa/lock",
            "mappings": {"/haspa/tuer": 0}
        }
    ],
    "translation": {
        "/haspa/licht": ["/haspa/licht/c", "/haspa/licht/w"],
        "/haspa/licht/alle": ["/haspa/licht", "/haspa/licht/2/c", "/haspa/licht/2/w"],
        "/haspa/loop": ["/haspa/loop/a"],
        "/haspa/loop/a": ["/haspa/loop"]
    }
}"#;

fn setup() -> (StateCoordinator, CoordinatorOutputs) {
    let config = HubConfig::from_json_str(CONFIG).unwrap();
    StateCoordinator::from_config(&config).unwrap()
}

fn drain_mqtt(outputs: &mut CoordinatorOutputs) -> Vec<MqttUpdate> {
    let mut out = vec![];
    while let Ok(update) = outputs.mqtt_rx.try_recv() {
        out.push(update);
    }
    out
}

fn drain_ws(outputs: &mut CoordinatorOutputs) -> Vec<Vec<StateUpdate>> {
    let mut out = vec![];
    while let Ok(batch) = outputs.ws_rx.try_recv() {
        out.push(batch);
    }
    out
}

#[tokio::test]
async fn test_virtual_topic_fans_out_to_both_channels() {
    let (coordinator, mut outputs) = setup();

    let summary = coordinator.update_topic("/haspa/licht", 1023).await;
    assert_eq!(summary.republished, 1);
    assert_eq!(summary.state_updates, 2);

    let mqtt = drain_mqtt(&mut outputs);
    assert_eq!(
        mqtt,
        vec![MqttUpdate::new(
            "/haspa/esp/1",
            r#"{"esp1":[1023,1023,0,0,0,0,0,0]}"#
        )]
    );

    let ws = drain_ws(&mut outputs);
    assert_eq!(ws.len(), 1);
    assert_eq!(
        ws[0],
        vec![
            StateUpdate::new("/haspa/licht/c", 1023),
            StateUpdate::new("/haspa/licht/w", 1023),
        ]
    );
}

#[tokio::test]
async fn test_batch_republishes_each_node_once() {
    let (coordinator, mut outputs) = setup();

    let batch = vec![
        ("/haspa/licht/c".to_string(), 1),
        ("/haspa/licht/w".to_string(), 2),
        ("/haspa/licht/tisch".to_string(), 3),
        ("/haspa/licht/c".to_string(), 4),
    ];
    let summary = coordinator.process_batch(batch).await;

    assert_eq!(summary.republished, 1);
    let mqtt = drain_mqtt(&mut outputs);
    assert_eq!(mqtt.len(), 1);
    assert_eq!(mqtt[0].payload, r#"{"esp1":[4,2,3,0,0,0,0,0]}"#);

    // One broadcast batch, last write wins per topic
    let ws = drain_ws(&mut outputs);
    assert_eq!(ws.len(), 1);
    assert_eq!(ws[0].len(), 3);
    assert!(ws[0].contains(&StateUpdate::new("/haspa/licht/c", 4)));
}

#[tokio::test]
async fn test_nested_translation_hits_several_nodes() {
    let (coordinator, mut outputs) = setup();

    coordinator.update_topic("/haspa/licht/alle", 512).await;

    let topics: Vec<String> = drain_mqtt(&mut outputs)
        .into_iter()
        .map(|m| m.topic)
        .collect();
    assert_eq!(topics, vec!["/haspa/esp/1", "/haspa/esp/2"]);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot["/haspa/licht/c"], 512);
    assert_eq!(snapshot["/haspa/licht/2/w"], 512);
    assert_eq!(snapshot["/haspa/licht/tisch"], 0);
}

#[tokio::test]
async fn test_kill_switch_turns_everything_off() {
    let (coordinator, mut outputs) = setup();

    coordinator
        .process_batch(vec![
            ("/haspa/licht/tisch", 100),
            ("/haspa/licht/2/c", 200),
            ("/haspa/tuer", 1),
        ])
        .await;
    drain_mqtt(&mut outputs);
    drain_ws(&mut outputs);

    let summary = coordinator.update_topic("/haspa/licht", 0).await;
    assert_eq!(summary.republished, 3);

    let mqtt = drain_mqtt(&mut outputs);
    assert_eq!(mqtt.len(), 3);
    assert!(mqtt.contains(&MqttUpdate::new("/haspa/lock", "OFF")));
    assert!(mqtt.contains(&MqttUpdate::new(
        "/haspa/esp/2",
        r#"{"esp2":[0,0,0,0,0,0,0,0]}"#
    )));

    assert!(coordinator.snapshot().values().all(|v| *v == 0));

    let ws = drain_ws(&mut outputs);
    assert_eq!(ws.len(), 1);
    assert_eq!(ws[0].len(), 6);
}

#[tokio::test]
async fn test_nonzero_master_value_uses_translation() {
    let (coordinator, mut outputs) = setup();

    coordinator.update_topic("/haspa/licht/tisch", 7).await;
    drain_mqtt(&mut outputs);

    coordinator.update_topic("/haspa/licht", 9).await;

    // Only the translated channels moved
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot["/haspa/licht/tisch"], 7);
    assert_eq!(snapshot["/haspa/licht/c"], 9);
    assert_eq!(drain_mqtt(&mut outputs).len(), 1);
}

#[test]
fn test_recursion_exceeded_leaves_nodes_untouched() {
    let (coordinator, _outputs) = setup();

    let result = coordinator.apply_topic_value("/haspa/loop", 1);
    assert!(matches!(result, Err(Error::RecursionExceeded { .. })));
    assert!(coordinator.snapshot().values().all(|v| *v == 0));
}

#[tokio::test]
async fn test_failing_pair_does_not_abort_batch() {
    let (coordinator, mut outputs) = setup();

    let summary = coordinator
        .process_batch(vec![("/haspa/loop", 1), ("/haspa/tuer", 1)])
        .await;

    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.republished, 1);
    assert_eq!(
        drain_mqtt(&mut outputs),
        vec![MqttUpdate::new("/haspa/lock", "ON")]
    );
}

#[tokio::test]
async fn test_batch_without_effect_announces_nothing() {
    let (coordinator, mut outputs) = setup();

    let summary = coordinator
        .process_batch(vec![("/not/configured", 5)])
        .await;

    assert_eq!(summary.republished, 0);
    assert!(drain_mqtt(&mut outputs).is_empty());
    assert!(drain_ws(&mut outputs).is_empty());
}

#[test]
fn test_latest_value_wins_per_topic() {
    let (coordinator, _outputs) = setup();

    let sequence = [
        ("/haspa/licht/c", 10),
        ("/haspa/licht", 20),
        ("/haspa/licht/w", 30),
        ("/haspa/licht/2/c", 40),
        ("/haspa/licht/alle", 50),
        ("/haspa/licht/2/w", 60),
    ];

    let mut expected: BTreeMap<String, i64> = coordinator.snapshot();
    for (topic, value) in sequence {
        let changes = coordinator.apply_topic_value(topic, value).unwrap();
        for update in changes.updates {
            expected.insert(update.topic, update.value);
        }
    }

    assert_eq!(coordinator.snapshot(), expected);
    assert_eq!(expected["/haspa/licht/c"], 50);
    assert_eq!(expected["/haspa/licht/2/w"], 60);
}
