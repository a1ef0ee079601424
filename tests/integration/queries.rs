use std::time::Duration;

use epmd_core::message::{
    DumpState, GetEpmdInfo, NamedPort, NodeInfo, RequestMessage, ResponseMessage,
};
use epmd_core::EpmdInfo;

use crate::*;

#[tokio::test]
async fn names_lists_every_node_with_the_daemon_port() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_a, a) = node("a").await;
    let (_b, b) = node("b").await;
    let (a_port, b_port) = (a.port, b.port);
    let _ra = client.register(a).await.unwrap();
    let _rb = client.register(b).await.unwrap();

    let info = client.list_nodes().await.unwrap();
    assert_eq!(info.port, u32::from(daemon.addr.port()));
    let mut nodes = info.nodes.clone();
    nodes.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(
        nodes,
        vec![
            NamedPort {
                name: "a".into(),
                port: a_port
            },
            NamedPort {
                name: "b".into(),
                port: b_port
            },
        ]
    );

    // byte layout as sent by the daemon
    let raw = raw_exchange(daemon.addr, &GetEpmdInfo.encode().unwrap())
        .await
        .unwrap();
    assert_eq!(&raw[..4], &u32::from(daemon.addr.port()).to_be_bytes());
    let text = String::from_utf8(raw[4..].to_vec()).unwrap();
    let mut lines: Vec<&str> = text.split('\n').collect();
    lines.sort();
    assert_eq!(
        lines,
        vec![
            format!("name a at port {a_port}"),
            format!("name b at port {b_port}"),
        ]
    );

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn empty_registry_lists_nothing() {
    let daemon = TestDaemon::start().await;
    let raw = raw_exchange(daemon.addr, &GetEpmdInfo.encode().unwrap())
        .await
        .unwrap();
    assert_eq!(raw.len(), 4);
    let info = EpmdInfo::decode(&raw).unwrap();
    assert!(info.nodes.is_empty());
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn lookup_of_unknown_name_is_not_found() {
    let daemon = TestDaemon::start().await;
    let info = daemon.client().lookup("nobody").await.unwrap();
    assert_eq!(info, NodeInfo::NotFound);
    assert_eq!(info.port(), None);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn unreachable_node_is_evicted_on_lookup() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (listener, desc) = node("zombie").await;
    let registration = client.register(desc).await.unwrap();
    assert!(client.lookup("zombie").await.unwrap().is_ok());

    // the node stops accepting but its registration connection stays up
    drop(listener);
    assert_eq!(client.lookup("zombie").await.unwrap(), NodeInfo::NotFound);
    assert!(daemon.registry.is_empty());

    // eviction hangs up on the node
    let mut registration = registration;
    tokio::time::timeout(Duration::from_secs(2), registration.closed())
        .await
        .expect("daemon should close the evicted node's connection");

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn dump_shows_active_and_old_registrations() {
    let daemon = TestDaemon::relaxed().await;
    let client = daemon.client();
    let (_live, live) = node("live").await;
    let (_dead, dead) = node("dead").await;
    let _held = client.register(live).await.unwrap();
    let _gone = client.register(dead).await.unwrap();
    assert_eq!(
        client.stop("dead").await.unwrap(),
        epmd_core::StopResult::Stopped
    );

    let dump = client.dump().await.unwrap();
    assert_eq!(dump.port, u32::from(daemon.addr.port()));
    let active: Vec<_> = dump
        .entries
        .iter()
        .filter(|e| e.state == DumpState::Active)
        .map(|e| e.name.as_str())
        .collect();
    let old: Vec<_> = dump
        .entries
        .iter()
        .filter(|e| e.state == DumpState::OldUnused)
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(active, vec!["live"]);
    assert_eq!(old, vec!["dead"]);
    assert!(dump.text().contains("active name\tlive at port"));

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn listing_serializes_for_json_output() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_n, desc) = node("json").await;
    let port = desc.port;
    let _held = client.register(desc).await.unwrap();

    let info = client.list_nodes().await.unwrap();
    let value = serde_json::to_value(&info).unwrap();
    assert_eq!(value["nodes"][0]["name"], "json");
    assert_eq!(value["nodes"][0]["port"], port);

    daemon.stop().await.unwrap();
}
