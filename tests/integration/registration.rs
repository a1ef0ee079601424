use std::time::Duration;

use epmd_client::ClientError;
use epmd_core::message::NodeInfo;
use epmd_core::wire::{DistributionVersion, NodeType, Protocol};

use crate::*;

#[tokio::test]
async fn register_then_lookup_returns_every_field() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_node, desc) = node("foo").await;
    let desc = desc
        .with_node_type(NodeType::R4Erlang)
        .with_protocol(Protocol::Tcp)
        .with_versions(DistributionVersion::R6, DistributionVersion::R6);

    let registration = client.register(desc.clone()).await.unwrap();
    assert!(registration.creation() > 0);
    assert!(client.is_registered("foo"));

    let info = client.lookup("foo").await.unwrap();
    assert_eq!(info, NodeInfo::Found(desc));

    drop(registration);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn second_registration_of_a_name_is_refused() {
    let daemon = TestDaemon::start().await;
    let (_node, desc) = node("foo").await;
    let first = daemon.client().register(desc.clone()).await.unwrap();

    let other = daemon.client();
    let err = other
        .register(desc.clone().with_extra(&b"other"[..]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RegistrationRefused(ref n) if n == "foo"));
    assert!(!other.is_registered("foo"));

    // the first registration is untouched
    let info = other.lookup("foo").await.unwrap();
    assert_eq!(info.port(), Some(desc.port));
    assert_eq!(info.extra(), Some(&b""[..]));
    let node = daemon.registry.lookup("foo").await.unwrap();
    assert_eq!(node.creation, first.creation());

    drop(first);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn same_client_duplicate_fails_without_asking_the_daemon() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_node, desc) = node("foo").await;
    let _held = client.register(desc.clone()).await.unwrap();

    // a daemon that is gone cannot answer, so this only succeeds locally
    daemon.stop().await.unwrap();
    let err = client.register(desc).await.unwrap_err();
    assert!(matches!(err, ClientError::NameConflict(ref n) if n == "foo"));
}

#[tokio::test]
async fn concurrent_registrations_have_exactly_one_winner() {
    let daemon = TestDaemon::start().await;
    let (_node, desc) = node("x").await;

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let client = daemon.client();
            let desc = desc.clone();
            tokio::spawn(async move { client.register(desc).await })
        })
        .collect();

    let mut held = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(registration) => held.push(registration),
            Err(ClientError::RegistrationRefused(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(held.len(), 1);
    assert_eq!(refused, 15);
    assert_ne!(held[0].creation(), 0);
    assert_eq!(daemon.registry.len(), 1);

    drop(held);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn closing_the_registration_evicts_the_node() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_node, desc) = node("short").await;

    let registration = client.register(desc).await.unwrap();
    assert!(client.lookup("short").await.unwrap().is_ok());

    registration.unregister().await.unwrap();
    assert!(!client.is_registered("short"));

    let client_ref = &client;
    let gone = eventually(Duration::from_secs(2), move || async move {
        !client_ref.lookup("short").await.unwrap().is_ok()
    })
    .await;
    assert!(gone, "node still listed after its connection closed");
    assert!(client.list_nodes().await.unwrap().nodes.is_empty());

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn reregistering_after_disconnect_gets_a_new_creation() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_node, desc) = node("phoenix").await;

    let first = client.register(desc.clone()).await.unwrap();
    let first_creation = first.creation();
    drop(first);

    let mut second = None;
    for _ in 0..100 {
        match client.register(desc.clone()).await {
            Ok(registration) => {
                second = Some(registration);
                break;
            }
            Err(ClientError::RegistrationRefused(_)) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let second = second.expect("re-registration should succeed once the old connection is gone");
    assert_ne!(second.creation(), first_creation);

    drop(second);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_codes_are_echoed_back() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_node, desc) = node("future").await;
    let desc = desc
        .with_node_type(NodeType::Unknown(1))
        .with_versions(DistributionVersion::R6, DistributionVersion::Unknown(6));

    let held = client.register(desc.clone()).await.unwrap();
    let info = client.lookup("future").await.unwrap();
    assert_eq!(info.high(), Some(DistributionVersion::Unknown(6)));
    assert_eq!(info.node_type(), Some(NodeType::Unknown(1)));
    assert_eq!(info, NodeInfo::Found(desc));

    drop(held);
    daemon.stop().await.unwrap();
}
