use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use epmd_core::config::ClientConfig;
use epmd_core::message::{GetEpmdInfo, NodeDescription, NodeInfo, RequestMessage};
use epmd_services::SessionHandle;

use crate::*;

#[tokio::test]
async fn short_frame_closes_the_connection_only() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_n, desc) = node("steady").await;
    let _held = client.register(desc).await.unwrap();

    // declares 10 bytes, delivers 3
    let reply = raw_exchange(daemon.addr, &[0x00, 0x0a, 110, 1, 2])
        .await
        .unwrap();
    assert!(reply.is_empty());

    assert_eq!(daemon.registry.len(), 1);
    assert!(client.lookup("steady").await.unwrap().is_ok());
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn unsupported_tag_gets_no_answer() {
    let daemon = TestDaemon::start().await;
    for frame in [&[0x00, 0x01, 42][..], &[0x00, 0x01, 121][..], &[0x00, 0x00][..]] {
        let reply = raw_exchange(daemon.addr, frame).await.unwrap();
        assert!(reply.is_empty(), "answered {frame:?} with {reply:?}");
    }
    // still accepting
    assert!(daemon.client().list_nodes().await.is_ok());
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn silent_connection_is_dropped_after_read_timeout() {
    let daemon = TestDaemon::start_with(|c| c.read_timeout_ms = 100).await;
    let mut idle = tokio::net::TcpStream::connect(daemon.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), idle.read_to_end(&mut buf))
        .await
        .expect("daemon should hang up on an idle connection");
    assert!(read.map(|n| n == 0).unwrap_or(true));
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn peer_that_never_reads_its_reply_is_dropped() {
    let daemon = TestDaemon::start_with(|c| {
        c.max_connections = 1;
        c.write_timeout_ms = 300;
    })
    .await;

    // a listing far larger than the loopback socket buffers
    let (_node, port) = fake_node().await;
    let owner = SessionHandle::new(SocketAddr::from(([127, 0, 0, 1], 0)));
    let padding = "n".repeat(60_000);
    for i in 0..400 {
        let desc = NodeDescription::new(format!("{i:03}{padding}"), port);
        daemon.registry.register(desc, owner.clone());
    }

    let mut stalled = TcpStream::connect(daemon.addr).await.unwrap();
    stalled
        .write_all(&GetEpmdInfo.encode().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the only connection slot is freed once the write gives up
    let info = tokio::time::timeout(Duration::from_secs(5), daemon.client().lookup("anything"))
        .await
        .expect("daemon stayed blocked on a peer that does not read")
        .unwrap();
    assert_eq!(info, NodeInfo::NotFound);

    drop(stalled);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn sources_outside_the_allow_list_are_turned_away() {
    let daemon = TestDaemon::start_with(|c| {
        c.allowed_addresses = vec!["192.0.2.1".parse().unwrap()];
    })
    .await;

    let reply = raw_exchange(daemon.addr, &GetEpmdInfo.encode().unwrap()).await;
    // closed without an answer, possibly reset
    assert!(reply.map(|r| r.is_empty()).unwrap_or(true));
    assert!(daemon.client().list_nodes().await.is_err());
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn wildcard_allow_list_admits_everyone() {
    let daemon = TestDaemon::start_with(|c| {
        c.allowed_addresses = vec!["0.0.0.0".parse().unwrap()];
    })
    .await;
    let info = daemon.client().lookup("none").await.unwrap();
    assert_eq!(info, NodeInfo::NotFound);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn nothing_listening_is_a_connection_error() {
    let (listener, port) = fake_node().await;
    drop(listener);
    let client = epmd_client::EpmdClient::with_addr(
        SocketAddr::from(([127, 0, 0, 1], port)),
        ClientConfig::default(),
    );
    let err = client.lookup("any").await.unwrap_err();
    assert!(err.is_connection());
}
