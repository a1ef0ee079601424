use std::time::Duration;

use epmd_core::message::{KillResult, NodeInfo, StopResult};

use crate::*;

#[tokio::test]
async fn stop_under_relaxed_check_unregisters_and_hangs_up() {
    let daemon = TestDaemon::relaxed().await;
    let client = daemon.client();
    let (_n, desc) = node("n").await;
    let mut registration = client.register(desc).await.unwrap();

    assert_eq!(client.stop("n").await.unwrap(), StopResult::Stopped);
    assert_eq!(client.lookup("n").await.unwrap(), NodeInfo::NotFound);

    tokio::time::timeout(Duration::from_secs(2), registration.closed())
        .await
        .expect("stopped node's connection should be closed");

    assert_eq!(client.stop("n").await.unwrap(), StopResult::NoExist);
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn stop_and_kill_are_refused_by_default() {
    let daemon = TestDaemon::start().await;
    let client = daemon.client();
    let (_n, desc) = node("n").await;
    let _held = client.register(desc).await.unwrap();

    assert_eq!(client.stop("n").await.unwrap(), StopResult::NoExist);
    assert_eq!(client.kill().await.unwrap(), KillResult::Nok);

    // nothing changed and the daemon is still serving
    assert!(client.lookup("n").await.unwrap().is_ok());
    assert_eq!(daemon.registry.len(), 1);
    assert!(!daemon.task.is_finished());

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn kill_under_relaxed_check_clears_and_exits() {
    let daemon = TestDaemon::relaxed().await;
    let client = daemon.client();
    let (_a, a) = node("a").await;
    let (_b, b) = node("b").await;
    let mut ra = client.register(a).await.unwrap();
    let _rb = client.register(b).await.unwrap();

    assert_eq!(client.kill().await.unwrap(), KillResult::Ok);
    assert!(daemon.registry.is_empty());

    tokio::time::timeout(Duration::from_secs(2), ra.closed())
        .await
        .expect("registrations should be closed by kill");

    // the accept loop ends on its own
    tokio::time::timeout(Duration::from_secs(5), daemon.task)
        .await
        .expect("daemon should stop after kill")
        .unwrap()
        .unwrap();

    let err = client.list_nodes().await.unwrap_err();
    assert!(err.is_connection(), "{err}");
}
