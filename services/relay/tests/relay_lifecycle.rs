//! Relay lifecycle integration tests: fidelity, fail-fast teardown,
//! stale-session eviction, and dial-failure isolation.


use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::timeout;

use harness::{DroppingUpstream, EchoUpstream, RelayHandle, TEST_IDENTITY, TEST_PSK};
use pskgate_transport::connect;

#[tokio::test]
async fn relay_preserves_bytes_in_order() {
    let upstream = EchoUpstream::spawn().await.unwrap();
    let relay = RelayHandle::spawn(upstream.addr).await.unwrap();

    let session = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK)
        .await
        .unwrap();
    let (mut read, mut write) = session.into_split();

    // A short message and a multi-record payload, echoed back in order.
    let big: Vec<u8> = (0..100_000u32).map(|i| (i % 239) as u8).collect();

    write.write_record(b"hello upstream").await.unwrap();
    write.write_record(&big).await.unwrap();

    let mut echoed = Vec::new();
    let expected_len = b"hello upstream".len() + big.len();
    while echoed.len() < expected_len {
        let chunk = timeout(Duration::from_secs(5), read.read_record())
            .await
            .expect("echo arrives in time")
            .unwrap()
            .expect("stream stays open");
        echoed.extend_from_slice(&chunk);
    }

    let mut expected = b"hello upstream".to_vec();
    expected.extend_from_slice(&big);
    assert_eq!(echoed, expected);

    assert_eq!(upstream.connection_count(), 1);
    assert_eq!(relay.stats.sessions_accepted.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn upstream_close_tears_down_session() {
    let mut upstream = DroppingUpstream::spawn().await.unwrap();
    let relay = RelayHandle::spawn(upstream.addr).await.unwrap();

    let session = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK)
        .await
        .unwrap();
    let (mut read, mut write) = session.into_split();

    write.write_record(b"first").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    upstream.drop_connection();

    // Fail-fast: the secure leg must be closed promptly, with nothing
    // further forwarded.
    let result = timeout(Duration::from_secs(2), read.read_record())
        .await
        .expect("teardown is prompt");
    match result {
        Ok(None) | Err(_) => {}
        Ok(Some(data)) => panic!("unexpected data after upstream close: {data:?}"),
    }

    // The registry entry is removed once the relay finishes.
    timeout(Duration::from_secs(2), async {
        while !relay.registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry drains");
}

#[tokio::test]
async fn reconnect_evicts_stale_session() {
    let upstream = EchoUpstream::spawn().await.unwrap();
    let relay = RelayHandle::spawn(upstream.addr).await.unwrap();

    let first = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK)
        .await
        .unwrap();
    let (mut first_read, mut first_write) = first.into_split();

    // Prove the first session relays.
    first_write.write_record(b"ping").await.unwrap();
    let echoed = timeout(Duration::from_secs(2), first_read.read_record())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, b"ping");

    // Same identity reconnects: the first session must be evicted.
    let second = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK)
        .await
        .unwrap();
    let (mut second_read, mut second_write) = second.into_split();

    let result = timeout(Duration::from_secs(2), first_read.read_record())
        .await
        .expect("evicted session closes promptly");
    match result {
        Ok(None) | Err(_) => {}
        Ok(Some(data)) => panic!("unexpected data on evicted session: {data:?}"),
    }

    // The second session relays normally.
    second_write.write_record(b"pong").await.unwrap();
    let echoed = timeout(Duration::from_secs(2), second_read.read_record())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, b"pong");

    assert_eq!(relay.registry.len().await, 1);
    assert_eq!(relay.stats.sessions_evicted.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn dial_failure_closes_session_but_not_process() {
    // Bind then drop a listener so the port is (very likely) closed.
    let closed_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let relay = RelayHandle::spawn(closed_addr).await.unwrap();

    // Handshake succeeds (key resolution is independent of the upstream),
    // then the session is closed because the dial fails.
    let session = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK)
        .await
        .unwrap();
    let (mut read, _write) = session.into_split();

    let result = timeout(Duration::from_secs(3), read.read_record())
        .await
        .expect("session closes after dial failure");
    assert!(matches!(result, Ok(None) | Err(_)));

    // The relay keeps serving: a second handshake still completes.
    let second = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK).await;
    assert!(second.is_ok());

    timeout(Duration::from_secs(2), async {
        while relay.stats.dial_failures.load(Ordering::Relaxed) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both dial failures recorded");

    assert!(relay.registry.is_empty().await);
}

#[tokio::test]
async fn shutdown_cancels_running_relays() {
    let upstream = EchoUpstream::spawn().await.unwrap();
    let relay = RelayHandle::spawn(upstream.addr).await.unwrap();

    let session = connect(relay.listen_addr, TEST_IDENTITY, TEST_PSK)
        .await
        .unwrap();
    let (mut read, mut write) = session.into_split();

    write.write_record(b"ping").await.unwrap();
    let echoed = timeout(Duration::from_secs(2), read.read_record())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(echoed, b"ping");

    relay.shutdown.cancel();

    let result = timeout(Duration::from_secs(2), read.read_record())
        .await
        .expect("relay closes on shutdown");
    assert!(matches!(result, Ok(None) | Err(_)));
}
