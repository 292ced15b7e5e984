//! End-to-end tests driving `LockServer` over real TCP connections,
//! exercising the scenarios a FIFO named-mutex coordinator is expected
//! to satisfy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lockd::{LockConfig, LockServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

fn config(acq_timeout: Duration, hold_timeout: Duration) -> Arc<LockConfig> {
    Arc::new(LockConfig {
        listen_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        secret_key: "integration-secret".to_string(),
        acq_timeout,
        hold_timeout,
    })
}

async fn start_server(cfg: Arc<LockConfig>) -> SocketAddr {
    let server = LockServer::new(cfg);
    let (addr, _handle) = server.start().await.unwrap();
    addr
}

async fn connect_authed(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_event_with_body(&mut stream, 2, b"integration-secret").await;
    let event = read_event(&mut stream).await;
    assert_eq!(event, 6, "expected AuthOK");
    stream
}

async fn send_event_with_body(stream: &mut TcpStream, event: u8, body: &[u8]) {
    let mut buf = Vec::with_capacity(2 + body.len());
    buf.push(event);
    buf.push(body.len() as u8);
    buf.extend_from_slice(body);
    stream.write_all(&buf).await.unwrap();
}

/// `UnLock` (and every other non-`Auth`/`Lock` event) carries no body on
/// the wire; sending it with a length-prefixed payload would desync the
/// decoder, which reads those trailing bytes as the next frame's tag.
async fn send_bare_event(stream: &mut TcpStream, event: u8) {
    stream.write_all(&[event, 0]).await.unwrap();
}

async fn read_event(stream: &mut TcpStream) -> u8 {
    let mut buf = [0u8; 1];
    timeout(TEST_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for a reply event")
        .unwrap();
    // drain the reserved/length byte that follows every event
    let mut trailer = [0u8; 1];
    let _ = timeout(Duration::from_millis(50), stream.read_exact(&mut trailer)).await;
    buf[0]
}

const LOCK: u8 = 3;
const UNLOCK: u8 = 4;
const LOCK_OK: u8 = 9;
const LOCK_FAIL: u8 = 10;
const ALREADY_LOCKED: u8 = 11;
const UNLOCK_OK: u8 = 12;
const NO_SUCH_LOCK: u8 = 13;

#[tokio::test]
async fn solo_client_acquires_and_releases() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut client = connect_authed(addr).await;

    send_event_with_body(&mut client, LOCK, b"alpha").await;
    assert_eq!(read_event(&mut client).await, LOCK_OK);

    send_bare_event(&mut client, UNLOCK).await;
    assert_eq!(read_event(&mut client).await, UNLOCK_OK);
}

#[tokio::test]
async fn second_acquirer_waits_then_gets_fifo_handoff() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut first = connect_authed(addr).await;
    let mut second = connect_authed(addr).await;

    send_event_with_body(&mut first, LOCK, b"beta").await;
    assert_eq!(read_event(&mut first).await, LOCK_OK);

    send_event_with_body(&mut second, LOCK, b"beta").await;

    // second is now queued behind first; releasing first should hand off.
    send_bare_event(&mut first, UNLOCK).await;
    assert_eq!(read_event(&mut first).await, UNLOCK_OK);
    assert_eq!(read_event(&mut second).await, LOCK_OK);
}

#[tokio::test]
async fn acquisition_times_out_when_holder_never_releases() {
    // The holder's own deadline (30s) outlasts this test; only the waiter's
    // much shorter acquisition deadline (200ms) should fire, and since it
    // was never promoted to holder, that's a LockFail, not an OperateTimeout.
    let addr = start_server(config(Duration::from_millis(200), Duration::from_secs(30))).await;
    let mut first = connect_authed(addr).await;
    let mut second = connect_authed(addr).await;

    send_event_with_body(&mut first, LOCK, b"gamma").await;
    assert_eq!(read_event(&mut first).await, LOCK_OK);

    send_event_with_body(&mut second, LOCK, b"gamma").await;
    let event = timeout(Duration::from_secs(1), read_event(&mut second))
        .await
        .expect("expected the waiter to time out");
    assert_eq!(event, LOCK_FAIL);
}

#[tokio::test]
async fn holder_timeout_promotes_successor() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_millis(200))).await;
    let mut first = connect_authed(addr).await;
    let mut second = connect_authed(addr).await;

    send_event_with_body(&mut first, LOCK, b"delta").await;
    assert_eq!(read_event(&mut first).await, LOCK_OK);

    send_event_with_body(&mut second, LOCK, b"delta").await;

    // first never releases; its hold timeout expires and second is promoted.
    let event = timeout(Duration::from_secs(2), read_event(&mut second))
        .await
        .expect("expected promotion after the holder's timeout");
    assert_eq!(event, LOCK_OK);
}

#[tokio::test]
async fn duplicate_acquire_of_held_lock_is_rejected() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut client = connect_authed(addr).await;

    send_event_with_body(&mut client, LOCK, b"epsilon").await;
    assert_eq!(read_event(&mut client).await, LOCK_OK);

    send_event_with_body(&mut client, LOCK, b"epsilon").await;
    assert_eq!(read_event(&mut client).await, ALREADY_LOCKED);
}

#[tokio::test]
async fn unlock_of_lock_never_acquired_is_rejected() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut client = connect_authed(addr).await;

    send_bare_event(&mut client, UNLOCK).await;
    assert_eq!(read_event(&mut client).await, NO_SUCH_LOCK);
}

#[tokio::test]
async fn disconnect_while_holding_releases_to_next_waiter() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut first = connect_authed(addr).await;
    let mut second = connect_authed(addr).await;

    send_event_with_body(&mut first, LOCK, b"eta").await;
    assert_eq!(read_event(&mut first).await, LOCK_OK);

    send_event_with_body(&mut second, LOCK, b"eta").await;

    drop(first);

    let event = timeout(Duration::from_secs(1), read_event(&mut second))
        .await
        .expect("expected promotion after holder disconnect");
    assert_eq!(event, LOCK_OK);
}

#[tokio::test]
async fn wrong_secret_is_refused_before_any_lock_operation() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_event_with_body(&mut stream, 2, b"not-the-secret").await;
    assert_eq!(read_event(&mut stream).await, 7 /* AuthFail */);
}

#[tokio::test]
async fn unlock_by_queued_non_holder_is_a_no_op_not_a_discard() {
    let addr = start_server(config(Duration::from_secs(5), Duration::from_secs(5))).await;
    let mut first = connect_authed(addr).await;
    let mut second = connect_authed(addr).await;

    send_event_with_body(&mut first, LOCK, b"theta").await;
    assert_eq!(read_event(&mut first).await, LOCK_OK);

    send_event_with_body(&mut second, LOCK, b"theta").await;

    // second is queued, not yet holder. A voluntary UnLock here is a
    // spurious release per spec.md §4.3 (identity != holder, not a
    // discard) -- it must not reply and must not drop second from the
    // queue, unlike a timeout or disconnect.
    send_bare_event(&mut second, UNLOCK).await;
    let no_reply = timeout(Duration::from_millis(200), read_event(&mut second)).await;
    assert!(no_reply.is_err(), "spurious UnLock from a queued waiter must not reply");

    // first releases; second, still queued, should be promoted normally.
    send_bare_event(&mut first, UNLOCK).await;
    assert_eq!(read_event(&mut first).await, UNLOCK_OK);
    let event = timeout(Duration::from_secs(1), read_event(&mut second))
        .await
        .expect("expected second to still be promoted after its spurious unlock");
    assert_eq!(event, LOCK_OK);
}
