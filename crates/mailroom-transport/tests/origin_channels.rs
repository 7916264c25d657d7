//! Integration tests for cross-tab channels.
//!
//! Each test opens several tabs on one in-process origin and checks what
//! the *other* tabs observe, since a tab never hears its own messages.

use std::time::Duration;

use mailroom_transport::{
    DurableStorage, Origin, StorageEventChannel, SyncChannel,
};

const WAIT: Duration = Duration::from_secs(1);

async fn recv_within<C: SyncChannel>(channel: &C) -> Option<Vec<u8>> {
    tokio::time::timeout(WAIT, channel.recv())
        .await
        .expect("message should arrive in time")
        .expect("recv should not error")
}

#[tokio::test]
async fn test_broadcast_reaches_other_tabs_but_not_sender() {
    let origin = Origin::new("https://mail.test");
    let a = origin.open_tab().broadcast_channel("auth").unwrap();
    let b = origin.open_tab().broadcast_channel("auth").unwrap();
    let c = origin.open_tab().broadcast_channel("auth").unwrap();

    a.post(b"hello").unwrap();

    assert_eq!(recv_within(&b).await.as_deref(), Some(&b"hello"[..]));
    assert_eq!(recv_within(&c).await.as_deref(), Some(&b"hello"[..]));

    // The sender's own queue holds the frame, but recv filters it out.
    let own = tokio::time::timeout(Duration::from_millis(50), a.recv()).await;
    assert!(own.is_err(), "sender must not receive its own message");
}

#[tokio::test]
async fn test_broadcast_channels_are_isolated_by_name() {
    let origin = Origin::new("https://mail.test");
    let a = origin.open_tab().broadcast_channel("auth").unwrap();
    let other = origin.open_tab().broadcast_channel("theme").unwrap();

    a.post(b"x").unwrap();

    let result =
        tokio::time::timeout(Duration::from_millis(50), other.recv()).await;
    assert!(result.is_err(), "a different channel name must not see it");
}

#[tokio::test]
async fn test_broadcast_does_not_cross_origins() {
    let mail = Origin::new("https://mail.test");
    let evil = Origin::new("https://evil.test");
    let a = mail.open_tab().broadcast_channel("auth").unwrap();
    let spy = evil.open_tab().broadcast_channel("auth").unwrap();

    a.post(b"secret").unwrap();

    let result =
        tokio::time::timeout(Duration::from_millis(50), spy.recv()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_storage_channel_delivers_and_leaves_no_key_behind() {
    let origin = Origin::without_broadcast("https://old.test");
    let tab_a = origin.open_tab();
    let tab_b = origin.open_tab();
    let a = StorageEventChannel::new(tab_a.local_storage(), "sync");
    let b = StorageEventChannel::new(tab_b.local_storage(), "sync");

    a.post(br#"{"type":"LOGOUT"}"#).unwrap();

    assert_eq!(
        recv_within(&b).await.as_deref(),
        Some(&br#"{"type":"LOGOUT"}"#[..])
    );
    // Write-then-remove: the transient key is already gone.
    assert_eq!(tab_b.local_storage().get("sync"), None);
}

#[tokio::test]
async fn test_storage_channel_repeated_message_fires_each_time() {
    // The same payload twice still registers as two changes because the
    // key is removed in between.
    let origin = Origin::without_broadcast("https://old.test");
    let a = StorageEventChannel::new(origin.open_tab().local_storage(), "k");
    let b = StorageEventChannel::new(origin.open_tab().local_storage(), "k");

    a.post(b"same").unwrap();
    a.post(b"same").unwrap();

    assert_eq!(recv_within(&b).await.as_deref(), Some(&b"same"[..]));
    assert_eq!(recv_within(&b).await.as_deref(), Some(&b"same"[..]));
}

#[tokio::test]
async fn test_storage_channel_ignores_unrelated_keys() {
    let origin = Origin::without_broadcast("https://old.test");
    let tab_a = origin.open_tab();
    let b = StorageEventChannel::new(origin.open_tab().local_storage(), "k");

    tab_a.local_storage().set("theme", "dark").unwrap();
    StorageEventChannel::new(tab_a.local_storage(), "k")
        .post(b"msg")
        .unwrap();

    assert_eq!(recv_within(&b).await.as_deref(), Some(&b"msg"[..]));
}

#[tokio::test]
async fn test_storage_channel_rejects_binary_payload() {
    let origin = Origin::without_broadcast("https://old.test");
    let a = StorageEventChannel::new(origin.open_tab().local_storage(), "k");
    assert!(a.post(&[0xff, 0xfe]).is_err());
}

#[tokio::test]
async fn test_close_wakes_pending_recv() {
    let origin = Origin::new("https://mail.test");
    let port = std::sync::Arc::new(
        origin.open_tab().broadcast_channel("auth").unwrap(),
    );

    let waiter = {
        let port = std::sync::Arc::clone(&port);
        tokio::spawn(async move { port.recv().await })
    };
    tokio::task::yield_now().await;
    port.close();

    let result = tokio::time::timeout(WAIT, waiter)
        .await
        .expect("recv should wake up")
        .expect("task should not panic")
        .expect("recv should not error");
    assert!(result.is_none());
}
