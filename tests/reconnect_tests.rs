// Tests for the reconnect policy that sits outside the session core

mod common;

use anyhow::Result;
use common::*;
use helios_voice::session::{ConnectionState, ReconnectPolicy};
use helios_voice::transport::{InboundEvent, LifecycleEvent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_remote_close() -> Result<()> {
    let transport = ChannelTransport::new();
    let clock = ManualClock::new();
    let session = Arc::new(text_session(&transport, &clock));
    let watcher = ReconnectPolicy::new(Duration::from_secs(2)).spawn(&session);

    session.connect().await;
    wait_for_state(&session, ConnectionState::Open).await;

    transport
        .inbound()
        .send(InboundEvent::Lifecycle(LifecycleEvent::Closed { reason: None }))
        .await?;
    wait_for_state(&session, ConnectionState::Closed).await;
    assert_eq!(transport.connect_count(), 1);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    wait_for_state(&session, ConnectionState::Open).await;
    assert_eq!(transport.connect_count(), 2);

    watcher.abort();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_requested_disconnect_does_not_reconnect() -> Result<()> {
    let transport = ChannelTransport::new();
    let clock = ManualClock::new();
    let session = Arc::new(text_session(&transport, &clock));
    let watcher = ReconnectPolicy::new(Duration::from_secs(2)).spawn(&session);

    session.connect().await;
    wait_for_state(&session, ConnectionState::Open).await;
    session.disconnect().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    assert_eq!(session.state().await, ConnectionState::Closed);
    assert_eq!(transport.connect_count(), 1);

    watcher.abort();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_restart_reopens_session() -> Result<()> {
    let transport = ChannelTransport::new();
    let clock = ManualClock::new();
    let session = text_session(&transport, &clock);
    let policy = ReconnectPolicy::new(Duration::from_millis(500));

    session.connect().await;
    wait_for_state(&session, ConnectionState::Open).await;

    policy.restart(&session).await;
    wait_for_state(&session, ConnectionState::Open).await;

    assert_eq!(transport.connect_count(), 2);
    assert_eq!(transport.close_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_watcher_ends_with_session() -> Result<()> {
    let transport = ChannelTransport::new();
    let clock = ManualClock::new();
    let session = Arc::new(text_session(&transport, &clock));
    let watcher = ReconnectPolicy::default().spawn(&session);

    drop(session);
    settle().await;

    assert!(watcher.is_finished());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_retry_window_cancels_reconnect() -> Result<()> {
    let transport = ChannelTransport::new();
    let clock = ManualClock::new();
    let session = Arc::new(text_session(&transport, &clock));
    let watcher = ReconnectPolicy::new(Duration::from_secs(2)).spawn(&session);

    session.connect().await;
    wait_for_state(&session, ConnectionState::Open).await;

    transport
        .inbound()
        .send(InboundEvent::Lifecycle(LifecycleEvent::Closed { reason: None }))
        .await?;
    wait_for_state(&session, ConnectionState::Closed).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    session.disconnect().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    assert_eq!(session.state().await, ConnectionState::Closed);
    assert_eq!(transport.connect_count(), 1);
    assert!(!session
        .logs()
        .await
        .iter()
        .any(|entry| entry.text == "Reconnecting..."));

    watcher.abort();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_during_retry_window_is_not_doubled() -> Result<()> {
    let transport = ChannelTransport::new();
    let clock = ManualClock::new();
    let session = Arc::new(text_session(&transport, &clock));
    let watcher = ReconnectPolicy::new(Duration::from_secs(2)).spawn(&session);

    session.connect().await;
    wait_for_state(&session, ConnectionState::Open).await;
    transport.hang_up();
    wait_for_state(&session, ConnectionState::Closed).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    session.connect().await;
    wait_for_state(&session, ConnectionState::Open).await;

    // The retry was dropped, so the new session is left alone
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(session.state().await, ConnectionState::Open);
    assert_eq!(transport.connect_count(), 2);

    watcher.abort();
    Ok(())
}
