//! Notification delivery and reconciliation across scope mutations.

use crate::harness::manager;
use shared_types::{Request, Response};
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_millis(500);

#[tokio::test]
async fn test_create_scope_notifies_subscriber() {
    let m = manager().await;
    let dispatcher = std::sync::Arc::clone(&m.dispatcher);
    let subscriber =
        tokio::spawn(async move { dispatcher.handle(Request::SubscribeNotification).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let id = m.create_scope("S").await;

    match timeout(WAIT, subscriber).await.unwrap().unwrap() {
        Response::Notification {
            update_scope_ids,
            remaining_scope_ids,
        } => {
            assert!(update_scope_ids.contains(&id));
            assert_eq!(remaining_scope_ids, vec![id]);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_scope_reconciles_live_set() {
    let m = manager().await;
    let keep = m.create_scope("keep").await;
    let doomed = m.create_scope("doomed").await;

    // Let the creation events flush to nobody before subscribing, so the
    // batch below carries only the deletion.
    tokio::time::sleep(Duration::from_millis(60)).await;

    let dispatcher = std::sync::Arc::clone(&m.dispatcher);
    let subscriber =
        tokio::spawn(async move { dispatcher.handle(Request::SubscribeNotification).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    match m.dispatcher.handle(Request::DeleteScope { id: doomed }).await {
        Response::Ack => {}
        other => panic!("unexpected: {other:?}"),
    }

    match timeout(WAIT, subscriber).await.unwrap().unwrap() {
        Response::Notification {
            update_scope_ids,
            remaining_scope_ids,
        } => {
            // Deletion publishes the reserved id 0: "live set changed".
            assert!(update_scope_ids.contains(&0));
            assert!(remaining_scope_ids.contains(&keep));
            assert!(!remaining_scope_ids.contains(&doomed));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_shutdown_releases_subscriber_with_sentinel() {
    let m = manager().await;
    let dispatcher = std::sync::Arc::clone(&m.dispatcher);
    let subscriber =
        tokio::spawn(async move { dispatcher.handle(Request::SubscribeNotification).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    m.notifier.shutdown();

    match timeout(WAIT, subscriber).await.unwrap().unwrap() {
        Response::Error(err) => {
            assert_eq!(err.kind, shared_types::ErrorKind::Transient);
            assert!(err.message.contains("shutting down"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}
