//! End-to-end scenarios through the dispatcher.

use crate::harness::{manager, PRIVILEGE};
use chrono::{Duration as ChronoDuration, Utc};
use sm_01_catalog::CatalogStore;
use shared_types::{ErrorKind, Request, Response, Target, UserCredential};

fn target(input: &str) -> Target {
    Target {
        input: input.into(),
        ..Target::default()
    }
}

#[tokio::test]
async fn test_create_scope_shape_and_redaction() {
    let m = manager().await;
    let id = m.create_scope("S").await;

    match m.dispatcher.handle(Request::GetScope { id }).await {
        Response::Scope(scope) => {
            assert_eq!(scope.name, "S");
            assert_eq!(scope.group_id, 7);
            assert!(scope.enabled);
            assert!(scope.secret.is_empty(), "safe family must redact");
            assert!(scope.db_server.admin_password.is_empty());
        }
        other => panic!("unexpected: {other:?}"),
    }

    let views = m.catalog.views_of(id).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "All");
}

#[tokio::test]
async fn test_sensitive_gate() {
    let m = manager().await;
    let id = m.create_scope("S").await;
    let secret = m.catalog.scope(id).await.unwrap().unwrap().secret;

    // Invalid privilege secret: unauthorized.
    match m
        .dispatcher
        .handle(Request::GetScopeFull {
            privilege_secret: "wrong".into(),
            scope_secret: secret.clone(),
        })
        .await
    {
        Response::Error(err) => assert_eq!(err.kind, ErrorKind::Unauthorized),
        other => panic!("unexpected: {other:?}"),
    }

    // Valid privilege, unknown scope secret: empty scope, no error.
    match m
        .dispatcher
        .handle(Request::GetScopeFull {
            privilege_secret: PRIVILEGE.into(),
            scope_secret: "unknown".into(),
        })
        .await
    {
        Response::Scope(scope) => assert_eq!(scope.id, 0),
        other => panic!("unexpected: {other:?}"),
    }

    // Valid privilege, known secret: the full scope.
    match m
        .dispatcher
        .handle(Request::GetScopeFull {
            privilege_secret: PRIVILEGE.into(),
            scope_secret: secret.clone(),
        })
        .await
    {
        Response::Scope(scope) => {
            assert_eq!(scope.id, id);
            assert_eq!(scope.secret, secret);
            assert_eq!(scope.db_server.host, "127.0.0.1");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_token_expiry_cap() {
    let m = manager().await;
    let scope_id = m.create_scope("S").await;
    let view_id = m.default_view(scope_id).await;

    match m
        .dispatcher
        .handle(Request::GrantToken {
            view_id,
            description: "ci".into(),
            created_by: "alice".into(),
            expires_at: Utc::now() + ChronoDuration::days(400),
        })
        .await
    {
        Response::Error(err) => {
            assert_eq!(err.kind, ErrorKind::InvalidArgument);
            assert!(err
                .message
                .contains("access token expiry time may not exceed 365 days"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    match m
        .dispatcher
        .handle(Request::GrantToken {
            view_id,
            description: "ci".into(),
            created_by: "alice".into(),
            expires_at: Utc::now() + ChronoDuration::days(10),
        })
        .await
    {
        Response::Credentials { username, password } => {
            assert_eq!(password.len(), 64);
            assert!(m.cluster.role(m.server_id, &username).is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_target_dedup_and_sizing() {
    let m = manager().await;
    let id = m.create_scope("S").await;

    let response = m
        .dispatcher
        .handle(Request::UpdateScopeTargets {
            id,
            targets: vec![
                target("10.0.0.0/30"),
                target("bad input"),
                target(""),
                target("10.0.0.0/30"),
            ],
            blocking: true,
        })
        .await;
    match response {
        Response::SyncCounts(counts) => {
            assert_eq!(counts.created, 1);
            assert_eq!(counts.removed, 0);
            assert_eq!(counts.updated, 0);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(m.catalog.scope(id).await.unwrap().unwrap().size, 4);

    // Resubmitting the same set is a no-op.
    match m
        .dispatcher
        .handle(Request::UpdateScopeTargets {
            id,
            targets: vec![target("10.0.0.0/30")],
            blocking: true,
        })
        .await
    {
        Response::SyncCounts(counts) => {
            assert_eq!((counts.created, counts.removed, counts.updated), (0, 0, 0));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_ripple() {
    let m = manager().await;
    let scope_id = m.create_scope("S").await;
    let all_view = m.default_view(scope_id).await;

    // A second view plus a token grant on the default one.
    match m
        .dispatcher
        .handle(Request::CreateView {
            scope_id,
            name: "dmz".into(),
            created_by: "alice".into(),
            filters: Default::default(),
        })
        .await
    {
        Response::Id(_) => {}
        other => panic!("unexpected: {other:?}"),
    }
    let username = match m
        .dispatcher
        .handle(Request::GrantToken {
            view_id: all_view,
            description: "ci".into(),
            created_by: "alice".into(),
            expires_at: Utc::now() + ChronoDuration::days(10),
        })
        .await
    {
        Response::Credentials { username, .. } => username,
        other => panic!("unexpected: {other:?}"),
    };

    match m.dispatcher.handle(Request::DeleteScope { id: scope_id }).await {
        Response::Ack => {}
        other => panic!("unexpected: {other:?}"),
    }

    match m.dispatcher.handle(Request::GetViews).await {
        Response::Views(views) => assert!(views.is_empty()),
        other => panic!("unexpected: {other:?}"),
    }
    match m
        .dispatcher
        .handle(Request::GetScopeTargets { id: scope_id })
        .await
    {
        Response::Error(err) => assert_eq!(err.kind, ErrorKind::NotFound),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(m.cluster.role(m.server_id, &username).is_none());
}

#[tokio::test]
async fn test_agent_update_floors_ratios() {
    let m = manager().await;
    let id = m.create_scope("S").await;
    let db_name = m.catalog.scope(id).await.unwrap().unwrap().db_name;

    m.dispatcher
        .handle(Request::UpdateScopeTargets {
            id,
            targets: vec![target("10.0.0.1"), target("10.0.0.2"), target("10.0.0.3")],
            blocking: true,
        })
        .await;
    m.cluster.set_target_status(
        m.server_id,
        &db_name,
        "10.0.0.1",
        shared_types::ScanStatus::Done,
    );

    let stats = std::collections::HashMap::from([(
        id,
        vec![shared_types::AgentReport {
            name: "agent-1".into(),
            host: "10.9.9.1".into(),
            version: "1.0".into(),
            active_tasks: 1,
        }],
    )]);
    match m.dispatcher.handle(Request::UpdateAgents { stats }).await {
        Response::Ack => {}
        other => panic!("unexpected: {other:?}"),
    }

    let scope = m.catalog.scope(id).await.unwrap().unwrap();
    assert_eq!(scope.cycle_done, 33.3333);
    assert!(scope.cycle_done + scope.cycle_active + scope.cycle_failed <= 100.0);

    match m.dispatcher.handle(Request::GetAgents).await {
        Response::Agents(agents) => {
            assert_eq!(agents.len(), 1);
            assert_eq!(agents[0].name, "agent-1");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_user_grant_carries_hash_only() {
    let m = manager().await;
    let scope_id = m.create_scope("S").await;
    let view_id = m.default_view(scope_id).await;

    let hash = "SCRAM-SHA-256$4096:c2FsdA==$stored:server".to_string();
    match m
        .dispatcher
        .handle(Request::GrantUsers {
            view_id,
            credentials: vec![UserCredential {
                username: "bob@example.com".into(),
                password_hash: hash.clone(),
            }],
            granted_by: "alice".into(),
        })
        .await
    {
        Response::Ack => {}
        other => panic!("unexpected: {other:?}"),
    }

    let role = m.cluster.role(m.server_id, "bob@example.com").unwrap();
    assert_eq!(role.credential, hash);

    match m
        .dispatcher
        .handle(Request::GetViewsGranted {
            username: "bob@example.com".into(),
        })
        .await
    {
        Response::Views(views) => assert_eq!(views.len(), 1),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_sql_log_round_trip() {
    let m = manager().await;
    let id = m.create_scope("S").await;
    let db_name = m.catalog.scope(id).await.unwrap().unwrap().db_name;
    let since = Utc::now() - ChronoDuration::minutes(1);

    match m
        .dispatcher
        .handle(Request::CreateSqlLog {
            db_name: db_name.clone(),
            db_user: "v1234".into(),
            client_addr: "10.1.1.1:5999".into(),
            query: "SELECT input FROM v_all".into(),
        })
        .await
    {
        Response::Id(_) => {}
        other => panic!("unexpected: {other:?}"),
    }

    match m
        .dispatcher
        .handle(Request::GetSqlLogs { db_name, since })
        .await
    {
        Response::SqlLogs(logs) => {
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].db_user, "v1234");
        }
        other => panic!("unexpected: {other:?}"),
    }
}
