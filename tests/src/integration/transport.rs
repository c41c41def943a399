//! Loopback mutual-TLS transport: a real server, a real client, throwaway
//! certificates.

use crate::harness::{manager, Manager};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use shared_types::{ManagerError, Request, Response};
use sm_05_rpc::{client_tls_config, server_tls_config, RpcClient, RpcServer, TlsFiles};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

struct TestPki {
    server: TlsFiles,
    client: TlsFiles,
    _dir: tempfile::TempDir,
}

/// One CA signing one server and one client identity.
fn generate_pki() -> TestPki {
    let dir = tempfile::tempdir().expect("tempdir");

    let ca_key = KeyPair::generate().expect("ca key");
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

    let server_key = KeyPair::generate().expect("server key");
    let server_cert = CertificateParams::new(vec!["localhost".to_string()])
        .expect("server params")
        .signed_by(&server_key, &ca_cert, &ca_key)
        .expect("server cert");

    let client_key = KeyPair::generate().expect("client key");
    let client_cert = CertificateParams::new(vec!["worker".to_string()])
        .expect("client params")
        .signed_by(&client_key, &ca_cert, &ca_key)
        .expect("client cert");

    let write = |name: &str, pem: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, pem).expect("write pem");
        path
    };
    let ca_path = write("ca.pem", &ca_cert.pem());
    let server = TlsFiles {
        cert: write("server.pem", &server_cert.pem()),
        key: write("server.key", &server_key.serialize_pem()),
        ca: ca_path.clone(),
    };
    let client = TlsFiles {
        cert: write("client.pem", &client_cert.pem()),
        key: write("client.key", &client_key.serialize_pem()),
        ca: ca_path,
    };
    TestPki {
        server,
        client,
        _dir: dir,
    }
}

async fn serve(m: &Manager, tls: Option<Arc<rustls::ServerConfig>>) -> (String, watch::Sender<bool>) {
    let (accept_tx, accept_rx) = watch::channel(false);
    let server = RpcServer::new(
        "127.0.0.1:0".to_string(),
        tls,
        Arc::clone(&m.dispatcher),
        accept_rx,
    );
    let (addr, serve) = server.bind().await.expect("bind");
    tokio::spawn(serve);
    (addr.to_string(), accept_tx)
}

#[tokio::test]
async fn test_mutual_tls_round_trip() {
    let pki = generate_pki();
    let m = manager().await;
    let (addr, _accept) = serve(&m, Some(server_tls_config(&pki.server).unwrap())).await;

    let client = RpcClient::connect_tls(
        &addr,
        "localhost",
        client_tls_config(&pki.client).unwrap(),
    )
    .await
    .unwrap();

    let response = client
        .call(Request::CreateScope {
            db_server_id: m.server_id,
            name: "S".into(),
            group_id: 7,
            created_by: "alice".into(),
            scope_type: "custom".into(),
            cycles: false,
            cycles_retention: -1,
            attributes: HashMap::new(),
        })
        .await
        .unwrap();
    let id = match response {
        Response::Id(id) => id,
        other => panic!("unexpected: {other:?}"),
    };

    let scope = client.get_scope(id).await.unwrap();
    assert_eq!(scope.name, "S");
    assert!(scope.secret.is_empty(), "wire egress must be redacted");
}

#[tokio::test]
async fn test_plaintext_round_trip_when_tls_disabled() {
    let m = manager().await;
    let (addr, _accept) = serve(&m, None).await;

    let client = RpcClient::connect_plain(&addr).await.unwrap();
    let id = m.create_scope("S").await;
    let (synchronizing, targets) = client.get_scope_targets(id).await.unwrap();
    assert!(!synchronizing);
    assert!(targets.is_empty());
}

#[tokio::test]
async fn test_unknown_scope_is_not_found_over_wire() {
    let m = manager().await;
    let (addr, _accept) = serve(&m, None).await;
    let client = RpcClient::connect_plain(&addr).await.unwrap();

    let err = client.get_scope(404).await.unwrap_err();
    assert_eq!(err, ManagerError::RecordNotFound);
}

#[tokio::test]
async fn test_certificate_paths_must_exist() {
    let bogus = TlsFiles {
        cert: Path::new("/nonexistent/server.pem").to_path_buf(),
        key: Path::new("/nonexistent/server.key").to_path_buf(),
        ca: Path::new("/nonexistent/ca.pem").to_path_buf(),
    };
    assert!(server_tls_config(&bogus).is_err());
}
