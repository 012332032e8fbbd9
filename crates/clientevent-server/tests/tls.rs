//! TLS startup and handshake tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clientevent_protocol::{codec, Frame};
use clientevent_server::{
    join_room, start, start_with_loader, FsKeyStoreLoader, Listeners, ServerConfig, ServerError,
    ServerState,
};
use futures_util::StreamExt;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Message;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct KeyStore {
    dir: tempfile::TempDir,
    cert: CertificateDer<'static>,
}

fn write_key_store(file_name: &str) -> KeyStore {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let pem = format!(
        "{}{}",
        certified.cert.pem(),
        certified.key_pair.serialize_pem()
    );
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(file_name), pem).unwrap();
    KeyStore {
        dir,
        cert: certified.cert.der().clone(),
    }
}

fn connector(cert: CertificateDer<'static>) -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert).unwrap();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn missing_key_store_aborts_startup_and_frees_port() {
    let port = free_port();
    let config = ServerConfig::new("127.0.0.1", port).with_tls("does-not-exist.pem", "secret");

    match start(config, Listeners::new()).await {
        Err(ServerError::KeyStoreNotFound(path)) => {
            assert!(path.ends_with("does-not-exist.pem"));
        }
        other => panic!("expected KeyStoreNotFound, got {other:?}"),
    }

    let server = start(ServerConfig::new("127.0.0.1", port), Listeners::new())
        .await
        .unwrap();
    assert_eq!(server.local_addr().port(), port);
    assert_eq!(server.state(), ServerState::Running);
    server.stop().await;
}

#[tokio::test]
async fn invalid_key_store_is_a_tls_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keystore.pem"), "not pem").unwrap();

    let config = ServerConfig::new("127.0.0.1", 0).with_tls("keystore.pem", "");
    let loader = FsKeyStoreLoader::with_base_dir(dir.path());
    let result = start_with_loader(config, Listeners::new(), &loader).await;
    assert!(matches!(result, Err(ServerError::TlsConfig(_))));
}

#[tokio::test]
async fn secure_clients_connect_and_join_rooms() {
    let key_store = write_key_store("keystore.pem");
    let loader = FsKeyStoreLoader::with_base_dir(key_store.dir.path());
    let config = ServerConfig::new("127.0.0.1", 0).with_tls("keystore.pem", "1234");

    let listeners = Listeners::new().on_connect(|conn, params| {
        if let Some(room) = params.get("room").and_then(|v| v.as_single()) {
            join_room(room, conn);
        }
        Ok(())
    });

    let server = start_with_loader(config, listeners, &loader).await.unwrap();
    let addr: SocketAddr = server.local_addr();

    let tcp = TcpStream::connect(addr).await.unwrap();
    let tls = connector(key_store.cert.clone())
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();
    let (mut ws, _) = tokio_tungstenite::client_async("wss://localhost/?room=Secure", tls)
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Binary(data) = msg else {
        panic!("expected binary message");
    };
    let Frame::Connected { connection_id, .. } = codec::decode(&data).unwrap() else {
        panic!("expected connected frame");
    };

    let members = server.get_room_clients("Secure");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id().as_str(), connection_id);

    server.stop().await;
}
