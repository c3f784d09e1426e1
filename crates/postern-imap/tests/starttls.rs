//! STARTTLS with a real TLS client.
//!
//! The server certificate is generated with `rcgen`; the client side is
//! `tokio-rustls`. Everything the client receives is recorded so the test
//! can check where the plaintext ends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName};
use tokio_rustls::TlsConnector;

use common::{Recorder, TestClient, seen, spawn_server, store};
use postern_imap::Config;

struct Certificates {
    server: Arc<rustls::ServerConfig>,
    client: Arc<rustls::ClientConfig>,
}

fn certificates() -> Certificates {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cert = generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("generate self-signed cert");
    let cert_der: CertificateDer<'static> = cert.cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let server = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der.into())
        .expect("build server TLS config");

    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert_der).expect("trust the test certificate");
    let client = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Certificates {
        server: Arc::new(server),
        client: Arc::new(client),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[tokio::test]
async fn tagged_ok_is_the_last_plaintext() {
    let certs = certificates();
    let config = Config::builder()
        .tls(certs.server)
        .allow_plaintext_auth(false)
        .build();
    let (stream, server) = spawn_server(store(), config);
    let (recorder, observed) = Recorder::new(stream);
    let mut plain = TestClient::new(recorder);

    let greeting = plain.read_line().await;
    assert!(greeting.contains(" STARTTLS "), "{greeting}");
    assert!(greeting.contains(" LOGINDISABLED "), "{greeting}");

    let refused = plain.command("a1", "LOGIN bob secret").await;
    assert_eq!(refused, vec!["a1 NO [PRIVACYREQUIRED] Use STARTTLS first"]);

    let ok = plain.command("a4", "STARTTLS").await;
    assert_eq!(ok, vec!["a4 OK Begin TLS negotiation now"]);
    let (recorder, leftover) = plain.into_inner();
    assert!(leftover.is_empty());

    let connector = TlsConnector::from(certs.client);
    let domain = ServerName::try_from("localhost").unwrap();
    let tls = connector.connect(domain, recorder).await.expect("TLS handshake");
    let mut secure = TestClient::new(tls);

    let caps = secure.command("a5", "CAPABILITY").await;
    assert!(!caps[0].contains("STARTTLS"));
    assert!(!caps[0].contains("LOGINDISABLED"));

    let again = secure.command("a6", "STARTTLS").await;
    assert_eq!(again, vec!["a6 NO TLS already active"]);

    let login = secure.command("a7", "LOGIN bob secret").await;
    assert!(login[0].starts_with("a7 OK [CAPABILITY "));

    let logout = secure.command("a8", "LOGOUT").await;
    assert_eq!(logout, vec!["* BYE Logging out", "a8 OK LOGOUT completed"]);
    drop(secure);
    server.await.unwrap().unwrap();

    let wire = seen(&observed);
    let marker = b"a4 OK Begin TLS negotiation now\r\n";
    let end = find(&wire, marker).expect("tagged OK sent in plaintext") + marker.len();
    assert!(std::str::from_utf8(&wire[..end]).is_ok());
    // 0x16 is a TLS handshake record.
    assert_eq!(wire.get(end), Some(&0x16));
    assert!(find(&wire[end..], b"a5 OK").is_none());
    assert!(find(&wire[end..], b"* BYE").is_none());
}

#[tokio::test]
async fn starttls_without_certificate_is_refused() {
    let (stream, _server) = spawn_server(store(), Config::new());
    let mut client = TestClient::new(stream);
    let greeting = client.read_line().await;
    assert!(!greeting.contains("STARTTLS"));

    let lines = client.command("a1", "STARTTLS").await;
    assert_eq!(lines, vec!["a1 NO TLS not available"]);
    let noop = client.command("a2", "NOOP").await;
    assert_eq!(noop, vec!["a2 OK NOOP completed"]);
}

#[tokio::test]
async fn compression_inside_tls() {
    let certs = certificates();
    let config = Config::builder().tls(certs.server).build();
    let (stream, server) = spawn_server(store(), config);
    let mut plain = TestClient::new(stream);
    plain.read_line().await;
    plain.command("a1", "STARTTLS").await;
    let (stream, _) = plain.into_inner();

    let connector = TlsConnector::from(certs.client);
    let tls = connector
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .expect("TLS handshake");
    let mut secure = TestClient::new(tls);
    secure.command("a2", "LOGIN bob secret").await;
    let ok = secure.command("a3", "COMPRESS DEFLATE").await;
    assert_eq!(ok, vec!["a3 OK DEFLATE active"]);
    secure.enable_compression();

    let list = secure.command("a4", "LIST \"\" %").await;
    assert_eq!(list.last().unwrap(), "a4 OK LIST completed");
    let logout = secure.command("a5", "LOGOUT").await;
    assert_eq!(logout[1], "a5 OK LOGOUT completed");
    drop(secure);
    server.await.unwrap().unwrap();
}
