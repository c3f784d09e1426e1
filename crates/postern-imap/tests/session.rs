//! End-to-end sessions against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::similar_names)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use postern_imap::{Config, MemoryStore, Uid};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

use common::{TestClient, add_messages, spawn_server, store};

type Server = JoinHandle<postern_imap::Result<()>>;

async fn greeted(config: Config) -> (TestClient<DuplexStream>, Arc<MemoryStore>, Server) {
    let store = store();
    let (stream, server) = spawn_server(Arc::clone(&store), config);
    let mut client = TestClient::new(stream);
    let greeting = client.read_line().await;
    assert!(greeting.starts_with("* OK [CAPABILITY IMAP4rev1 "), "{greeting}");
    assert!(greeting.ends_with("] Postern IMAP4rev1 ready"));
    (client, store, server)
}

#[tokio::test]
async fn login_select_fetch_logout() {
    let (mut client, store, server) = greeted(Config::new()).await;
    add_messages(&store, 3);

    let login = client.command("a1", "LOGIN bob secret").await;
    assert_eq!(login.len(), 1);
    assert!(login[0].starts_with("a1 OK [CAPABILITY "));

    let select = client.command("a2", "SELECT INBOX").await;
    assert_eq!(select[1], "* 3 EXISTS");
    assert_eq!(select.last().unwrap(), "a2 OK [READ-WRITE] SELECT completed");
    assert_eq!(store.open_handles(), 1);

    let fetch = client.command("a3", "FETCH 1:3 (FLAGS)").await;
    assert_eq!(
        fetch,
        vec![
            "* 1 FETCH (FLAGS ())",
            "* 2 FETCH (FLAGS ())",
            "* 3 FETCH (FLAGS ())",
            "a3 OK FETCH completed",
        ]
    );

    let logout = client.command("a4", "LOGOUT").await;
    assert_eq!(logout, vec!["* BYE Logging out", "a4 OK LOGOUT completed"]);
    assert!(client.read_to_end().await.is_empty());
    server.await.unwrap().unwrap();
    assert_eq!(store.open_handles(), 0);
}

#[tokio::test]
async fn large_fetch_is_served_in_batches() {
    let (mut client, store, server) = greeted(Config::new()).await;
    add_messages(&store, 500);
    client.command("a1", "LOGIN bob secret").await;
    client.command("a2", "SELECT INBOX").await;

    let lines = client.command("a3", "FETCH 1:500 (FLAGS)").await;
    assert_eq!(lines.len(), 501);
    assert_eq!(lines[0], "* 1 FETCH (FLAGS ())");
    assert_eq!(lines[499], "* 500 FETCH (FLAGS ())");
    assert_eq!(lines[500], "a3 OK FETCH completed");

    let calls: Vec<String> = store.fetch_calls().iter().map(ToString::to_string).collect();
    assert_eq!(calls, vec!["1:100", "101:200", "201:300", "301:400", "401:500"]);

    client.command("a4", "LOGOUT").await;
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn broken_message_is_skipped() {
    let (mut client, store, _server) = greeted(Config::new()).await;
    add_messages(&store, 3);
    store.break_message("INBOX", Uid::new(2).unwrap());
    client.command("a1", "LOGIN bob secret").await;
    client.command("a2", "SELECT INBOX").await;

    let lines = client.command("a3", "FETCH 1:3 (UID)").await;
    assert_eq!(
        lines,
        vec!["* 1 FETCH (UID 1)", "* 3 FETCH (UID 3)", "a3 OK FETCH completed"]
    );
}

#[tokio::test]
async fn header_fields_are_sent_as_literal() {
    let (mut client, store, _server) = greeted(Config::new()).await;
    add_messages(&store, 1);
    client.command("a1", "LOGIN bob secret").await;
    client.command("a2", "EXAMINE INBOX").await;

    let lines = client
        .command("a3", "FETCH 1 BODY.PEEK[HEADER.FIELDS (SUBJECT)]")
        .await;
    assert_eq!(
        lines,
        vec![
            "* 1 FETCH (BODY[HEADER.FIELDS (SUBJECT)] {19}",
            "Subject: note 1",
            "",
            ")",
            "a3 OK FETCH completed",
        ]
    );
}

#[tokio::test]
async fn append_waits_for_literal_continuation() {
    let (mut client, store, _server) = greeted(Config::new()).await;
    client.command("a1", "LOGIN bob secret").await;
    client.command("a2", "SELECT INBOX").await;

    client.send("a3 APPEND INBOX (\\Seen) {11}\r\n").await;
    assert_eq!(client.read_line().await, "+ Ready for literal data");
    client.send("Hi\r\nthere\r\n\r\n").await;
    let lines = client.read_until("a3").await;
    assert_eq!(lines[0], "* 1 EXISTS");
    assert!(lines[1].starts_with("a3 OK [APPENDUID "), "{}", lines[1]);
    assert_eq!(store.message_count("INBOX"), Some(1));

    let fetch = client.command("a4", "FETCH 1 (FLAGS RFC822.SIZE)").await;
    assert_eq!(fetch[0], "* 1 FETCH (FLAGS (\\Seen) RFC822.SIZE 11)");
}

#[tokio::test]
async fn non_synchronizing_literal_needs_no_continuation() {
    let (mut client, _store, _server) = greeted(Config::new()).await;
    let lines = client.command("a1", "LOGIN {3+}\r\nbob {6+}\r\nsecret").await;
    assert!(lines[0].starts_with("a1 OK [CAPABILITY "));
}

#[tokio::test]
async fn authenticate_plain_with_challenge() {
    let (mut client, _store, _server) = greeted(Config::new()).await;
    client.send("a1 AUTHENTICATE PLAIN\r\n").await;
    assert_eq!(client.read_line().await, "+ ");
    client
        .send(&format!("{}\r\n", STANDARD.encode(b"\0bob\0secret")))
        .await;
    let lines = client.read_until("a1").await;
    assert!(lines[0].starts_with("a1 OK [CAPABILITY "));
    assert!(lines[0].ends_with("AUTHENTICATE completed"));

    let list = client.command("a2", "LIST \"\" *").await;
    assert!(list.contains(&"* LIST (\\HasNoChildren) \"/\" INBOX".to_string()));
}

#[tokio::test]
async fn idle_ends_with_done() {
    let (mut client, _store, _server) = greeted(Config::new()).await;
    client.command("a1", "LOGIN bob secret").await;
    client.send("a2 IDLE\r\n").await;
    assert_eq!(client.read_line().await, "+ idling");
    client.send("DONE\r\n").await;
    assert_eq!(client.read_line().await, "a2 OK IDLE terminated");

    let noop = client.command("a3", "NOOP").await;
    assert_eq!(noop, vec!["a3 OK NOOP completed"]);
}

#[tokio::test]
async fn syntax_errors_do_not_end_the_session() {
    let (mut client, _store, _server) = greeted(Config::new()).await;
    let bad = client.command("a1", "LOGIN bob").await;
    assert_eq!(bad.len(), 1);
    assert!(bad[0].starts_with("a1 BAD "), "{}", bad[0]);

    let state = client.command("a2", "SELECT INBOX").await;
    assert_eq!(state, vec!["a2 BAD Command not valid in not authenticated state"]);

    let ok = client.command("a3", "NOOP").await;
    assert_eq!(ok, vec!["a3 OK NOOP completed"]);
}

#[tokio::test]
async fn compression_applies_from_the_next_byte() {
    let (mut client, store, server) = greeted(Config::new()).await;
    add_messages(&store, 2);
    client.command("a1", "LOGIN bob secret").await;

    let lines = client.command("a2", "COMPRESS DEFLATE").await;
    assert_eq!(lines, vec!["a2 OK DEFLATE active"]);
    client.enable_compression();

    let caps = client.command("a3", "CAPABILITY").await;
    assert!(!caps[0].contains("COMPRESS=DEFLATE"));
    assert_eq!(caps[1], "a3 OK CAPABILITY completed");

    client.command("a4", "SELECT INBOX").await;
    let fetch = client.command("a5", "UID FETCH 1:* (FLAGS)").await;
    assert_eq!(
        fetch,
        vec![
            "* 1 FETCH (UID 1 FLAGS ())",
            "* 2 FETCH (UID 2 FLAGS ())",
            "a5 OK UID FETCH completed",
        ]
    );

    let again = client.command("a6", "COMPRESS DEFLATE").await;
    assert_eq!(again, vec!["a6 NO [COMPRESSIONACTIVE] DEFLATE already active"]);

    client.command("a7", "LOGOUT").await;
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn too_many_failed_logins_disconnect() {
    let config = Config::builder().max_auth_failures(2).build();
    let (mut client, _store, server) = greeted(config).await;
    client.command("a1", "LOGIN bob nope").await;
    client.send("a2 LOGIN bob nope\r\n").await;
    assert_eq!(
        client.read_until("a2").await,
        vec!["a2 NO [AUTHENTICATIONFAILED] Authentication failed"]
    );
    assert_eq!(client.read_line().await, "* BYE Too many authentication failures");
    assert!(client.read_to_end().await.is_empty());
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn dropped_client_stops_a_running_fetch() {
    let (mut client, store, server) = greeted(Config::new()).await;
    add_messages(&store, 5000);
    client.command("a1", "LOGIN bob secret").await;
    client.command("a2", "SELECT INBOX").await;
    assert_eq!(store.open_handles(), 1);

    client.send("a3 FETCH 1:* (BODY.PEEK[])\r\n").await;
    assert!(client.read_line().await.starts_with("* 1 FETCH "));
    drop(client);

    let outcome = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("connection task did not stop")
        .unwrap();
    assert!(outcome.is_err(), "write to a closed peer must fail");
    assert!(store.fetch_calls().len() < 50);
    assert_eq!(store.open_handles(), 0);
}
