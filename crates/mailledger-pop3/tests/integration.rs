//! End-to-end tests against a scripted in-process POP3 server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use mailledger_pop3::auth::{ClientProfile, StaticCredentials, create_session};
use mailledger_pop3::{Config, Error, Outcome, Security, Session, SessionState, TlsUpgrader};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One step of the server script.
enum Step {
    /// Write these bytes.
    Reply(&'static str),
    /// Read one line and check it.
    Expect(&'static str),
    /// Stay silent until the client hangs up.
    Hold,
}

use Step::{Expect, Hold, Reply};

/// Serves one connection following `script`; returns the port.
async fn serve(script: Vec<Step>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);

        for step in script {
            match step {
                Reply(data) => write.write_all(data.as_bytes()).await.unwrap(),
                Expect(line) => {
                    let mut received = String::new();
                    reader.read_line(&mut received).await.unwrap();
                    assert_eq!(received, line);
                }
                Hold => {
                    let mut rest = Vec::new();
                    let _ = reader.read_to_end(&mut rest).await;
                }
            }
        }
    });

    (port, handle)
}

fn config(port: u16) -> Config {
    Config::builder("127.0.0.1")
        .port(port)
        .security(Security::None)
        .build()
}

#[tokio::test]
async fn greeting_timestamp_enables_apop() {
    let (port, server) = serve(vec![
        Reply("+OK POP3 server ready <1896.697170952@dbc.mtview.ca.us>\r\n"),
        Expect("QUIT\r\n"),
        Reply("+OK bye\r\n"),
    ])
    .await;

    let session = Session::connect(&config(port)).await.unwrap();
    assert!(session.apop_available());
    assert!(session.quit().await.unwrap().is_ok());
    server.await.unwrap();

    let (port, server) = serve(vec![
        Reply("+OK ready\r\n"),
        Expect("QUIT\r\n"),
        Reply("+OK bye\r\n"),
    ])
    .await;
    let session = Session::connect(&config(port)).await.unwrap();
    assert!(!session.apop_available());
    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn negative_greeting_is_a_connection_error() {
    let (port, server) = serve(vec![Reply("-ERR too busy\r\n")]).await;

    let err = Session::connect(&config(port)).await.unwrap_err();
    assert!(matches!(err, Error::Connection { source: None, .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn login_then_incapable_command_sends_nothing() {
    let (port, server) = serve(vec![
        Reply("+OK ready\r\n"),
        Expect("USER bob\r\n"),
        Reply("+OK\r\n"),
        Expect("PASS secret\r\n"),
        Reply("+OK\r\n"),
        // The next line must be QUIT: TOP is never written.
        Expect("QUIT\r\n"),
        Reply("+OK bye\r\n"),
    ])
    .await;

    let session = Session::connect(&config(port)).await.unwrap();
    assert_eq!(session.state(), SessionState::Authorization);

    assert!(session.user("bob").await.unwrap().is_ok());
    assert!(session.pass("secret").await.unwrap().is_ok());
    assert_eq!(session.state(), SessionState::Transaction);

    session.set_handles_incapable_as_error(true);
    let err = session.top(1, 10).await.unwrap_err();
    assert!(matches!(err, Error::Incapable(_)));
    assert_eq!(session.state(), SessionState::Transaction);

    assert!(session.quit().await.unwrap().is_ok());
    assert_eq!(session.state(), SessionState::NotConnected);
    server.await.unwrap();
}

#[tokio::test]
async fn transaction_timeout_forces_disconnect() {
    let (port, server) = serve(vec![
        Reply("+OK ready\r\n"),
        Expect("USER bob\r\n"),
        Reply("+OK\r\n"),
        Expect("PASS secret\r\n"),
        Reply("+OK\r\n"),
        Expect("LIST\r\n"),
        // Status line only; the block never comes.
        Reply("+OK 2 messages\r\n"),
        Hold,
    ])
    .await;

    let session = Session::connect(&config(port)).await.unwrap();
    assert!(session.login("bob", "secret").await.unwrap().is_ok());
    session.set_transaction_timeout(Some(Duration::from_millis(250)));

    let err = session.list().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(session.state(), SessionState::NotConnected);

    let err = session.stat().await.unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(msg) if msg == "not connected"));
    server.await.unwrap();
}

#[tokio::test]
async fn concurrent_use_is_rejected_immediately() {
    let (port, server) = serve(vec![Reply("+OK ready\r\n"), Expect("NOOP\r\n"), Hold]).await;

    let session = Arc::new(Session::connect(&config(port)).await.unwrap());
    session.set_transaction_timeout(Some(Duration::from_millis(300)));

    let first = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.command("NOOP", &[], false).await }
    });
    while !session.is_transaction_in_progress() {
        tokio::task::yield_now().await;
    }

    let err = session.command("NOOP", &[], false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(session.state(), SessionState::NotConnected);
    server.await.unwrap();
}

#[tokio::test]
async fn ladder_falls_back_from_login_to_plain() {
    let (port, server) = serve(vec![
        Reply("+OK ready\r\n"),
        Expect("CAPA\r\n"),
        Reply("+OK\r\nSASL DIGEST-MD5 CRAM-MD5 NTLM PLAIN LOGIN ANONYMOUS\r\nUSER\r\n.\r\n"),
        Expect("AUTH LOGIN\r\n"),
        Reply("+ VXNlcm5hbWU6\r\n"),
        Expect("Ym9i\r\n"),
        Reply("+ UGFzc3dvcmQ6\r\n"),
        Expect("c2VjcmV0\r\n"),
        Reply("-ERR [AUTH] LOGIN failed\r\n"),
        Expect("AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n"),
        Reply("+OK welcome\r\n"),
        Expect("STAT\r\n"),
        Reply("+OK 2 320\r\n"),
        Expect("QUIT\r\n"),
        Reply("+OK bye\r\n"),
    ])
    .await;

    let profile = ClientProfile::new(config(port))
        .username("bob")
        .sasl_mechanisms(["ANONYMOUS", "LOGIN", "PLAIN"])
        .allow_insecure_login(true);
    let credentials = StaticCredentials::new("bob", "secret");

    let session = create_session(&profile, &credentials, &TlsUpgrader::new())
        .await
        .unwrap();
    assert_eq!(
        session.authority().to_string(),
        format!("pop://bob;AUTH=PLAIN@127.0.0.1:{port}")
    );

    let stat = session.stat().await.unwrap();
    assert_eq!(stat.value().unwrap().message_count, 2);
    assert!(session.quit().await.unwrap().is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn failed_authentication_disconnects() {
    let (port, server) = serve(vec![
        Reply("+OK ready\r\n"),
        Expect("CAPA\r\n"),
        Reply("+OK\r\nUSER\r\n.\r\n"),
        Expect("USER bob\r\n"),
        Reply("+OK\r\n"),
        Expect("PASS wrong\r\n"),
        Reply("-ERR [AUTH] invalid password\r\n"),
        Expect("QUIT\r\n"),
        Reply("+OK bye\r\n"),
    ])
    .await;

    let profile = ClientProfile::new(config(port))
        .username("bob")
        .allow_insecure_login(true);
    let credentials = StaticCredentials::new("bob", "wrong");

    let err = create_session(&profile, &credentials, &TlsUpgrader::new())
        .await
        .unwrap_err();
    match err {
        Error::Authentication { result, .. } => {
            let result = result.unwrap();
            assert!(matches!(result.outcome(), Outcome::Rejected { .. }));
            assert_eq!(result.text(), "invalid password");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn retrieve_and_delete() {
    let (port, server) = serve(vec![
        Reply("+OK ready\r\n"),
        Expect("USER bob\r\n"),
        Reply("+OK\r\n"),
        Expect("PASS secret\r\n"),
        Reply("+OK\r\n"),
        Expect("RETR 1\r\n"),
        Reply("+OK 40 octets\r\nSubject: test\r\n\r\n..leading dot\r\nend\r\n.\r\n"),
        Expect("DELE 1\r\n"),
        Reply("+OK message 1 deleted\r\n"),
        Expect("QUIT\r\n"),
        Reply("+OK bye\r\n"),
    ])
    .await;

    let session = Session::connect(&config(port)).await.unwrap();
    assert!(session.login("bob", "secret").await.unwrap().is_ok());

    let message = session.retr(1).await.unwrap().into_value().unwrap();
    assert_eq!(&message[..], b"Subject: test\r\n\r\n.leading dot\r\nend\r\n");

    assert!(session.dele(1).await.unwrap().is_ok());
    assert!(session.quit().await.unwrap().is_ok());
    server.await.unwrap();
}
