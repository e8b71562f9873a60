//! POP3 session state machine.
//!
//! A [`Session`] owns one connection and moves through
//! Not Connected → Authorization → Transaction. Only one command may be in
//! flight at a time; a second caller gets [`Error::InvalidOperation`]
//! immediately instead of queueing. Any fault while a command is in flight
//! (timeout, transport error, malformed reply, dropped future) closes the
//! connection, after which every command fails with
//! [`Error::ProtocolViolation`] without touching the network.

mod authorization;
mod transaction;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use mailledger_sasl::MechanismRegistry;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::framed::block_lines;
use super::stream::{PopStream, UpgradeStream, connect};
use super::{Config, FramedStream, Security};
use crate::command::Command;
use crate::parser::{parse_octet_count, parse_timestamp};
use crate::types::{Authority, CapabilitySet, CommandResult, SessionState, StatusLine};
use crate::{Error, Result};

/// Session data readable without waiting for the connection.
struct Shared {
    state: SessionState,
    secure: bool,
    capabilities: Arc<CapabilitySet>,
    timestamp: Option<String>,
    authority: Authority,
    pending_user: Option<String>,
    transaction_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
    handles_incapable_as_error: bool,
}

/// Final status line of a command, with its block if one followed.
struct Reply {
    status: StatusLine,
    block: Option<Bytes>,
}

/// A POP3 client session.
///
/// All methods take `&self`, so a session can be shared through an `Arc`;
/// the one-command-at-a-time rule is enforced internally.
pub struct Session<S = PopStream> {
    connection: tokio::sync::Mutex<Option<FramedStream<S>>>,
    shared: Mutex<Shared>,
    mechanisms: Arc<MechanismRegistry>,
}

impl Session<PopStream> {
    /// Connects to the server and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the server cannot be reached, the
    /// greeting cannot be read or parsed, or the greeting is negative.
    pub async fn connect(config: &Config) -> Result<Self> {
        let stream = connect(config).await?;
        Self::from_stream(stream, config).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Starts a session on an already connected stream by reading the
    /// greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the greeting cannot be read or
    /// parsed, or is negative.
    pub async fn from_stream(stream: S, config: &Config) -> Result<Self> {
        let mut framed = FramedStream::new(stream);
        framed.set_timeouts(config.send_timeout, config.receive_timeout);

        let greeting = match bounded(config.transaction_timeout, framed.read_status()).await {
            Ok(status) => status,
            Err(Error::ProtocolViolation(message)) => {
                return Err(Error::connection(
                    format!("unparsable greeting: {message}"),
                    None,
                ));
            }
            Err(e) => return Err(Error::connection("failed to receive greeting", Some(e))),
        };

        if !greeting.is_ok() {
            return Err(Error::connection(
                format!(
                    "connection refused or establishment failed: {}",
                    greeting.text
                ),
                None,
            ));
        }

        let timestamp = parse_timestamp(&greeting.text);
        tracing::debug!(%greeting, apop = timestamp.is_some(), "greeting received");

        let authority = Authority::new(
            config.host.clone(),
            config.port,
            config.security == Security::Implicit,
        );
        tracing::info!(%authority, "now in authorization state");

        Ok(Self {
            connection: tokio::sync::Mutex::new(Some(framed)),
            shared: Mutex::new(Shared {
                state: SessionState::Authorization,
                secure: config.security == Security::Implicit,
                capabilities: Arc::new(CapabilitySet::new()),
                timestamp,
                authority,
                pending_user: None,
                transaction_timeout: config.transaction_timeout,
                send_timeout: config.send_timeout,
                receive_timeout: config.receive_timeout,
                handles_incapable_as_error: false,
            }),
            mechanisms: Arc::new(MechanismRegistry::default()),
        })
    }

    /// Replaces the SASL mechanism registry used by [`Session::auth`].
    #[must_use]
    pub fn with_mechanisms(mut self, mechanisms: Arc<MechanismRegistry>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Returns the SASL mechanism registry.
    #[must_use]
    pub fn mechanisms(&self) -> &MechanismRegistry {
        &self.mechanisms
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared().state
    }

    /// Returns true once the connection is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.shared().secure
    }

    /// Returns the capabilities from the last CAPA, empty before the first.
    #[must_use]
    pub fn capabilities(&self) -> Arc<CapabilitySet> {
        Arc::clone(&self.shared().capabilities)
    }

    /// Returns the APOP timestamp from the greeting, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<String> {
        self.shared().timestamp.clone()
    }

    /// Returns true if the greeting offered APOP.
    #[must_use]
    pub fn apop_available(&self) -> bool {
        self.shared().timestamp.is_some()
    }

    /// Returns the identity of this session.
    ///
    /// Username and mechanism are filled in once authenticated.
    #[must_use]
    pub fn authority(&self) -> Authority {
        self.shared().authority.clone()
    }

    /// Returns true while a command is in flight.
    #[must_use]
    pub fn is_transaction_in_progress(&self) -> bool {
        self.connection.try_lock().is_err()
    }

    /// Returns the bound on one full command cycle.
    #[must_use]
    pub fn transaction_timeout(&self) -> Option<Duration> {
        self.shared().transaction_timeout
    }

    /// Sets the bound on one full command cycle. `None` waits forever.
    pub fn set_transaction_timeout(&self, timeout: Option<Duration>) {
        self.shared().transaction_timeout = timeout;
    }

    /// Returns the bound on each write.
    #[must_use]
    pub fn send_timeout(&self) -> Option<Duration> {
        self.shared().send_timeout
    }

    /// Sets the bound on each write. `None` waits forever.
    pub fn set_send_timeout(&self, timeout: Option<Duration>) {
        self.shared().send_timeout = timeout;
    }

    /// Returns the bound on each read.
    #[must_use]
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.shared().receive_timeout
    }

    /// Sets the bound on each read. `None` waits forever.
    pub fn set_receive_timeout(&self, timeout: Option<Duration>) {
        self.shared().receive_timeout = timeout;
    }

    /// Returns true if commands needing an unadvertised capability fail
    /// with [`Error::Incapable`] instead of being sent.
    #[must_use]
    pub fn handles_incapable_as_error(&self) -> bool {
        self.shared().handles_incapable_as_error
    }

    /// Sets whether missing capabilities are reported as errors.
    pub fn set_handles_incapable_as_error(&self, value: bool) {
        self.shared().handles_incapable_as_error = value;
    }

    /// Fetches the server capabilities (CAPA) and replaces the stored set.
    ///
    /// A negative reply stores an empty set and is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected, busy, or the
    /// exchange fails.
    pub async fn capa(&self) -> Result<CommandResult<Arc<CapabilitySet>>> {
        let reply = self.execute(&Command::Capa, None).await?;

        let capabilities = Arc::new(match &reply.block {
            Some(block) if reply.status.is_ok() => CapabilitySet::from_lines(block_lines(block)),
            _ => CapabilitySet::new(),
        });
        self.shared().capabilities = Arc::clone(&capabilities);
        tracing::debug!(count = capabilities.len(), "capabilities refreshed");

        Ok(CommandResult::from_status(reply.status, || capabilities))
    }

    /// Upgrades the connection with STLS and refreshes capabilities.
    ///
    /// Already secure connections are left alone. A refused or failed
    /// upgrade closes the session: the plaintext channel is no longer
    /// trusted afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upgrade`] if the server refuses STLS or `upgrader`
    /// fails, and the usual state, capability and transport errors.
    pub async fn stls<U>(&self, upgrader: &U) -> Result<CommandResult>
    where
        U: UpgradeStream<S> + ?Sized,
    {
        self.ensure(Some(SessionState::Authorization))?;
        let secure = self.is_secure();
        if secure {
            return Ok(CommandResult::already_satisfied(
                "connection is already secure",
            ));
        }

        let command = Command::Stls;
        command.validate()?;
        self.require(&command)?;

        let host = self.shared().authority.host.clone();
        let mut flight = self.begin()?;
        let limit = flight.limit;
        let reply = bounded(limit, transact(flight.stream()?, &command)).await?;

        if !reply.status.is_ok() {
            flight.close();
            return Err(Error::upgrade(
                format!("server refused STLS: {}", reply.status.text),
                None,
            ));
        }

        let plain = flight.take()?.into_inner();
        let upgraded = match bounded(limit, upgrader.upgrade(&host, plain)).await {
            Ok(stream) => stream,
            Err(e) => {
                flight.close();
                return Err(Error::upgrade("TLS negotiation failed", Some(e)));
            }
        };

        flight.restore(FramedStream::new(upgraded));
        flight.commit();
        {
            let mut shared = self.shared();
            shared.secure = true;
            shared.capabilities = Arc::new(CapabilitySet::new());
        }
        tracing::info!(%host, "connection upgraded with STLS");

        self.capa().await?;
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Sends an arbitrary command in any connected state.
    ///
    /// With `multiline` set, a positive reply is followed by a block, which
    /// is returned de-stuffed.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be sent as one line, the
    /// session is not connected or busy, or the exchange fails.
    pub async fn command(
        &self,
        verb: &str,
        arguments: &[&str],
        multiline: bool,
    ) -> Result<CommandResult<Option<Bytes>>> {
        let command = Command::Generic {
            verb: verb.to_string(),
            arguments: arguments.iter().map(ToString::to_string).collect(),
            multiline,
        };
        let reply = self.execute(&command, None).await?;
        Ok(CommandResult::from_status(reply.status, || reply.block))
    }

    /// Ends the session with QUIT.
    ///
    /// In Transaction state the server commits deletions. The connection is
    /// closed whatever the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is busy or the exchange fails; the
    /// session is Not Connected afterwards either way.
    pub async fn quit(&self) -> Result<CommandResult> {
        if self.state() == SessionState::NotConnected {
            return Ok(CommandResult::already_satisfied("already logged out"));
        }

        let mut flight = self.begin()?;
        let limit = flight.limit;
        let reply = bounded(limit, transact(flight.stream()?, &Command::Quit)).await;

        if let Ok(stream) = flight.stream() {
            let shutdown = async { stream.get_mut().shutdown().await.map_err(Error::from) };
            if let Err(e) = bounded(limit, shutdown).await {
                tracing::debug!(?e, "shutdown after QUIT failed");
            }
        }
        flight.close();

        Ok(CommandResult::from_status(reply?.status, || ()))
    }

    /// Disconnects, sending QUIT if possible.
    ///
    /// Always leaves the session Not Connected; calling it again is a no-op.
    pub async fn disconnect(&self) {
        if let Err(e) = self.quit().await {
            tracing::debug!(?e, "QUIT failed during disconnect");
        }

        if let Ok(mut connection) = self.connection.try_lock() {
            *connection = None;
        }
        self.set_state(SessionState::NotConnected);
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let mut shared = self.shared();
        if shared.state != state {
            tracing::info!(from = %shared.state, to = %state, "session state changed");
            shared.state = state;
        }
    }

    /// Checks that the session is connected and, if given, in `required`.
    fn ensure(&self, required: Option<SessionState>) -> Result<SessionState> {
        let state = self.state();
        match required {
            _ if state == SessionState::NotConnected => Err(Error::not_connected()),
            Some(required) if required != state => Err(Error::ProtocolViolation(format!(
                "not in {required} state"
            ))),
            _ => Ok(state),
        }
    }

    /// Fails with [`Error::Incapable`] if the server lacks what `command`
    /// needs and the session is configured to care.
    fn require(&self, command: &Command) -> Result<()> {
        let shared = self.shared();
        if shared.handles_incapable_as_error && !shared.capabilities.is_capable_of(command) {
            let what = match command {
                Command::Auth { mechanism, .. } => format!("AUTH {mechanism}"),
                _ => command.verb().to_string(),
            };
            return Err(Error::Incapable(what));
        }
        Ok(())
    }

    /// Claims the connection for one command.
    fn begin(&self) -> Result<InFlight<'_, S>> {
        let connection = self.connection.try_lock().map_err(|_| {
            Error::InvalidOperation("another transaction is in progress".to_string())
        })?;

        let (limit, send, receive) = {
            let shared = self.shared();
            (
                shared.transaction_timeout,
                shared.send_timeout,
                shared.receive_timeout,
            )
        };

        let mut flight = InFlight {
            connection,
            shared: &self.shared,
            limit,
            settled: false,
        };
        match flight.connection.as_mut() {
            Some(stream) => stream.set_timeouts(send, receive),
            None => {
                flight.settled = true;
                return Err(Error::not_connected());
            }
        }
        Ok(flight)
    }

    /// Runs one command: state check, local validation, capability check,
    /// then the exchange under the transaction timeout.
    async fn execute(&self, command: &Command, required: Option<SessionState>) -> Result<Reply> {
        self.ensure(required)?;
        command.validate()?;
        self.require(command)?;

        let mut flight = self.begin()?;
        let limit = flight.limit;
        let reply = bounded(limit, transact(flight.stream()?, command)).await?;
        flight.commit();
        Ok(reply)
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Session")
            .field("authority", &shared.authority.to_string())
            .field("state", &shared.state)
            .field("secure", &shared.secure)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of the connection for one command.
///
/// Dropping the guard before [`InFlight::commit`] closes the connection:
/// whatever was half-sent or half-read cannot be resynchronized.
struct InFlight<'a, S> {
    connection: tokio::sync::MutexGuard<'a, Option<FramedStream<S>>>,
    shared: &'a Mutex<Shared>,
    limit: Option<Duration>,
    settled: bool,
}

impl<S> InFlight<'_, S> {
    fn stream(&mut self) -> Result<&mut FramedStream<S>> {
        self.connection.as_mut().ok_or_else(Error::not_connected)
    }

    fn take(&mut self) -> Result<FramedStream<S>> {
        self.connection.take().ok_or_else(Error::not_connected)
    }

    fn restore(&mut self, stream: FramedStream<S>) {
        *self.connection = Some(stream);
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the connection after a completed exchange.
    fn commit(mut self) {
        self.settled = true;
        // A concurrent disconnect() may have given up on this connection.
        if self.shared().state == SessionState::NotConnected {
            *self.connection = None;
        }
    }

    /// Drops the connection after a deliberate close.
    fn close(mut self) {
        self.settled = true;
        *self.connection = None;
        let mut shared = self.shared();
        if shared.state != SessionState::NotConnected {
            tracing::info!(authority = %shared.authority, "session closed");
            shared.state = SessionState::NotConnected;
        }
    }
}

impl<S> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        *self.connection = None;
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.state = SessionState::NotConnected;
        tracing::warn!(authority = %shared.authority, "transaction failed, connection closed");
    }
}

/// Writes `command` and reads its reply, including any block.
async fn transact<S>(stream: &mut FramedStream<S>, command: &Command) -> Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_command(command).await?;
    let status = stream.read_status().await?;

    if status.is_continuation() {
        return Err(Error::ProtocolViolation(format!(
            "unexpected continuation in reply to {}",
            command.verb()
        )));
    }

    let block = if status.is_ok() && command.is_multiline() {
        let hint = match command {
            Command::Retr(_) | Command::Top { .. } => parse_octet_count(&status.text),
            _ => None,
        };
        Some(stream.read_block(hint).await?)
    } else {
        None
    };

    Ok(Reply { status, block })
}

/// Runs `fut` under the transaction timeout.
async fn bounded<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            tracing::warn!(?limit, "transaction timed out");
            Error::Timeout(format!("transaction did not complete within {limit:?}"))
        })?,
        None => fut.await,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};
    use tokio_test::io::Builder;

    use super::*;
    use crate::connection::UpgradeFuture;
    use crate::types::Outcome;

    fn config() -> Config {
        Config::builder("pop.example.com")
            .security(Security::None)
            .build()
    }

    /// Starts a session over an in-memory pipe and returns the server end.
    async fn piped(greeting: &[u8]) -> (Session<DuplexStream>, DuplexStream) {
        let (client, mut server) = duplex(4096);
        server.write_all(greeting).await.unwrap();
        let session = Session::from_stream(client, &config()).await.unwrap();
        (session, server)
    }

    mod greeting_tests {
        use super::*;

        #[tokio::test]
        async fn positive_greeting() {
            let mock = Builder::new().read(b"+OK POP3 server ready\r\n").build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            assert_eq!(session.state(), SessionState::Authorization);
            assert!(!session.apop_available());
            assert!(!session.is_secure());
            assert!(session.capabilities().is_empty());
            assert_eq!(session.authority().to_string(), "pop://pop.example.com:110");
        }

        #[tokio::test]
        async fn timestamp_enables_apop() {
            let mock = Builder::new()
                .read(b"+OK POP3 server ready <1896.697170952@dbc.mtview.ca.us>\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            assert!(session.apop_available());
            assert_eq!(
                session.timestamp().as_deref(),
                Some("<1896.697170952@dbc.mtview.ca.us>")
            );
        }

        #[tokio::test]
        async fn negative_greeting() {
            let mock = Builder::new().read(b"-ERR go away\r\n").build();
            let err = Session::from_stream(mock, &config()).await.unwrap_err();

            match err {
                Error::Connection { message, source } => {
                    assert!(message.contains("go away"));
                    assert!(source.is_none());
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn unparsable_greeting() {
            let mock = Builder::new().read(b"hello there\r\n").build();
            let err = Session::from_stream(mock, &config()).await.unwrap_err();
            assert!(matches!(err, Error::Connection { source: None, .. }));
        }

        #[tokio::test]
        async fn closed_before_greeting() {
            let mock = Builder::new().build();
            let err = Session::from_stream(mock, &config()).await.unwrap_err();
            assert!(matches!(err, Error::Connection { source: Some(_), .. }));
        }
    }

    mod capa_tests {
        use super::*;

        #[tokio::test]
        async fn capa_replaces_set() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"CAPA\r\n")
                .read(b"+OK Capability list follows\r\nTOP\r\nUSER\r\nSASL CRAM-MD5 KERBEROS_V4\r\n.\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            let result = session.capa().await.unwrap();
            assert!(result.is_ok());
            let capabilities = session.capabilities();
            assert!(capabilities.has("top"));
            assert!(capabilities.has_argument("SASL", "cram-md5"));
            assert_eq!(capabilities.len(), 3);
        }

        #[tokio::test]
        async fn capa_rejected_yields_empty_set() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"CAPA\r\n")
                .read(b"-ERR unknown command\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            let result = session.capa().await.unwrap();
            assert!(result.is_rejected());
            assert!(session.capabilities().is_empty());
            assert_eq!(session.state(), SessionState::Authorization);
        }
    }

    mod guard_tests {
        use super::*;

        #[tokio::test]
        async fn transaction_commands_need_transaction_state() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            let err = session.stat().await.unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation(msg) if msg == "not in transaction state"));
            assert_eq!(session.state(), SessionState::Authorization);
        }

        #[tokio::test]
        async fn incapable_sends_nothing() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = Session::from_stream(mock, &config()).await.unwrap();
            session.set_handles_incapable_as_error(true);

            let err = session.stls(&NeverUpgrade).await.unwrap_err();
            assert!(matches!(err, Error::Incapable(what) if what == "STLS"));
            assert_eq!(session.state(), SessionState::Authorization);
        }

        #[tokio::test(start_paused = true)]
        async fn timeout_closes_session() {
            let (session, mut server) = piped(b"+OK ready\r\n").await;
            session.set_transaction_timeout(Some(Duration::from_millis(50)));

            let err = session.command("NOOP", &[], false).await.unwrap_err();
            assert!(err.is_timeout());
            assert_eq!(session.state(), SessionState::NotConnected);

            let mut sent = vec![0u8; 6];
            server.read_exact(&mut sent).await.unwrap();
            assert_eq!(sent, b"NOOP\r\n");

            let err = session.command("NOOP", &[], false).await.unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation(msg) if msg == "not connected"));
        }

        #[tokio::test(start_paused = true)]
        async fn concurrent_command_is_rejected() {
            let (session, _server) = piped(b"+OK ready\r\n").await;
            session.set_transaction_timeout(Some(Duration::from_millis(200)));
            let session = Arc::new(session);

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
        }

        #[tokio::test(start_paused = true)]
        async fn receive_timeout_closes_session() {
            let (session, _server) = piped(b"+OK ready\r\n").await;
            session.set_transaction_timeout(None);
            session.set_receive_timeout(Some(Duration::from_millis(50)));

            let err = session.command("NOOP", &[], false).await.unwrap_err();
            assert!(matches!(&err, Error::Timeout(msg) if msg.starts_with("receive")));
            assert_eq!(session.state(), SessionState::NotConnected);

            let err = session.command("NOOP", &[], false).await.unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation(msg) if msg == "not connected"));
        }

        #[tokio::test(start_paused = true)]
        async fn send_timeout_closes_session() {
            // The pipe holds fewer bytes than the command, and nobody reads.
            let (client, mut server) = duplex(8);
            server.write_all(b"+OK\r\n").await.unwrap();
            let session = Session::from_stream(client, &config()).await.unwrap();
            session.set_transaction_timeout(None);
            session.set_send_timeout(Some(Duration::from_millis(50)));

            let argument = "x".repeat(64);
            let err = session
                .command("NOOP", &[argument.as_str()], false)
                .await
                .unwrap_err();
            assert!(matches!(&err, Error::Timeout(msg) if msg.starts_with("send")));
            assert_eq!(session.state(), SessionState::NotConnected);

            let err = session.stat().await.unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation(msg) if msg == "not connected"));
            drop(server);
        }

        #[tokio::test]
        async fn unexpected_continuation_is_a_violation() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"NOOP\r\n")
                .read(b"+ \r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            let err = session.command("NOOP", &[], false).await.unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation(_)));
            assert_eq!(session.state(), SessionState::NotConnected);
        }
    }

    mod stls_tests {
        use super::*;

        struct Passthrough;

        impl UpgradeStream<DuplexStream> for Passthrough {
            fn upgrade<'a>(
                &'a self,
                _host: &'a str,
                stream: DuplexStream,
            ) -> UpgradeFuture<'a, DuplexStream> {
                Box::pin(async move { Ok(stream) })
            }
        }

        #[tokio::test]
        async fn upgrade_refreshes_capabilities() {
            let (session, mut server) = piped(b"+OK ready\r\n").await;
            let script = tokio::spawn(async move {
                let mut buf = vec![0u8; 6];
                server.read_exact(&mut buf).await.unwrap();
                assert_eq!(buf, b"STLS\r\n");
                server.write_all(b"+OK begin TLS\r\n").await.unwrap();
                server.read_exact(&mut buf).await.unwrap();
                assert_eq!(buf, b"CAPA\r\n");
                server
                    .write_all(b"+OK\r\nUSER\r\nSASL PLAIN\r\n.\r\n")
                    .await
                    .unwrap();
                server
            });

            let result = session.stls(&Passthrough).await.unwrap();
            assert!(result.is_ok());
            assert!(session.is_secure());
            assert!(session.capabilities().has_argument("SASL", "PLAIN"));
            drop(script.await.unwrap());

            let again = session.stls(&Passthrough).await.unwrap();
            assert!(matches!(again.outcome(), Outcome::AlreadySatisfied { .. }));
        }

        #[tokio::test]
        async fn refused_upgrade_closes_session() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"STLS\r\n")
                .read(b"-ERR not now\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            let err = session.stls(&NeverUpgrade).await.unwrap_err();
            assert!(matches!(err, Error::Upgrade { source: None, .. }));
            assert_eq!(session.state(), SessionState::NotConnected);
        }

        #[tokio::test]
        async fn failed_negotiation_closes_session() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"STLS\r\n")
                .read(b"+OK go ahead\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            let err = session.stls(&NeverUpgrade).await.unwrap_err();
            assert!(matches!(err, Error::Upgrade { source: Some(_), .. }));
            assert_eq!(session.state(), SessionState::NotConnected);
            assert!(!session.is_secure());
        }
    }

    mod quit_tests {
        use super::*;

        #[tokio::test]
        async fn quit_closes_and_is_idempotent() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"QUIT\r\n")
                .read(b"+OK bye\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            assert!(session.quit().await.unwrap().is_ok());
            assert_eq!(session.state(), SessionState::NotConnected);

            let again = session.quit().await.unwrap();
            assert!(matches!(again.outcome(), Outcome::AlreadySatisfied { .. }));
            session.disconnect().await;
            assert_eq!(session.state(), SessionState::NotConnected);
        }

        #[tokio::test]
        async fn disconnect_succeeds_when_quit_fails() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"QUIT\r\n")
                .build();
            let session = Session::from_stream(mock, &config()).await.unwrap();

            session.disconnect().await;
            assert_eq!(session.state(), SessionState::NotConnected);
        }
    }

    /// Upgrader that always fails.
    struct NeverUpgrade;

    impl<S: Send + 'static> UpgradeStream<S> for NeverUpgrade {
        fn upgrade<'a>(&'a self, _host: &'a str, _stream: S) -> UpgradeFuture<'a, S> {
            Box::pin(async { Err(Error::InvalidOperation("no TLS in tests".to_string())) })
        }
    }
}
