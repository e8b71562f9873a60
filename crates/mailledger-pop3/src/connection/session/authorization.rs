//! Authorization-state commands: USER/PASS, APOP and AUTH.

use mailledger_sasl::{Credential, Mechanism};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Session, bounded};
use crate::auth::{CredentialResolver, apop_digest, exchange};
use crate::command::Command;
use crate::types::{AuthType, CommandResult, SessionState};
use crate::{Error, Result};

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Sends USER.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected, busy, or the
    /// exchange fails.
    pub async fn user(&self, username: &str) -> Result<CommandResult> {
        if let Some(done) = self.already_authenticated()? {
            return Ok(done);
        }

        let command = Command::User(username.to_string());
        let reply = self
            .execute(&command, Some(SessionState::Authorization))
            .await?;
        if reply.status.is_ok() {
            self.shared().pending_user = Some(username.to_string());
        }
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Sends PASS for the username accepted by the last USER.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected, busy, or the
    /// exchange fails.
    pub async fn pass(&self, password: &str) -> Result<CommandResult> {
        if let Some(done) = self.already_authenticated()? {
            return Ok(done);
        }

        let pending = self.shared().pending_user.clone();
        let Some(username) = pending else {
            return Ok(CommandResult::protocol_error(
                "USER must be accepted before PASS",
            ));
        };

        let command = Command::Pass(password.to_string());
        let reply = self
            .execute(&command, Some(SessionState::Authorization))
            .await?;
        if reply.status.is_ok() {
            self.authenticated(Some(username), AuthType::Plaintext);
        } else {
            self.shared().pending_user = None;
            tracing::warn!(%username, status = %reply.status, "PASS rejected");
        }
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Logs in with USER and PASS.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected, busy, or an
    /// exchange fails.
    pub async fn login(&self, username: &str, password: &str) -> Result<CommandResult> {
        let user = self.user(username).await?;
        if !user.is_ok() {
            return Ok(user);
        }
        self.pass(password).await
    }

    /// Logs in with USER and PASS using a resolved credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected, busy, or an
    /// exchange fails.
    pub async fn login_with(
        &self,
        credentials: &dyn CredentialResolver,
        username: Option<&str>,
    ) -> Result<CommandResult> {
        if let Some(done) = self.already_authenticated()? {
            return Ok(done);
        }

        let (host, port) = self.endpoint();
        let Some(credential) = credentials.resolve(&host, port, username, None) else {
            return Ok(CommandResult::protocol_error("credential not found"));
        };
        self.login(credential.username(), credential.secret()).await
    }

    /// Authenticates with APOP using the greeting timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Incapable`] if the greeting had no timestamp and
    /// missing capabilities are errors, and the usual state and transport
    /// errors.
    pub async fn apop(
        &self,
        credentials: &dyn CredentialResolver,
        username: Option<&str>,
    ) -> Result<CommandResult> {
        if let Some(done) = self.already_authenticated()? {
            return Ok(done);
        }

        let Some(timestamp) = self.timestamp() else {
            if self.handles_incapable_as_error() {
                return Err(Error::Incapable("APOP".to_string()));
            }
            return Ok(CommandResult::protocol_error(
                "greeting carried no APOP timestamp",
            ));
        };

        let (host, port) = self.endpoint();
        let Some(credential) = credentials.resolve(&host, port, username, Some("APOP")) else {
            return Ok(CommandResult::protocol_error("credential not found"));
        };

        let command = Command::Apop {
            name: credential.username().to_string(),
            digest: apop_digest(&timestamp, credential.secret()),
        };
        let reply = self
            .execute(&command, Some(SessionState::Authorization))
            .await?;
        if reply.status.is_ok() {
            self.authenticated(Some(credential.username().to_string()), AuthType::Apop);
        } else {
            tracing::warn!(username = credential.username(), status = %reply.status, "APOP rejected");
        }
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Authenticates with the named SASL mechanism from the registry.
    ///
    /// ANONYMOUS-style mechanisms use `username` (or `anonymous@`) as the
    /// trace string instead of resolving a credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Incapable`] if the server does not advertise the
    /// mechanism and missing capabilities are errors,
    /// [`Error::MalformedExchange`] if the exchange breaks down (the session
    /// is closed then), and the usual state and transport errors.
    pub async fn auth(
        &self,
        credentials: &dyn CredentialResolver,
        username: Option<&str>,
        mechanism: &str,
    ) -> Result<CommandResult> {
        if let Some(done) = self.already_authenticated()? {
            return Ok(done);
        }

        let request = Command::Auth {
            mechanism: mechanism.to_string(),
            initial_response: None,
        };
        request.validate()?;
        self.require(&request)?;

        let unsupported = || {
            CommandResult::protocol_error(format!(
                "unsupported authentication mechanism: {mechanism}"
            ))
        };
        let Some(info) = self.mechanisms.info(mechanism) else {
            return Ok(unsupported());
        };

        let (credential, identity) = if info.anonymous {
            (Credential::anonymous(username.unwrap_or("anonymous@")), None)
        } else {
            let (host, port) = self.endpoint();
            match credentials.resolve(&host, port, username, Some(mechanism)) {
                Some(credential) => {
                    let identity = credential.username().to_string();
                    (credential, Some(identity))
                }
                None => return Ok(CommandResult::protocol_error("credential not found")),
            }
        };

        let Some(mut instance) = self.mechanisms.create(mechanism, credential) else {
            return Ok(unsupported());
        };
        self.auth_with(instance.as_mut(), identity.as_deref()).await
    }

    /// Runs an AUTH exchange with a caller-supplied mechanism.
    ///
    /// `username` is recorded in the session identity on success.
    ///
    /// # Errors
    ///
    /// Same as [`Session::auth`].
    pub async fn auth_with(
        &self,
        mechanism: &mut dyn Mechanism,
        username: Option<&str>,
    ) -> Result<CommandResult> {
        if let Some(done) = self.already_authenticated()? {
            return Ok(done);
        }

        let request = Command::Auth {
            mechanism: mechanism.name().to_string(),
            initial_response: None,
        };
        request.validate()?;
        self.require(&request)?;

        let mut flight = self.begin()?;
        let limit = flight.limit;
        let (status, responses) = bounded(limit, exchange::run(flight.stream()?, mechanism)).await?;
        flight.commit();

        let name = mechanism.name().to_string();
        if status.is_ok() {
            self.authenticated(username.map(str::to_string), AuthType::Sasl(name));
        } else {
            tracing::warn!(mechanism = %name, %status, "authentication rejected");
        }
        Ok(CommandResult::from_status_with(status, responses, |_| Ok(())))
    }

    /// Checks the state before an authentication command.
    ///
    /// Returns a ready result when the session is already authenticated.
    fn already_authenticated(&self) -> Result<Option<CommandResult>> {
        match self.state() {
            SessionState::NotConnected => Err(Error::not_connected()),
            SessionState::Transaction => Ok(Some(CommandResult::already_satisfied(
                "already authenticated",
            ))),
            SessionState::Authorization => Ok(None),
        }
    }

    fn endpoint(&self) -> (String, u16) {
        let shared = self.shared();
        (shared.authority.host.clone(), shared.authority.port)
    }

    /// Records the identity and enters Transaction state.
    fn authenticated(&self, username: Option<String>, auth_type: AuthType) {
        let mut shared = self.shared();
        if shared.state != SessionState::Authorization {
            return;
        }

        shared.pending_user = None;
        if username.is_some() {
            shared.authority.username = username;
        }
        shared.authority.auth_type = Some(auth_type);
        shared.state = SessionState::Transaction;
        tracing::info!(authority = %shared.authority, "now in transaction state");
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
    use mailledger_sasl::mechanisms::Login;
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::auth::StaticCredentials;
    use crate::connection::{Config, Security};
    use crate::types::Outcome;

    async fn session(mock: Mock) -> Session<Mock> {
        let config = Config::builder("pop.example.com")
            .security(Security::None)
            .build();
        Session::from_stream(mock, &config).await.unwrap()
    }

    mod plaintext_tests {
        use super::*;

        #[tokio::test]
        async fn login_enters_transaction() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"USER bob\r\n")
                .read(b"+OK\r\n")
                .write(b"PASS secret\r\n")
                .read(b"+OK maildrop locked\r\n")
                .build();
            let session = session(mock).await;

            let result = session.login("bob", "secret").await.unwrap();
            assert!(result.is_ok());
            assert_eq!(session.state(), SessionState::Transaction);
            assert_eq!(
                session.authority().to_string(),
                "pop://bob@pop.example.com:110"
            );

            let again = session.user("bob").await.unwrap();
            assert!(matches!(again.outcome(), Outcome::AlreadySatisfied { .. }));
        }

        #[tokio::test]
        async fn pass_without_user() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = session(mock).await;

            let result = session.pass("secret").await.unwrap();
            assert!(matches!(result.outcome(), Outcome::ProtocolError { .. }));
            assert_eq!(session.state(), SessionState::Authorization);
        }

        #[tokio::test]
        async fn rejected_pass_stays_in_authorization() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"USER bob\r\n")
                .read(b"+OK\r\n")
                .write(b"PASS wrong\r\n")
                .read(b"-ERR [AUTH] invalid password\r\n")
                .build();
            let session = session(mock).await;

            let result = session.login("bob", "wrong").await.unwrap();
            assert!(result.is_rejected());
            assert_eq!(result.text(), "invalid password");
            assert_eq!(session.state(), SessionState::Authorization);
        }

        #[tokio::test]
        async fn missing_credential() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("bob", "secret").for_host("other.example.com");

            let result = session.login_with(&credentials, None).await.unwrap();
            assert!(
                matches!(result.outcome(), Outcome::ProtocolError { description } if description == "credential not found")
            );
        }
    }

    mod apop_tests {
        use super::*;

        #[tokio::test]
        async fn apop_rfc_example() {
            let mock = Builder::new()
                .read(b"+OK POP3 server ready <1896.697170952@dbc.mtview.ca.us>\r\n")
                .write(b"APOP mrose c4c9334bac560ecc979e58001b3e22fb\r\n")
                .read(b"+OK mrose's maildrop has 2 messages (320 octets)\r\n")
                .build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("mrose", "tanstaaf");

            let result = session.apop(&credentials, None).await.unwrap();
            assert!(result.is_ok());
            assert_eq!(session.state(), SessionState::Transaction);
            assert_eq!(
                session.authority().to_string(),
                "pop://mrose;AUTH=+APOP@pop.example.com:110"
            );
        }

        #[tokio::test]
        async fn apop_without_timestamp() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("mrose", "tanstaaf");

            let result = session.apop(&credentials, None).await.unwrap();
            assert!(matches!(result.outcome(), Outcome::ProtocolError { .. }));

            session.set_handles_incapable_as_error(true);
            let err = session.apop(&credentials, None).await.unwrap_err();
            assert!(matches!(err, Error::Incapable(_)));
        }
    }

    mod sasl_tests {
        use super::*;

        #[tokio::test]
        async fn plain_with_initial_response() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
                .read(b"+OK welcome\r\n")
                .build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("bob", "secret");

            let result = session.auth(&credentials, None, "plain").await.unwrap();
            assert!(result.is_ok());
            assert_eq!(
                session.authority().to_string(),
                "pop://bob;AUTH=PLAIN@pop.example.com:110"
            );
        }

        #[tokio::test]
        async fn cram_md5_challenge() {
            // RFC 2195 example exchange.
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"AUTH CRAM-MD5\r\n")
                .read(b"+ PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
                .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
                .read(b"+OK CRAM authentication successful\r\n")
                .build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("tim", "tanstaaftanstaaf");

            let result = session.auth(&credentials, None, "CRAM-MD5").await.unwrap();
            assert!(result.is_ok());
            assert_eq!(result.responses().len(), 2);
            assert_eq!(session.state(), SessionState::Transaction);
        }

        #[tokio::test]
        async fn unknown_mechanism() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("bob", "secret");

            let result = session.auth(&credentials, None, "GSSAPI").await.unwrap();
            assert!(matches!(result.outcome(), Outcome::ProtocolError { .. }));
        }

        #[tokio::test]
        async fn malformed_challenge_closes_session() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"AUTH CRAM-MD5\r\n")
                .read(b"+ not*base64\r\n")
                .write(b"*\r\n")
                .build();
            let session = session(mock).await;
            let credentials = StaticCredentials::new("tim", "tanstaaftanstaaf");

            let err = session
                .auth(&credentials, None, "CRAM-MD5")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MalformedExchange(_)));
            assert_eq!(session.state(), SessionState::NotConnected);
        }

        #[tokio::test]
        async fn incapable_mechanism() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = session(mock).await;
            session.set_handles_incapable_as_error(true);
            let credentials = StaticCredentials::new("bob", "secret");

            let err = session.auth(&credentials, None, "PLAIN").await.unwrap_err();
            assert!(matches!(err, Error::Incapable(what) if what == "AUTH PLAIN"));
        }

        #[tokio::test]
        async fn incapable_checked_before_credentials() {
            let mock = Builder::new().read(b"+OK ready\r\n").build();
            let session = session(mock).await;
            session.set_handles_incapable_as_error(true);
            let credentials = StaticCredentials::new("bob", "secret").for_host("elsewhere.example");

            let err = session
                .auth(&credentials, None, "CRAM-MD5")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Incapable(what) if what == "AUTH CRAM-MD5"));
            assert_eq!(session.state(), SessionState::Authorization);
        }

        #[tokio::test]
        async fn early_ok_does_not_authenticate() {
            let mock = Builder::new()
                .read(b"+OK ready\r\n")
                .write(b"AUTH LOGIN\r\n")
                .read(b"+ VXNlcm5hbWU6\r\n")
                .write(b"Ym9i\r\n")
                .read(b"+OK\r\n")
                .build();
            let session = session(mock).await;
            let mut mechanism = Login::new(Credential::new("bob", "secret"));

            let err = session
                .auth_with(&mut mechanism, Some("bob"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MalformedExchange(_)));
            assert_ne!(session.state(), SessionState::Transaction);
            assert_eq!(session.state(), SessionState::NotConnected);
            assert!(session.authority().auth_type.is_none());
        }
    }
}
