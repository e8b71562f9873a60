//! The authentication ladder.
//!
//! Given a [`ClientProfile`], authentication proceeds as follows:
//!
//! 1. An explicitly named mechanism (SASL, APOP or plaintext) is used alone;
//!    its rejection is final.
//! 2. Otherwise the profile's SASL mechanisms are tried in order, skipping
//!    those the server does not advertise, anonymous ones when a username
//!    is given, and plaintext ones on an unencrypted connection unless
//!    insecure login is allowed.
//! 3. APOP, if the greeting carried a timestamp.
//! 4. USER/PASS, if plaintext is acceptable.
//!
//! Only a clean rejection moves the ladder to the next rung. A broken
//! exchange or a transport fault ends it.

use mailledger_sasl::{Credential, Mechanism};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{ClientProfile, CredentialResolver};
use crate::connection::{PopStream, Security, Session, UpgradeStream};
use crate::types::{AuthType, Capability, CommandResult, SessionState};
use crate::{Error, Result};

/// Username for plaintext anonymous access.
const ANONYMOUS_USER: &str = "anonymous";

/// Trace string sent for anonymous access.
const ANONYMOUS_TRACE: &str = "anonymous@";

/// Connects, negotiates and authenticates a new session.
///
/// On authentication failure the session is disconnected before the error
/// is returned.
///
/// # Errors
///
/// Returns [`Error::Connection`] if connecting fails,
/// [`Error::Authentication`] if every attempted path was rejected, and any
/// fault raised along the way.
pub async fn create_session(
    profile: &ClientProfile,
    credentials: &dyn CredentialResolver,
    upgrader: &dyn UpgradeStream<PopStream>,
) -> Result<Session<PopStream>> {
    let session = Session::connect(&profile.config).await?;

    match authenticate(&session, profile, credentials, upgrader).await {
        Ok(_) => Ok(session),
        Err(e) => {
            session.disconnect().await;
            Err(e)
        }
    }
}

/// Negotiates and authenticates an already connected session.
///
/// Fetches capabilities, upgrades with STLS when the profile prefers
/// encryption and the server offers it, then runs the ladder.
///
/// # Errors
///
/// Returns [`Error::Authentication`] if every attempted path was rejected
/// or the exchange broke down, and any other fault unchanged.
pub async fn authenticate<S, U>(
    session: &Session<S>,
    profile: &ClientProfile,
    credentials: &dyn CredentialResolver,
    upgrader: &U,
) -> Result<CommandResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    U: UpgradeStream<S> + ?Sized,
{
    if session.state() == SessionState::Transaction {
        return Ok(CommandResult::already_satisfied("already authenticated"));
    }
    prepare(session, profile, upgrader).await?;

    let username = profile.username.as_deref();
    let attempt = match (&profile.auth_type, username) {
        (None, None) => anonymous(session, profile).await,
        (None | Some(AuthType::SelectAppropriate), _) => {
            appropriate(session, profile, credentials).await
        }
        (Some(AuthType::Apop), _) => session.apop(credentials, username).await.map(Some),
        (Some(AuthType::Plaintext), _) => session
            .login_with(credentials, username)
            .await
            .map(Some),
        (Some(AuthType::Sasl(mechanism)), _) => session
            .auth(credentials, username, mechanism)
            .await
            .map(Some),
    };

    conclude(session, attempt)
}

/// Negotiates and authenticates with a caller-supplied mechanism, bypassing
/// the ladder.
///
/// # Errors
///
/// Same as [`authenticate`].
pub async fn authenticate_with<S, U>(
    session: &Session<S>,
    profile: &ClientProfile,
    mechanism: &mut dyn Mechanism,
    upgrader: &U,
) -> Result<CommandResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    U: UpgradeStream<S> + ?Sized,
{
    if session.state() == SessionState::Transaction {
        return Ok(CommandResult::already_satisfied("already authenticated"));
    }
    prepare(session, profile, upgrader).await?;

    let attempt = session
        .auth_with(mechanism, profile.username.as_deref())
        .await
        .map(Some);
    conclude(session, attempt)
}

/// Applies the profile's policy, fetches capabilities and upgrades if
/// preferred.
async fn prepare<S, U>(session: &Session<S>, profile: &ClientProfile, upgrader: &U) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    U: UpgradeStream<S> + ?Sized,
{
    session.set_handles_incapable_as_error(profile.handles_incapable_as_error);
    session.capa().await?;

    if profile.config.security == Security::StartTls
        && !session.is_secure()
        && session.capabilities().has(Capability::STLS)
    {
        session.stls(upgrader).await?;
    } else if profile.config.security == Security::StartTls && !session.is_secure() {
        tracing::warn!("STLS not advertised, continuing without encryption");
    }
    Ok(())
}

/// Anonymous access: SASL ANONYMOUS if advertised, then USER anonymous.
async fn anonymous<S>(session: &Session<S>, profile: &ClientProfile) -> Result<Option<CommandResult>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut last = None;

    if session
        .capabilities()
        .has_argument(Capability::SASL, "ANONYMOUS")
    {
        let mechanism = session
            .mechanisms()
            .create("ANONYMOUS", Credential::anonymous(ANONYMOUS_TRACE));
        if let Some(mut mechanism) = mechanism {
            tracing::debug!("attempting anonymous SASL authentication");
            let result = session.auth_with(mechanism.as_mut(), None).await?;
            if result.is_ok() {
                return Ok(Some(result));
            }
            last = Some(result);
        }
    }

    if session.is_secure() || profile.allow_insecure_login {
        tracing::debug!("attempting anonymous login");
        let result = session.login(ANONYMOUS_USER, ANONYMOUS_TRACE).await?;
        return Ok(Some(result));
    }
    Ok(last)
}

/// Tries each acceptable mechanism in turn.
///
/// Returns the first success, or the most informative failure.
async fn appropriate<S>(
    session: &Session<S>,
    profile: &ClientProfile,
    credentials: &dyn CredentialResolver,
) -> Result<Option<CommandResult>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let username = profile.username.as_deref();
    let allow_plaintext = session.is_secure() || profile.allow_insecure_login;
    let capabilities = session.capabilities();
    let mut last: Option<CommandResult> = None;
    let mut remember = |result: CommandResult| {
        // Keep a server rejection over a local "credential not found".
        if result.is_rejected() || last.as_ref().is_none_or(|l| !l.is_rejected()) {
            last = Some(result);
        }
    };

    for name in &profile.sasl_mechanisms {
        let Some(info) = session.mechanisms().info(name) else {
            tracing::debug!(mechanism = %name, "skipped: not implemented");
            continue;
        };
        if info.anonymous && username.is_some() {
            tracing::debug!(mechanism = %name, "skipped: anonymous with a username");
            continue;
        }
        if info.plaintext && !allow_plaintext {
            tracing::debug!(mechanism = %name, "skipped: plaintext on insecure connection");
            continue;
        }
        if !capabilities.has_argument(Capability::SASL, name) {
            tracing::debug!(mechanism = %name, "skipped: not advertised");
            continue;
        }

        tracing::debug!(mechanism = %name, "attempting SASL authentication");
        let result = session.auth(credentials, username, name).await?;
        if result.is_ok() {
            return Ok(Some(result));
        }
        tracing::warn!(mechanism = %name, reason = result.text(), "mechanism failed, trying next");
        remember(result);
    }

    if session.apop_available() {
        tracing::debug!("attempting APOP");
        let result = session.apop(credentials, username).await?;
        if result.is_ok() {
            return Ok(Some(result));
        }
        remember(result);
    }

    if allow_plaintext {
        tracing::debug!("attempting USER/PASS");
        let result = session.login_with(credentials, username).await?;
        if result.is_ok() {
            return Ok(Some(result));
        }
        remember(result);
    }

    Ok(last)
}

/// Maps the ladder's outcome onto the public contract.
fn conclude<S>(session: &Session<S>, attempt: Result<Option<CommandResult>>) -> Result<CommandResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match attempt {
        Ok(Some(result)) if result.succeeded() => {
            tracing::info!(authority = %session.authority(), "authenticated");
            Ok(result)
        }
        Ok(Some(result)) => Err(Error::Authentication {
            message: format!("authentication rejected: {}", result.text()),
            result: Some(Box::new(result)),
            source: None,
        }),
        Ok(None) => Err(Error::Authentication {
            message: "appropriate authentication mechanism not found".to_string(),
            result: None,
            source: None,
        }),
        Err(e @ Error::MalformedExchange(_)) => Err(Error::Authentication {
            message: "authentication exchange broke down".to_string(),
            result: None,
            source: Some(Box::new(e)),
        }),
        Err(e) => Err(e),
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
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::auth::StaticCredentials;
    use crate::connection::{Config, UpgradeFuture};

    /// Hands the stream back unchanged.
    struct Passthrough;

    impl UpgradeStream<Mock> for Passthrough {
        fn upgrade<'a>(&'a self, _host: &'a str, stream: Mock) -> UpgradeFuture<'a, Mock> {
            Box::pin(async move { Ok(stream) })
        }
    }

    fn config(security: Security) -> Config {
        Config::builder("pop.example.com").security(security).build()
    }

    async fn session(mock: Mock) -> Session<Mock> {
        Session::from_stream(mock, &config(Security::None)).await.unwrap()
    }

    fn profile() -> ClientProfile {
        ClientProfile::new(config(Security::None)).username("bob")
    }

    #[tokio::test]
    async fn test_login_rejected_then_plain() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSASL DIGEST-MD5 CRAM-MD5 NTLM PLAIN LOGIN ANONYMOUS\r\n.\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"+ VXNlcm5hbWU6\r\n")
            .write(b"Ym9i\r\n")
            .read(b"+ UGFzc3dvcmQ6\r\n")
            .write(b"c2VjcmV0\r\n")
            .read(b"-ERR LOGIN failed\r\n")
            .write(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
            .read(b"+OK welcome\r\n")
            .build();
        let session = session(mock).await;
        let profile = profile()
            .sasl_mechanisms(["ANONYMOUS", "LOGIN", "PLAIN"])
            .allow_insecure_login(true);
        let credentials = StaticCredentials::new("bob", "secret");

        let result = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(session.state(), SessionState::Transaction);
        assert_eq!(
            session.authority().to_string(),
            "pop://bob;AUTH=PLAIN@pop.example.com:110"
        );
    }

    #[tokio::test]
    async fn test_plaintext_skipped_on_insecure_connection() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSASL PLAIN LOGIN\r\nUSER\r\n.\r\n")
            .build();
        let session = session(mock).await;
        let profile = profile().sasl_mechanisms(["PLAIN", "LOGIN"]);
        let credentials = StaticCredentials::new("bob", "secret");

        let err = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap_err();
        match err {
            Error::Authentication { message, result, .. } => {
                assert_eq!(message, "appropriate authentication mechanism not found");
                assert!(result.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Authorization);
    }

    #[tokio::test]
    async fn test_apop_fallback() {
        let mock = Builder::new()
            .read(b"+OK POP3 server ready <1896.697170952@dbc.mtview.ca.us>\r\n")
            .write(b"CAPA\r\n")
            .read(b"-ERR unknown command\r\n")
            .write(b"APOP mrose c4c9334bac560ecc979e58001b3e22fb\r\n")
            .read(b"+OK maildrop locked\r\n")
            .build();
        let session = session(mock).await;
        let profile = ClientProfile::new(config(Security::None)).username("mrose");
        let credentials = StaticCredentials::new("mrose", "tanstaaf");

        let result = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(
            session.authority().to_string(),
            "pop://mrose;AUTH=+APOP@pop.example.com:110"
        );
    }

    #[tokio::test]
    async fn test_all_rungs_rejected() {
        let mock = Builder::new()
            .read(b"+OK ready <1.2@host>\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nUSER\r\n.\r\n")
            .write(b"APOP bob df68dac4efbd2209cc50ce36148b9eb1\r\n")
            .read(b"-ERR [AUTH] bad digest\r\n")
            .write(b"USER bob\r\n")
            .read(b"+OK\r\n")
            .write(b"PASS secret\r\n")
            .read(b"-ERR [AUTH] bad password\r\n")
            .build();
        let session = session(mock).await;
        let profile = profile().allow_insecure_login(true);
        let credentials = StaticCredentials::new("bob", "secret");

        let err = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap_err();
        match err {
            Error::Authentication { result, source, .. } => {
                assert_eq!(result.unwrap().text(), "bad password");
                assert!(source.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_anonymous_sasl() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSASL ANONYMOUS\r\n.\r\n")
            .write(b"AUTH ANONYMOUS YW5vbnltb3VzQA==\r\n")
            .read(b"+OK welcome, guest\r\n")
            .build();
        let session = session(mock).await;
        let profile = ClientProfile::new(config(Security::None));
        let credentials = StaticCredentials::new("unused", "unused");

        let result = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(
            session.authority().auth_type,
            Some(AuthType::Sasl("ANONYMOUS".to_string()))
        );
    }

    #[tokio::test]
    async fn test_appropriate_without_username_uses_anonymous_mechanism() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSASL PLAIN ANONYMOUS\r\n.\r\n")
            .write(b"AUTH ANONYMOUS YW5vbnltb3VzQA==\r\n")
            .read(b"+OK\r\n")
            .build();
        let session = session(mock).await;
        let profile = ClientProfile::new(config(Security::None))
            .auth_type(AuthType::SelectAppropriate)
            .sasl_mechanisms(["PLAIN", "ANONYMOUS"]);
        let credentials = StaticCredentials::new("bob", "secret");

        let result = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(session.state(), SessionState::Transaction);
        assert!(session.authority().username.is_none());
    }

    #[tokio::test]
    async fn test_explicit_mechanism_has_no_fallback() {
        let mock = Builder::new()
            .read(b"+OK ready <1.2@host>\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSASL PLAIN\r\nUSER\r\n.\r\n")
            .write(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
            .read(b"-ERR no\r\n")
            .build();
        let session = session(mock).await;
        let profile = profile()
            .auth_type(AuthType::Sasl("PLAIN".to_string()))
            .allow_insecure_login(true);
        let credentials = StaticCredentials::new("bob", "secret");

        let err = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { result: Some(_), .. }));
        assert_eq!(session.state(), SessionState::Authorization);
    }

    #[tokio::test]
    async fn test_explicit_mechanism_not_advertised_is_incapable() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nUSER\r\n.\r\n")
            .build();
        let session = session(mock).await;
        let profile = profile()
            .auth_type(AuthType::Sasl("CRAM-MD5".to_string()))
            .handles_incapable_as_error(true);
        let credentials = StaticCredentials::new("bob", "secret").for_host("elsewhere.example");

        let err = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Incapable(what) if what == "AUTH CRAM-MD5"));
        assert_eq!(session.state(), SessionState::Authorization);
    }

    #[tokio::test]
    async fn test_malformed_exchange_ends_ladder() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSASL CRAM-MD5 PLAIN\r\nUSER\r\n.\r\n")
            .write(b"AUTH CRAM-MD5\r\n")
            .read(b"+ !!!\r\n")
            .write(b"*\r\n")
            .build();
        let session = session(mock).await;
        let profile = profile()
            .sasl_mechanisms(["CRAM-MD5", "PLAIN"])
            .allow_insecure_login(true);
        let credentials = StaticCredentials::new("bob", "secret");

        let err = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { source: Some(_), .. }));
        assert_eq!(session.state(), SessionState::NotConnected);
    }

    #[tokio::test]
    async fn test_stls_when_preferred() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nSTLS\r\nUSER\r\n.\r\n")
            .write(b"STLS\r\n")
            .read(b"+OK begin TLS negotiation\r\n")
            .write(b"CAPA\r\n")
            .read(b"+OK\r\nUSER\r\nSASL PLAIN\r\n.\r\n")
            .write(b"USER bob\r\n")
            .read(b"+OK\r\n")
            .write(b"PASS secret\r\n")
            .read(b"+OK\r\n")
            .build();
        let session = session(mock).await;
        let profile = ClientProfile::new(config(Security::StartTls))
            .username("bob")
            .sasl_mechanisms(Vec::<String>::new());
        let credentials = StaticCredentials::new("bob", "secret");

        let result = authenticate(&session, &profile, &credentials, &Passthrough)
            .await
            .unwrap();
        assert!(result.is_ok());
        assert!(session.is_secure());
        assert_eq!(
            session.authority().auth_type,
            Some(AuthType::Plaintext)
        );
    }

    #[tokio::test]
    async fn test_authenticate_with_explicit_mechanism() {
        let mock = Builder::new()
            .read(b"+OK ready\r\n")
            .write(b"CAPA\r\n")
            .read(b"-ERR\r\n")
            .write(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
            .read(b"+OK\r\n")
            .build();
        let session = session(mock).await;
        let mut mechanism =
            mailledger_sasl::mechanisms::Plain::new(Credential::new("bob", "secret"));

        let result = authenticate_with(&session, &profile(), &mut mechanism, &Passthrough)
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(session.state(), SessionState::Transaction);
    }
}
