//! The AUTH exchange loop (RFC 5034).
//!
//! Continuation lines carry base64 challenges; the client answers each with
//! a base64 line until the server sends a final `+OK` or `-ERR`. If the
//! exchange cannot go on, the client sends `*` and the exchange is reported
//! as malformed. A `+OK` only counts once the mechanism has succeeded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mailledger_sasl::{ExchangeStatus, Mechanism};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::Command;
use crate::connection::FramedStream;
use crate::types::StatusLine;
use crate::{Error, Result};

/// Drives `mechanism` to completion.
///
/// Returns the final status line and the continuation lines seen before it.
pub(crate) async fn run<S>(
    stream: &mut FramedStream<S>,
    mechanism: &mut dyn Mechanism,
) -> Result<(StatusLine, Vec<String>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = mechanism.name().to_string();

    let initial_response = if mechanism.client_first() {
        let step = mechanism
            .exchange(None)
            .map_err(|e| Error::MalformedExchange(format!("{name}: {e}")))?;
        step.response.as_deref().map(encode_initial)
    } else {
        None
    };

    tracing::debug!(mechanism = %name, "starting authentication exchange");
    stream
        .write_command(&Command::Auth {
            mechanism: name.clone(),
            initial_response,
        })
        .await?;

    let mut responses = Vec::new();
    loop {
        let status = stream.read_status().await?;
        if status.is_ok() && mechanism.status() != ExchangeStatus::Succeeded {
            tracing::warn!(mechanism = %name, state = ?mechanism.status(), "server accepted an unfinished exchange");
            return Err(Error::MalformedExchange(format!(
                "{name}: server accepted before the exchange finished"
            )));
        }
        if !status.is_continuation() {
            return Ok((status, responses));
        }
        responses.push(status.to_string());

        let challenge = match STANDARD.decode(status.text.trim()) {
            Ok(challenge) => challenge,
            Err(e) => {
                return Err(abort(stream, format!("{name}: challenge is not base64: {e}")).await);
            }
        };

        match mechanism.exchange(Some(&challenge)) {
            Ok(step) => match step.response {
                Some(response) => {
                    stream
                        .write_command(&Command::SaslResponse(STANDARD.encode(response)))
                        .await?;
                }
                None => {
                    return Err(abort(stream, format!("{name}: no response to challenge")).await);
                }
            },
            Err(e) => return Err(abort(stream, format!("{name}: {e}")).await),
        }
    }
}

/// Encodes an initial response; `=` stands for an empty one.
fn encode_initial(response: &[u8]) -> String {
    if response.is_empty() {
        "=".to_string()
    } else {
        STANDARD.encode(response)
    }
}

/// Cancels the exchange and builds the error to report.
async fn abort<S>(stream: &mut FramedStream<S>, message: String) -> Error
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::warn!(%message, "aborting authentication exchange");
    if let Err(e) = stream.write_command(&Command::SaslAbort).await {
        tracing::debug!(?e, "failed to send abort");
    }
    Error::MalformedExchange(message)
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
    use mailledger_sasl::mechanisms::{Anonymous, Login, Plain, XOAuth2};
    use mailledger_sasl::Credential;
    use tokio_test::io::Builder;

    use super::*;

    #[tokio::test]
    async fn test_login_two_challenges() {
        let mock = Builder::new()
            .write(b"AUTH LOGIN\r\n")
            .read(b"+ VXNlcm5hbWU6\r\n")
            .write(b"Ym9i\r\n")
            .read(b"+ UGFzc3dvcmQ6\r\n")
            .write(b"c2VjcmV0\r\n")
            .read(b"+OK logged in\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = Login::new(Credential::new("bob", "secret"));

        let (status, responses) = run(&mut stream, &mut mechanism).await.unwrap();
        assert!(status.is_ok());
        assert_eq!(responses, ["+ VXNlcm5hbWU6", "+ UGFzc3dvcmQ6"]);
    }

    #[tokio::test]
    async fn test_plain_initial_response_rejected() {
        let mock = Builder::new()
            .write(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
            .read(b"-ERR [AUTH] bad credentials\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = Plain::new(Credential::new("bob", "secret"));

        let (status, responses) = run(&mut stream, &mut mechanism).await.unwrap();
        assert!(status.is_err());
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_empty_initial_response() {
        let mock = Builder::new()
            .write(b"AUTH ANONYMOUS =\r\n")
            .read(b"+OK\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = Anonymous::new(&Credential::anonymous(""));

        let (status, _) = run(&mut stream, &mut mechanism).await.unwrap();
        assert!(status.is_ok());
    }

    #[tokio::test]
    async fn test_early_ok_is_malformed() {
        let mock = Builder::new()
            .write(b"AUTH LOGIN\r\n")
            .read(b"+ VXNlcm5hbWU6\r\n")
            .write(b"Ym9i\r\n")
            .read(b"+OK\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = Login::new(Credential::new("bob", "secret"));

        let err = run(&mut stream, &mut mechanism).await.unwrap_err();
        assert!(matches!(err, Error::MalformedExchange(msg) if msg.starts_with("LOGIN")));
        assert_eq!(mechanism.status(), ExchangeStatus::Continuing);
    }

    #[tokio::test]
    async fn test_bad_base64_aborts() {
        let mock = Builder::new()
            .write(b"AUTH LOGIN\r\n")
            .read(b"+ %%%\r\n")
            .write(b"*\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = Login::new(Credential::new("bob", "secret"));

        let err = run(&mut stream, &mut mechanism).await.unwrap_err();
        assert!(matches!(err, Error::MalformedExchange(msg) if msg.starts_with("LOGIN")));
    }

    #[tokio::test]
    async fn test_extra_challenge_aborts() {
        let mock = Builder::new()
            .write(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
            .read(b"+ \r\n")
            .write(b"*\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = Plain::new(Credential::new("bob", "secret"));

        let err = run(&mut stream, &mut mechanism).await.unwrap_err();
        assert!(matches!(err, Error::MalformedExchange(_)));
    }

    #[tokio::test]
    async fn test_xoauth2_error_challenge_is_acknowledged() {
        let initial = STANDARD.encode(b"user=bob\x01auth=Bearer token\x01\x01");
        let error = STANDARD.encode(br#"{"status":"401"}"#);
        let mock = Builder::new()
            .write(format!("AUTH XOAUTH2 {initial}\r\n").as_bytes())
            .read(format!("+ {error}\r\n").as_bytes())
            .write(b"\r\n")
            .read(b"-ERR authentication failed\r\n")
            .build();
        let mut stream = FramedStream::new(mock);
        let mut mechanism = XOAuth2::new(Credential::new("bob", "token"));

        let (status, responses) = run(&mut stream, &mut mechanism).await.unwrap();
        assert!(status.is_err());
        assert_eq!(responses.len(), 1);
        assert_eq!(mechanism.status(), ExchangeStatus::Failed);
    }
}
