//! Bearer token mechanisms.
//!
//! - OAUTHBEARER (RFC 7628)
//! - XOAUTH2 (Google/Microsoft proprietary)
//!
//! Both send the token in the initial response. On failure the server
//! answers with a JSON error challenge which the client acknowledges
//! before the final negative status.

use crate::{Credential, Error, ExchangeStatus, Mechanism, Result, Step};

/// Builds the XOAUTH2 message.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01`
///
/// # Example
///
/// ```
/// use mailledger_sasl::mechanisms::xoauth2_message;
///
/// let message = xoauth2_message("user@example.com", "ya29.a0...");
/// assert!(message.starts_with(b"user=user@example.com\x01"));
/// ```
#[must_use]
pub fn xoauth2_message(user: &str, token: &str) -> Vec<u8> {
    format!("user={user}\x01auth=Bearer {token}\x01\x01").into_bytes()
}

/// Builds the OAUTHBEARER message.
///
/// Format: `n,a=<user>,\x01auth=Bearer <token>\x01\x01`
#[must_use]
pub fn oauthbearer_message(user: &str, token: &str) -> Vec<u8> {
    format!("n,a={user},\x01auth=Bearer {token}\x01\x01").into_bytes()
}

/// Shared state machine for the two bearer mechanisms.
#[derive(Debug)]
struct Bearer {
    credential: Credential,
    status: ExchangeStatus,
}

impl Bearer {
    const fn new(credential: Credential) -> Self {
        Self {
            credential,
            status: ExchangeStatus::NotStarted,
        }
    }

    fn exchange(
        &mut self,
        name: &str,
        build: fn(&str, &str) -> Vec<u8>,
        acknowledgement: &[u8],
        challenge: Option<&[u8]>,
    ) -> Result<Step> {
        match self.status {
            ExchangeStatus::NotStarted => {
                self.status = ExchangeStatus::Succeeded;
                Ok(Step::done(build(
                    self.credential.username(),
                    self.credential.secret(),
                )))
            }
            // Error challenge after the token was sent.
            ExchangeStatus::Succeeded if challenge.is_some() => {
                tracing::debug!(mechanism = name, "bearer token rejected by server");
                self.status = ExchangeStatus::Failed;
                Ok(Step::failed(Some(acknowledgement.to_vec())))
            }
            _ => Err(Error::UnexpectedChallenge(format!(
                "{name} exchange has already finished"
            ))),
        }
    }
}

/// The XOAUTH2 mechanism. The credential secret is the access token.
#[derive(Debug)]
pub struct XOAuth2(Bearer);

impl XOAuth2 {
    /// Creates the mechanism for a credential.
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self(Bearer::new(credential))
    }
}

impl Mechanism for XOAuth2 {
    fn name(&self) -> &str {
        "XOAUTH2"
    }

    fn client_first(&self) -> bool {
        true
    }

    fn status(&self) -> ExchangeStatus {
        self.0.status
    }

    fn exchange(&mut self, challenge: Option<&[u8]>) -> Result<Step> {
        self.0.exchange("XOAUTH2", xoauth2_message, b"", challenge)
    }
}

/// The OAUTHBEARER mechanism. The credential secret is the access token.
#[derive(Debug)]
pub struct OAuthBearer(Bearer);

impl OAuthBearer {
    /// Creates the mechanism for a credential.
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self(Bearer::new(credential))
    }
}

impl Mechanism for OAuthBearer {
    fn name(&self) -> &str {
        "OAUTHBEARER"
    }

    fn client_first(&self) -> bool {
        true
    }

    fn status(&self) -> ExchangeStatus {
        self.0.status
    }

    fn exchange(&mut self, challenge: Option<&[u8]>) -> Result<Step> {
        self.0
            .exchange("OAUTHBEARER", oauthbearer_message, b"\x01", challenge)
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
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;

    #[test]
    fn test_xoauth2_message() {
        let message = xoauth2_message("user@example.com", "token123");
        assert_eq!(
            message,
            b"user=user@example.com\x01auth=Bearer token123\x01\x01"
        );
        assert!(!STANDARD.encode(&message).is_empty());
    }

    #[test]
    fn test_oauthbearer_message() {
        let message = oauthbearer_message("user@example.com", "token123");
        assert_eq!(
            message,
            b"n,a=user@example.com,\x01auth=Bearer token123\x01\x01"
        );
    }

    #[test]
    fn test_xoauth2_error_challenge_is_acknowledged() {
        let mut xoauth2 = XOAuth2::new(Credential::new("bob", "token"));
        let step = xoauth2.exchange(None).unwrap();
        assert_eq!(step.status, ExchangeStatus::Succeeded);

        let step = xoauth2.exchange(Some(br#"{"status":"401"}"#)).unwrap();
        assert_eq!(step.status, ExchangeStatus::Failed);
        assert_eq!(step.response.unwrap(), b"");
    }

    #[test]
    fn test_oauthbearer_error_challenge_is_acknowledged() {
        let mut bearer = OAuthBearer::new(Credential::new("bob", "token"));
        bearer.exchange(None).unwrap();
        let step = bearer.exchange(Some(b"{}")).unwrap();
        assert_eq!(step.response.unwrap(), b"\x01");
        assert!(bearer.exchange(Some(b"{}")).is_err());
    }
}
