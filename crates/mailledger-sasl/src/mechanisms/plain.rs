//! PLAIN (RFC 4616).

use crate::{Credential, Error, ExchangeStatus, Mechanism, Result, Step};

/// Builds the PLAIN message.
///
/// Format: `<authzid>\0<username>\0<password>`. An empty authorization
/// identity means "same as the authentication identity".
///
/// # Example
///
/// ```
/// use mailledger_sasl::mechanisms::plain_message;
///
/// assert_eq!(plain_message("bob", "secret"), b"\0bob\0secret");
/// ```
#[must_use]
pub fn plain_message(username: &str, password: &str) -> Vec<u8> {
    format!("\0{username}\0{password}").into_bytes()
}

/// The PLAIN mechanism.
#[derive(Debug)]
pub struct Plain {
    credential: Credential,
    status: ExchangeStatus,
}

impl Plain {
    /// Creates the mechanism for a credential.
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self {
            credential,
            status: ExchangeStatus::NotStarted,
        }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn client_first(&self) -> bool {
        true
    }

    fn status(&self) -> ExchangeStatus {
        self.status
    }

    fn exchange(&mut self, challenge: Option<&[u8]>) -> Result<Step> {
        if self.status != ExchangeStatus::NotStarted {
            return Err(Error::UnexpectedChallenge("PLAIN has already responded".into()));
        }
        if challenge.is_some_and(|c| !c.is_empty()) {
            self.status = ExchangeStatus::Failed;
            return Err(Error::Malformed("PLAIN expects an empty challenge".into()));
        }

        self.status = ExchangeStatus::Succeeded;
        Ok(Step::done(plain_message(
            self.credential.username(),
            self.credential.secret(),
        )))
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
    fn test_plain_message() {
        let message = plain_message("user@example.com", "password123");
        assert_eq!(
            STANDARD.encode(message),
            "AHVzZXJAZXhhbXBsZS5jb20AcGFzc3dvcmQxMjM="
        );
    }

    #[test]
    fn test_plain_initial_response() {
        let mut plain = Plain::new(Credential::new("bob", "secret"));
        let step = plain.exchange(None).unwrap();
        assert_eq!(step.status, ExchangeStatus::Succeeded);
        assert_eq!(step.response.unwrap(), b"\0bob\0secret");
    }

    #[test]
    fn test_plain_empty_server_challenge() {
        let mut plain = Plain::new(Credential::new("bob", "secret"));
        let step = plain.exchange(Some(b"")).unwrap();
        assert_eq!(step.status, ExchangeStatus::Succeeded);
    }

    #[test]
    fn test_plain_second_challenge_rejected() {
        let mut plain = Plain::new(Credential::new("bob", "secret"));
        plain.exchange(None).unwrap();
        assert!(matches!(
            plain.exchange(Some(b"again")),
            Err(Error::UnexpectedChallenge(_))
        ));
    }
}
