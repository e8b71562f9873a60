//! LOGIN (draft-murchison-sasl-login).

use crate::{Credential, Error, ExchangeStatus, Mechanism, Result, Step};

/// The LOGIN mechanism.
///
/// The server prompts twice; the prompt text is ignored and the username
/// and password are sent in that order.
#[derive(Debug)]
pub struct Login {
    credential: Credential,
    status: ExchangeStatus,
}

impl Login {
    /// Creates the mechanism for a credential.
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self {
            credential,
            status: ExchangeStatus::NotStarted,
        }
    }
}

impl Mechanism for Login {
    fn name(&self) -> &str {
        "LOGIN"
    }

    fn client_first(&self) -> bool {
        false
    }

    fn status(&self) -> ExchangeStatus {
        self.status
    }

    fn exchange(&mut self, challenge: Option<&[u8]>) -> Result<Step> {
        if challenge.is_none() {
            return Err(Error::Malformed("LOGIN waits for a server prompt".into()));
        }

        match self.status {
            ExchangeStatus::NotStarted => {
                self.status = ExchangeStatus::Continuing;
                Ok(Step::continuing(self.credential.username().as_bytes().to_vec()))
            }
            ExchangeStatus::Continuing => {
                self.status = ExchangeStatus::Succeeded;
                Ok(Step::done(self.credential.secret().as_bytes().to_vec()))
            }
            ExchangeStatus::Succeeded | ExchangeStatus::Failed => Err(
                Error::UnexpectedChallenge("LOGIN has already sent the password".into()),
            ),
        }
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
    use super::*;

    #[test]
    fn test_login_sequence() {
        let mut login = Login::new(Credential::new("bob", "secret"));
        assert!(!login.client_first());

        let step = login.exchange(Some(b"Username:")).unwrap();
        assert_eq!(step.status, ExchangeStatus::Continuing);
        assert_eq!(step.response.unwrap(), b"bob");

        let step = login.exchange(Some(b"Password:")).unwrap();
        assert_eq!(step.status, ExchangeStatus::Succeeded);
        assert_eq!(step.response.unwrap(), b"secret");

        assert!(login.exchange(Some(b"More:")).is_err());
    }

    #[test]
    fn test_login_requires_prompt() {
        let mut login = Login::new(Credential::new("bob", "secret"));
        assert!(matches!(login.exchange(None), Err(Error::Malformed(_))));
    }
}
