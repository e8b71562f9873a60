//! The mechanism contract.

use std::fmt;

use crate::Result;

/// State of a mechanism exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeStatus {
    /// No challenge has been processed yet.
    #[default]
    NotStarted,
    /// The mechanism expects at least one more challenge.
    Continuing,
    /// The mechanism has sent everything it needs to.
    Succeeded,
    /// The mechanism gave up.
    Failed,
}

impl ExchangeStatus {
    /// Returns true once no further challenge is expected.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One step of an exchange: the response to send and the resulting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// State after this step.
    pub status: ExchangeStatus,
    /// Raw (not yet base64-encoded) client response, if any.
    pub response: Option<Vec<u8>>,
}

impl Step {
    /// The exchange continues after sending `response`.
    #[must_use]
    pub const fn continuing(response: Vec<u8>) -> Self {
        Self {
            status: ExchangeStatus::Continuing,
            response: Some(response),
        }
    }

    /// `response` is the last thing the client sends.
    #[must_use]
    pub const fn done(response: Vec<u8>) -> Self {
        Self {
            status: ExchangeStatus::Succeeded,
            response: Some(response),
        }
    }

    /// The mechanism cannot go on.
    #[must_use]
    pub const fn failed(response: Option<Vec<u8>>) -> Self {
        Self {
            status: ExchangeStatus::Failed,
            response,
        }
    }
}

/// Username and secret handed to a mechanism.
///
/// For token-based mechanisms the secret is the bearer token; for
/// ANONYMOUS the username is the trace string and the secret is empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    secret: String,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Creates a credential carrying only an anonymous trace string.
    #[must_use]
    pub fn anonymous(trace: impl Into<String>) -> Self {
        Self::new(trace, String::new())
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A client-side SASL mechanism.
///
/// The protocol driver calls [`exchange`](Mechanism::exchange) once with
/// `None` for client-first mechanisms to obtain the initial response, then
/// once per server challenge.
pub trait Mechanism: Send {
    /// Registered mechanism name, upper case.
    fn name(&self) -> &str;

    /// Whether the client sends the first message.
    fn client_first(&self) -> bool;

    /// Current exchange state.
    fn status(&self) -> ExchangeStatus;

    /// Processes a challenge and produces the next response.
    ///
    /// # Errors
    ///
    /// Returns an error if the challenge cannot be interpreted or arrives
    /// after the exchange has finished.
    fn exchange(&mut self, challenge: Option<&[u8]>) -> Result<Step>;
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
    fn test_credential_debug_redacts_secret() {
        let credential = Credential::new("bob", "hunter2");
        let debug = format!("{credential:?}");
        assert!(debug.contains("bob"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_anonymous_credential() {
        let credential = Credential::anonymous("anonymous@");
        assert_eq!(credential.username(), "anonymous@");
        assert_eq!(credential.secret(), "");
    }

    #[test]
    fn test_status_is_finished() {
        assert!(!ExchangeStatus::NotStarted.is_finished());
        assert!(!ExchangeStatus::Continuing.is_finished());
        assert!(ExchangeStatus::Succeeded.is_finished());
        assert!(ExchangeStatus::Failed.is_finished());
    }
}
