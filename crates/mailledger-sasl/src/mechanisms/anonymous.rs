//! ANONYMOUS (RFC 4505).

use crate::{Credential, Error, ExchangeStatus, Mechanism, Result, Step};

/// The ANONYMOUS mechanism.
///
/// Sends the credential's username as the trace string.
#[derive(Debug)]
pub struct Anonymous {
    trace: String,
    status: ExchangeStatus,
}

impl Anonymous {
    /// Creates the mechanism; only the credential's username is used.
    #[must_use]
    pub fn new(credential: &Credential) -> Self {
        Self {
            trace: credential.username().to_string(),
            status: ExchangeStatus::NotStarted,
        }
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &str {
        "ANONYMOUS"
    }

    fn client_first(&self) -> bool {
        true
    }

    fn status(&self) -> ExchangeStatus {
        self.status
    }

    fn exchange(&mut self, _challenge: Option<&[u8]>) -> Result<Step> {
        if self.status != ExchangeStatus::NotStarted {
            return Err(Error::UnexpectedChallenge(
                "ANONYMOUS has already sent its trace".into(),
            ));
        }
        self.status = ExchangeStatus::Succeeded;
        Ok(Step::done(self.trace.as_bytes().to_vec()))
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
    fn test_anonymous_trace() {
        let mut anonymous = Anonymous::new(&Credential::anonymous("sirhc"));
        let step = anonymous.exchange(None).unwrap();
        assert_eq!(step.response.unwrap(), b"sirhc");
        assert_eq!(anonymous.status(), ExchangeStatus::Succeeded);
    }
}
