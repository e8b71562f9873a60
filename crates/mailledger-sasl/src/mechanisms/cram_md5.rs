//! CRAM-MD5 (RFC 2195).

use std::fmt::Write;

use hmac::{Hmac, Mac};
use md5::Md5;

use crate::{Credential, Error, ExchangeStatus, Mechanism, Result, Step};

type HmacMd5 = Hmac<Md5>;

/// Computes the lowercase hex HMAC-MD5 of `challenge` keyed by `secret`.
#[must_use]
pub fn cram_md5_digest(secret: &str, challenge: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacMd5::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(challenge);

    mac.finalize()
        .into_bytes()
        .iter()
        .fold(String::with_capacity(32), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// The CRAM-MD5 mechanism.
#[derive(Debug)]
pub struct CramMd5 {
    credential: Credential,
    status: ExchangeStatus,
}

impl CramMd5 {
    /// Creates the mechanism for a credential.
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self {
            credential,
            status: ExchangeStatus::NotStarted,
        }
    }
}

impl Mechanism for CramMd5 {
    fn name(&self) -> &str {
        "CRAM-MD5"
    }

    fn client_first(&self) -> bool {
        false
    }

    fn status(&self) -> ExchangeStatus {
        self.status
    }

    fn exchange(&mut self, challenge: Option<&[u8]>) -> Result<Step> {
        if self.status != ExchangeStatus::NotStarted {
            return Err(Error::UnexpectedChallenge(
                "CRAM-MD5 has already responded".into(),
            ));
        }

        let challenge = match challenge {
            Some(c) if !c.is_empty() => c,
            _ => {
                self.status = ExchangeStatus::Failed;
                return Err(Error::Malformed("CRAM-MD5 requires a challenge".into()));
            }
        };

        let digest = cram_md5_digest(self.credential.secret(), challenge);
        self.status = ExchangeStatus::Succeeded;
        Ok(Step::done(
            format!("{} {digest}", self.credential.username()).into_bytes(),
        ))
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
    fn test_rfc2195_example() {
        let mut cram = CramMd5::new(Credential::new("tim", "tanstaaftanstaaf"));
        let step = cram
            .exchange(Some(b"<1896.697170952@postoffice.reston.mci.net>"))
            .unwrap();
        assert_eq!(step.status, ExchangeStatus::Succeeded);
        assert_eq!(
            String::from_utf8(step.response.unwrap()).unwrap(),
            "tim b913a602c7eda7a495b4e6e7334d3890"
        );
    }

    #[test]
    fn test_empty_challenge_is_malformed() {
        let mut cram = CramMd5::new(Credential::new("tim", "secret"));
        assert!(matches!(cram.exchange(Some(b"")), Err(Error::Malformed(_))));
        assert_eq!(cram.status(), ExchangeStatus::Failed);
    }
}
