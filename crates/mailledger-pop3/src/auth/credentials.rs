//! Credential lookup for authentication.
//!
//! A [`CredentialResolver`] maps (host, port, username, mechanism) to a
//! [`Credential`]. Resolvers are read-only and may be shared across
//! sessions.

pub use mailledger_sasl::Credential;

/// Supplies credentials on demand.
pub trait CredentialResolver: Send + Sync {
    /// Looks up a credential.
    ///
    /// `username` is the identity the caller asked for, if any; `mechanism`
    /// names the scheme about to use it (`None` for USER/PASS, `"APOP"`
    /// for APOP, otherwise the SASL mechanism).
    fn resolve(
        &self,
        host: &str,
        port: u16,
        username: Option<&str>,
        mechanism: Option<&str>,
    ) -> Option<Credential>;
}

/// A single username/secret pair.
#[derive(Clone)]
pub struct StaticCredentials {
    credential: Credential,
    host: Option<String>,
}

impl StaticCredentials {
    /// Creates a resolver that answers every lookup for `username`.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(username, secret),
            host: None,
        }
    }

    /// Restricts the credential to one host (compared case-insensitively).
    #[must_use]
    pub fn for_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("credential", &self.credential)
            .field("host", &self.host)
            .finish()
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(
        &self,
        host: &str,
        _port: u16,
        username: Option<&str>,
        _mechanism: Option<&str>,
    ) -> Option<Credential> {
        if self
            .host
            .as_deref()
            .is_some_and(|expected| !expected.eq_ignore_ascii_case(host))
        {
            return None;
        }
        if username.is_some_and(|wanted| wanted != self.credential.username()) {
            return None;
        }
        Some(self.credential.clone())
    }
}

#[cfg(feature = "keyring")]
pub use self::keyring_store::KeyringCredentials;

#[cfg(feature = "keyring")]
mod keyring_store {
    use keyring::Entry;
    use tracing::{debug, warn};

    use super::{Credential, CredentialResolver};

    /// Reads secrets from the platform keyring.
    ///
    /// Entries live under `service` with the key `pop3_<user>@<host>`, so a
    /// username is required.
    #[derive(Debug, Clone)]
    pub struct KeyringCredentials {
        service: String,
    }

    impl KeyringCredentials {
        /// Creates a resolver for a keyring service name.
        #[must_use]
        pub fn new(service: impl Into<String>) -> Self {
            Self {
                service: service.into(),
            }
        }

        /// Stores a secret for `username` on `host`.
        ///
        /// # Errors
        ///
        /// Returns an error if the keyring operation fails.
        pub fn store(&self, host: &str, username: &str, secret: &str) -> keyring::Result<()> {
            let entry = Entry::new(&self.service, &credential_key(host, username))?;
            entry.set_password(secret)?;
            debug!(%host, %username, "stored POP3 secret");
            Ok(())
        }

        /// Deletes the secret for `username` on `host`; missing entries are
        /// not an error.
        ///
        /// # Errors
        ///
        /// Returns an error if the keyring operation fails.
        pub fn delete(&self, host: &str, username: &str) -> keyring::Result<()> {
            let entry = Entry::new(&self.service, &credential_key(host, username))?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e),
            }
        }
    }

    fn credential_key(host: &str, username: &str) -> String {
        format!("pop3_{username}@{host}")
    }

    impl CredentialResolver for KeyringCredentials {
        fn resolve(
            &self,
            host: &str,
            _port: u16,
            username: Option<&str>,
            _mechanism: Option<&str>,
        ) -> Option<Credential> {
            let username = username?;
            let entry = match Entry::new(&self.service, &credential_key(host, username)) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(?e, "cannot open keyring entry");
                    return None;
                }
            };

            match entry.get_password() {
                Ok(secret) => Some(Credential::new(username, secret)),
                Err(keyring::Error::NoEntry) => {
                    debug!(%host, %username, "no POP3 secret in keyring");
                    None
                }
                Err(e) => {
                    warn!(?e, "failed to read POP3 secret from keyring");
                    None
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_credential_key() {
            assert_eq!(
                credential_key("pop.example.com", "bob"),
                "pop3_bob@pop.example.com"
            );
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
    fn test_static_answers_any_mechanism() {
        let credentials = StaticCredentials::new("bob", "secret");

        let credential = credentials
            .resolve("pop.example.com", 110, None, Some("PLAIN"))
            .unwrap();
        assert_eq!(credential.username(), "bob");
        assert_eq!(credential.secret(), "secret");
        assert!(
            credentials
                .resolve("pop.example.com", 110, Some("bob"), None)
                .is_some()
        );
    }

    #[test]
    fn test_static_username_mismatch() {
        let credentials = StaticCredentials::new("bob", "secret");
        assert!(
            credentials
                .resolve("pop.example.com", 110, Some("alice"), None)
                .is_none()
        );
    }

    #[test]
    fn test_static_host_filter() {
        let credentials = StaticCredentials::new("bob", "secret").for_host("POP.example.com");
        assert!(
            credentials
                .resolve("pop.example.com", 995, None, None)
                .is_some()
        );
        assert!(credentials.resolve("other.example.com", 995, None, None).is_none());
    }

    #[test]
    fn test_debug_hides_secret() {
        let credentials = StaticCredentials::new("bob", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
