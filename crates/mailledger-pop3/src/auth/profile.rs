//! Client profile: where to connect and how to authenticate.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::connection::{Config, Security};
use crate::types::{AuthType, Authority};

/// SASL mechanisms tried by default, in order.
pub const DEFAULT_SASL_MECHANISMS: [&str; 3] = ["DIGEST-MD5", "CRAM-MD5", "NTLM"];

/// Connection settings plus authentication policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClientProfile {
    /// Remote authority and timeouts.
    pub config: Config,
    /// Identity to authenticate as. `None` together with no `auth_type`
    /// means anonymous access.
    pub username: Option<String>,
    /// Requested scheme; `None` behaves like
    /// [`AuthType::SelectAppropriate`].
    pub auth_type: Option<AuthType>,
    /// SASL mechanisms the ladder may try, in order of preference.
    pub sasl_mechanisms: Vec<String>,
    /// Permit plaintext credentials on an unencrypted connection.
    pub allow_insecure_login: bool,
    /// Fail with [`crate::Error::Incapable`] instead of sending commands the
    /// server does not advertise.
    pub handles_incapable_as_error: bool,
}

impl ClientProfile {
    /// Creates a profile with the default mechanism list and no identity.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            username: None,
            auth_type: None,
            sasl_mechanisms: DEFAULT_SASL_MECHANISMS
                .iter()
                .map(ToString::to_string)
                .collect(),
            allow_insecure_login: false,
            handles_incapable_as_error: false,
        }
    }

    /// Creates a profile from a POP URL such as
    /// `pop://bob;AUTH=CRAM-MD5@mail.example.net`.
    ///
    /// `pop` uses STLS when advertised; `pops` uses implicit TLS.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidArgument`] if the URL is malformed.
    pub fn from_url(url: &str) -> Result<Self> {
        let authority: Authority = url.parse()?;
        let security = if authority.implicit_tls {
            Security::Implicit
        } else {
            Security::StartTls
        };
        let config = Config::builder(authority.host)
            .port(authority.port)
            .security(security)
            .build();

        let mut profile = Self::new(config);
        profile.username = authority.username;
        profile.auth_type = authority.auth_type;
        Ok(profile)
    }

    /// Sets the username.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the requested authentication scheme.
    #[must_use]
    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = Some(auth_type);
        self
    }

    /// Replaces the permitted SASL mechanisms.
    #[must_use]
    pub fn sasl_mechanisms<I, M>(mut self, mechanisms: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.sasl_mechanisms = mechanisms.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether plaintext credentials may cross an unencrypted
    /// connection.
    #[must_use]
    pub const fn allow_insecure_login(mut self, allow: bool) -> Self {
        self.allow_insecure_login = allow;
        self
    }

    /// Sets whether missing capabilities are errors.
    #[must_use]
    pub const fn handles_incapable_as_error(mut self, value: bool) -> Self {
        self.handles_incapable_as_error = value;
        self
    }

    /// The identity this profile asks for.
    #[must_use]
    pub fn authority(&self) -> Authority {
        let mut authority = Authority::new(
            self.config.host.clone(),
            self.config.port,
            self.config.security == Security::Implicit,
        );
        authority.username.clone_from(&self.username);
        authority.auth_type.clone_from(&self.auth_type);
        authority
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
    fn test_defaults() {
        let profile = ClientProfile::new(Config::new("pop.example.com"));
        assert_eq!(profile.sasl_mechanisms, DEFAULT_SASL_MECHANISMS);
        assert!(!profile.allow_insecure_login);
        assert!(profile.username.is_none());
    }

    #[test]
    fn test_from_url() {
        let profile = ClientProfile::from_url("pop://bob;AUTH=+APOP@mail.example.net").unwrap();
        assert_eq!(profile.config.security, Security::StartTls);
        assert_eq!(profile.config.port, 110);
        assert_eq!(profile.username.as_deref(), Some("bob"));
        assert_eq!(profile.auth_type, Some(AuthType::Apop));
        assert_eq!(
            profile.authority().to_string(),
            "pop://bob;AUTH=+APOP@mail.example.net:110"
        );

        let profile = ClientProfile::from_url("pops://mail.example.net").unwrap();
        assert_eq!(profile.config.security, Security::Implicit);
        assert_eq!(profile.config.port, 995);
    }

    #[test]
    fn test_builder_methods() {
        let profile = ClientProfile::new(Config::new("pop.example.com"))
            .username("bob")
            .sasl_mechanisms(["LOGIN", "PLAIN"])
            .allow_insecure_login(true)
            .handles_incapable_as_error(true);
        assert_eq!(profile.sasl_mechanisms, ["LOGIN", "PLAIN"]);
        assert!(profile.allow_insecure_login);
        assert!(profile.handles_incapable_as_error);
    }
}
