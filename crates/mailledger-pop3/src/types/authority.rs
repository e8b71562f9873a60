//! Session identity (RFC 2384 POP URLs).

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a session authenticates, as carried by the `;AUTH=` URL parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AuthType {
    /// `;AUTH=*`: pick the best mechanism the server offers.
    SelectAppropriate,
    /// `;AUTH=+APOP`: the greeting timestamp scheme.
    Apop,
    /// USER/PASS. Has no URL representation.
    Plaintext,
    /// A named SASL mechanism.
    Sasl(String),
}

impl AuthType {
    /// Parses an `;AUTH=` value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "*" => Self::SelectAppropriate,
            v if v.eq_ignore_ascii_case("+APOP") => Self::Apop,
            v => Self::Sasl(v.to_ascii_uppercase()),
        }
    }

    /// Value written after `;AUTH=`, or `None` for plaintext.
    #[must_use]
    pub fn url_value(&self) -> Option<&str> {
        match self {
            Self::SelectAppropriate => Some("*"),
            Self::Apop => Some("+APOP"),
            Self::Plaintext => None,
            Self::Sasl(mechanism) => Some(mechanism),
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Plaintext => "plaintext",
            other => other.url_value().unwrap_or_default(),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Remote authority of a session plus the identity used on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TLS from the start (`pops` scheme).
    pub implicit_tls: bool,
    /// Authenticated (or requested) username.
    pub username: Option<String>,
    /// Authentication used (or requested).
    pub auth_type: Option<AuthType>,
}

impl Authority {
    /// Creates an authority without identity.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, implicit_tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            implicit_tls,
            username: None,
            auth_type: None,
        }
    }

    /// URL scheme.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.implicit_tls { "pops" } else { "pop" }
    }
}

/// Escapes characters that are not allowed in the user part of a POP URL.
fn escape_user(user: &str) -> String {
    let mut escaped = String::with_capacity(user.len());
    for c in user.chars() {
        match c {
            '@' | ';' | ':' | '/' | '%' | ' ' => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    escaped.push_str(&format!("%{byte:02X}"));
                }
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape_user`].
fn unescape_user(user: &str) -> Option<String> {
    let bytes = user.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = user.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Parses `pop[s]://[user][;AUTH=type]@host[:port]`.
impl FromStr for Authority {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let invalid = |what: &str| Error::InvalidArgument(format!("{what} in POP URL: {url}"));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let implicit_tls = if scheme.eq_ignore_ascii_case("pops") {
            true
        } else if scheme.eq_ignore_ascii_case("pop") {
            false
        } else {
            return Err(invalid("unknown scheme"));
        };

        let rest = rest.trim_end_matches('/');
        let (userinfo, hostport) = match rest.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, rest),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid("bad port"))?),
            None => (hostport, if implicit_tls { 995 } else { 110 }),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let mut authority = Self::new(host, port, implicit_tls);
        if let Some(userinfo) = userinfo {
            // ASCII uppercasing keeps byte offsets.
            let (user, auth) = match userinfo.to_ascii_uppercase().find(";AUTH=") {
                Some(pos) => (&userinfo[..pos], Some(&userinfo[pos + 6..])),
                None => (userinfo, None),
            };
            if !user.is_empty() {
                authority.username =
                    Some(unescape_user(user).ok_or_else(|| invalid("bad escape"))?);
            }
            authority.auth_type = auth.map(AuthType::parse);
        }
        Ok(authority)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme())?;

        let auth = self.auth_type.as_ref().and_then(AuthType::url_value);
        if let Some(user) = &self.username {
            f.write_str(&escape_user(user))?;
        }
        if let Some(auth) = auth {
            write!(f, ";AUTH={auth}")?;
        }
        if self.username.is_some() || auth.is_some() {
            f.write_str("@")?;
        }

        write!(f, "{}:{}", self.host, self.port)
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
    fn test_auth_type_parse() {
        assert_eq!(AuthType::parse("*"), AuthType::SelectAppropriate);
        assert_eq!(AuthType::parse("+apop"), AuthType::Apop);
        assert_eq!(AuthType::parse("cram-md5"), AuthType::Sasl("CRAM-MD5".to_string()));
    }

    #[test]
    fn test_bare_authority() {
        let authority = Authority::new("mail.example.net", 110, false);
        assert_eq!(authority.to_string(), "pop://mail.example.net:110");
    }

    #[test]
    fn test_authority_with_mechanism() {
        let mut authority = Authority::new("mail.example.net", 995, true);
        authority.username = Some("rg".to_string());
        authority.auth_type = Some(AuthType::Sasl("CRAM-MD5".to_string()));
        assert_eq!(
            authority.to_string(),
            "pops://rg;AUTH=CRAM-MD5@mail.example.net:995"
        );
    }

    #[test]
    fn test_plaintext_has_no_auth_parameter() {
        let mut authority = Authority::new("localhost", 110, false);
        authority.username = Some("bob@example.com".to_string());
        authority.auth_type = Some(AuthType::Plaintext);
        assert_eq!(authority.to_string(), "pop://bob%40example.com@localhost:110");
        assert_eq!(authority.auth_type.unwrap().label(), "plaintext");
    }

    #[test]
    fn test_parse_url() {
        let authority: Authority = "pops://rg;AUTH=cram-md5@mail.example.net".parse().unwrap();
        assert!(authority.implicit_tls);
        assert_eq!(authority.port, 995);
        assert_eq!(authority.username.as_deref(), Some("rg"));
        assert_eq!(
            authority.auth_type,
            Some(AuthType::Sasl("CRAM-MD5".to_string()))
        );

        let authority: Authority = "pop://bob%40example.com;auth=*@localhost:1110/"
            .parse()
            .unwrap();
        assert_eq!(authority.username.as_deref(), Some("bob@example.com"));
        assert_eq!(authority.auth_type, Some(AuthType::SelectAppropriate));
        assert_eq!(authority.port, 1110);

        let authority: Authority = "pop://mail.example.net".parse().unwrap();
        assert_eq!(authority.username, None);
        assert_eq!(authority.to_string(), "pop://mail.example.net:110");
    }

    #[test]
    fn test_parse_url_errors() {
        assert!("imap://host".parse::<Authority>().is_err());
        assert!("pop://user@".parse::<Authority>().is_err());
        assert!("pop://host:port".parse::<Authority>().is_err());
        assert!("pop://b%4@host".parse::<Authority>().is_err());
    }

    #[test]
    fn test_auth_without_user() {
        let mut authority = Authority::new("localhost", 110, false);
        authority.auth_type = Some(AuthType::SelectAppropriate);
        assert_eq!(authority.to_string(), "pop://;AUTH=*@localhost:110");
    }
}
