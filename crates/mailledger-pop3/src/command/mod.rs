//! POP3 commands.
//!
//! Commands serialize to a single CRLF-terminated line. Multi-line replies
//! are announced by [`Command::is_multiline`].

use std::fmt;

use crate::types::{Capability, Extension};
use crate::{Error, Result};

/// A POP3 command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPA (RFC 2449).
    Capa,
    /// STLS (RFC 2595).
    Stls,
    /// USER name.
    User(String),
    /// PASS secret.
    Pass(String),
    /// APOP name digest.
    Apop {
        /// Mailbox name.
        name: String,
        /// Lowercase hex MD5 of timestamp and secret.
        digest: String,
    },
    /// AUTH mechanism \[initial-response\] (RFC 5034).
    Auth {
        /// SASL mechanism name.
        mechanism: String,
        /// Base64 initial response; `=` stands for an empty one.
        initial_response: Option<String>,
    },
    /// Base64 response line during a SASL exchange.
    SaslResponse(String),
    /// `*` cancels a SASL exchange.
    SaslAbort,
    /// STAT.
    Stat,
    /// LIST \[msg\].
    List(Option<u32>),
    /// RETR msg.
    Retr(u32),
    /// DELE msg.
    Dele(u32),
    /// NOOP.
    Noop,
    /// RSET.
    Rset,
    /// TOP msg n.
    Top {
        /// Message number.
        message: u32,
        /// Number of body lines.
        lines: u32,
    },
    /// UIDL \[msg\].
    Uidl(Option<u32>),
    /// QUIT.
    Quit,
    /// Any other command.
    Generic {
        /// Command keyword.
        verb: String,
        /// Space-separated arguments.
        arguments: Vec<String>,
        /// Whether a `+OK` reply is followed by a multi-line block.
        multiline: bool,
    },
}

impl Command {
    /// Returns the command keyword.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::Capa => "CAPA",
            Self::Stls => "STLS",
            Self::User(_) => "USER",
            Self::Pass(_) => "PASS",
            Self::Apop { .. } => "APOP",
            Self::Auth { .. } => "AUTH",
            Self::SaslResponse(_) => "",
            Self::SaslAbort => "*",
            Self::Stat => "STAT",
            Self::List(_) => "LIST",
            Self::Retr(_) => "RETR",
            Self::Dele(_) => "DELE",
            Self::Noop => "NOOP",
            Self::Rset => "RSET",
            Self::Top { .. } => "TOP",
            Self::Uidl(_) => "UIDL",
            Self::Quit => "QUIT",
            Self::Generic { verb, .. } => verb,
        }
    }

    /// Returns true if a positive reply carries a multi-line block.
    #[must_use]
    pub const fn is_multiline(&self) -> bool {
        match self {
            Self::Capa | Self::Retr(_) | Self::Top { .. } | Self::List(None) | Self::Uidl(None) => {
                true
            }
            Self::Generic { multiline, .. } => *multiline,
            _ => false,
        }
    }

    fn arguments(&self) -> Vec<String> {
        match self {
            Self::User(s) | Self::Pass(s) | Self::SaslResponse(s) => vec![s.clone()],
            Self::Apop { name, digest } => vec![name.clone(), digest.clone()],
            Self::Auth {
                mechanism,
                initial_response,
            } => std::iter::once(mechanism.clone())
                .chain(initial_response.clone())
                .collect(),
            Self::List(Some(n)) | Self::Retr(n) | Self::Dele(n) | Self::Uidl(Some(n)) => {
                vec![n.to_string()]
            }
            Self::Top { message, lines } => vec![message.to_string(), lines.to_string()],
            Self::Generic { arguments, .. } => arguments.clone(),
            _ => Vec::new(),
        }
    }

    /// Checks that the command can be written as a single line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if an argument contains CR or LF,
    /// a message number is zero, or the keyword is empty.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::List(Some(0))
            | Self::Retr(0)
            | Self::Dele(0)
            | Self::Uidl(Some(0))
            | Self::Top { message: 0, .. } => {
                return Err(Error::InvalidArgument(format!(
                    "{}: message number must be greater than zero",
                    self.verb()
                )));
            }
            Self::Generic { verb, .. } if verb.trim().is_empty() => {
                return Err(Error::InvalidArgument("empty command keyword".to_string()));
            }
            _ => {}
        }

        let arguments = self.arguments();
        if std::iter::once(self.verb())
            .chain(arguments.iter().map(String::as_str))
            .any(|s| s.contains(['\r', '\n']))
        {
            return Err(Error::InvalidArgument(format!(
                "{}: arguments must not contain line breaks",
                self.verb()
            )));
        }
        Ok(())
    }

    /// Serializes the command with its CRLF terminator.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut line = match self {
            Self::SaslResponse(response) => response.clone(),
            _ => {
                let mut line = self.verb().to_string();
                for argument in self.arguments() {
                    line.push(' ');
                    line.push_str(&argument);
                }
                line
            }
        }
        .into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }
}

/// Writes the command with secrets masked, for tracing.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass(_) => f.write_str("PASS ***"),
            Self::Apop { name, .. } => write!(f, "APOP {name} ***"),
            Self::Auth {
                mechanism,
                initial_response: Some(_),
            } => write!(f, "AUTH {mechanism} ***"),
            Self::SaslResponse(_) => f.write_str("***"),
            _ => {
                f.write_str(self.verb())?;
                for argument in self.arguments() {
                    write!(f, " {argument}")?;
                }
                Ok(())
            }
        }
    }
}

impl Extension for Command {
    fn required_capabilities(&self) -> Vec<Vec<Capability>> {
        match self {
            Self::Capa
            | Self::User(_)
            | Self::Pass(_)
            | Self::Apop { .. }
            | Self::SaslResponse(_)
            | Self::SaslAbort
            | Self::Stat
            | Self::List(_)
            | Self::Retr(_)
            | Self::Dele(_)
            | Self::Noop
            | Self::Rset
            | Self::Quit
            | Self::Generic { .. } => Vec::new(),
            Self::Stls => vec![vec![Capability::new(Capability::STLS)]],
            Self::Top { .. } => vec![vec![Capability::new(Capability::TOP)]],
            Self::Uidl(_) => vec![vec![Capability::new(Capability::UIDL)]],
            Self::Auth { mechanism, .. } => vec![vec![Capability::sasl(mechanism)]],
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
    use crate::types::CapabilitySet;

    mod serialize_tests {
        use super::*;

        #[test]
        fn simple_commands() {
            assert_eq!(Command::Capa.serialize(), b"CAPA\r\n");
            assert_eq!(Command::Stat.serialize(), b"STAT\r\n");
            assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
            assert_eq!(Command::SaslAbort.serialize(), b"*\r\n");
        }

        #[test]
        fn commands_with_arguments() {
            assert_eq!(Command::User("bob".into()).serialize(), b"USER bob\r\n");
            assert_eq!(Command::List(Some(2)).serialize(), b"LIST 2\r\n");
            assert_eq!(Command::List(None).serialize(), b"LIST\r\n");
            assert_eq!(
                Command::Top {
                    message: 1,
                    lines: 10
                }
                .serialize(),
                b"TOP 1 10\r\n"
            );
            assert_eq!(
                Command::Apop {
                    name: "mrose".into(),
                    digest: "c4c9334bac560ecc979e58001b3e22fb".into()
                }
                .serialize(),
                b"APOP mrose c4c9334bac560ecc979e58001b3e22fb\r\n"
            );
        }

        #[test]
        fn auth_with_and_without_initial_response() {
            assert_eq!(
                Command::Auth {
                    mechanism: "CRAM-MD5".into(),
                    initial_response: None
                }
                .serialize(),
                b"AUTH CRAM-MD5\r\n"
            );
            assert_eq!(
                Command::Auth {
                    mechanism: "PLAIN".into(),
                    initial_response: Some("=".into())
                }
                .serialize(),
                b"AUTH PLAIN =\r\n"
            );
        }

        #[test]
        fn sasl_response_is_bare() {
            assert_eq!(Command::SaslResponse("dGVzdA==".into()).serialize(), b"dGVzdA==\r\n");
            assert_eq!(Command::SaslResponse(String::new()).serialize(), b"\r\n");
        }

        #[test]
        fn generic_command() {
            let command = Command::Generic {
                verb: "XTND".into(),
                arguments: vec!["XMIT".into()],
                multiline: false,
            };
            assert_eq!(command.serialize(), b"XTND XMIT\r\n");
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn zero_message_number() {
            assert!(matches!(
                Command::Retr(0).validate(),
                Err(Error::InvalidArgument(_))
            ));
            assert!(Command::Top { message: 0, lines: 1 }.validate().is_err());
            assert!(Command::Retr(1).validate().is_ok());
            assert!(Command::Top { message: 1, lines: 0 }.validate().is_ok());
        }

        #[test]
        fn line_breaks_rejected() {
            assert!(Command::User("bob\r\nDELE 1".into()).validate().is_err());
            assert!(Command::Pass("se\ncret".into()).validate().is_err());
        }
    }

    #[test]
    fn test_display_masks_secrets() {
        assert_eq!(Command::Pass("hunter2".into()).to_string(), "PASS ***");
        assert_eq!(
            Command::Apop {
                name: "bob".into(),
                digest: "abc".into()
            }
            .to_string(),
            "APOP bob ***"
        );
        assert_eq!(Command::User("bob".into()).to_string(), "USER bob");
    }

    #[test]
    fn test_multiline() {
        assert!(Command::Capa.is_multiline());
        assert!(Command::List(None).is_multiline());
        assert!(!Command::List(Some(1)).is_multiline());
        assert!(Command::Retr(1).is_multiline());
        assert!(!Command::Stat.is_multiline());
    }

    #[test]
    fn test_required_capabilities() {
        let capabilities = CapabilitySet::from_lines(["USER", "SASL PLAIN"]);
        assert!(capabilities.is_capable_of(&Command::Stat));
        assert!(!capabilities.is_capable_of(&Command::Top {
            message: 1,
            lines: 0
        }));
        assert!(!capabilities.is_capable_of(&Command::Uidl(None)));
        assert!(capabilities.is_capable_of(&Command::Auth {
            mechanism: "plain".into(),
            initial_response: None
        }));
        assert!(!capabilities.is_capable_of(&Command::Auth {
            mechanism: "LOGIN".into(),
            initial_response: None
        }));
    }
}
