//! Command results.

use super::{ResponseCode, StatusLine};

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The server accepted the command.
    Ok {
        /// Status text after the indicator and response code.
        text: String,
        /// Extended response code, if any.
        code: Option<ResponseCode>,
        /// Typed payload.
        value: T,
    },
    /// Nothing was sent because the request is already satisfied.
    AlreadySatisfied {
        /// Why nothing was sent.
        text: String,
    },
    /// The server answered `-ERR`.
    Rejected {
        /// Status text after the indicator and response code.
        text: String,
        /// Extended response code, if any.
        code: Option<ResponseCode>,
    },
    /// The request could not be carried out or its reply not interpreted.
    ProtocolError {
        /// What went wrong.
        description: String,
    },
}

/// Result of one command, with the status lines received for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult<T = ()> {
    outcome: Outcome<T>,
    responses: Vec<String>,
}

impl<T> CommandResult<T> {
    /// Creates a result from an outcome and the status lines seen.
    #[must_use]
    pub const fn new(outcome: Outcome<T>, responses: Vec<String>) -> Self {
        Self { outcome, responses }
    }

    /// Converts a final status line; `value` is only called on `+OK`.
    pub fn from_status(status: StatusLine, value: impl FnOnce() -> T) -> Self {
        Self::from_status_with(status, Vec::new(), |_| Ok(value()))
    }

    /// Converts a final status line, parsing the payload on `+OK`.
    ///
    /// A parse failure yields [`Outcome::ProtocolError`]. `responses` holds
    /// the lines seen before the final one.
    pub fn from_status_with(
        status: StatusLine,
        mut responses: Vec<String>,
        parse: impl FnOnce(&StatusLine) -> Result<T, String>,
    ) -> Self {
        responses.push(status.to_string());

        let outcome = if status.is_ok() {
            match parse(&status) {
                Ok(value) => Outcome::Ok {
                    text: status.text,
                    code: status.code,
                    value,
                },
                Err(description) => Outcome::ProtocolError { description },
            }
        } else {
            Outcome::Rejected {
                text: status.text,
                code: status.code,
            }
        };

        Self { outcome, responses }
    }

    /// A request that needed no I/O.
    #[must_use]
    pub fn already_satisfied(text: impl Into<String>) -> Self {
        Self::new(Outcome::AlreadySatisfied { text: text.into() }, Vec::new())
    }

    /// A request that failed locally or could not be interpreted.
    #[must_use]
    pub fn protocol_error(description: impl Into<String>) -> Self {
        Self::new(
            Outcome::ProtocolError {
                description: description.into(),
            },
            Vec::new(),
        )
    }

    /// Returns the outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    /// Consumes the result and returns the outcome.
    #[must_use]
    pub fn into_outcome(self) -> Outcome<T> {
        self.outcome
    }

    /// Status lines received for this command, oldest first.
    #[must_use]
    pub fn responses(&self) -> &[String] {
        &self.responses
    }

    /// Returns true if the server accepted the command.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok { .. })
    }

    /// Returns true if accepted or already satisfied.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Ok { .. } | Outcome::AlreadySatisfied { .. }
        )
    }

    /// Returns true if the server answered `-ERR`.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.outcome, Outcome::Rejected { .. })
    }

    /// Status text or error description.
    #[must_use]
    pub fn text(&self) -> &str {
        match &self.outcome {
            Outcome::Ok { text, .. }
            | Outcome::AlreadySatisfied { text }
            | Outcome::Rejected { text, .. } => text,
            Outcome::ProtocolError { description } => description,
        }
    }

    /// Extended response code, if any.
    #[must_use]
    pub const fn code(&self) -> Option<&ResponseCode> {
        match &self.outcome {
            Outcome::Ok { code, .. } | Outcome::Rejected { code, .. } => code.as_ref(),
            _ => None,
        }
    }

    /// Payload of an accepted command.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Ok { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Consumes the result and returns the payload of an accepted command.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self.outcome {
            Outcome::Ok { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Maps the payload, keeping everything else.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandResult<U> {
        let outcome = match self.outcome {
            Outcome::Ok { text, code, value } => Outcome::Ok {
                text,
                code,
                value: f(value),
            },
            Outcome::AlreadySatisfied { text } => Outcome::AlreadySatisfied { text },
            Outcome::Rejected { text, code } => Outcome::Rejected { text, code },
            Outcome::ProtocolError { description } => Outcome::ProtocolError { description },
        };
        CommandResult {
            outcome,
            responses: self.responses,
        }
    }

    /// Drops the payload.
    #[must_use]
    pub fn discard(self) -> CommandResult {
        self.map(|_| ())
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
    use crate::types::Indicator;

    fn status(indicator: Indicator, code: Option<ResponseCode>, text: &str) -> StatusLine {
        StatusLine {
            indicator,
            code,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_ok_status() {
        let result = CommandResult::from_status(status(Indicator::Ok, None, "2 320"), || 7);
        assert!(result.is_ok());
        assert!(result.succeeded());
        assert_eq!(result.text(), "2 320");
        assert_eq!(result.value(), Some(&7));
        assert_eq!(result.responses(), ["+OK 2 320"]);
    }

    #[test]
    fn test_rejected_status_keeps_code() {
        let result: CommandResult = CommandResult::from_status(
            status(Indicator::Err, Some(ResponseCode::Auth), "bad password"),
            || (),
        );
        assert!(result.is_rejected());
        assert!(!result.succeeded());
        assert_eq!(result.code(), Some(&ResponseCode::Auth));
        assert_eq!(result.into_value(), None);
    }

    #[test]
    fn test_parse_failure_is_protocol_error() {
        let result: CommandResult<u64> = CommandResult::from_status_with(
            status(Indicator::Ok, None, "garbage"),
            vec!["+ ".to_string()],
            |_| Err("malformed drop listing".to_string()),
        );
        assert!(matches!(result.outcome(), Outcome::ProtocolError { .. }));
        assert_eq!(result.text(), "malformed drop listing");
        assert_eq!(result.responses().len(), 2);
    }

    #[test]
    fn test_already_satisfied_succeeds() {
        let result: CommandResult = CommandResult::already_satisfied("already authenticated");
        assert!(result.succeeded());
        assert!(!result.is_ok());
        assert!(result.responses().is_empty());
    }

    #[test]
    fn test_map_and_discard() {
        let result = CommandResult::from_status(status(Indicator::Ok, None, ""), || 2);
        let mapped = result.map(|v| v * 10);
        assert_eq!(mapped.value(), Some(&20));
        assert!(mapped.discard().is_ok());
    }
}
