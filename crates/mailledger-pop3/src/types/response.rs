//! Status lines and extended response codes.

use std::fmt;

/// Leading token of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    /// `+OK`
    Ok,
    /// `-ERR`
    Err,
    /// `+` during a SASL exchange.
    Continuation,
}

impl Indicator {
    /// Returns the wire token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "+OK",
            Self::Err => "-ERR",
            Self::Continuation => "+",
        }
    }
}

/// Extended response code (RFC 2449 section 8, RFC 3206).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// IN-USE: the maildrop is locked by another session.
    InUse,
    /// LOGIN-DELAY: logged in too recently.
    LoginDelay,
    /// SYS/TEMP: temporary system failure.
    SysTemp,
    /// SYS/PERM: permanent system failure.
    SysPerm,
    /// AUTH: the credentials were rejected.
    Auth,
    /// UTF8: UTF-8 mode is required.
    Utf8,
    /// Any other code, kept verbatim.
    Other(String),
}

impl ResponseCode {
    /// Parses the text between the brackets.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "IN-USE" => Self::InUse,
            "LOGIN-DELAY" => Self::LoginDelay,
            "SYS/TEMP" => Self::SysTemp,
            "SYS/PERM" => Self::SysPerm,
            "AUTH" => Self::Auth,
            "UTF8" => Self::Utf8,
            _ => Self::Other(code.to_string()),
        }
    }

    /// Returns the code as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::InUse => "IN-USE",
            Self::LoginDelay => "LOGIN-DELAY",
            Self::SysTemp => "SYS/TEMP",
            Self::SysPerm => "SYS/PERM",
            Self::Auth => "AUTH",
            Self::Utf8 => "UTF8",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed single-line reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Positive, negative or continuation.
    pub indicator: Indicator,
    /// Bracketed response code, if present.
    pub code: Option<ResponseCode>,
    /// Remaining human-readable text (the payload for continuations).
    pub text: String,
}

impl StatusLine {
    /// Returns true for `+OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.indicator == Indicator::Ok
    }

    /// Returns true for `-ERR`.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.indicator == Indicator::Err
    }

    /// Returns true for a SASL continuation.
    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.indicator == Indicator::Continuation
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.indicator.as_str())?;
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        if !self.text.is_empty() {
            write!(f, " {}", self.text)?;
        }
        Ok(())
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
    fn test_response_code_parse() {
        assert_eq!(ResponseCode::parse("IN-USE"), ResponseCode::InUse);
        assert_eq!(ResponseCode::parse("sys/temp"), ResponseCode::SysTemp);
        assert_eq!(
            ResponseCode::parse("X-VENDOR"),
            ResponseCode::Other("X-VENDOR".to_string())
        );
    }

    #[test]
    fn test_status_line_display() {
        let status = StatusLine {
            indicator: Indicator::Err,
            code: Some(ResponseCode::InUse),
            text: "maildrop locked".to_string(),
        };
        assert_eq!(status.to_string(), "-ERR [IN-USE] maildrop locked");

        let status = StatusLine {
            indicator: Indicator::Continuation,
            code: None,
            text: String::new(),
        };
        assert_eq!(status.to_string(), "+");
    }
}
