//! Session states.

use std::fmt;

/// Connection state of a session (RFC 1939 section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No usable connection. Terminal.
    NotConnected,
    /// Greeting received; the client must identify itself.
    Authorization,
    /// Authenticated; mailbox commands are permitted.
    Transaction,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotConnected => "not connected",
            Self::Authorization => "authorization",
            Self::Transaction => "transaction",
        })
    }
}
