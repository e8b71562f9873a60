//! Maildrop listings returned by STAT, LIST and UIDL.

/// Reply to STAT: message count and total size in octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DropListing {
    /// Number of messages in the maildrop.
    pub message_count: u64,
    /// Size of the maildrop in octets.
    pub size: u64,
}

/// One line of a LIST reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanListing {
    /// Message number.
    pub message_number: u64,
    /// Exact size in octets.
    pub size: u64,
}

/// One line of a UIDL reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueIdListing {
    /// Message number.
    pub message_number: u64,
    /// Server-assigned unique id, stable across sessions.
    pub unique_id: String,
}
