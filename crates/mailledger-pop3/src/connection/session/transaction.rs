//! Transaction-state commands.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::Session;
use crate::command::Command;
use crate::connection::block_lines;
use crate::parser::{parse_drop_listing, parse_scan_listing, parse_unique_id_listing};
use crate::types::{CommandResult, DropListing, ScanListing, SessionState, UniqueIdListing};
use crate::Result;

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Returns the message count and total size (STAT).
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in Transaction state, busy,
    /// or the exchange fails.
    pub async fn stat(&self) -> Result<CommandResult<DropListing>> {
        let reply = self
            .execute(&Command::Stat, Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status_with(reply.status, Vec::new(), |status| {
            parse_drop_listing(&status.text)
                .ok_or_else(|| format!("malformed STAT reply: {}", status.text))
        }))
    }

    /// Lists the size of every message (LIST).
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in Transaction state, busy,
    /// or the exchange fails.
    pub async fn list(&self) -> Result<CommandResult<Vec<ScanListing>>> {
        let reply = self
            .execute(&Command::List(None), Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status(reply.status, || {
            listings(reply.block.as_deref(), "LIST", parse_scan_listing)
        }))
    }

    /// Returns the size of one message (LIST n).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidArgument`] for message number zero and
    /// the usual state and transport errors.
    pub async fn list_message(&self, message: u32) -> Result<CommandResult<ScanListing>> {
        let reply = self
            .execute(
                &Command::List(Some(message)),
                Some(SessionState::Transaction),
            )
            .await?;
        Ok(CommandResult::from_status_with(reply.status, Vec::new(), |status| {
            parse_scan_listing(&status.text)
                .ok_or_else(|| format!("malformed LIST reply: {}", status.text))
        }))
    }

    /// Retrieves a message (RETR).
    ///
    /// The content comes back de-stuffed with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidArgument`] for message number zero and
    /// the usual state and transport errors.
    pub async fn retr(&self, message: u32) -> Result<CommandResult<Bytes>> {
        let reply = self
            .execute(&Command::Retr(message), Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status(reply.status, || {
            reply.block.unwrap_or_default()
        }))
    }

    /// Retrieves the headers and the first `lines` body lines (TOP).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Incapable`] if TOP is not advertised and
    /// missing capabilities are errors, [`crate::Error::InvalidArgument`]
    /// for message number zero, and the usual state and transport errors.
    pub async fn top(&self, message: u32, lines: u32) -> Result<CommandResult<Bytes>> {
        let reply = self
            .execute(
                &Command::Top { message, lines },
                Some(SessionState::Transaction),
            )
            .await?;
        Ok(CommandResult::from_status(reply.status, || {
            reply.block.unwrap_or_default()
        }))
    }

    /// Marks a message as deleted (DELE).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidArgument`] for message number zero and
    /// the usual state and transport errors.
    pub async fn dele(&self, message: u32) -> Result<CommandResult> {
        let reply = self
            .execute(&Command::Dele(message), Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Does nothing (NOOP).
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in Transaction state, busy,
    /// or the exchange fails.
    pub async fn noop(&self) -> Result<CommandResult> {
        let reply = self
            .execute(&Command::Noop, Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Unmarks all deleted messages (RSET).
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in Transaction state, busy,
    /// or the exchange fails.
    pub async fn rset(&self) -> Result<CommandResult> {
        let reply = self
            .execute(&Command::Rset, Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status(reply.status, || ()))
    }

    /// Lists the unique id of every message (UIDL).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Incapable`] if UIDL is not advertised and
    /// missing capabilities are errors, and the usual state and transport
    /// errors.
    pub async fn uidl(&self) -> Result<CommandResult<Vec<UniqueIdListing>>> {
        let reply = self
            .execute(&Command::Uidl(None), Some(SessionState::Transaction))
            .await?;
        Ok(CommandResult::from_status(reply.status, || {
            listings(reply.block.as_deref(), "UIDL", parse_unique_id_listing)
        }))
    }

    /// Returns the unique id of one message (UIDL n).
    ///
    /// # Errors
    ///
    /// Same as [`Session::uidl`], plus [`crate::Error::InvalidArgument`] for
    /// message number zero.
    pub async fn uidl_message(&self, message: u32) -> Result<CommandResult<UniqueIdListing>> {
        let reply = self
            .execute(
                &Command::Uidl(Some(message)),
                Some(SessionState::Transaction),
            )
            .await?;
        Ok(CommandResult::from_status_with(reply.status, Vec::new(), |status| {
            parse_unique_id_listing(&status.text)
                .ok_or_else(|| format!("malformed UIDL reply: {}", status.text))
        }))
    }
}

/// Parses the lines of a listing block, skipping malformed ones.
fn listings<T>(block: Option<&[u8]>, verb: &str, parse: fn(&str) -> Option<T>) -> Vec<T> {
    block
        .into_iter()
        .flat_map(block_lines)
        .filter_map(|line| {
            let parsed = parse(&line);
            if parsed.is_none() {
                tracing::warn!(verb, %line, "skipping malformed listing line");
            }
            parsed
        })
        .collect()
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
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::Error;
    use crate::connection::{Config, Security};
    use crate::types::Outcome;

    const LOGIN: &[&[u8]] = &[
        b"+OK ready\r\n",
        b"USER bob\r\n",
        b"+OK\r\n",
        b"PASS secret\r\n",
        b"+OK\r\n",
    ];

    /// Script for a login followed by `rest` as (write, read) pairs.
    fn script(rest: &[(&[u8], &[u8])]) -> Mock {
        let mut builder = Builder::new();
        builder
            .read(LOGIN[0])
            .write(LOGIN[1])
            .read(LOGIN[2])
            .write(LOGIN[3])
            .read(LOGIN[4]);
        for (write, read) in rest {
            builder.write(write).read(read);
        }
        builder.build()
    }

    async fn logged_in(mock: Mock) -> Session<Mock> {
        let config = Config::builder("pop.example.com")
            .security(Security::None)
            .build();
        let session = Session::from_stream(mock, &config).await.unwrap();
        assert!(session.login("bob", "secret").await.unwrap().is_ok());
        session
    }

    #[tokio::test]
    async fn test_stat() {
        let session = logged_in(script(&[(b"STAT\r\n", b"+OK 2 320\r\n")])).await;

        let result = session.stat().await.unwrap();
        assert_eq!(
            result.value(),
            Some(&DropListing {
                message_count: 2,
                size: 320
            })
        );
    }

    #[tokio::test]
    async fn test_stat_malformed_is_protocol_error() {
        let session = logged_in(script(&[(b"STAT\r\n", b"+OK lots\r\n")])).await;

        let result = session.stat().await.unwrap();
        assert!(matches!(result.outcome(), Outcome::ProtocolError { .. }));
        assert_eq!(session.state(), SessionState::Transaction);
    }

    #[tokio::test]
    async fn test_list_skips_malformed_lines() {
        let session = logged_in(script(&[(
            b"LIST\r\n",
            b"+OK 2 messages\r\n1 120\r\nbogus\r\n2 200\r\n.\r\n",
        )]))
        .await;

        let listings = session.list().await.unwrap().into_value().unwrap();
        assert_eq!(
            listings,
            vec![
                ScanListing {
                    message_number: 1,
                    size: 120
                },
                ScanListing {
                    message_number: 2,
                    size: 200
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_message() {
        let session = logged_in(script(&[(b"LIST 2\r\n", b"+OK 2 200\r\n")])).await;

        let listing = session.list_message(2).await.unwrap().into_value().unwrap();
        assert_eq!(listing.size, 200);
    }

    #[tokio::test]
    async fn test_retr_octet_count_is_advisory() {
        let session = logged_in(script(&[(
            b"RETR 1\r\n",
            b"+OK 3 octets\r\nSubject: longer than announced\r\n\r\nbody\r\n.\r\n",
        )]))
        .await;

        let message = session.retr(1).await.unwrap().into_value().unwrap();
        assert_eq!(&message[..], b"Subject: longer than announced\r\n\r\nbody\r\n");
        assert_eq!(session.state(), SessionState::Transaction);
    }

    #[tokio::test]
    async fn test_retr_destuffs() {
        let session = logged_in(script(&[(
            b"RETR 1\r\n",
            b"+OK 24 octets\r\nSubject: hi\r\n\r\n..dot\r\n.\r\n",
        )]))
        .await;

        let message = session.retr(1).await.unwrap().into_value().unwrap();
        assert_eq!(&message[..], b"Subject: hi\r\n\r\n.dot\r\n");
    }

    #[tokio::test]
    async fn test_retr_rejected() {
        let session = logged_in(script(&[(b"RETR 9\r\n", b"-ERR no such message\r\n")])).await;

        let result = session.retr(9).await.unwrap();
        assert!(result.is_rejected());
        assert_eq!(session.state(), SessionState::Transaction);
    }

    #[tokio::test]
    async fn test_zero_message_number_sends_nothing() {
        let session = logged_in(script(&[])).await;

        let err = session.dele(0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(session.state(), SessionState::Transaction);
    }

    #[tokio::test]
    async fn test_top_incapable_sends_nothing() {
        let session = logged_in(script(&[])).await;
        session.set_handles_incapable_as_error(true);

        let err = session.top(1, 10).await.unwrap_err();
        assert!(matches!(err, Error::Incapable(what) if what == "TOP"));
        assert_eq!(session.state(), SessionState::Transaction);
    }

    #[tokio::test]
    async fn test_uidl() {
        let session = logged_in(script(&[
            (
                b"UIDL\r\n",
                b"+OK\r\n1 whqtswO00WBw418f9t5JxYwZ\r\n2 QhdPYR:00WBw1Ph7x7\r\n.\r\n",
            ),
            (b"UIDL 2\r\n", b"+OK 2 QhdPYR:00WBw1Ph7x7\r\n"),
        ]))
        .await;

        let all = session.uidl().await.unwrap().into_value().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].unique_id, "whqtswO00WBw418f9t5JxYwZ");

        let one = session.uidl_message(2).await.unwrap().into_value().unwrap();
        assert_eq!(one.unique_id, "QhdPYR:00WBw1Ph7x7");
    }

    #[tokio::test]
    async fn test_dele_noop_rset() {
        let session = logged_in(script(&[
            (b"DELE 1\r\n", b"+OK message 1 deleted\r\n"),
            (b"NOOP\r\n", b"+OK\r\n"),
            (b"RSET\r\n", b"+OK maildrop has 2 messages\r\n"),
        ]))
        .await;

        assert!(session.dele(1).await.unwrap().is_ok());
        assert!(session.noop().await.unwrap().is_ok());
        assert!(session.rset().await.unwrap().is_ok());
    }
}
