//! Sans-I/O reply parsing.
//!
//! Functions here work on single lines with the line terminator already
//! removed. The framing itself (CRLF, dot-stuffing) lives in
//! [`FramedStream`](crate::connection::FramedStream).

use crate::types::{
    DropListing, Indicator, ResponseCode, ScanListing, StatusLine, UniqueIdListing,
};
use crate::{Error, Result};

/// Parses a status line (`+OK`, `-ERR` or a `+` continuation).
///
/// A bracketed token directly after the indicator is split off as the
/// response code (RFC 2449 section 8).
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] if the line does not start with a
/// recognised indicator.
pub fn parse_status_line(line: &[u8]) -> Result<StatusLine> {
    let line = String::from_utf8_lossy(line);

    let (indicator, rest) = split_indicator(&line).ok_or_else(|| {
        Error::ProtocolViolation(format!("unexpected status line: {line:?}"))
    })?;

    if indicator == Indicator::Continuation {
        return Ok(StatusLine {
            indicator,
            code: None,
            text: rest.to_string(),
        });
    }

    let (code, text) = split_response_code(rest);
    Ok(StatusLine {
        indicator,
        code,
        text: text.to_string(),
    })
}

/// Splits the indicator from the rest of the line.
fn split_indicator(line: &str) -> Option<(Indicator, &str)> {
    for (token, indicator) in [
        ("+OK", Indicator::Ok),
        ("-ERR", Indicator::Err),
        ("+", Indicator::Continuation),
    ] {
        let Some(head) = line.get(..token.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(token) {
            continue;
        }
        let rest = &line[token.len()..];
        if rest.is_empty() {
            return Some((indicator, rest));
        }
        if let Some(text) = rest.strip_prefix(' ') {
            return Some((indicator, text));
        }
    }
    None
}

/// Splits a leading `[CODE]` from the status text.
fn split_response_code(text: &str) -> (Option<ResponseCode>, &str) {
    let Some(inner) = text.strip_prefix('[') else {
        return (None, text);
    };
    let Some(end) = inner.find(']') else {
        return (None, text);
    };

    let code = &inner[..end];
    if code.is_empty() || code.contains(' ') {
        return (None, text);
    }
    (Some(ResponseCode::parse(code)), inner[end + 1..].trim_start())
}

/// Extracts the APOP timestamp from a greeting text.
///
/// The timestamp is everything from the first `<` through the next `>`,
/// brackets included. A `<` without a closing `>` yields `None`.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<String> {
    let start = text.find('<')?;
    let end = text[start..].find('>')? + start;
    Some(text[start..=end].to_string())
}

/// Extracts the octet count from a RETR or TOP reply such as
/// `120 octets`.
#[must_use]
pub fn parse_octet_count(text: &str) -> Option<usize> {
    let mut parts = text.split_whitespace();
    let count = parts.next()?.parse().ok()?;
    parts
        .next()
        .is_some_and(|unit| unit.eq_ignore_ascii_case("octets"))
        .then_some(count)
}

fn parse_pair(text: &str) -> Option<(u64, &str)> {
    let mut parts = text.split_whitespace();
    let number = parts.next()?.parse().ok()?;
    let second = parts.next()?;
    Some((number, second))
}

/// Parses the text of a STAT reply: `nn mm`.
#[must_use]
pub fn parse_drop_listing(text: &str) -> Option<DropListing> {
    let (message_count, size) = parse_pair(text)?;
    Some(DropListing {
        message_count,
        size: size.parse().ok()?,
    })
}

/// Parses a LIST line or single-message LIST reply text: `n size`.
#[must_use]
pub fn parse_scan_listing(text: &str) -> Option<ScanListing> {
    let (message_number, size) = parse_pair(text)?;
    Some(ScanListing {
        message_number,
        size: size.parse().ok()?,
    })
}

/// Parses a UIDL line or single-message UIDL reply text: `n unique-id`.
#[must_use]
pub fn parse_unique_id_listing(text: &str) -> Option<UniqueIdListing> {
    let (message_number, unique_id) = parse_pair(text)?;
    Some(UniqueIdListing {
        message_number,
        unique_id: unique_id.to_string(),
    })
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
    use proptest::prelude::*;

    use super::*;

    mod status_line_tests {
        use super::*;

        #[test]
        fn parse_ok() {
            let status = parse_status_line(b"+OK POP3 server ready").unwrap();
            assert!(status.is_ok());
            assert_eq!(status.code, None);
            assert_eq!(status.text, "POP3 server ready");
        }

        #[test]
        fn parse_bare_ok() {
            let status = parse_status_line(b"+OK").unwrap();
            assert!(status.is_ok());
            assert_eq!(status.text, "");
        }

        #[test]
        fn parse_err_with_code() {
            let status = parse_status_line(b"-ERR [IN-USE] maildrop already locked").unwrap();
            assert!(status.is_err());
            assert_eq!(status.code, Some(ResponseCode::InUse));
            assert_eq!(status.text, "maildrop already locked");
        }

        #[test]
        fn parse_hierarchical_code() {
            let status = parse_status_line(b"-ERR [SYS/TEMP] try later").unwrap();
            assert_eq!(status.code, Some(ResponseCode::SysTemp));
        }

        #[test]
        fn bracket_without_close_is_text() {
            let status = parse_status_line(b"-ERR [oops").unwrap();
            assert_eq!(status.code, None);
            assert_eq!(status.text, "[oops");
        }

        #[test]
        fn parse_continuation() {
            let status = parse_status_line(b"+ VXNlcm5hbWU6").unwrap();
            assert!(status.is_continuation());
            assert_eq!(status.text, "VXNlcm5hbWU6");

            let empty = parse_status_line(b"+ ").unwrap();
            assert!(empty.is_continuation());
            assert_eq!(empty.text, "");

            let bare = parse_status_line(b"+").unwrap();
            assert!(bare.is_continuation());
        }

        #[test]
        fn lowercase_indicator() {
            assert!(parse_status_line(b"+ok fine").unwrap().is_ok());
            assert!(parse_status_line(b"-err no").unwrap().is_err());
        }

        #[test]
        fn missing_indicator() {
            assert!(matches!(
                parse_status_line(b"OK ready"),
                Err(Error::ProtocolViolation(_))
            ));
            assert!(parse_status_line(b"").is_err());
            assert!(parse_status_line(b"+OKAY").is_err());
            assert!(parse_status_line(b"-ERROR").is_err());
        }
    }

    mod timestamp_tests {
        use super::*;

        #[test]
        fn greeting_with_timestamp() {
            assert_eq!(
                parse_timestamp("POP3 server ready <1896.697170952@dbc.mtview.ca.us>"),
                Some("<1896.697170952@dbc.mtview.ca.us>".to_string())
            );
        }

        #[test]
        fn greeting_without_timestamp() {
            assert_eq!(parse_timestamp("POP3 server ready"), None);
        }

        #[test]
        fn unterminated_timestamp() {
            assert_eq!(parse_timestamp("ready <timestamp@localhost"), None);
        }

        #[test]
        fn timestamp_in_middle() {
            assert_eq!(
                parse_timestamp("ready <timestamp@localhost> go ahead"),
                Some("<timestamp@localhost>".to_string())
            );
        }
    }

    mod listing_tests {
        use super::*;

        #[test]
        fn drop_listing() {
            assert_eq!(
                parse_drop_listing("2 320"),
                Some(DropListing {
                    message_count: 2,
                    size: 320
                })
            );
            assert_eq!(parse_drop_listing("2"), None);
            assert_eq!(parse_drop_listing("two 320"), None);
        }

        #[test]
        fn scan_listing_ignores_trailing_text() {
            assert_eq!(
                parse_scan_listing("1 120 extra"),
                Some(ScanListing {
                    message_number: 1,
                    size: 120
                })
            );
        }

        #[test]
        fn octet_count() {
            assert_eq!(parse_octet_count("120 octets"), Some(120));
            assert_eq!(parse_octet_count("120 OCTETS follow"), Some(120));
            assert_eq!(parse_octet_count("message follows"), None);
            assert_eq!(parse_octet_count("120"), None);
        }

        #[test]
        fn unique_id_listing() {
            assert_eq!(
                parse_unique_id_listing("1 whqtswO00WBw418f9t5JxYwZ"),
                Some(UniqueIdListing {
                    message_number: 1,
                    unique_id: "whqtswO00WBw418f9t5JxYwZ".to_string()
                })
            );
            assert_eq!(parse_unique_id_listing("1"), None);
        }
    }

    proptest! {
        #[test]
        fn status_line_never_panics(line in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = parse_status_line(&line);
        }

        #[test]
        fn ok_text_round_trips(text in "[a-zA-Z0-9 .]{0,40}") {
            let line = format!("+OK {text}");
            let status = parse_status_line(line.as_bytes()).unwrap();
            prop_assert!(status.is_ok());
            prop_assert_eq!(status.text, text);
        }
    }
}
