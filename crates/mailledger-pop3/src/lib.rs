//! # mailledger-pop3
//!
//! An async POP3 client session engine implementing RFC 1939 with the
//! CAPA (RFC 2449), STLS (RFC 2595) and AUTH (RFC 5034) extensions.
//!
//! ## Features
//!
//! - **Guarded sessions**: one command in flight at a time; concurrent use
//!   fails immediately instead of queueing
//! - **Two timeout domains**: per-read/per-write socket timeouts plus a
//!   transaction timeout covering a whole command (including multi-round
//!   AUTH exchanges)
//! - **Authentication ladder**: explicit mechanism, negotiated SASL, APOP,
//!   then USER/PASS, driven by the server's capabilities
//! - **TLS via rustls**: implicit TLS or STLS upgrade without OpenSSL
//! - **Sans-I/O parser**: status lines and listings parsed separately from
//!   network I/O
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailledger_pop3::auth::{ClientProfile, StaticCredentials, create_session};
//! use mailledger_pop3::{Config, TlsUpgrader};
//!
//! #[tokio::main]
//! async fn main() -> mailledger_pop3::Result<()> {
//!     let profile = ClientProfile::new(Config::new("pop.example.com")).username("bob");
//!     let credentials = StaticCredentials::new("bob", "secret");
//!
//!     // Connect, fetch capabilities and authenticate
//!     let session = create_session(&profile, &credentials, &TlsUpgrader::new()).await?;
//!
//!     // Inspect the maildrop
//!     let stat = session.stat().await?;
//!     if let Some(drop) = stat.value() {
//!         println!("{} messages, {} octets", drop.message_count, drop.size);
//!     }
//!
//!     // Download the first message
//!     if let Some(message) = session.retr(1).await?.into_value() {
//!         println!("{}", String::from_utf8_lossy(&message));
//!     }
//!
//!     session.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! ┌─────────────────────┐
//! │    NotConnected     │ ─── connect() + greeting ───→ Authorization
//! └─────────────────────┘
//!            ▲
//!            │ quit() / timeout / protocol fault
//! ┌─────────────────────┐
//! │    Authorization    │ ─── USER/PASS, APOP, AUTH ───→ Transaction
//! └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │     Transaction     │ ─── quit() ───→ NotConnected
//! └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: Credential resolution, client profiles and the mechanism ladder
//! - [`command`]: POP3 commands and their serialization
//! - [`connection`]: Configuration, transport, framing and the session
//! - [`parser`]: Sans-I/O reply parser
//! - [`types`]: Core POP3 types (status lines, capabilities, listings)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::Command;
pub use connection::{
    Config, ConfigBuilder, FramedStream, PopStream, Security, Session, TlsUpgrader, UpgradeFuture,
    UpgradeStream,
};
pub use error::{Error, Result};
pub use mailledger_sasl::{Credential, ExchangeStatus, Mechanism, MechanismRegistry, Step};
pub use types::{
    AuthType, Authority, Capability, CapabilitySet, CommandResult, DropListing, Extension,
    Outcome, ResponseCode, ScanListing, SessionState, StatusLine, UniqueIdListing,
};
