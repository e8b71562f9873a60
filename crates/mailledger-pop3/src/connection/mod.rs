//! POP3 connection management.
//!
//! This module provides connection handling for POP3 servers, including:
//! - Configuration (host, port, security mode, timeouts)
//! - TLS/plaintext stream abstraction and STLS upgrade
//! - Framed I/O with dot-stuffing
//! - The guarded session state machine

mod config;
mod framed;
mod session;
mod stream;

pub use config::{Config, ConfigBuilder, Security};
pub use framed::{FramedStream, stuff_block};
pub(crate) use framed::block_lines;
pub use session::Session;
pub use stream::{
    PopStream, TlsUpgrader, UpgradeFuture, UpgradeStream, connect, create_tls_connector,
};
