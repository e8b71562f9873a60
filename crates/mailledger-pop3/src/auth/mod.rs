//! Authentication.
//!
//! This module holds what the session needs to authenticate beyond the
//! bare commands:
//! - [`CredentialResolver`] and the built-in resolvers
//! - [`ClientProfile`], the connection and policy description
//! - [`create_session`] and [`authenticate`], which run the mechanism
//!   ladder against the server's capabilities
//! - [`apop_digest`] for the greeting timestamp scheme
//!
//! SASL mechanisms themselves live in `mailledger-sasl` and are looked up in
//! the session's [`MechanismRegistry`](mailledger_sasl::MechanismRegistry).

mod apop;
mod credentials;
pub(crate) mod exchange;
mod ladder;
mod profile;

pub use apop::apop_digest;
#[cfg(feature = "keyring")]
pub use credentials::KeyringCredentials;
pub use credentials::{Credential, CredentialResolver, StaticCredentials};
pub use ladder::{authenticate, authenticate_with, create_session};
pub use profile::{ClientProfile, DEFAULT_SASL_MECHANISMS};
