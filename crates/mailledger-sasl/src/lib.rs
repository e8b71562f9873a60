//! # mailledger-sasl
//!
//! Client-side SASL mechanisms for mail retrieval protocols.
//!
//! A mechanism is an opaque challenge/response engine: the protocol layer
//! hands it server challenges (already decoded from base64) and sends back
//! whatever it answers. The protocol layer never looks inside.
//!
//! ## Built-in mechanisms
//!
//! - PLAIN (RFC 4616)
//! - LOGIN (draft-murchison-sasl-login)
//! - ANONYMOUS (RFC 4505)
//! - CRAM-MD5 (RFC 2195)
//! - XOAUTH2 (Google/Microsoft proprietary)
//! - OAUTHBEARER (RFC 7628)
//!
//! ## Quick Start
//!
//! ```
//! use mailledger_sasl::{Credential, ExchangeStatus, MechanismRegistry};
//!
//! let registry = MechanismRegistry::default();
//! let credential = Credential::new("tim", "tanstaaftanstaaf");
//! let mut mechanism = registry.create("cram-md5", credential).unwrap();
//!
//! let step = mechanism
//!     .exchange(Some(b"<1896.697170952@postoffice.example.net>"))
//!     .unwrap();
//! assert_eq!(step.status, ExchangeStatus::Succeeded);
//! ```
//!
//! ## Modules
//!
//! - [`mechanism`]: The `Mechanism` trait and exchange state
//! - [`mechanisms`]: Built-in mechanism implementations

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod mechanism;
pub mod mechanisms;
mod registry;

pub use error::{Error, Result};
pub use mechanism::{Credential, ExchangeStatus, Mechanism, Step};
pub use registry::{MechanismInfo, MechanismRegistry};
