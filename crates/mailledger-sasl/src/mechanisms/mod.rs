//! Built-in mechanism implementations.

mod anonymous;
mod cram_md5;
mod login;
mod oauth;
mod plain;

pub use anonymous::Anonymous;
pub use cram_md5::{CramMd5, cram_md5_digest};
pub use login::Login;
pub use oauth::{OAuthBearer, XOAuth2, oauthbearer_message, xoauth2_message};
pub use plain::{Plain, plain_message};
