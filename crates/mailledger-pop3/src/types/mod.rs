//! Core POP3 types.

mod authority;
mod capability;
mod listing;
mod response;
mod result;
mod state;

pub use authority::{AuthType, Authority};
pub use capability::{Capability, CapabilitySet, Extension};
pub use listing::{DropListing, ScanListing, UniqueIdListing};
pub use response::{Indicator, ResponseCode, StatusLine};
pub use result::{CommandResult, Outcome};
pub use state::SessionState;
