//! `keyward-core`: shared building blocks.
//!
//! Pure types only: identifiers, the domain error and the clock seam.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{CapabilityId, PrincipalId, RoleId, TokenId};
