//! `keyward-auth`: bearer-token authentication and capability resolution.
//!
//! Storage and HTTP stay outside this crate: persistence is reached through
//! the contracts in [`store`], and the request pipeline talks to the
//! [`AccessGate`].

pub mod context;
pub mod gate;
pub mod grants;
pub mod ledger;
pub mod permissions;
pub mod principal;
pub mod refresher;
pub mod resolver;
pub mod roles;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

pub use context::{Cancelled, OpContext};
pub use gate::{AccessDecision, AccessGate, AuthContext, DenialReason, parse_bearer};
pub use grants::{AdminError, GrantAdmin};
pub use ledger::{
    Authenticated, CredentialFault, DEFAULT_TOKEN_TTL_HOURS, IssuedToken, LedgerConfig, LedgerError,
    TokenLedger,
};
pub use permissions::{Capability, CapabilityRecord, builtin};
pub use principal::PrincipalProfile;
pub use refresher::{LastUsedRefresher, RefreshQueue, RefresherConfig, RefresherHandle, RefresherStats};
pub use resolver::{GrantTier, PermissionResolver, ResolveError, Resolution};
pub use roles::{Role, RoleDetail, RoleSpec};
pub use store::{CredentialStore, GrantStore, StoreError, TokenStore};
pub use token::{AccessToken, RawToken, TokenHash, mint_token, normalize_label};
