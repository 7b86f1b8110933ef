//! Storage adapters for the credential store contracts.

pub mod memory;
pub mod postgres;
pub mod seed;

pub use memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;
pub use seed::{BootstrapAdmin, SeedError, bootstrap_admin, seed_builtin_capabilities};
