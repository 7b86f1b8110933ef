use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use keyward_auth::{
    AccessGate, CredentialStore, GrantAdmin, GrantStore, LastUsedRefresher, OpContext,
    PermissionResolver, RefresherHandle, TokenLedger, TokenStore,
};
use keyward_core::Clock;
use keyward_infra::{
    BootstrapAdmin, InMemoryCredentialStore, PostgresCredentialStore, bootstrap_admin,
    seed_builtin_capabilities,
};

use crate::config::AppConfig;

pub type SharedTokenStore = Arc<dyn TokenStore>;
pub type SharedCredentialStore = Arc<dyn CredentialStore>;
pub type SharedGrantStore = Arc<dyn GrantStore>;

pub type Gate = AccessGate<SharedTokenStore, SharedCredentialStore>;

/// Everything request handlers need.
pub struct AppServices {
    pub gate: Gate,
    pub admin: GrantAdmin<SharedGrantStore>,
    pub request_timeout: Duration,
}

impl AppServices {
    /// Fresh per-request cancellation scope with the configured deadline.
    pub fn request_context(&self) -> OpContext {
        OpContext::background().with_timeout(self.request_timeout)
    }

    pub fn ledger(&self) -> &TokenLedger<SharedTokenStore> {
        self.gate.ledger()
    }

    pub fn resolver(&self) -> &PermissionResolver<SharedCredentialStore> {
        self.gate.resolver()
    }
}

/// Services plus the handles `main` keeps for startup output and shutdown.
pub struct ServiceBundle {
    pub services: Arc<AppServices>,
    pub refresher: RefresherHandle,
    pub bootstrap: Option<BootstrapAdmin>,
}

struct Stores {
    tokens: SharedTokenStore,
    credentials: SharedCredentialStore,
    grants: SharedGrantStore,
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(
                PostgresCredentialStore::connect(url)
                    .await
                    .context("failed to connect to Postgres credential store")?,
            );
            tracing::info!(backend = "postgres", "credential store ready");
            Ok(Stores {
                tokens: store.clone(),
                credentials: store.clone(),
                grants: store,
            })
        }
        None => {
            let store = Arc::new(InMemoryCredentialStore::new());
            tracing::warn!(backend = "memory", "DATABASE_URL not set; state is not persisted");
            Ok(Stores {
                tokens: store.clone(),
                credentials: store.clone(),
                grants: store,
            })
        }
    }
}

/// Wire stores, ledger, resolver, refresher and seed data.
///
/// Must run inside a tokio runtime (the refresher worker is spawned here).
pub async fn build_services(config: &AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<ServiceBundle> {
    let stores = open_stores(config).await?;

    let refresher = LastUsedRefresher::spawn(stores.tokens.clone(), config.refresher_config());
    let ledger = TokenLedger::new(
        stores.tokens.clone(),
        clock,
        config.ledger_config(),
        refresher.queue(),
    );
    let gate = AccessGate::new(ledger, PermissionResolver::new(stores.credentials.clone()));
    let admin = GrantAdmin::new(stores.grants.clone());

    let ctx = OpContext::background();
    let bootstrap = match &config.bootstrap_admin {
        Some(name) => Some(
            bootstrap_admin(&ctx, &admin, gate.ledger(), name)
                .await
                .context("failed to prepare bootstrap administrator")?,
        ),
        None => {
            seed_builtin_capabilities(&ctx, &admin)
                .await
                .context("failed to seed builtin capabilities")?;
            None
        }
    };

    Ok(ServiceBundle {
        services: Arc::new(AppServices {
            gate,
            admin,
            request_timeout: config.request_timeout,
        }),
        refresher,
        bootstrap,
    })
}
