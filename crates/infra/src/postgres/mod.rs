//! Postgres-backed credential store.
//!
//! Implements every store contract on one connection pool. Multi-statement
//! mutations run inside a transaction; if the caller drops the future
//! before commit, the transaction is rolled back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation { constraint }` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (other) | any other | `Unavailable` |
//! | RowNotFound | N/A | `NotFound` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |
//! | PoolClosed, PoolTimedOut, Io, other | N/A | `Unavailable` |
//!
//! Constraint names come from the driver's structured error fields, never
//! from parsing the message text.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use keyward_auth::{
    AccessToken, Capability, CapabilityRecord, CredentialStore, GrantStore, PrincipalProfile, Role,
    RoleDetail, RoleSpec, StoreError, TokenHash, TokenStore,
};
use keyward_core::{CapabilityId, PrincipalId, RoleId, TokenId};

/// Idempotent DDL for every table the store touches.
pub const SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

fn uuids<'a, T, I>(ids: I) -> Vec<Uuid>
where
    T: Into<Uuid> + Copy + 'a,
    I: IntoIterator<Item = &'a T>,
{
    ids.into_iter().map(|id| (*id).into()).collect()
}

async fn commit(tx: Transaction<'static, Postgres>, operation: &str) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self), fields(principal_id = %principal), err)]
    async fn find_direct_capability_names(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.name
            FROM principal_capabilities pc
            JOIN capabilities c ON c.id = pc.capability_id
            WHERE pc.principal_id = $1
            "#,
        )
        .bind(principal.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_direct_capability_names", e))?;

        Ok(names.into_iter().collect())
    }

    #[instrument(skip(self), fields(principal_id = %principal), err)]
    async fn find_role_ids_for_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<BTreeSet<RoleId>, StoreError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT role_id FROM principal_roles WHERE principal_id = $1")
                .bind(principal.as_uuid())
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_role_ids_for_principal", e))?;

        Ok(ids.into_iter().map(RoleId::from_uuid).collect())
    }

    #[instrument(skip(self, roles), fields(role_count = roles.len()), err)]
    async fn find_capability_names_for_roles(
        &self,
        roles: &BTreeSet<RoleId>,
    ) -> Result<BTreeSet<String>, StoreError> {
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }

        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT c.name
            FROM role_capabilities rc
            JOIN capabilities c ON c.id = rc.capability_id
            WHERE rc.role_id = ANY($1)
            "#,
        )
        .bind(uuids(roles))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_capability_names_for_roles", e))?;

        Ok(names.into_iter().collect())
    }
}

#[async_trait]
impl TokenStore for PostgresCredentialStore {
    #[instrument(skip_all, err)]
    async fn find_access_token_by_hash(
        &self,
        hash: &TokenHash,
    ) -> Result<Option<AccessToken>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, secret_hash, principal_id, label, created_at, last_used_at, expires_at
            FROM access_tokens
            WHERE secret_hash = $1
            "#,
        )
        .bind(hash.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_access_token_by_hash", e))?;

        match row {
            Some(r) => {
                let row = AccessTokenRow::from_row(&r)
                    .map_err(|e| map_sqlx_error("decode_access_token", e))?;
                Ok(Some(AccessToken::try_from(row)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, record),
        fields(token_id = %record.id, principal_id = %record.principal_id),
        err
    )]
    async fn insert_access_token(&self, record: &AccessToken) -> Result<(), StoreError> {
        let mut tx = self.begin("insert_access_token").await?;

        sqlx::query(
            r#"
            INSERT INTO access_tokens
                (id, secret_hash, principal_id, label, created_at, last_used_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.secret_hash.as_str())
        .bind(record.principal_id.as_uuid())
        .bind(&record.label)
        .bind(record.created_at)
        .bind(record.last_used_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_access_token", e))?;

        commit(tx, "insert_access_token").await
    }

    #[instrument(skip_all, err)]
    async fn delete_access_token_by_hash(&self, hash: &TokenHash) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE secret_hash = $1")
            .bind(hash.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_access_token_by_hash", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(principal_id = %principal), err)]
    async fn delete_access_tokens_by_principal(
        &self,
        principal: PrincipalId,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM access_tokens WHERE principal_id = $1")
            .bind(principal.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_access_tokens_by_principal", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip_all, err)]
    async fn update_last_used(
        &self,
        hash: &TokenHash,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE access_tokens SET last_used_at = $2 WHERE secret_hash = $1")
            .bind(hash.as_str())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_last_used", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl GrantStore for PostgresCredentialStore {
    #[instrument(skip(self, principal), fields(principal_id = %principal.id), err)]
    async fn register_principal(&self, principal: &PrincipalProfile) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO principals (id, display_name) VALUES ($1, $2)")
            .bind(principal.id.as_uuid())
            .bind(&principal.display_name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("register_principal", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(principal_id = %id), err)]
    async fn get_principal(&self, id: PrincipalId) -> Result<Option<PrincipalProfile>, StoreError> {
        let row = sqlx::query("SELECT id, display_name FROM principals WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_principal", e))?;

        row.map(|r| principal_from_row(&r)).transpose()
    }

    #[instrument(skip(self, display_name), err)]
    async fn find_principals_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<PrincipalProfile>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, display_name FROM principals WHERE display_name = $1 ORDER BY created_at, id",
        )
        .bind(display_name)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_principals_by_display_name", e))?;

        rows.iter().map(principal_from_row).collect()
    }

    #[instrument(skip(self), fields(capability = %name), err)]
    async fn ensure_capability(&self, name: &Capability) -> Result<CapabilityRecord, StoreError> {
        let mut tx = self.begin("ensure_capability").await?;

        sqlx::query("INSERT INTO capabilities (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
            .bind(CapabilityId::new().as_uuid())
            .bind(name.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ensure_capability", e))?;

        let id: Uuid = sqlx::query_scalar("SELECT id FROM capabilities WHERE name = $1")
            .bind(name.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ensure_capability", e))?;

        commit(tx, "ensure_capability").await?;
        Ok(CapabilityRecord {
            id: CapabilityId::from_uuid(id),
            name: name.clone(),
        })
    }

    #[instrument(skip(self), err)]
    async fn list_capabilities(&self) -> Result<Vec<CapabilityRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM capabilities ORDER BY name")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_capabilities", e))?;

        rows.iter().map(capability_from_row).collect()
    }

    #[instrument(skip(self, spec), fields(role_id = %id, role = %spec.name), err)]
    async fn create_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError> {
        let mut tx = self.begin("create_role").await?;

        sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2)")
            .bind(id.as_uuid())
            .bind(&spec.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_role", e))?;

        link_role_capabilities(&mut tx, id, &spec.capability_ids).await?;
        commit(tx, "create_role").await?;

        Ok(Role {
            id,
            name: spec.name.clone(),
        })
    }

    #[instrument(skip(self, spec), fields(role_id = %id, role = %spec.name), err)]
    async fn update_role(&self, id: RoleId, spec: &RoleSpec) -> Result<Role, StoreError> {
        let mut tx = self.begin("update_role").await?;

        let updated = sqlx::query("UPDATE roles SET name = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(&spec.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;
        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM role_capabilities WHERE role_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;

        link_role_capabilities(&mut tx, id, &spec.capability_ids).await?;
        commit(tx, "update_role").await?;

        Ok(Role {
            id,
            name: spec.name.clone(),
        })
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDetail>, StoreError> {
        let mut tx = self.begin("get_role").await?;

        let Some(name) = sqlx::query_scalar::<_, String>("SELECT name FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?
        else {
            return Ok(None);
        };

        let capabilities = sqlx::query(
            r#"
            SELECT c.id, c.name
            FROM role_capabilities rc
            JOIN capabilities c ON c.id = rc.capability_id
            WHERE rc.role_id = $1
            ORDER BY c.name
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("get_role", e))?
        .iter()
        .map(capability_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let members = sqlx::query(
            r#"
            SELECT p.id, p.display_name
            FROM principal_roles pr
            JOIN principals p ON p.id = pr.principal_id
            WHERE pr.role_id = $1
            ORDER BY p.display_name
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("get_role", e))?
        .iter()
        .map(principal_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        commit(tx, "get_role").await?;
        Ok(Some(RoleDetail {
            id,
            name,
            capabilities,
            members,
        }))
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM roles ORDER BY name")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;

        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self, roles), fields(principal_id = %principal, role_count = roles.len()), err)]
    async fn replace_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &BTreeSet<RoleId>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("replace_principal_roles").await?;
        lock_principal(&mut tx, principal).await?;

        sqlx::query("DELETE FROM principal_roles WHERE principal_id = $1")
            .bind(principal.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_principal_roles", e))?;

        if !roles.is_empty() {
            sqlx::query(
                "INSERT INTO principal_roles (principal_id, role_id) SELECT $1, UNNEST($2::uuid[])",
            )
            .bind(principal.as_uuid())
            .bind(uuids(roles))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_principal_roles", e))?;
        }

        commit(tx, "replace_principal_roles").await
    }

    #[instrument(
        skip(self, capabilities),
        fields(principal_id = %principal, capability_count = capabilities.len()),
        err
    )]
    async fn replace_direct_grants(
        &self,
        principal: PrincipalId,
        capabilities: &BTreeSet<CapabilityId>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("replace_direct_grants").await?;
        lock_principal(&mut tx, principal).await?;

        sqlx::query("DELETE FROM principal_capabilities WHERE principal_id = $1")
            .bind(principal.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_direct_grants", e))?;

        if !capabilities.is_empty() {
            sqlx::query(
                "INSERT INTO principal_capabilities (principal_id, capability_id) \
                 SELECT $1, UNNEST($2::uuid[])",
            )
            .bind(principal.as_uuid())
            .bind(uuids(capabilities))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_direct_grants", e))?;
        }

        commit(tx, "replace_direct_grants").await
    }
}

/// Row-lock the principal for the rest of the transaction; `NotFound` if absent.
async fn lock_principal(
    tx: &mut Transaction<'static, Postgres>,
    principal: PrincipalId,
) -> Result<(), StoreError> {
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM principals WHERE id = $1 FOR UPDATE")
        .bind(principal.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_principal", e))?;
    exists.map(|_| ()).ok_or(StoreError::NotFound)
}

async fn link_role_capabilities(
    tx: &mut Transaction<'static, Postgres>,
    role: RoleId,
    capabilities: &BTreeSet<CapabilityId>,
) -> Result<(), StoreError> {
    if capabilities.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO role_capabilities (role_id, capability_id) SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(role.as_uuid())
    .bind(uuids(capabilities))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("link_role_capabilities", e))?;
    Ok(())
}

fn capability_from_row(row: &sqlx::postgres::PgRow) -> Result<CapabilityRecord, StoreError> {
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode_capability", e))?;
    let name: String = row.try_get("name").map_err(|e| map_sqlx_error("decode_capability", e))?;
    let name = Capability::parse(name).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(CapabilityRecord {
        id: CapabilityId::from_uuid(id),
        name,
    })
}

fn role_from_row(row: &sqlx::postgres::PgRow) -> Result<Role, StoreError> {
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode_role", e))?;
    let name: String = row.try_get("name").map_err(|e| map_sqlx_error("decode_role", e))?;
    Ok(Role {
        id: RoleId::from_uuid(id),
        name,
    })
}

fn principal_from_row(row: &sqlx::postgres::PgRow) -> Result<PrincipalProfile, StoreError> {
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode_principal", e))?;
    let display_name: String = row
        .try_get("display_name")
        .map_err(|e| map_sqlx_error("decode_principal", e))?;
    Ok(PrincipalProfile {
        id: PrincipalId::from_uuid(id),
        display_name,
    })
}

/// Map a SQLx error to a `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation { constraint },
                Some("23503") => StoreError::ForeignKeyViolation(constraint),
                _ => StoreError::Unavailable(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("{} in {}", err, operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct AccessTokenRow {
    id: Uuid,
    secret_hash: String,
    principal_id: Uuid,
    label: String,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessTokenRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccessTokenRow {
            id: row.try_get("id")?,
            secret_hash: row.try_get("secret_hash")?,
            principal_id: row.try_get("principal_id")?,
            label: row.try_get("label")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<AccessTokenRow> for AccessToken {
    type Error = StoreError;

    fn try_from(row: AccessTokenRow) -> Result<Self, Self::Error> {
        Ok(AccessToken {
            id: TokenId::from_uuid(row.id),
            secret_hash: TokenHash::from_stored(row.secret_hash)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            principal_id: PrincipalId::from_uuid(row.principal_id),
            label: row.label,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            expires_at: row.expires_at,
        })
    }
}
