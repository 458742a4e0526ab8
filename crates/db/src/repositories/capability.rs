use sqlx::Row;

use attendance_core::domain::capability::Capability;
use attendance_core::domain::employee::PrincipalId;
use attendance_core::errors::StoreError;
use attendance_core::ports::CapabilityCheck;

use super::RepositoryError;
use crate::DbPool;

/// Capability grants keyed by principal, stored under their canonical names.
pub struct SqlCapabilityRepository {
    pool: DbPool,
}

impl SqlCapabilityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn grant(
        &self,
        principal_id: &PrincipalId,
        capability: Capability,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO principal_capability (principal_id, capability) VALUES (?, ?)
             ON CONFLICT(principal_id, capability) DO NOTHING",
        )
        .bind(&principal_id.0)
        .bind(capability.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes the grant under every name that parses to `capability`.
    pub async fn revoke(
        &self,
        principal_id: &PrincipalId,
        capability: Capability,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT capability FROM principal_capability WHERE principal_id = ?",
        )
        .bind(&principal_id.0)
        .fetch_all(&mut *tx)
        .await?;

        for name in names.iter().filter(|name| Capability::parse(name) == Some(capability)) {
            sqlx::query(
                "DELETE FROM principal_capability WHERE principal_id = ? AND capability = ?",
            )
            .bind(&principal_id.0)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Unknown capability names in storage are skipped.
    pub async fn granted(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<Vec<Capability>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT capability FROM principal_capability
             WHERE principal_id = ?
             ORDER BY capability",
        )
        .bind(&principal_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut granted = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("capability")?;
            match Capability::parse(&name) {
                Some(capability) => granted.push(capability),
                None => tracing::warn!(
                    event_name = "capability.unknown_grant",
                    principal_id = %principal_id.0,
                    capability = %name,
                    "ignoring unknown capability grant"
                ),
            }
        }
        Ok(granted)
    }
}

#[async_trait::async_trait]
impl CapabilityCheck for SqlCapabilityRepository {
    async fn has_capability(
        &self,
        principal_id: &PrincipalId,
        capability: Capability,
    ) -> Result<bool, StoreError> {
        Ok(self.granted(principal_id).await?.contains(&capability))
    }
}
