use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EmployeeError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Employee not found")]
    NotFound,
}

/// Read model of the employee directory. Directory maintenance lives in
/// another service; this crate only resolves assignment targets from it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Employee {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub preferred_language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEmployee {
    pub tenant_id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub preferred_language: Option<String>,
}

impl Employee {
    pub async fn create(pool: &SqlitePool, data: CreateEmployee) -> Result<Self, EmployeeError> {
        let employee = sqlx::query_as::<_, Employee>(
            r#"
            INSERT INTO employees (id, tenant_id, full_name, email, preferred_language)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(&data.full_name)
        .bind(&data.email)
        .bind(data.preferred_language.unwrap_or_else(|| "en".to_string()))
        .fetch_one(pool)
        .await?;

        Ok(employee)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, EmployeeError> {
        let employee = sqlx::query_as::<_, Employee>(
            "SELECT * FROM employees WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(employee)
    }

    /// Active employees of a tenant, as of the moment of the call.
    pub async fn find_active_ids(
        pool: &SqlitePool,
        tenant_id: Uuid,
    ) -> Result<Vec<Uuid>, EmployeeError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM employees WHERE tenant_id = ?1 AND is_active = 1 ORDER BY full_name",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        Ok(ids)
    }

    /// Subset of `ids` that exist and are active in the tenant.
    pub async fn filter_active(
        pool: &SqlitePool,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>, EmployeeError> {
        let active = Self::find_active_ids(pool, tenant_id).await?;
        Ok(ids.iter().copied().filter(|id| active.contains(id)).collect())
    }

    pub async fn set_active(
        pool: &SqlitePool,
        id: Uuid,
        is_active: bool,
    ) -> Result<(), EmployeeError> {
        let result = sqlx::query("UPDATE employees SET is_active = ?1 WHERE id = ?2")
            .bind(is_active)
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EmployeeError::NotFound);
        }
        Ok(())
    }
}
