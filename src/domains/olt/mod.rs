//! The OLT (Optical Line Terminal) fleet: an external entity the scheduler
//! only reads, except for the failure counter it maintains.

use crate::common::entity_ids::OltId;
use crate::common::errors::SchedulerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

/// An OLT in the managed fleet. SNMP endpoint parameters are opaque to the
/// scheduler; only `enabled` and the failure counter are interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Olt {
    pub id: OltId,
    pub enabled: bool,
    pub endpoint: String,
    pub consecutive_failure_count: i32,
}

#[async_trait]
pub trait OltStore: Send + Sync {
    async fn get(&self, olt_id: OltId) -> Result<Option<Olt>, SchedulerError>;
    async fn is_enabled(&self, olt_id: OltId) -> Result<bool, SchedulerError>;
    async fn reset_failure_count(&self, olt_id: OltId) -> Result<(), SchedulerError>;
    async fn increment_failure_count(&self, olt_id: OltId) -> Result<i32, SchedulerError>;
}

pub struct PostgresOltStore {
    pool: PgPool,
}

impl PostgresOltStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OltStore for PostgresOltStore {
    async fn get(&self, olt_id: OltId) -> Result<Option<Olt>, SchedulerError> {
        let olt = sqlx::query_as::<_, Olt>("SELECT * FROM olts WHERE id = $1")
            .bind(olt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(olt)
    }

    async fn is_enabled(&self, olt_id: OltId) -> Result<bool, SchedulerError> {
        let enabled: Option<bool> = sqlx::query_scalar("SELECT enabled FROM olts WHERE id = $1")
            .bind(olt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(enabled.unwrap_or(false))
    }

    async fn reset_failure_count(&self, olt_id: OltId) -> Result<(), SchedulerError> {
        sqlx::query("UPDATE olts SET consecutive_failure_count = 0 WHERE id = $1")
            .bind(olt_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_failure_count(&self, olt_id: OltId) -> Result<i32, SchedulerError> {
        let count: i32 = sqlx::query_scalar(
            r#"
            UPDATE olts SET consecutive_failure_count = consecutive_failure_count + 1
            WHERE id = $1
            RETURNING consecutive_failure_count
            "#,
        )
        .bind(olt_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

/// In-memory fake for tests.
#[derive(Default)]
pub struct InMemoryOltStore {
    olts: RwLock<HashMap<OltId, Olt>>,
}

impl InMemoryOltStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, olt: Olt) {
        self.olts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(olt.id, olt);
    }
}

#[async_trait]
impl OltStore for InMemoryOltStore {
    async fn get(&self, olt_id: OltId) -> Result<Option<Olt>, SchedulerError> {
        Ok(self
            .olts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&olt_id)
            .cloned())
    }

    async fn is_enabled(&self, olt_id: OltId) -> Result<bool, SchedulerError> {
        Ok(self
            .olts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&olt_id)
            .map(|o| o.enabled)
            .unwrap_or(false))
    }

    async fn reset_failure_count(&self, olt_id: OltId) -> Result<(), SchedulerError> {
        if let Some(olt) = self
            .olts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&olt_id)
        {
            olt.consecutive_failure_count = 0;
        }
        Ok(())
    }

    async fn increment_failure_count(&self, olt_id: OltId) -> Result<i32, SchedulerError> {
        let mut olts = self.olts.write().unwrap_or_else(|e| e.into_inner());
        let olt = olts
            .get_mut(&olt_id)
            .ok_or_else(|| SchedulerError::OltNotFound(olt_id.to_string()))?;
        olt.consecutive_failure_count += 1;
        Ok(olt.consecutive_failure_count)
    }
}
