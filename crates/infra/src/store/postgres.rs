//! Postgres-backed lot ledger and vendor stock pool.
//!
//! The conditional decrement is a single filtered `UPDATE`:
//!
//! ```sql
//! UPDATE batches SET quantity = quantity - $2
//! WHERE id = $1 AND status = 'active' AND quantity >= $2
//! ```
//!
//! The precondition is evaluated by the database at write time, so two
//! concurrent callers can never drive a row below zero. `rows_affected() == 0`
//! means the race was lost (or the row was ineligible).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (check violation) | `23514` | `Backend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! The storage traits are synchronous; the sync impls bridge into the async
//! methods through the current tokio runtime handle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::RuntimeFlavor;
use tracing::instrument;
use uuid::Uuid;

use larder_core::{BatchId, ProductId, VariantId, VendorId, VendorStockId};
use larder_inventory::{Batch, BatchStatus, VendorStock};

use super::{LotLedger, StoreError, VendorStockPool};

/// DDL for both tables. Idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    id          UUID PRIMARY KEY,
    variant_id  UUID NOT NULL,
    product_id  UUID NOT NULL,
    lot_number  TEXT NOT NULL UNIQUE,
    produced_at TIMESTAMPTZ NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    quantity    BIGINT NOT NULL CHECK (quantity >= 0),
    status      TEXT NOT NULL CHECK (status IN ('active', 'expired', 'recalled')),
    received_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS batches_consumable_idx
    ON batches (variant_id, expires_at)
    WHERE status = 'active';

CREATE TABLE IF NOT EXISTS vendor_stock (
    id          UUID PRIMARY KEY,
    vendor_id   UUID NOT NULL,
    product_id  UUID NOT NULL,
    variant_id  UUID NOT NULL,
    lot_ref     UUID NOT NULL REFERENCES batches (id),
    quantity    BIGINT NOT NULL CHECK (quantity >= 0),
    received_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS vendor_stock_consumable_idx
    ON vendor_stock (vendor_id, variant_id, received_at);
"#;

const BATCH_COLUMNS: &str =
    "id, variant_id, product_id, lot_number, produced_at, expires_at, quantity, status, received_at";

const VENDOR_STOCK_COLUMNS: &str =
    "id, vendor_id, product_id, variant_id, lot_ref, quantity, received_at";

/// Open a connection pool and make sure the schema exists.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Create both tables and their indexes if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Handle, StoreError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "postgres stores require a tokio runtime; call from within a runtime context"
                .to_string(),
        )
    })?;
    if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
        return Err(StoreError::Backend(
            "postgres stores require the multi-threaded tokio runtime".to_string(),
        ));
    }
    Ok(handle)
}

/// Run an async store call to completion from a synchronous trait method.
///
/// `block_in_place` keeps the worker thread usable by the runtime while we wait,
/// which requires the multi-threaded scheduler.
fn block_on<F, T>(fut: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    let handle = runtime()?;
    tokio::task::block_in_place(|| handle.block_on(fut))
}

fn to_db_quantity(amount: u64) -> Result<i64, StoreError> {
    i64::try_from(amount)
        .map_err(|_| StoreError::Backend(format!("quantity {amount} exceeds BIGINT range")))
}

fn from_db_quantity(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Backend(format!("negative quantity {value} stored")))
}

/// Postgres-backed lot ledger.
#[derive(Debug, Clone)]
pub struct PostgresLotLedger {
    pool: Arc<PgPool>,
}

impl PostgresLotLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.id_typed()), err)]
    pub async fn insert_async(&self, batch: &Batch) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO batches
                (id, variant_id, product_id, lot_number, produced_at, expires_at, quantity, status, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(batch.id_typed().as_uuid())
        .bind(batch.variant_id().as_uuid())
        .bind(batch.product_id().as_uuid())
        .bind(batch.lot_number())
        .bind(batch.produced_at())
        .bind(batch.expires_at())
        .bind(to_db_quantity(batch.quantity())?)
        .bind(batch.status().as_str())
        .bind(batch.received_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_batch", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_async(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_batch", e))?;
        row.map(|r| batch_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn list_by_variant_async(&self, variant_id: VariantId) -> Result<Vec<Batch>, StoreError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE variant_id = $1 \
             ORDER BY expires_at ASC, received_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(variant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_batches", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn find_consumable_async(
        &self,
        variant_id: VariantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Batch>, StoreError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE variant_id = $1 AND status = 'active' AND expires_at > $2 AND quantity > 0 \
             ORDER BY expires_at ASC, received_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(variant_id.as_uuid())
            .bind(now)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_consumable_batches", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn latest_active_async(&self, variant_id: VariantId) -> Result<Option<Batch>, StoreError> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE variant_id = $1 AND status = 'active' \
             ORDER BY received_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(variant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_active_batch", e))?;
        row.map(|r| batch_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn try_decrement_async(&self, id: BatchId, amount: u64) -> Result<bool, StoreError> {
        if amount == 0 {
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            UPDATE batches SET quantity = quantity - $2
            WHERE id = $1 AND status = 'active' AND quantity >= $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(to_db_quantity(amount)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_decrement_batch", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    pub async fn increment_async(&self, id: BatchId, amount: u64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE batches SET quantity = quantity + $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to_db_quantity(amount)?)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("increment_batch", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("batch {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn sweep_expired_async(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE batches SET status = 'expired' WHERE status = 'active' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sweep_expired", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), err)]
    pub async fn recall_async(&self, id: BatchId) -> Result<Batch, StoreError> {
        let sql = format!(
            "UPDATE batches SET status = 'recalled' WHERE id = $1 AND status = 'active' \
             RETURNING {BATCH_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("recall_batch", e))?;
        match row {
            Some(r) => batch_from_row(&r),
            None => {
                // Either missing or already terminal; let the domain say which.
                let mut current = self
                    .get_async(id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("batch {id}")))?;
                current.recall()?;
                Err(StoreError::Backend(format!("batch {id} changed during recall")))
            }
        }
    }

    #[instrument(skip(self), err)]
    pub async fn total_quantity_async(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM batches")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("total_batch_quantity", e))?;
        from_db_quantity(total)
    }
}

impl LotLedger for PostgresLotLedger {
    fn insert(&self, batch: Batch) -> Result<(), StoreError> {
        block_on(self.insert_async(&batch))
    }

    fn get(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        block_on(self.get_async(id))
    }

    fn list_by_variant(&self, variant_id: VariantId) -> Result<Vec<Batch>, StoreError> {
        block_on(self.list_by_variant_async(variant_id))
    }

    fn find_consumable(
        &self,
        variant_id: VariantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Batch>, StoreError> {
        block_on(self.find_consumable_async(variant_id, now))
    }

    fn latest_active(&self, variant_id: VariantId) -> Result<Option<Batch>, StoreError> {
        block_on(self.latest_active_async(variant_id))
    }

    fn try_decrement(&self, id: BatchId, amount: u64) -> Result<bool, StoreError> {
        block_on(self.try_decrement_async(id, amount))
    }

    fn increment(&self, id: BatchId, amount: u64) -> Result<(), StoreError> {
        block_on(self.increment_async(id, amount))
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        block_on(self.sweep_expired_async(now))
    }

    fn recall(&self, id: BatchId) -> Result<Batch, StoreError> {
        block_on(self.recall_async(id))
    }

    fn total_quantity(&self) -> Result<u64, StoreError> {
        block_on(self.total_quantity_async())
    }
}

/// Postgres-backed vendor stock pool.
#[derive(Debug, Clone)]
pub struct PostgresVendorStockPool {
    pool: Arc<PgPool>,
}

impl PostgresVendorStockPool {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, row), fields(vendor_stock_id = %row.id_typed()), err)]
    pub async fn create_async(&self, row: &VendorStock) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO vendor_stock
                (id, vendor_id, product_id, variant_id, lot_ref, quantity, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.id_typed().as_uuid())
        .bind(row.vendor_id().as_uuid())
        .bind(row.product_id().as_uuid())
        .bind(row.variant_id().as_uuid())
        .bind(row.lot_ref().as_uuid())
        .bind(to_db_quantity(row.quantity())?)
        .bind(row.received_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_vendor_stock", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_async(&self, id: VendorStockId) -> Result<Option<VendorStock>, StoreError> {
        let sql = format!("SELECT {VENDOR_STOCK_COLUMNS} FROM vendor_stock WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_vendor_stock", e))?;
        row.map(|r| vendor_stock_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn find_consumable_async(
        &self,
        vendor_id: VendorId,
        variant_id: VariantId,
    ) -> Result<Vec<VendorStock>, StoreError> {
        let sql = format!(
            "SELECT {VENDOR_STOCK_COLUMNS} FROM vendor_stock \
             WHERE vendor_id = $1 AND variant_id = $2 AND quantity > 0 \
             ORDER BY received_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(vendor_id.as_uuid())
            .bind(variant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_consumable_vendor_stock", e))?;
        rows.iter().map(vendor_stock_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn list_by_lot_async(&self, lot_ref: BatchId) -> Result<Vec<VendorStock>, StoreError> {
        let sql = format!(
            "SELECT {VENDOR_STOCK_COLUMNS} FROM vendor_stock WHERE lot_ref = $1 \
             ORDER BY received_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(lot_ref.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_vendor_stock_by_lot", e))?;
        rows.iter().map(vendor_stock_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn try_decrement_async(&self, id: VendorStockId, amount: u64) -> Result<bool, StoreError> {
        if amount == 0 {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE vendor_stock SET quantity = quantity - $2 WHERE id = $1 AND quantity >= $2",
        )
        .bind(id.as_uuid())
        .bind(to_db_quantity(amount)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_decrement_vendor_stock", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    pub async fn increment_async(&self, id: VendorStockId, amount: u64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE vendor_stock SET quantity = quantity + $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to_db_quantity(amount)?)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("increment_vendor_stock", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("vendor stock {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn total_quantity_async(&self) -> Result<u64, StoreError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM vendor_stock")
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("total_vendor_stock_quantity", e))?;
        from_db_quantity(total)
    }
}

impl VendorStockPool for PostgresVendorStockPool {
    fn create(&self, row: VendorStock) -> Result<(), StoreError> {
        block_on(self.create_async(&row))
    }

    fn get(&self, id: VendorStockId) -> Result<Option<VendorStock>, StoreError> {
        block_on(self.get_async(id))
    }

    fn find_consumable(
        &self,
        vendor_id: VendorId,
        variant_id: VariantId,
    ) -> Result<Vec<VendorStock>, StoreError> {
        block_on(self.find_consumable_async(vendor_id, variant_id))
    }

    fn list_by_lot(&self, lot_ref: BatchId) -> Result<Vec<VendorStock>, StoreError> {
        block_on(self.list_by_lot_async(lot_ref))
    }

    fn try_decrement(&self, id: VendorStockId, amount: u64) -> Result<bool, StoreError> {
        block_on(self.try_decrement_async(id, amount))
    }

    fn increment(&self, id: VendorStockId, amount: u64) -> Result<(), StoreError> {
        block_on(self.increment_async(id, amount))
    }

    fn total_quantity(&self) -> Result<u64, StoreError> {
        block_on(self.total_quantity_async())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct BatchRow {
    id: Uuid,
    variant_id: Uuid,
    product_id: Uuid,
    lot_number: String,
    produced_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    quantity: i64,
    status: String,
    received_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for BatchRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(BatchRow {
            id: row.try_get("id")?,
            variant_id: row.try_get("variant_id")?,
            product_id: row.try_get("product_id")?,
            lot_number: row.try_get("lot_number")?,
            produced_at: row.try_get("produced_at")?,
            expires_at: row.try_get("expires_at")?,
            quantity: row.try_get("quantity")?,
            status: row.try_get("status")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl TryFrom<BatchRow> for Batch {
    type Error = StoreError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        let status: BatchStatus = row.status.parse()?;
        Ok(Batch::rehydrate(
            BatchId::from_uuid(row.id),
            VariantId::from_uuid(row.variant_id),
            ProductId::from_uuid(row.product_id),
            row.lot_number,
            row.produced_at,
            row.expires_at,
            from_db_quantity(row.quantity)?,
            status,
            row.received_at,
        ))
    }
}

fn batch_from_row(row: &sqlx::postgres::PgRow) -> Result<Batch, StoreError> {
    let row = BatchRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode batch row: {e}")))?;
    Batch::try_from(row)
}

#[derive(Debug)]
struct VendorStockRow {
    id: Uuid,
    vendor_id: Uuid,
    product_id: Uuid,
    variant_id: Uuid,
    lot_ref: Uuid,
    quantity: i64,
    received_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for VendorStockRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(VendorStockRow {
            id: row.try_get("id")?,
            vendor_id: row.try_get("vendor_id")?,
            product_id: row.try_get("product_id")?,
            variant_id: row.try_get("variant_id")?,
            lot_ref: row.try_get("lot_ref")?,
            quantity: row.try_get("quantity")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl TryFrom<VendorStockRow> for VendorStock {
    type Error = StoreError;

    fn try_from(row: VendorStockRow) -> Result<Self, Self::Error> {
        Ok(VendorStock::rehydrate(
            VendorStockId::from_uuid(row.id),
            VendorId::from_uuid(row.vendor_id),
            ProductId::from_uuid(row.product_id),
            VariantId::from_uuid(row.variant_id),
            BatchId::from_uuid(row.lot_ref),
            from_db_quantity(row.quantity)?,
            row.received_at,
        ))
    }
}

fn vendor_stock_from_row(row: &sqlx::postgres::PgRow) -> Result<VendorStock, StoreError> {
    let row = VendorStockRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to decode vendor stock row: {e}")))?;
    VendorStock::try_from(row)
}
