//! Storage ports for the two shared counters: lot quantity and vendor-stock quantity.
//!
//! The only writes to `quantity` go through `try_decrement` (conditional) and
//! `increment` (unconditional). Adapters must make each of them a single
//! atomic step against one row; no adapter holds a lock across calls.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use larder_core::{BatchId, DomainError, VariantId, VendorId, VendorStockId};
use larder_inventory::{Batch, VendorStock};

pub use in_memory::{InMemoryLotLedger, InMemoryVendorStockPool};
pub use postgres::{PostgresLotLedger, PostgresVendorStockPool};

/// Storage operation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Backend(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Lot Ledger: owns `Batch` rows.
pub trait LotLedger: Send + Sync {
    /// Insert a freshly received lot. Lot numbers are globally unique.
    fn insert(&self, batch: Batch) -> Result<(), StoreError>;

    fn get(&self, id: BatchId) -> Result<Option<Batch>, StoreError>;

    /// Every lot of a variant regardless of status, ordered by expiry.
    fn list_by_variant(&self, variant_id: VariantId) -> Result<Vec<Batch>, StoreError>;

    /// Active lots with `expires_at > now` and stock left, oldest-expiring first.
    ///
    /// Each call re-reads current state.
    fn find_consumable(
        &self,
        variant_id: VariantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Batch>, StoreError>;

    /// Most recently received active lot for a variant (legacy restoration target).
    fn latest_active(&self, variant_id: VariantId) -> Result<Option<Batch>, StoreError>;

    /// Decrement by exactly `amount` iff the lot is active and holds at least `amount`.
    ///
    /// `Ok(false)` means the precondition failed at write time.
    fn try_decrement(&self, id: BatchId, amount: u64) -> Result<bool, StoreError>;

    /// Unconditional increment. Fails only if the row does not exist.
    fn increment(&self, id: BatchId, amount: u64) -> Result<(), StoreError>;

    /// Mark active lots with `expires_at <= now` as expired. Returns how many flipped.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Administrative active → recalled transition.
    fn recall(&self, id: BatchId) -> Result<Batch, StoreError>;

    /// Sum of all lot quantities (conservation audits).
    fn total_quantity(&self) -> Result<u64, StoreError>;
}

/// Vendor Stock Pool: owns `VendorStock` rows.
pub trait VendorStockPool: Send + Sync {
    /// Always inserts a new row; never merges into an existing one.
    fn create(&self, row: VendorStock) -> Result<(), StoreError>;

    fn get(&self, id: VendorStockId) -> Result<Option<VendorStock>, StoreError>;

    /// Rows for this vendor and variant with stock left, oldest received first.
    fn find_consumable(
        &self,
        vendor_id: VendorId,
        variant_id: VariantId,
    ) -> Result<Vec<VendorStock>, StoreError>;

    /// Every row carved from a lot (provenance / audit).
    fn list_by_lot(&self, lot_ref: BatchId) -> Result<Vec<VendorStock>, StoreError>;

    fn try_decrement(&self, id: VendorStockId, amount: u64) -> Result<bool, StoreError>;

    fn increment(&self, id: VendorStockId, amount: u64) -> Result<(), StoreError>;

    /// Sum of all vendor-stock quantities (conservation audits).
    fn total_quantity(&self) -> Result<u64, StoreError>;
}

impl<S> LotLedger for Arc<S>
where
    S: LotLedger + ?Sized,
{
    fn insert(&self, batch: Batch) -> Result<(), StoreError> {
        (**self).insert(batch)
    }

    fn get(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        (**self).get(id)
    }

    fn list_by_variant(&self, variant_id: VariantId) -> Result<Vec<Batch>, StoreError> {
        (**self).list_by_variant(variant_id)
    }

    fn find_consumable(
        &self,
        variant_id: VariantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Batch>, StoreError> {
        (**self).find_consumable(variant_id, now)
    }

    fn latest_active(&self, variant_id: VariantId) -> Result<Option<Batch>, StoreError> {
        (**self).latest_active(variant_id)
    }

    fn try_decrement(&self, id: BatchId, amount: u64) -> Result<bool, StoreError> {
        (**self).try_decrement(id, amount)
    }

    fn increment(&self, id: BatchId, amount: u64) -> Result<(), StoreError> {
        (**self).increment(id, amount)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).sweep_expired(now)
    }

    fn recall(&self, id: BatchId) -> Result<Batch, StoreError> {
        (**self).recall(id)
    }

    fn total_quantity(&self) -> Result<u64, StoreError> {
        (**self).total_quantity()
    }
}

impl<S> VendorStockPool for Arc<S>
where
    S: VendorStockPool + ?Sized,
{
    fn create(&self, row: VendorStock) -> Result<(), StoreError> {
        (**self).create(row)
    }

    fn get(&self, id: VendorStockId) -> Result<Option<VendorStock>, StoreError> {
        (**self).get(id)
    }

    fn find_consumable(
        &self,
        vendor_id: VendorId,
        variant_id: VariantId,
    ) -> Result<Vec<VendorStock>, StoreError> {
        (**self).find_consumable(vendor_id, variant_id)
    }

    fn list_by_lot(&self, lot_ref: BatchId) -> Result<Vec<VendorStock>, StoreError> {
        (**self).list_by_lot(lot_ref)
    }

    fn try_decrement(&self, id: VendorStockId, amount: u64) -> Result<bool, StoreError> {
        (**self).try_decrement(id, amount)
    }

    fn increment(&self, id: VendorStockId, amount: u64) -> Result<(), StoreError> {
        (**self).increment(id, amount)
    }

    fn total_quantity(&self) -> Result<u64, StoreError> {
        (**self).total_quantity()
    }
}
