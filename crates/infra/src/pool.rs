//! One capability over both stock sources.
//!
//! The FIFO walk in the fulfillment engine is written once against
//! [`StockPool`]; the call picks [`LotPool`] (warehouse) or [`VendorPool`]
//! (a vendor's earmarks) up front and never branches on it again.

use chrono::{DateTime, Utc};

use larder_core::{BatchId, VariantId, VendorId, VendorStockId};

use crate::store::{LotLedger, StoreError, VendorStockPool};

/// A row that can satisfy part of a line item, with the quantity seen at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<K> {
    pub key: K,
    /// Lot the stock ultimately came from (recorded in the manifest).
    pub lot_ref: BatchId,
    pub quantity: u64,
}

/// Ordered candidate source with the two quantity primitives.
pub trait StockPool {
    /// Row identifier inside this pool.
    type Key: Copy + core::fmt::Debug + core::fmt::Display;

    /// Short name for logs.
    fn kind(&self) -> &'static str;

    /// Fresh read of consumable rows for a variant, in FIFO order.
    fn candidates(&self, variant_id: VariantId) -> Result<Vec<Candidate<Self::Key>>, StoreError>;

    /// Conditional decrement; `Ok(false)` when the row no longer holds `amount`.
    fn try_take(&self, key: Self::Key, amount: u64) -> Result<bool, StoreError>;

    /// Unconditional increment used for compensation.
    fn give_back(&self, key: Self::Key, amount: u64) -> Result<(), StoreError>;
}

/// Warehouse lots, oldest-expiring first.
pub struct LotPool<'a, L: LotLedger + ?Sized> {
    ledger: &'a L,
    now: DateTime<Utc>,
}

impl<'a, L: LotLedger + ?Sized> LotPool<'a, L> {
    pub fn new(ledger: &'a L, now: DateTime<Utc>) -> Self {
        Self { ledger, now }
    }
}

impl<L: LotLedger + ?Sized> StockPool for LotPool<'_, L> {
    type Key = BatchId;

    fn kind(&self) -> &'static str {
        "lot"
    }

    fn candidates(&self, variant_id: VariantId) -> Result<Vec<Candidate<BatchId>>, StoreError> {
        Ok(self
            .ledger
            .find_consumable(variant_id, self.now)?
            .into_iter()
            .map(|b| Candidate {
                key: b.id_typed(),
                lot_ref: b.id_typed(),
                quantity: b.quantity(),
            })
            .collect())
    }

    fn try_take(&self, key: BatchId, amount: u64) -> Result<bool, StoreError> {
        self.ledger.try_decrement(key, amount)
    }

    fn give_back(&self, key: BatchId, amount: u64) -> Result<(), StoreError> {
        self.ledger.increment(key, amount)
    }
}

/// One vendor's earmarked rows, oldest received first.
pub struct VendorPool<'a, V: VendorStockPool + ?Sized> {
    vendors: &'a V,
    vendor_id: VendorId,
}

impl<'a, V: VendorStockPool + ?Sized> VendorPool<'a, V> {
    pub fn new(vendors: &'a V, vendor_id: VendorId) -> Self {
        Self { vendors, vendor_id }
    }
}

impl<V: VendorStockPool + ?Sized> StockPool for VendorPool<'_, V> {
    type Key = VendorStockId;

    fn kind(&self) -> &'static str {
        "vendor"
    }

    fn candidates(&self, variant_id: VariantId) -> Result<Vec<Candidate<VendorStockId>>, StoreError> {
        Ok(self
            .vendors
            .find_consumable(self.vendor_id, variant_id)?
            .into_iter()
            .map(|r| Candidate {
                key: r.id_typed(),
                lot_ref: r.lot_ref(),
                quantity: r.quantity(),
            })
            .collect())
    }

    fn try_take(&self, key: VendorStockId, amount: u64) -> Result<bool, StoreError> {
        self.vendors.try_decrement(key, amount)
    }

    fn give_back(&self, key: VendorStockId, amount: u64) -> Result<(), StoreError> {
        self.vendors.increment(key, amount)
    }
}
