//! All-or-nothing stock deduction for an order.
//!
//! Items are processed sequentially in caller order; each item walks its
//! candidate rows in FIFO order and takes `min(row, remaining)` through the
//! pool's conditional decrement. Every successful take pushes an undo onto a
//! [`CompensationStack`]. If any item cannot be covered, the whole stack
//! (all earlier items plus the partial work on the failing one) is unwound
//! newest-first and the call fails.
//!
//! A failed conditional decrement means the row changed since it was read.
//! The row is skipped without touching `remaining`; if the item ends up short
//! and at least one row was skipped, candidates are re-read a bounded number
//! of times before the item is declared out of stock.
//!
//! `deduct` is not cancellable mid-flight and has no duplicate detection:
//! a caller that times out must reconcile, not retry blindly.

use std::sync::Arc;

use tracing::{debug, warn};

use larder_core::{Clock, VariantId, VendorId};
use larder_inventory::{ConsumptionManifest, LineItem};

use crate::compensation::CompensationStack;
use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::pool::{LotPool, StockPool, VendorPool};
use crate::store::{LotLedger, VendorStockPool};

pub struct FulfillmentEngine<L, V> {
    ledger: Arc<L>,
    vendors: Arc<V>,
    clock: Arc<dyn Clock>,
    config: FulfillmentConfig,
}

impl<L, V> FulfillmentEngine<L, V>
where
    L: LotLedger,
    V: VendorStockPool,
{
    pub fn new(
        ledger: Arc<L>,
        vendors: Arc<V>,
        clock: Arc<dyn Clock>,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            ledger,
            vendors,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    /// Reserve stock for every item or for none of them.
    ///
    /// With a `vendor_id` the vendor's earmarked rows are drawn (oldest
    /// received first); otherwise warehouse lots are drawn (oldest expiring
    /// first). Returns one manifest per item, in item order.
    pub fn deduct(
        &self,
        items: &[LineItem],
        vendor_id: Option<VendorId>,
    ) -> Result<Vec<ConsumptionManifest>, FulfillmentError> {
        for item in items {
            item.validate()?;
        }

        let now = self.clock.now();
        if self.config.sweep_on_read {
            self.ledger.sweep_expired(now)?;
        }

        match vendor_id {
            Some(vendor_id) => self.deduct_from(&VendorPool::new(&*self.vendors, vendor_id), items),
            None => self.deduct_from(&LotPool::new(&*self.ledger, now), items),
        }
    }

    /// Units currently consumable for a variant in the selected pool.
    pub fn available(
        &self,
        variant_id: VariantId,
        vendor_id: Option<VendorId>,
    ) -> Result<u64, FulfillmentError> {
        let now = self.clock.now();
        if self.config.sweep_on_read {
            self.ledger.sweep_expired(now)?;
        }
        let candidates: u64 = match vendor_id {
            Some(vendor_id) => VendorPool::new(&*self.vendors, vendor_id)
                .candidates(variant_id)?
                .iter()
                .map(|c| c.quantity)
                .sum(),
            None => LotPool::new(&*self.ledger, now)
                .candidates(variant_id)?
                .iter()
                .map(|c| c.quantity)
                .sum(),
        };
        Ok(candidates)
    }

    fn deduct_from<P>(
        &self,
        pool: &P,
        items: &[LineItem],
    ) -> Result<Vec<ConsumptionManifest>, FulfillmentError>
    where
        P: StockPool,
    {
        let mut undo = CompensationStack::new();
        let mut manifests = Vec::with_capacity(items.len());

        for item in items {
            match self.fill_item(pool, item, &mut undo) {
                Ok(manifest) => manifests.push(manifest),
                Err(err) => {
                    let takes = undo.len();
                    // A failed unwind is fatal and replaces the business error.
                    let restored = undo.unwind(pool)?;
                    warn!(
                        pool = pool.kind(),
                        variant_id = %item.variant_id,
                        takes,
                        restored,
                        error = %err,
                        "deduction rolled back"
                    );
                    return Err(err);
                }
            }
        }

        undo.commit();
        Ok(manifests)
    }

    fn fill_item<P>(
        &self,
        pool: &P,
        item: &LineItem,
        undo: &mut CompensationStack<P::Key>,
    ) -> Result<ConsumptionManifest, FulfillmentError>
    where
        P: StockPool,
    {
        let mut manifest = ConsumptionManifest::new(item.variant_id);
        let mut remaining = item.quantity;
        let mut refreshes = 0u32;

        loop {
            let mut skipped_stale = false;

            for candidate in pool.candidates(item.variant_id)? {
                if remaining == 0 {
                    break;
                }
                let take = candidate.quantity.min(remaining);
                if take == 0 {
                    continue;
                }

                if pool.try_take(candidate.key, take)? {
                    undo.push(candidate.key, take);
                    manifest.record(candidate.lot_ref, take);
                    remaining -= take;
                    debug!(
                        pool = pool.kind(),
                        variant_id = %item.variant_id,
                        row = %candidate.key,
                        lot = %candidate.lot_ref,
                        take,
                        remaining,
                        "took stock"
                    );
                } else {
                    skipped_stale = true;
                    debug!(
                        pool = pool.kind(),
                        variant_id = %item.variant_id,
                        row = %candidate.key,
                        "conditional decrement lost; skipping stale row"
                    );
                }
            }

            if remaining == 0 {
                return Ok(manifest);
            }
            if !skipped_stale || refreshes >= self.config.contention_retries {
                return Err(FulfillmentError::InsufficientStock {
                    variant_id: item.variant_id,
                });
            }

            refreshes += 1;
            warn!(
                pool = pool.kind(),
                variant_id = %item.variant_id,
                remaining,
                refresh = refreshes,
                "item short after lost races; re-reading candidates"
            );
        }
    }
}
