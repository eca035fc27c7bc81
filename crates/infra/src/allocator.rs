//! Administrative transfer of lot stock into a vendor's earmarked pool.

use std::sync::Arc;

use tracing::{error, info, warn};

use larder_core::{BatchId, Clock, VendorId, VendorStockId};
use larder_inventory::{BatchStatus, VendorStock};

use crate::error::FulfillmentError;
use crate::store::{LotLedger, VendorStockPool};

/// Moves quantity from a lot into a new vendor-stock row.
///
/// Net stock is conserved: whatever leaves the lot lands in exactly one new
/// row. Reversal is a separate reclaim flow and not offered here.
pub struct StockAllocator<L, V> {
    ledger: Arc<L>,
    vendors: Arc<V>,
    clock: Arc<dyn Clock>,
}

impl<L, V> StockAllocator<L, V>
where
    L: LotLedger,
    V: VendorStockPool,
{
    pub fn new(ledger: Arc<L>, vendors: Arc<V>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            vendors,
            clock,
        }
    }

    pub fn allocate(
        &self,
        vendor_id: VendorId,
        batch_id: BatchId,
        quantity: u64,
    ) -> Result<VendorStock, FulfillmentError> {
        if quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity);
        }

        let now = self.clock.now();
        let lot = self
            .ledger
            .get(batch_id)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("batch {batch_id}")))?;

        // An unswept lot past its expiry is treated as expired.
        let status = match lot.status() {
            BatchStatus::Active if lot.is_past_expiry(now) => BatchStatus::Expired,
            status => status,
        };
        if status != BatchStatus::Active {
            return Err(FulfillmentError::LotNotConsumable { batch_id, status });
        }

        if lot.quantity() < quantity {
            return Err(FulfillmentError::InsufficientLotQuantity {
                batch_id,
                requested: quantity,
                available: lot.quantity(),
            });
        }

        let row = VendorStock::carve(VendorStockId::new(), vendor_id, &lot, quantity, now)?;

        if !self.ledger.try_decrement(batch_id, quantity)? {
            let available = self
                .ledger
                .get(batch_id)?
                .map(|b| b.quantity())
                .unwrap_or(0);
            warn!(
                batch_id = %batch_id,
                vendor_id = %vendor_id,
                requested = quantity,
                available,
                "allocation lost a race on the lot"
            );
            return Err(FulfillmentError::InsufficientLotQuantity {
                batch_id,
                requested: quantity,
                available,
            });
        }

        if let Err(create_err) = self.vendors.create(row.clone()) {
            // Put the stock back on the lot before reporting the failure.
            if let Err(credit_err) = self.ledger.increment(batch_id, quantity) {
                error!(
                    batch_id = %batch_id,
                    quantity,
                    error = %credit_err,
                    "could not return stock to lot after failed vendor-stock insert"
                );
                return Err(FulfillmentError::consistency(format!(
                    "lot {batch_id} lost {quantity} units: insert failed ({create_err}), credit failed ({credit_err})"
                )));
            }
            return Err(create_err.into());
        }

        info!(
            batch_id = %batch_id,
            vendor_id = %vendor_id,
            vendor_stock_id = %row.id_typed(),
            quantity,
            "allocated lot stock to vendor"
        );
        Ok(row)
    }
}
