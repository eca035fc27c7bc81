use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_core::{
    BatchId, DomainError, DomainResult, Entity, ProductId, VariantId, VendorId, VendorStockId,
};

use crate::batch::Batch;

/// Quantity carved out of one lot and earmarked for one vendor.
///
/// Every transfer produces its own row; rows are never merged or deleted and
/// may sit at zero as a historical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorStock {
    id: VendorStockId,
    vendor_id: VendorId,
    product_id: ProductId,
    variant_id: VariantId,
    lot_ref: BatchId,
    quantity: u64,
    received_at: DateTime<Utc>,
}

impl VendorStock {
    /// Build the earmark row for a transfer out of `lot`.
    pub fn carve(
        id: VendorStockId,
        vendor_id: VendorId,
        lot: &Batch,
        quantity: u64,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity == 0 {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }
        Ok(Self {
            id,
            vendor_id,
            product_id: lot.product_id(),
            variant_id: lot.variant_id(),
            lot_ref: lot.id_typed(),
            quantity,
            received_at,
        })
    }

    /// Rebuild a row from persisted columns.
    pub fn rehydrate(
        id: VendorStockId,
        vendor_id: VendorId,
        product_id: ProductId,
        variant_id: VariantId,
        lot_ref: BatchId,
        quantity: u64,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            vendor_id,
            product_id,
            variant_id,
            lot_ref,
            quantity,
            received_at,
        }
    }

    pub fn id_typed(&self) -> VendorStockId {
        self.id
    }

    pub fn vendor_id(&self) -> VendorId {
        self.vendor_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn lot_ref(&self) -> BatchId {
        self.lot_ref
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Conditional decrement; a zero amount never succeeds.
    pub fn try_take(&mut self, amount: u64) -> bool {
        if amount == 0 || self.quantity < amount {
            return false;
        }
        self.quantity -= amount;
        true
    }

    /// Unconditional increment (rollback only).
    pub fn credit(&mut self, amount: u64) -> DomainResult<()> {
        self.quantity = self
            .quantity
            .checked_add(amount)
            .ok_or_else(|| DomainError::invariant("vendor stock quantity overflow"))?;
        Ok(())
    }
}

impl Entity for VendorStock {
    type Id = VendorStockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::NewBatch;
    use chrono::Duration;

    fn test_lot(quantity: u64) -> Batch {
        let now = Utc::now();
        Batch::receive(
            BatchId::new(),
            NewBatch {
                variant_id: VariantId::new(),
                product_id: ProductId::new(),
                lot_number: "LOT-VS-1".to_string(),
                produced_at: now - Duration::days(1),
                expires_at: now + Duration::days(30),
                quantity,
            },
            now,
        )
        .unwrap()
    }

    #[test]
    fn carve_copies_provenance_from_lot() {
        let lot = test_lot(10);
        let vendor_id = VendorId::new();
        let row = VendorStock::carve(VendorStockId::new(), vendor_id, &lot, 6, Utc::now()).unwrap();

        assert_eq!(row.vendor_id(), vendor_id);
        assert_eq!(row.lot_ref(), lot.id_typed());
        assert_eq!(row.variant_id(), lot.variant_id());
        assert_eq!(row.product_id(), lot.product_id());
        assert_eq!(row.quantity(), 6);
    }

    #[test]
    fn carve_rejects_zero_quantity() {
        let lot = test_lot(10);
        let err = VendorStock::carve(VendorStockId::new(), VendorId::new(), &lot, 0, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rows_can_drain_to_zero_and_stay() {
        let lot = test_lot(10);
        let mut row =
            VendorStock::carve(VendorStockId::new(), VendorId::new(), &lot, 4, Utc::now()).unwrap();

        assert!(!row.try_take(5));
        assert!(row.try_take(4));
        assert_eq!(row.quantity(), 0);
        assert!(!row.try_take(1));

        row.credit(2).unwrap();
        assert_eq!(row.quantity(), 2);
    }
}
