use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use larder_core::{BatchId, Entity, VariantId, VendorId, VendorStockId};
use larder_inventory::{Batch, BatchStatus, VendorStock};

use super::{LotLedger, StoreError, VendorStockPool};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// RwLock-guarded row table keyed by entity id.
///
/// Every mutation runs under the write lock, so a check-then-write inside
/// `update` is atomic with respect to other callers.
#[derive(Debug)]
struct Table<E: Entity> {
    rows: RwLock<HashMap<E::Id, E>>,
}

impl<E> Table<E>
where
    E: Entity + Clone,
{
    fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn insert_new(
        &self,
        row: E,
        conflicts: impl Fn(&E, &E) -> bool,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.contains_key(row.id()) {
            return Err(StoreError::Duplicate(format!("row {}", row.id())));
        }
        if let Some(existing) = rows.values().find(|existing| conflicts(existing, &row)) {
            return Err(StoreError::Duplicate(format!(
                "row {} conflicts with {}",
                row.id(),
                existing.id()
            )));
        }
        rows.insert(*row.id(), row);
        Ok(())
    }

    fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(id).cloned())
    }

    fn select(&self, filter: impl Fn(&E) -> bool) -> Result<Vec<E>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.values().filter(|r| filter(r)).cloned().collect())
    }

    fn update<T>(&self, id: &E::Id, f: impl FnOnce(&mut E) -> T) -> Result<T, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("row {id}")))?;
        Ok(f(row))
    }

    fn update_all(&self, mut f: impl FnMut(&mut E) -> bool) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        Ok(rows.values_mut().map(|r| f(r)).filter(|changed| *changed).count())
    }

    fn sum(&self, f: impl Fn(&E) -> u64) -> Result<u64, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.values().map(f).sum())
    }
}

/// In-memory lot ledger.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryLotLedger {
    batches: Table<Batch>,
}

impl InMemoryLotLedger {
    pub fn new() -> Self {
        Self {
            batches: Table::new(),
        }
    }
}

impl Default for InMemoryLotLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LotLedger for InMemoryLotLedger {
    fn insert(&self, batch: Batch) -> Result<(), StoreError> {
        self.batches
            .insert_new(batch, |existing, new| existing.lot_number() == new.lot_number())
    }

    fn get(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        self.batches.get(&id)
    }

    fn list_by_variant(&self, variant_id: VariantId) -> Result<Vec<Batch>, StoreError> {
        let mut lots = self.batches.select(|b| b.variant_id() == variant_id)?;
        lots.sort_by_key(|b| (b.expires_at(), b.received_at(), b.id_typed()));
        Ok(lots)
    }

    fn find_consumable(
        &self,
        variant_id: VariantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Batch>, StoreError> {
        let mut lots = self
            .batches
            .select(|b| b.variant_id() == variant_id && b.is_consumable(now))?;
        // FIFO: oldest-expiring first; receipt time and id keep ties deterministic.
        lots.sort_by_key(|b| (b.expires_at(), b.received_at(), b.id_typed()));
        Ok(lots)
    }

    fn latest_active(&self, variant_id: VariantId) -> Result<Option<Batch>, StoreError> {
        let lots = self
            .batches
            .select(|b| b.variant_id() == variant_id && b.status() == BatchStatus::Active)?;
        Ok(lots
            .into_iter()
            .max_by_key(|b| (b.received_at(), b.id_typed())))
    }

    fn try_decrement(&self, id: BatchId, amount: u64) -> Result<bool, StoreError> {
        self.batches.update(&id, |b| b.try_take(amount))
    }

    fn increment(&self, id: BatchId, amount: u64) -> Result<(), StoreError> {
        self.batches.update(&id, |b| b.credit(amount))??;
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.batches.update_all(|b| b.expire_if_due(now))
    }

    fn recall(&self, id: BatchId) -> Result<Batch, StoreError> {
        self.batches.update(&id, |b| b.recall().map(|()| b.clone()))?
            .map_err(StoreError::from)
    }

    fn total_quantity(&self) -> Result<u64, StoreError> {
        self.batches.sum(|b| b.quantity())
    }
}

/// In-memory vendor stock pool.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryVendorStockPool {
    rows: Table<VendorStock>,
}

impl InMemoryVendorStockPool {
    pub fn new() -> Self {
        Self { rows: Table::new() }
    }
}

impl Default for InMemoryVendorStockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorStockPool for InMemoryVendorStockPool {
    fn create(&self, row: VendorStock) -> Result<(), StoreError> {
        self.rows.insert_new(row, |_, _| false)
    }

    fn get(&self, id: VendorStockId) -> Result<Option<VendorStock>, StoreError> {
        self.rows.get(&id)
    }

    fn find_consumable(
        &self,
        vendor_id: VendorId,
        variant_id: VariantId,
    ) -> Result<Vec<VendorStock>, StoreError> {
        let mut rows = self.rows.select(|r| {
            r.vendor_id() == vendor_id && r.variant_id() == variant_id && r.quantity() > 0
        })?;
        rows.sort_by_key(|r| (r.received_at(), r.id_typed()));
        Ok(rows)
    }

    fn list_by_lot(&self, lot_ref: BatchId) -> Result<Vec<VendorStock>, StoreError> {
        let mut rows = self.rows.select(|r| r.lot_ref() == lot_ref)?;
        rows.sort_by_key(|r| (r.received_at(), r.id_typed()));
        Ok(rows)
    }

    fn try_decrement(&self, id: VendorStockId, amount: u64) -> Result<bool, StoreError> {
        self.rows.update(&id, |r| r.try_take(amount))
    }

    fn increment(&self, id: VendorStockId, amount: u64) -> Result<(), StoreError> {
        self.rows.update(&id, |r| r.credit(amount))??;
        Ok(())
    }

    fn total_quantity(&self) -> Result<u64, StoreError> {
        self.rows.sum(|r| r.quantity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use larder_core::{DomainError, ProductId};
    use larder_inventory::NewBatch;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn lot(variant_id: VariantId, lot_number: &str, expires_in_days: i64, quantity: u64) -> Batch {
        let now = test_time();
        Batch::receive(
            BatchId::new(),
            NewBatch {
                variant_id,
                product_id: ProductId::new(),
                lot_number: lot_number.to_string(),
                produced_at: now - Duration::days(1),
                expires_at: now + Duration::days(expires_in_days),
                quantity,
            },
            now,
        )
        .unwrap()
    }

    #[test]
    fn lot_numbers_are_unique() {
        let ledger = InMemoryLotLedger::new();
        let variant_id = VariantId::new();
        ledger.insert(lot(variant_id, "LOT-1", 10, 5)).unwrap();

        let err = ledger.insert(lot(variant_id, "LOT-1", 20, 5)).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn find_consumable_orders_by_expiry_and_filters() {
        let ledger = InMemoryLotLedger::new();
        let variant_id = VariantId::new();

        let late = lot(variant_id, "LATE", 30, 5);
        let early = lot(variant_id, "EARLY", 5, 5);
        let empty = lot(variant_id, "EMPTY", 1, 1);
        let recalled = lot(variant_id, "RECALLED", 2, 5);
        let other = lot(VariantId::new(), "OTHER", 1, 5);

        for b in [&late, &early, &empty, &recalled, &other] {
            ledger.insert(b.clone()).unwrap();
        }
        assert!(ledger.try_decrement(empty.id_typed(), 1).unwrap());
        ledger.recall(recalled.id_typed()).unwrap();

        let found = ledger.find_consumable(variant_id, test_time()).unwrap();
        let ids: Vec<_> = found.iter().map(|b| b.id_typed()).collect();
        assert_eq!(ids, vec![early.id_typed(), late.id_typed()]);
    }

    #[test]
    fn find_consumable_excludes_lots_past_expiry_even_before_sweep() {
        let ledger = InMemoryLotLedger::new();
        let variant_id = VariantId::new();
        let b = lot(variant_id, "SOON", 1, 5);
        ledger.insert(b.clone()).unwrap();

        let later = test_time() + Duration::days(2);
        assert!(ledger.find_consumable(variant_id, later).unwrap().is_empty());
        assert_eq!(ledger.get(b.id_typed()).unwrap().unwrap().status(), BatchStatus::Active);
    }

    #[test]
    fn try_decrement_is_conditional() {
        let ledger = InMemoryLotLedger::new();
        let b = lot(VariantId::new(), "LOT", 10, 3);
        ledger.insert(b.clone()).unwrap();

        assert!(!ledger.try_decrement(b.id_typed(), 4).unwrap());
        assert!(ledger.try_decrement(b.id_typed(), 3).unwrap());
        assert!(!ledger.try_decrement(b.id_typed(), 1).unwrap());
        assert_eq!(ledger.get(b.id_typed()).unwrap().unwrap().quantity(), 0);
    }

    #[test]
    fn increment_unknown_lot_is_not_found() {
        let ledger = InMemoryLotLedger::new();
        let err = ledger.increment(BatchId::new(), 1).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn sweep_flips_only_due_active_lots() {
        let ledger = InMemoryLotLedger::new();
        let variant_id = VariantId::new();
        let due = lot(variant_id, "DUE", 1, 5);
        let fresh = lot(variant_id, "FRESH", 30, 5);
        ledger.insert(due.clone()).unwrap();
        ledger.insert(fresh.clone()).unwrap();

        let later = test_time() + Duration::days(2);
        assert_eq!(ledger.sweep_expired(later).unwrap(), 1);
        assert_eq!(ledger.sweep_expired(later).unwrap(), 0);

        assert_eq!(ledger.get(due.id_typed()).unwrap().unwrap().status(), BatchStatus::Expired);
        assert_eq!(ledger.get(fresh.id_typed()).unwrap().unwrap().status(), BatchStatus::Active);
    }

    #[test]
    fn sweep_flips_every_due_lot_in_one_pass() {
        let ledger = InMemoryLotLedger::new();
        let variant_id = VariantId::new();
        let due: Vec<Batch> = (0..4)
            .map(|i| lot(variant_id, &format!("DUE-{i}"), 1, 5))
            .collect();
        for b in &due {
            ledger.insert(b.clone()).unwrap();
        }
        ledger.insert(lot(variant_id, "KEEP", 30, 5)).unwrap();

        let later = test_time() + Duration::days(2);
        assert_eq!(ledger.sweep_expired(later).unwrap(), 4);
        for b in &due {
            assert_eq!(ledger.get(b.id_typed()).unwrap().unwrap().status(), BatchStatus::Expired);
        }
        assert_eq!(ledger.find_consumable(variant_id, later).unwrap().len(), 1);
    }

    #[test]
    fn recall_of_expired_lot_conflicts() {
        let ledger = InMemoryLotLedger::new();
        let b = lot(VariantId::new(), "OLD", 1, 5);
        ledger.insert(b.clone()).unwrap();
        ledger.sweep_expired(test_time() + Duration::days(2)).unwrap();

        let err = ledger.recall(b.id_typed()).unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));
    }

    #[test]
    fn vendor_rows_are_never_merged() {
        let pool = InMemoryVendorStockPool::new();
        let source = lot(VariantId::new(), "SRC", 30, 10);
        let vendor_id = VendorId::new();
        let now = test_time();

        let first = VendorStock::carve(VendorStockId::new(), vendor_id, &source, 2, now).unwrap();
        let second = VendorStock::carve(
            VendorStockId::new(),
            vendor_id,
            &source,
            3,
            now + Duration::minutes(1),
        )
        .unwrap();
        pool.create(first.clone()).unwrap();
        pool.create(second.clone()).unwrap();

        let rows = pool.find_consumable(vendor_id, source.variant_id()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id_typed(), first.id_typed());
        assert_eq!(pool.list_by_lot(source.id_typed()).unwrap().len(), 2);
        assert_eq!(pool.total_quantity().unwrap(), 5);
    }
}
