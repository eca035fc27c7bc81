//! Fulfillment facade: the operations exposed to order, cancellation and admin flows.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use larder_core::{BatchId, Clock, SystemClock, VariantId, VendorId};
use larder_inventory::{Batch, ConsumptionManifest, LineItem, NewBatch, RestoreRequest, VendorStock};

use crate::allocator::StockAllocator;
use crate::catalog::{ensure_sellable, Catalog, InMemoryCatalog};
use crate::config::{ConfigError, FulfillmentConfig, ENV_DATABASE_URL};
use crate::error::FulfillmentError;
use crate::fulfillment::FulfillmentEngine;
use crate::restoration::{RestorationReport, RestorationService};
use crate::store::{
    postgres, InMemoryLotLedger, InMemoryVendorStockPool, LotLedger, PostgresLotLedger,
    PostgresVendorStockPool, VendorStockPool,
};
use crate::sweeper::ExpirySweeper;

/// Stock held in each pool, for conservation audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockTotals {
    pub lots: u64,
    pub vendor_stock: u64,
}

impl StockTotals {
    pub fn total(&self) -> u64 {
        self.lots + self.vendor_stock
    }
}

/// Wires the ledger, vendor pool and catalog into the services that share them.
pub struct InventoryFulfillment<L, V, C> {
    ledger: Arc<L>,
    vendors: Arc<V>,
    catalog: Arc<C>,
    clock: Arc<dyn Clock>,
    allocator: StockAllocator<L, V>,
    engine: FulfillmentEngine<L, V>,
    restoration: RestorationService<L>,
    sweeper: ExpirySweeper<L>,
}

impl InventoryFulfillment<InMemoryLotLedger, InMemoryVendorStockPool, InMemoryCatalog> {
    /// Fully in-memory wiring for tests/dev.
    pub fn in_memory(config: FulfillmentConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(InMemoryLotLedger::new()),
            Arc::new(InMemoryVendorStockPool::new()),
            Arc::new(InMemoryCatalog::new()),
            clock,
            config,
        )
    }
}

impl<C: Catalog> InventoryFulfillment<PostgresLotLedger, PostgresVendorStockPool, C> {
    /// Connect to `config.database_url` and wire the Postgres-backed stores.
    pub async fn connect_postgres(
        config: FulfillmentConfig,
        catalog: Arc<C>,
    ) -> Result<Self, FulfillmentError> {
        let url = config
            .database_url
            .clone()
            .ok_or(ConfigError::Missing {
                key: ENV_DATABASE_URL,
            })?;
        let pool = postgres::connect(&url).await?;
        Ok(Self::new(
            Arc::new(PostgresLotLedger::new(pool.clone())),
            Arc::new(PostgresVendorStockPool::new(pool)),
            catalog,
            Arc::new(SystemClock),
            config,
        ))
    }
}

impl<L, V, C> InventoryFulfillment<L, V, C>
where
    L: LotLedger,
    V: VendorStockPool,
    C: Catalog,
{
    pub fn new(
        ledger: Arc<L>,
        vendors: Arc<V>,
        catalog: Arc<C>,
        clock: Arc<dyn Clock>,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            allocator: StockAllocator::new(ledger.clone(), vendors.clone(), clock.clone()),
            engine: FulfillmentEngine::new(
                ledger.clone(),
                vendors.clone(),
                clock.clone(),
                config.clone(),
            ),
            restoration: RestorationService::new(ledger.clone(), clock.clone(), config),
            sweeper: ExpirySweeper::new(ledger.clone(), clock.clone()),
            ledger,
            vendors,
            catalog,
            clock,
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn vendors(&self) -> &Arc<V> {
        &self.vendors
    }

    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    /// Stock receiving: record a new lot in `Active` state.
    pub fn receive_batch(&self, cmd: NewBatch) -> Result<Batch, FulfillmentError> {
        let batch = Batch::receive(BatchId::new(), cmd, self.clock.now())?;
        self.ledger.insert(batch.clone())?;
        info!(
            batch_id = %batch.id_typed(),
            lot_number = batch.lot_number(),
            variant_id = %batch.variant_id(),
            quantity = batch.quantity(),
            "received lot"
        );
        Ok(batch)
    }

    /// Administrative recall; the lot stops being consumable immediately.
    pub fn recall_batch(&self, batch_id: BatchId) -> Result<Batch, FulfillmentError> {
        let batch = self.ledger.recall(batch_id)?;
        info!(batch_id = %batch_id, remaining = batch.quantity(), "recalled lot");
        Ok(batch)
    }

    /// Every lot of a variant after an expiry sweep (admin listing).
    pub fn lots_for_variant(&self, variant_id: VariantId) -> Result<Vec<Batch>, FulfillmentError> {
        self.sweeper.sweep()?;
        Ok(self.ledger.list_by_variant(variant_id)?)
    }

    /// Vendor rows carved from a lot (provenance trail).
    pub fn transfers_from(&self, batch_id: BatchId) -> Result<Vec<VendorStock>, FulfillmentError> {
        Ok(self.vendors.list_by_lot(batch_id)?)
    }

    pub fn allocate(
        &self,
        vendor_id: VendorId,
        batch_id: BatchId,
        quantity: u64,
    ) -> Result<VendorStock, FulfillmentError> {
        self.allocator.allocate(vendor_id, batch_id, quantity)
    }

    pub fn deduct(
        &self,
        items: &[LineItem],
        vendor_id: Option<VendorId>,
    ) -> Result<Vec<ConsumptionManifest>, FulfillmentError> {
        self.engine.deduct(items, vendor_id)
    }

    /// Catalog gate followed by `deduct`: unknown or inactive variants are
    /// rejected before any stock moves.
    pub fn place_order_stock(
        &self,
        items: &[LineItem],
        vendor_id: Option<VendorId>,
    ) -> Result<Vec<ConsumptionManifest>, FulfillmentError> {
        ensure_sellable(&*self.catalog, items)?;
        self.engine.deduct(items, vendor_id)
    }

    pub fn restore(&self, requests: &[RestoreRequest]) -> Result<RestorationReport, FulfillmentError> {
        self.restoration.restore(requests)
    }

    pub fn sweep_expired(&self) -> Result<usize, FulfillmentError> {
        self.sweeper.sweep()
    }

    pub fn available(
        &self,
        variant_id: VariantId,
        vendor_id: Option<VendorId>,
    ) -> Result<u64, FulfillmentError> {
        self.engine.available(variant_id, vendor_id)
    }

    pub fn totals(&self) -> Result<StockTotals, FulfillmentError> {
        Ok(StockTotals {
            lots: self.ledger.total_quantity()?,
            vendor_stock: self.vendors.total_quantity()?,
        })
    }
}
