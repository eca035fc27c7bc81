//! Stock storage adapters and the fulfillment services built on them.
//!
//! - `store`: lot ledger and vendor stock pool (in-memory and Postgres)
//! - `allocator`: carves vendor stock out of a lot
//! - `fulfillment`: all-or-nothing order deduction with rollback
//! - `restoration`: returns stock from cancelled orders
//! - `sweeper`: flips past-expiry lots to `Expired`
//! - `service`: facade wiring the above together

pub mod allocator;
pub mod catalog;
pub mod compensation;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod pool;
pub mod restoration;
pub mod service;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod integration_tests;

pub use allocator::StockAllocator;
pub use catalog::{Catalog, InMemoryCatalog, VariantInfo};
pub use config::{ConfigError, FulfillmentConfig};
pub use error::FulfillmentError;
pub use fulfillment::FulfillmentEngine;
pub use restoration::{RestorationReport, RestorationService};
pub use service::{InventoryFulfillment, StockTotals};
pub use store::{
    InMemoryLotLedger, InMemoryVendorStockPool, LotLedger, PostgresLotLedger,
    PostgresVendorStockPool, StoreError, VendorStockPool,
};
pub use sweeper::ExpirySweeper;
