//! Inventory domain module: perishable lots, vendor earmarks, consumption manifests.
//!
//! This crate contains business rules for stock, implemented purely as
//! deterministic domain logic (no IO, no storage, no clock reads).

pub mod batch;
pub mod manifest;
pub mod vendor_stock;

pub use batch::{Batch, BatchStatus, NewBatch};
pub use manifest::{ConsumptionManifest, LineItem, ManifestEntry, RestoreRequest};
pub use vendor_stock::VendorStock;
