//! `larder-core`: shared building blocks for the fulfillment engine.
//!
//! This crate contains **pure** primitives (no storage, no IO): identifiers,
//! the entity contract, the domain error model and the clock seam.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{BatchId, ProductId, VariantId, VendorId, VendorStockId};
