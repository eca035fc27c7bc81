//! Catalog collaborator port.
//!
//! The catalog owns variants and prices; the order-placement flow consults it
//! before reserving stock so inactive variants are rejected early.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use larder_core::{ProductId, VariantId};
use larder_inventory::LineItem;

use crate::error::FulfillmentError;

/// Catalog snapshot of one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInfo {
    pub product_id: ProductId,
    /// Opaque price snapshot in the smallest currency unit.
    pub unit_price: u64,
    pub is_active: bool,
}

pub trait Catalog: Send + Sync {
    fn get_variant(&self, variant_id: VariantId) -> Option<VariantInfo>;
}

/// Resolve every line against the catalog, rejecting unknown or inactive variants.
pub fn ensure_sellable<C>(catalog: &C, items: &[LineItem]) -> Result<Vec<VariantInfo>, FulfillmentError>
where
    C: Catalog + ?Sized,
{
    items
        .iter()
        .map(|item| match catalog.get_variant(item.variant_id) {
            Some(info) if info.is_active => Ok(info),
            _ => Err(FulfillmentError::VariantUnavailable {
                variant_id: item.variant_id,
            }),
        })
        .collect()
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    variants: RwLock<HashMap<VariantId, VariantInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, variant_id: VariantId, info: VariantInfo) {
        if let Ok(mut map) = self.variants.write() {
            map.insert(variant_id, info);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn get_variant(&self, variant_id: VariantId) -> Option<VariantInfo> {
        let map = self.variants.read().ok()?;
        map.get(&variant_id).copied()
    }
}
