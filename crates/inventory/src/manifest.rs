//! Order-line inputs and the consumption manifest recorded against them.

use serde::{Deserialize, Serialize};

use larder_core::{BatchId, DomainError, DomainResult, VariantId};

/// One order line as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub variant_id: VariantId,
    pub quantity: u64,
}

impl LineItem {
    pub fn new(variant_id: VariantId, quantity: u64) -> Self {
        Self {
            variant_id,
            quantity,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity == 0 {
            return Err(DomainError::validation(format!(
                "line for variant {} has zero quantity",
                self.variant_id
            )));
        }
        Ok(())
    }
}

/// `quantity` units taken from lot `lot_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub lot_ref: BatchId,
    pub quantity: u64,
}

/// Exactly which lots satisfied one line item, in consumption order.
///
/// Persisted on the order line together with the order itself; restoration
/// reads nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionManifest {
    pub variant_id: VariantId,
    pub entries: Vec<ManifestEntry>,
}

impl ConsumptionManifest {
    pub fn new(variant_id: VariantId) -> Self {
        Self {
            variant_id,
            entries: Vec::new(),
        }
    }

    /// Append a take. Consecutive takes from the same lot are folded together.
    pub fn record(&mut self, lot_ref: BatchId, quantity: u64) {
        if let Some(last) = self.entries.last_mut() {
            if last.lot_ref == lot_ref {
                last.quantity += quantity;
                return;
            }
        }
        self.entries.push(ManifestEntry { lot_ref, quantity });
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    /// Manifest quantities must add up to the ordered quantity.
    pub fn covers(&self, item: &LineItem) -> bool {
        self.variant_id == item.variant_id && self.total() == item.quantity
    }
}

/// What an order cancellation hands back for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreRequest {
    /// Line carries a manifest: credit each recorded lot exactly.
    Tracked(ConsumptionManifest),
    /// Line predates manifest tracking; only the variant and quantity are known.
    Legacy { variant_id: VariantId, quantity: u64 },
}

impl RestoreRequest {
    pub fn variant_id(&self) -> VariantId {
        match self {
            RestoreRequest::Tracked(m) => m.variant_id,
            RestoreRequest::Legacy { variant_id, .. } => *variant_id,
        }
    }

    pub fn quantity(&self) -> u64 {
        match self {
            RestoreRequest::Tracked(m) => m.total(),
            RestoreRequest::Legacy { quantity, .. } => *quantity,
        }
    }
}

impl From<ConsumptionManifest> for RestoreRequest {
    fn from(value: ConsumptionManifest) -> Self {
        RestoreRequest::Tracked(value)
    }
}
