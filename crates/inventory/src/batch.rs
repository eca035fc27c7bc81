use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use larder_core::{BatchId, DomainError, DomainResult, Entity, ProductId, VariantId};

/// Lot lifecycle.
///
/// `Active` is the only consumable state. `Expired` and `Recalled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Expired,
    Recalled,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Expired => "expired",
            BatchStatus::Recalled => "recalled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::Active)
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BatchStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BatchStatus::Active),
            "expired" => Ok(BatchStatus::Expired),
            "recalled" => Ok(BatchStatus::Recalled),
            other => Err(DomainError::validation(format!("unknown batch status '{other}'"))),
        }
    }
}

/// Command: receive a new production lot into the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatch {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub lot_number: String,
    pub produced_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub quantity: u64,
}

/// A physical production run of one product variant.
///
/// `quantity` is only ever changed through [`Batch::try_take`] and
/// [`Batch::credit`]; storage adapters call these while holding the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    id: BatchId,
    variant_id: VariantId,
    product_id: ProductId,
    lot_number: String,
    produced_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    quantity: u64,
    status: BatchStatus,
    received_at: DateTime<Utc>,
}

impl Batch {
    /// Validate a receiving command and build the lot in `Active` state.
    pub fn receive(id: BatchId, cmd: NewBatch, received_at: DateTime<Utc>) -> DomainResult<Self> {
        let lot_number = cmd.lot_number.trim();
        if lot_number.is_empty() {
            return Err(DomainError::validation("lot number cannot be empty"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if cmd.expires_at <= cmd.produced_at {
            return Err(DomainError::validation(
                "expiry must be later than production date",
            ));
        }

        Ok(Self {
            id,
            variant_id: cmd.variant_id,
            product_id: cmd.product_id,
            lot_number: lot_number.to_string(),
            produced_at: cmd.produced_at,
            expires_at: cmd.expires_at,
            quantity: cmd.quantity,
            status: BatchStatus::Active,
            received_at,
        })
    }

    /// Rebuild a lot from persisted columns (no validation; rows are trusted).
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: BatchId,
        variant_id: VariantId,
        product_id: ProductId,
        lot_number: String,
        produced_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        quantity: u64,
        status: BatchStatus,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            variant_id,
            product_id,
            lot_number,
            produced_at,
            expires_at,
            quantity,
            status,
            received_at,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn lot_number(&self) -> &str {
        &self.lot_number
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Active, not yet past expiry, and holding stock.
    pub fn is_consumable(&self, now: DateTime<Utc>) -> bool {
        self.status == BatchStatus::Active && self.expires_at > now && self.quantity > 0
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Flip `Active` → `Expired` once the expiry instant has passed.
    ///
    /// Returns whether the status changed. Idempotent.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == BatchStatus::Active && self.is_past_expiry(now) {
            self.status = BatchStatus::Expired;
            return true;
        }
        false
    }

    /// Administrative recall. Only an active lot can be recalled.
    pub fn recall(&mut self) -> DomainResult<()> {
        match self.status {
            BatchStatus::Active => {
                self.status = BatchStatus::Recalled;
                Ok(())
            }
            status => Err(DomainError::conflict(format!(
                "lot {} is {status} and cannot be recalled",
                self.lot_number
            ))),
        }
    }

    /// Conditional decrement: succeeds only for an active lot holding at least `amount`.
    ///
    /// A zero amount never succeeds.
    pub fn try_take(&mut self, amount: u64) -> bool {
        if amount == 0 || self.status != BatchStatus::Active || self.quantity < amount {
            return false;
        }
        self.quantity -= amount;
        true
    }

    /// Unconditional increment (restoration / rollback). Ignores status.
    pub fn credit(&mut self, amount: u64) -> DomainResult<()> {
        self.quantity = self
            .quantity
            .checked_add(amount)
            .ok_or_else(|| DomainError::invariant("lot quantity overflow"))?;
        Ok(())
    }
}

impl Entity for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
