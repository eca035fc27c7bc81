//! Fulfillment error taxonomy.

use thiserror::Error;

use larder_core::{BatchId, DomainError, VariantId};
use larder_inventory::BatchStatus;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors surfaced by the allocator, fulfillment engine and restoration service.
///
/// Business errors are returned to the immediate caller and never retried
/// inside the engine. `ConsistencyViolation` is fatal: a compensating or
/// restoring credit failed, so the conservation invariant may be broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FulfillmentError {
    #[error("insufficient stock for variant {variant_id}")]
    InsufficientStock { variant_id: VariantId },

    #[error("lot {batch_id} is {status} and cannot be allocated")]
    LotNotConsumable { batch_id: BatchId, status: BatchStatus },

    #[error("lot {batch_id} holds {available}, cannot transfer {requested}")]
    InsufficientLotQuantity {
        batch_id: BatchId,
        requested: u64,
        available: u64,
    },

    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("variant {variant_id} is unknown or inactive")]
    VariantUnavailable { variant_id: VariantId },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FulfillmentError {
    /// `true` only for errors that imply broken conservation and must halt the request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FulfillmentError::ConsistencyViolation(_))
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::ConsistencyViolation(msg.into())
    }
}
