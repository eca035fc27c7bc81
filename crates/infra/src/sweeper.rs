//! Expiry sweep: flips lots past their expiry out of the consumable pool.

use std::sync::Arc;

use tracing::info;

use larder_core::Clock;

use crate::error::FulfillmentError;
use crate::store::LotLedger;

/// Idempotent active → expired pass over the lot ledger.
///
/// Called before candidate reads and by an external maintenance trigger.
pub struct ExpirySweeper<L> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
}

impl<L: LotLedger> ExpirySweeper<L> {
    pub fn new(ledger: Arc<L>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Returns how many lots were flipped by this call.
    pub fn sweep(&self) -> Result<usize, FulfillmentError> {
        let now = self.clock.now();
        let flipped = self.ledger.sweep_expired(now)?;
        if flipped > 0 {
            info!(expired = flipped, at = %now, "swept expired lots");
        }
        Ok(flipped)
    }
}
