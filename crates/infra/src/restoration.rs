//! Return cancelled order stock to its originating lots.
//!
//! Tracked lines credit exactly the lots named in their manifest. This holds
//! even when the order was served from a vendor pool: cancelled stock goes
//! back to the general warehouse lot, not to the vendor's earmark.
//!
//! Legacy lines (no manifest) fall back to crediting the most recently
//! received active, unexpired lot of the variant. That heuristic does not
//! reconstruct provenance; every use is logged and reported as best-effort.
//!
//! Legacy targets are resolved before any credit is applied. A read failure
//! at that stage leaves every lot untouched and is safe to retry; once
//! crediting has started, any failure is a `ConsistencyViolation`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use larder_core::{BatchId, Clock, VariantId};
use larder_inventory::{ConsumptionManifest, RestoreRequest};

use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::store::LotLedger;

/// Outcome of one `restore` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestorationReport {
    /// Units credited to the exact lots recorded in manifests.
    pub restored: u64,
    /// Units credited by the legacy heuristic.
    pub best_effort: u64,
    /// Variants whose stock was credited by the legacy heuristic.
    pub best_effort_variants: Vec<VariantId>,
    /// Legacy units with no lot to credit (no active lot, or fallback disabled).
    pub unplaced: u64,
}

impl RestorationReport {
    pub fn is_exact(&self) -> bool {
        self.best_effort == 0 && self.unplaced == 0
    }
}

pub struct RestorationService<L> {
    ledger: Arc<L>,
    clock: Arc<dyn Clock>,
    config: FulfillmentConfig,
}

impl<L: LotLedger> RestorationService<L> {
    pub fn new(ledger: Arc<L>, clock: Arc<dyn Clock>, config: FulfillmentConfig) -> Self {
        Self {
            ledger,
            clock,
            config,
        }
    }

    /// Credit every line back. Attempts all credits before reporting failures;
    /// any failed credit is a `ConsistencyViolation`.
    pub fn restore(&self, requests: &[RestoreRequest]) -> Result<RestorationReport, FulfillmentError> {
        let targets = self.resolve_legacy_targets(requests)?;

        let mut report = RestorationReport::default();
        let mut failed = Vec::new();

        for request in requests {
            match request {
                RestoreRequest::Tracked(manifest) => {
                    self.restore_tracked(manifest, &mut report, &mut failed)
                }
                RestoreRequest::Legacy {
                    variant_id,
                    quantity,
                } => {
                    let target = targets.get(variant_id).copied().flatten();
                    self.restore_legacy(*variant_id, *quantity, target, &mut report, &mut failed)
                }
            }
        }

        if !failed.is_empty() {
            return Err(FulfillmentError::consistency(format!(
                "restoration could not credit {} lot(s): {}",
                failed.len(),
                failed.join("; ")
            )));
        }

        info!(
            restored = report.restored,
            best_effort = report.best_effort,
            unplaced = report.unplaced,
            "restored cancelled stock"
        );
        Ok(report)
    }

    /// Newest active lot per legacy variant, looked up after an expiry sweep
    /// so a lot past its expiry is never chosen.
    fn resolve_legacy_targets(
        &self,
        requests: &[RestoreRequest],
    ) -> Result<HashMap<VariantId, Option<BatchId>>, FulfillmentError> {
        let mut targets = HashMap::new();
        if !self.config.legacy_restore_fallback {
            return Ok(targets);
        }

        let mut swept = false;
        for request in requests {
            let RestoreRequest::Legacy {
                variant_id,
                quantity,
            } = request
            else {
                continue;
            };
            if *quantity == 0 || targets.contains_key(variant_id) {
                continue;
            }
            if !swept {
                self.ledger.sweep_expired(self.clock.now())?;
                swept = true;
            }
            let target = self.ledger.latest_active(*variant_id)?.map(|b| b.id_typed());
            targets.insert(*variant_id, target);
        }
        Ok(targets)
    }

    fn restore_tracked(
        &self,
        manifest: &ConsumptionManifest,
        report: &mut RestorationReport,
        failed: &mut Vec<String>,
    ) {
        for entry in &manifest.entries {
            match self.credit(entry.lot_ref, entry.quantity) {
                Ok(()) => report.restored += entry.quantity,
                Err(msg) => failed.push(msg),
            }
        }
    }

    fn restore_legacy(
        &self,
        variant_id: VariantId,
        quantity: u64,
        target: Option<BatchId>,
        report: &mut RestorationReport,
        failed: &mut Vec<String>,
    ) {
        if quantity == 0 {
            return;
        }

        if !self.config.legacy_restore_fallback {
            warn!(
                variant_id = %variant_id,
                quantity,
                "legacy line has no manifest and fallback is disabled; stock left unplaced"
            );
            report.unplaced += quantity;
            return;
        }

        let Some(target) = target else {
            warn!(
                variant_id = %variant_id,
                quantity,
                "legacy line has no manifest and no active lot; stock left unplaced"
            );
            report.unplaced += quantity;
            return;
        };

        warn!(
            variant_id = %variant_id,
            lot = %target,
            quantity,
            "best-effort restoration: crediting newest active lot, provenance not reconstructed"
        );
        match self.credit(target, quantity) {
            Ok(()) => {
                report.best_effort += quantity;
                if !report.best_effort_variants.contains(&variant_id) {
                    report.best_effort_variants.push(variant_id);
                }
            }
            Err(msg) => failed.push(msg),
        }
    }

    fn credit(&self, lot: BatchId, quantity: u64) -> Result<(), String> {
        self.ledger.increment(lot, quantity).map_err(|e| {
            error!(lot = %lot, quantity, error = %e, "restoration credit failed");
            format!("lot {lot} x{quantity}: {e}")
        })
    }
}
