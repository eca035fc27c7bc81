//! End-to-end tests through the fulfillment facade.
//!
//! Receive -> allocate -> deduct -> restore, against the in-memory stores,
//! checking conservation and rollback across the whole pipeline.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    use larder_core::{BatchId, Clock, FixedClock, ProductId, VariantId, VendorId};
    use larder_inventory::{
        Batch, ConsumptionManifest, LineItem, ManifestEntry, NewBatch, RestoreRequest,
    };

    use crate::catalog::InMemoryCatalog;
    use crate::config::FulfillmentConfig;
    use crate::error::FulfillmentError;
    use crate::service::InventoryFulfillment;
    use crate::store::{InMemoryLotLedger, InMemoryVendorStockPool, LotLedger, VendorStockPool};

    type Service = InventoryFulfillment<InMemoryLotLedger, InMemoryVendorStockPool, InMemoryCatalog>;

    fn setup() -> (Service, DateTime<Utc>) {
        let (svc, clock) = setup_with_clock();
        (svc, clock.now())
    }

    fn setup_with_clock() -> (Service, Arc<FixedClock>) {
        larder_observability::init_for_tests();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let svc = InventoryFulfillment::in_memory(FulfillmentConfig::default(), clock.clone());
        (svc, clock)
    }

    fn receive(svc: &Service, variant_id: VariantId, lot: &str, quantity: u64, expires_at: DateTime<Utc>) -> Batch {
        svc.receive_batch(NewBatch {
            variant_id,
            product_id: ProductId::new(),
            lot_number: lot.to_string(),
            produced_at: expires_at - Duration::days(60),
            expires_at,
            quantity,
        })
        .unwrap()
    }

    fn lot_qty(svc: &Service, id: BatchId) -> u64 {
        svc.ledger().get(id).unwrap().unwrap().quantity()
    }

    #[test]
    fn single_lot_sufficient_stock() {
        let (svc, now) = setup();
        let v = VariantId::new();
        let a = receive(&svc, v, "A", 10, now + Duration::days(30));

        let manifests = svc.deduct(&[LineItem::new(v, 4)], None).unwrap();

        assert_eq!(lot_qty(&svc, a.id_typed()), 6);
        assert_eq!(
            manifests[0].entries,
            vec![ManifestEntry { lot_ref: a.id_typed(), quantity: 4 }]
        );
    }

    #[test]
    fn fifo_split_across_two_lots() {
        let (svc, now) = setup();
        let v = VariantId::new();
        let b = receive(&svc, v, "B", 10, now + Duration::days(30));
        let a = receive(&svc, v, "A", 3, now + Duration::days(5));

        let manifests = svc.deduct(&[LineItem::new(v, 5)], None).unwrap();

        assert_eq!(
            manifests[0].entries,
            vec![
                ManifestEntry { lot_ref: a.id_typed(), quantity: 3 },
                ManifestEntry { lot_ref: b.id_typed(), quantity: 2 },
            ]
        );
        assert_eq!(lot_qty(&svc, a.id_typed()), 0);
        assert_eq!(lot_qty(&svc, b.id_typed()), 8);
    }

    #[test]
    fn partial_order_rolls_back_every_item() {
        let (svc, now) = setup();
        let v1 = VariantId::new();
        let v2 = VariantId::new();
        let a = receive(&svc, v1, "A", 3, now + Duration::days(30));
        let before = svc.totals().unwrap();

        let err = svc
            .deduct(&[LineItem::new(v1, 3), LineItem::new(v2, 1)], None)
            .unwrap_err();

        assert_eq!(err, FulfillmentError::InsufficientStock { variant_id: v2 });
        assert_eq!(lot_qty(&svc, a.id_typed()), 3);
        assert_eq!(svc.totals().unwrap(), before);
    }

    #[test]
    fn allocation_then_vendor_deduction() {
        let (svc, now) = setup();
        let v = VariantId::new();
        let vendor_x = VendorId::new();
        let a = receive(&svc, v, "A", 10, now + Duration::days(30));

        let row = svc.allocate(vendor_x, a.id_typed(), 6).unwrap();
        assert_eq!(row.quantity(), 6);
        assert_eq!(lot_qty(&svc, a.id_typed()), 4);

        let manifests = svc.deduct(&[LineItem::new(v, 4)], Some(vendor_x)).unwrap();

        assert_eq!(manifests[0].entries[0].lot_ref, a.id_typed());
        assert_eq!(svc.vendors().get(row.id_typed()).unwrap().unwrap().quantity(), 2);
        assert_eq!(lot_qty(&svc, a.id_typed()), 4);
        assert_eq!(svc.transfers_from(a.id_typed()).unwrap().len(), 1);
    }

    #[test]
    fn vendor_deduction_does_not_fall_back_to_warehouse() {
        let (svc, now) = setup();
        let v = VariantId::new();
        let vendor_x = VendorId::new();
        let a = receive(&svc, v, "A", 10, now + Duration::days(30));
        let row = svc.allocate(vendor_x, a.id_typed(), 2).unwrap();

        let err = svc.deduct(&[LineItem::new(v, 3)], Some(vendor_x)).unwrap_err();

        assert_eq!(err, FulfillmentError::InsufficientStock { variant_id: v });
        assert_eq!(svc.vendors().get(row.id_typed()).unwrap().unwrap().quantity(), 2);
        assert_eq!(lot_qty(&svc, a.id_typed()), 8);
    }

    #[test]
    fn restore_round_trips_a_multi_lot_deduction() {
        let (svc, now) = setup();
        let v = VariantId::new();
        let lots: Vec<Batch> = (0..4)
            .map(|i| receive(&svc, v, &format!("RT-{i}"), 3, now + Duration::days(10 + i)))
            .collect();

        let manifests = svc.deduct(&[LineItem::new(v, 10)], None).unwrap();
        assert_eq!(manifests[0].entries.len(), 4);

        let requests: Vec<RestoreRequest> = manifests.into_iter().map(RestoreRequest::from).collect();
        let report = svc.restore(&requests).unwrap();

        assert!(report.is_exact());
        assert_eq!(report.restored, 10);
        for lot in &lots {
            assert_eq!(lot_qty(&svc, lot.id_typed()), 3);
        }
    }

    #[test]
    fn persisted_manifest_restores_after_reload() {
        let (svc, now) = setup();
        let v = VariantId::new();
        let a = receive(&svc, v, "P-1", 5, now + Duration::days(30));
        let manifests = svc.deduct(&[LineItem::new(v, 5)], None).unwrap();

        let stored: Vec<String> = manifests
            .into_iter()
            .map(|m| serde_json::to_string(&RestoreRequest::from(m)).unwrap())
            .collect();
        let reloaded: Vec<RestoreRequest> = stored
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect();

        svc.restore(&reloaded).unwrap();
        assert_eq!(lot_qty(&svc, a.id_typed()), 5);
    }

    #[test]
    fn legacy_restore_lands_on_newest_active_lot() {
        let (svc, clock) = setup_with_clock();
        let now = clock.now();
        let v = VariantId::new();
        let _older = receive(&svc, v, "OLD", 2, now + Duration::days(40));
        clock.advance(Duration::minutes(5));
        let newer = receive(&svc, v, "NEW", 2, now + Duration::days(40));

        let report = svc
            .restore(&[RestoreRequest::Legacy { variant_id: v, quantity: 3 }])
            .unwrap();

        assert_eq!(report.best_effort, 3);
        assert_eq!(report.best_effort_variants, vec![v]);
        assert_eq!(lot_qty(&svc, newer.id_typed()), 5);
    }

    #[test]
    fn expired_lot_is_swept_before_deduction() {
        let (svc, clock) = setup_with_clock();
        let v = VariantId::new();
        let now = clock.now();
        let short = receive(&svc, v, "S", 5, now + Duration::hours(1));
        let long = receive(&svc, v, "L", 5, now + Duration::days(30));

        clock.advance(Duration::hours(2));
        let manifests = svc.deduct(&[LineItem::new(v, 2)], None).unwrap();

        assert_eq!(manifests[0].entries[0].lot_ref, long.id_typed());
        assert_eq!(lot_qty(&svc, short.id_typed()), 5);
        assert_eq!(svc.available(v, None).unwrap(), 3);
    }

    #[test]
    fn concurrent_deductions_never_oversell() {
        let (svc, now) = setup();
        let svc = Arc::new(svc);
        let v = VariantId::new();
        let lot = receive(&svc, v, "HOT", 20, now + Duration::days(30));
        let per_call = 3u64;
        let callers = 12;

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let svc = svc.clone();
                thread::spawn(move || svc.deduct(&[LineItem::new(v, per_call)], None))
            })
            .collect();

        let mut successes = 0u64;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(manifests) => {
                    assert_eq!(manifests[0].total(), per_call);
                    successes += 1;
                }
                Err(err) => assert_eq!(err, FulfillmentError::InsufficientStock { variant_id: v }),
            }
        }

        assert_eq!(successes, 20 / per_call);
        assert_eq!(lot_qty(&svc, lot.id_typed()), 20 - successes * per_call);
    }

    #[test]
    fn concurrent_allocations_respect_lot_quantity() {
        let (svc, now) = setup();
        let svc = Arc::new(svc);
        let v = VariantId::new();
        let lot = receive(&svc, v, "ALLOC", 10, now + Duration::days(30));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                let id = lot.id_typed();
                thread::spawn(move || svc.allocate(VendorId::new(), id, 3).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|ok| *ok)
            .count() as u64;

        assert!(granted <= 3);
        let totals = svc.totals().unwrap();
        assert_eq!(totals.vendor_stock, granted * 3);
        assert_eq!(totals.total(), 10);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate { vendor: usize, lot: usize, quantity: u64 },
        Deduct { vendor: Option<usize>, quantity: u64 },
        RestoreLast,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..2, 0usize..3, 1u64..8).prop_map(|(vendor, lot, quantity)| Op::Allocate {
                vendor,
                lot,
                quantity
            }),
            (proptest::option::of(0usize..2), 1u64..12)
                .prop_map(|(vendor, quantity)| Op::Deduct { vendor, quantity }),
            Just(Op::RestoreLast),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Stock is only ever moved between pools or handed to orders, and
        /// failed deductions leave both pools untouched.
        #[test]
        fn stock_is_conserved(
            quantities in prop::collection::vec(1u64..20, 3),
            ops in prop::collection::vec(op(), 1..40),
        ) {
            let (svc, now) = setup();
            let v = VariantId::new();
            let vendors = [VendorId::new(), VendorId::new()];
            let lots: Vec<Batch> = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| receive(&svc, v, &format!("P-{i}"), *q, now + Duration::days(5 + i as i64)))
                .collect();
            let initial: u64 = quantities.iter().sum();
            let mut outstanding: Vec<ConsumptionManifest> = Vec::new();

            for op in ops {
                let before = svc.totals().unwrap();
                match op {
                    Op::Allocate { vendor, lot, quantity } => {
                        let moved = svc.allocate(vendors[vendor], lots[lot].id_typed(), quantity).is_ok();
                        prop_assert_eq!(svc.totals().unwrap().total(), before.total());
                        if !moved {
                            prop_assert_eq!(svc.totals().unwrap(), before);
                        }
                    }
                    Op::Deduct { vendor, quantity } => {
                        match svc.deduct(&[LineItem::new(v, quantity)], vendor.map(|i| vendors[i])) {
                            Ok(mut manifests) => {
                                prop_assert_eq!(manifests[0].total(), quantity);
                                outstanding.append(&mut manifests);
                            }
                            Err(err) => {
                                prop_assert_eq!(err, FulfillmentError::InsufficientStock { variant_id: v });
                                prop_assert_eq!(svc.totals().unwrap(), before);
                            }
                        }
                    }
                    Op::RestoreLast => {
                        if let Some(manifest) = outstanding.pop() {
                            let report = svc.restore(&[RestoreRequest::from(manifest)]).unwrap();
                            prop_assert!(report.is_exact());
                        }
                    }
                }

                let handed_out: u64 = outstanding.iter().map(ConsumptionManifest::total).sum();
                let totals = svc.totals().unwrap();
                prop_assert!(totals.total() <= initial);
                prop_assert_eq!(totals.total() + handed_out, initial);
            }
        }
    }
}
