//! End-to-end flows through the Coordinator

use bloodbridge::inventory::ItemStatus;
use bloodbridge::notifier::Event;
use bloodbridge::prelude::*;
use bloodbridge::{
    Availability, BridgeError, Channel, Clock, CreatedRange, DemandStatus, ErrorKind, GeoPoint, HospitalOverview,
    ManualClock, MemoryNotifier, ProposalStatus, StaticGeocoder,
};
use chrono::{Duration, Utc};
use std::sync::Arc;

struct Harness {
    coordinator: Arc<Coordinator>,
    clock: Arc<ManualClock>,
    notifier: Arc<MemoryNotifier>,
}

const POSTAL: &str = "560001";

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let notifier = Arc::new(MemoryNotifier::new());
    let geocoder = StaticGeocoder::new()
        .with_entry(POSTAL, "India", GeoPoint::new(77.5946, 12.9716).unwrap())
        .with_entry("560100", "India", GeoPoint::new(77.6600, 12.8400).unwrap());
    let coordinator = CoordinatorBuilder::new()
        .with_clock(clock.clone())
        .with_notifier(notifier.clone())
        .with_geocoder(Arc::new(geocoder))
        .build()
        .unwrap();
    Harness {
        coordinator: Arc::new(coordinator),
        clock,
        notifier,
    }
}

async fn hospital(h: &Harness) -> bloodbridge::Hospital {
    h.coordinator
        .register_hospital(HospitalRegistration {
            name: "Victoria Hospital".into(),
            postal_code: Some(POSTAL.into()),
            country: Some("India".into()),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn active_donor(h: &Harness, blood_type: BloodType, postal: &str) -> bloodbridge::Donor {
    let donor = h
        .coordinator
        .register_donor(DonorRegistration {
            name: format!("{} donor", blood_type),
            contact: "555-0199".into(),
            blood_type,
            organ_donation: Default::default(),
            postal_code: postal.into(),
            country: None,
        })
        .await
        .unwrap();
    h.coordinator.set_verified(donor.id, true).await.unwrap();
    h.coordinator
        .set_availability(donor.id, Availability::Available)
        .await
        .unwrap()
}

fn shortages_for(notifier: &MemoryNotifier, supply: Supply) -> usize {
    notifier
        .on_channel(Channel::Shortage)
        .into_iter()
        .filter(|e| matches!(e, Event::Shortage(a) if a.supply == supply))
        .count()
}

#[tokio::test]
async fn consuming_below_threshold_raises_one_shortage_alert() {
    let h = harness();
    let hospital = hospital(&h).await;
    let ledger = h.coordinator.create_ledger(hospital.id).await.unwrap();
    let o_pos = Supply::Blood(BloodType::OPos);

    let ledger = h
        .coordinator
        .add_items(
            ledger.id,
            vec![ItemDraft::blood(BloodType::OPos, 5, h.clock.now() + Duration::days(20))],
        )
        .await
        .unwrap();
    assert_eq!(shortages_for(&h.notifier, o_pos), 0);

    let item_id = ledger.items[0].id;
    let ledger = h.coordinator.consume_item(ledger.id, item_id, 3, None).await.unwrap();
    assert_eq!(ledger.snapshot.available(o_pos), 2);
    assert_eq!(shortages_for(&h.notifier, o_pos), 1);

    let alert = h
        .coordinator
        .evaluate_shortages(ledger.id)
        .await
        .unwrap()
        .current
        .into_iter()
        .find(|a| a.supply == o_pos)
        .unwrap();
    assert_eq!((alert.available, alert.threshold), (2, 3));

    // Still short: no second alert for the same episode.
    h.coordinator.consume_item(ledger.id, item_id, 1, None).await.unwrap();
    assert_eq!(shortages_for(&h.notifier, o_pos), 1);
}

#[tokio::test]
async fn heavy_usage_raises_projected_shortage() {
    let h = harness();
    let hospital = hospital(&h).await;
    let ledger = h.coordinator.create_ledger(hospital.id).await.unwrap();
    let o_pos = Supply::Blood(BloodType::OPos);

    let ledger = h
        .coordinator
        .add_items(
            ledger.id,
            vec![ItemDraft::blood(BloodType::OPos, 10, h.clock.now() + Duration::days(20))],
        )
        .await
        .unwrap();
    assert!(h.notifier.on_channel(Channel::ProjectedShortage).is_empty());

    // 4 used today, 6 left: 1.5 days of stock
    let item_id = ledger.items[0].id;
    let ledger = h.coordinator.consume_item(ledger.id, item_id, 4, None).await.unwrap();
    assert_eq!(shortages_for(&h.notifier, o_pos), 0);

    let projected = h.notifier.on_channel(Channel::ProjectedShortage);
    assert_eq!(projected.len(), 1);
    match &projected[0] {
        Event::FutureShortage(alert) => {
            assert_eq!(alert.supply, o_pos);
            assert_eq!(alert.available, 6);
            assert_eq!(alert.avg_daily_usage, 4.0);
            assert_eq!(alert.days_of_stock, 1.5);
        }
        other => panic!("unexpected event {:?}", other),
    }

    h.coordinator.consume_item(ledger.id, item_id, 1, None).await.unwrap();
    assert_eq!(h.notifier.on_channel(Channel::ProjectedShortage).len(), 1);
}

#[tokio::test]
async fn consume_clamps_to_remaining_and_marks_used() {
    let h = harness();
    let hospital = hospital(&h).await;
    let ledger = h.coordinator.create_ledger(hospital.id).await.unwrap();
    let ledger = h
        .coordinator
        .add_items(
            ledger.id,
            vec![ItemDraft::blood(BloodType::BNeg, 4, h.clock.now() + Duration::days(10))],
        )
        .await
        .unwrap();
    let item_id = ledger.items[0].id;

    let ledger = h.coordinator.consume_item(ledger.id, item_id, 10, None).await.unwrap();
    let item = ledger.item(item_id).unwrap();
    assert_eq!(item.quantity, 0);
    assert_eq!(item.status, ItemStatus::Used);

    let series = h.coordinator.usage_series(ledger.id, None, None).await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].used, 4);

    let err = h.coordinator.consume_item(ledger.id, item_id, 1, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn snapshot_always_matches_recomputation() {
    let h = harness();
    let hospital = hospital(&h).await;
    let ledger = h.coordinator.create_ledger(hospital.id).await.unwrap();
    let now = h.clock.now();

    let ledger = h
        .coordinator
        .add_items(
            ledger.id,
            vec![
                ItemDraft::blood(BloodType::APos, 6, now + Duration::days(5)),
                ItemDraft::blood(BloodType::APos, 2, now + Duration::hours(2)),
                ItemDraft::organ(OrganType::Kidney, 1, now + Duration::days(1)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ledger.snapshot, ledger.compute_snapshot());

    let first = ledger.items[0].id;
    let kidney = ledger.items[2].id;
    let ledger = h.coordinator.consume_item(ledger.id, first, 2, None).await.unwrap();
    assert_eq!(ledger.snapshot, ledger.compute_snapshot());

    let ledger = h
        .coordinator
        .discard_item(ledger.id, kidney, bloodbridge::DiscardReason::Damaged)
        .await
        .unwrap();
    assert_eq!(ledger.snapshot, ledger.compute_snapshot());

    h.clock.advance(Duration::hours(3));
    let sweep = h.coordinator.sweep_expired().await.unwrap();
    assert_eq!(sweep.expired, 1);
    assert_eq!(h.notifier.on_channel(Channel::Expired).len(), 1);

    let ledger = h.coordinator.ledger(ledger.id).await.unwrap();
    assert_eq!(ledger.snapshot, ledger.compute_snapshot());
    let snapshot = h.coordinator.get_stock_snapshot(ledger.id).await.unwrap();
    assert_eq!(snapshot.available(Supply::Blood(BloodType::APos)), 4);
    assert_eq!(snapshot.available(Supply::Organ(OrganType::Kidney)), 0);
}

#[tokio::test]
async fn universal_donor_is_proposed_and_confirms_once() {
    let h = harness();
    let hospital = hospital(&h).await;
    let donor = active_donor(&h, BloodType::ONeg, "560100").await;

    let intake = h
        .coordinator
        .create_demand_unit(hospital.id, "trauma bay 1", BloodType::APos, 1)
        .await
        .unwrap();
    // ~16 km away: outside the intake radius, inside the recheck radius.
    assert!(intake.proposals.is_empty());

    let report = h.coordinator.recheck_unfulfilled().await.unwrap();
    assert_eq!(report.proposals, 1);
    let proposals = h.coordinator.proposals_for_demand(intake.demand.id).await.unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].donor_id, donor.id);
    let token = proposals[0].token.clone();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let coordinator = h.coordinator.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { coordinator.confirm_proposal(&token).await }));
    }
    let mut confirmations = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(c) => confirmations.push(c),
            Err(e) => assert!(matches!(e, BridgeError::InvalidOrExpiredToken)),
        }
    }
    assert_eq!(confirmations.len(), 1);

    let demand = h
        .coordinator
        .store()
        .get_demand(intake.demand.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(demand.status, DemandStatus::Fulfilled);
    assert!(demand.fulfilled_at.is_some());

    // Fulfilled demands are not rechecked.
    assert_eq!(h.coordinator.recheck_unfulfilled().await.unwrap().demands, 0);
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let h = harness();
    let hospital = hospital(&h).await;
    active_donor(&h, BloodType::AbNeg, POSTAL).await;

    let intake = h
        .coordinator
        .create_demand_unit(hospital.id, "ward 7", BloodType::AbPos, 1)
        .await
        .unwrap();
    assert_eq!(intake.proposals.len(), 1);
    let proposal = intake.proposals[0].clone();

    h.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let err = h.coordinator.confirm_proposal(&proposal.token).await.unwrap_err();
    assert!(matches!(err, BridgeError::InvalidOrExpiredToken));

    let expired = h.coordinator.expire_stale_proposals().await.unwrap();
    assert_eq!(expired, vec![proposal.id]);
    let stored = h.coordinator.proposals_for_demand(intake.demand.id).await.unwrap();
    assert_eq!(stored[0].status, ProposalStatus::Expired);
}

#[tokio::test]
async fn completed_appointment_starts_rest_period() {
    let h = harness();
    let hospital = hospital(&h).await;
    let donor = active_donor(&h, BloodType::OPos, POSTAL).await;

    let intake = h
        .coordinator
        .create_demand_unit(hospital.id, "ward 2", BloodType::OPos, 2)
        .await
        .unwrap();
    let token = intake.proposals[0].token.clone();
    let confirmation = h.coordinator.confirm_proposal(&token).await.unwrap();
    h.coordinator
        .update_appointment_status(confirmation.appointment.id, "COMPLETED")
        .await
        .unwrap();

    // Past the ping cooldown, still inside the rest period.
    h.clock.advance(Duration::days(20));
    let again = h
        .coordinator
        .create_demand_unit(hospital.id, "ward 3", BloodType::OPos, 1)
        .await
        .unwrap();
    assert!(again.proposals.is_empty());

    let donor = h.coordinator.store().get_donor(donor.id).await.unwrap().unwrap();
    assert!(donor.last_donation_at.is_some());
}

#[tokio::test]
async fn dashboard_tracks_demand_through_confirmation() {
    let h = harness();
    let hospital = hospital(&h).await;
    active_donor(&h, BloodType::OPos, POSTAL).await;
    let ledger = h.coordinator.create_ledger(hospital.id).await.unwrap();
    h.coordinator
        .add_items(
            ledger.id,
            vec![
                ItemDraft::blood(BloodType::APos, 2, h.clock.now() + Duration::days(10)),
                ItemDraft::organ(OrganType::Liver, 1, h.clock.now() + Duration::days(1)),
            ],
        )
        .await
        .unwrap();

    let intake = h
        .coordinator
        .create_demand_unit(hospital.id, "ward 9", BloodType::OPos, 3)
        .await
        .unwrap();
    assert_eq!(intake.proposals.len(), 1);

    let overview = h.coordinator.hospital_overview(hospital.id).await.unwrap();
    assert_eq!(
        overview,
        HospitalOverview {
            pending_units: 3,
            available_units: 2,
            urgency_ratio: 1.5,
            pending_matches: 1,
        }
    );

    let started = h.clock.now();
    h.coordinator.confirm_proposal(&intake.proposals[0].token).await.unwrap();
    let overview = h.coordinator.hospital_overview(hospital.id).await.unwrap();
    assert_eq!(overview.pending_matches, 0);

    let funnel = h
        .coordinator
        .match_funnel(hospital.id, CreatedRange::default())
        .await
        .unwrap();
    assert_eq!(funnel.proposals_in(ProposalStatus::Confirmed), 1);
    assert_eq!(funnel.appointments.get("SCHEDULED"), Some(&1));

    let later = CreatedRange {
        from: Some(started + Duration::hours(1)),
        to: None,
    };
    let funnel = h.coordinator.match_funnel(hospital.id, later).await.unwrap();
    assert!(funnel.proposals.is_empty());
    assert!(funnel.appointments.is_empty());

    let err = h
        .coordinator
        .hospital_overview(bloodbridge::types::HospitalId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
