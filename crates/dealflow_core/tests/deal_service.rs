use chrono::{NaiveDate, TimeZone, Utc};
use dealflow_core::{
    Deal, DealBackend, DealDraft, DealFilter, DealPatch, DealQuery, DealService, DealServiceError,
    DealValidationError, EngineConfig, MoveError, MoveState, PersistenceError, PersistenceResult,
    Stage, StoreError, TransitionError, TransitionOverrides,
};
use rust_decimal::Decimal;
use std::cell::RefCell;

/// In-memory stand-in for the deals REST API.
#[derive(Default)]
struct MemoryBackend {
    deals: RefCell<Vec<Deal>>,
    reject_puts: RefCell<bool>,
}

impl DealBackend for MemoryBackend {
    fn fetch_deals(&self, query: &DealQuery) -> PersistenceResult<Vec<Deal>> {
        Ok(self
            .deals
            .borrow()
            .iter()
            .filter(|deal| query.stage.map_or(true, |stage| deal.stage == stage))
            .cloned()
            .collect())
    }

    fn put_deal(&self, patch: &DealPatch) -> PersistenceResult<Deal> {
        if *self.reject_puts.borrow() {
            return Err(PersistenceError::http(500, "internal error"));
        }
        let mut deals = self.deals.borrow_mut();
        let slot = deals
            .iter_mut()
            .find(|deal| deal.id == patch.deal_id)
            .ok_or_else(|| PersistenceError::http(404, "deal not found"))?;
        *slot = patch.applied_to(slot);
        Ok(slot.clone())
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 10).unwrap()
}

fn seeded_backend() -> MemoryBackend {
    let backend = MemoryBackend::default();
    let mut deals = Vec::new();
    for (title, value, customer) in [
        ("Rural tower lease", 12_000, "Valley Co-op"),
        ("Dark fiber pair", 80_000, "Metro Bank"),
        ("SOHO bundle", 600, "Corner Cafe"),
    ] {
        let mut draft = DealDraft::new(
            title,
            Decimal::from(value),
            NaiveDate::from_ymd_opt(2030, 12, 1).unwrap(),
        );
        draft.customer = Some(customer.to_string());
        deals.push(Deal::new(draft).unwrap());
    }
    *backend.deals.borrow_mut() = deals;
    backend
}

#[test]
fn refresh_seeds_store_from_backend() {
    let backend = seeded_backend();
    let mut service = DealService::new(&backend, EngineConfig::default());

    assert_eq!(service.refresh(&DealQuery::default()).unwrap(), 3);
    let stats = service.stats(&DealFilter::default());
    assert_eq!(stats.overall.total_count, 3);
    assert_eq!(stats.overall.total_value, Decimal::from(92_600));
    assert_eq!(stats.stage(Stage::Prospecting).map(|row| row.count), Some(3));

    let narrowed = DealQuery {
        stage: Some(Stage::Proposal),
        ..DealQuery::default()
    };
    assert_eq!(service.refresh(&narrowed).unwrap(), 0);
}

#[test]
fn create_deal_rejects_past_close_unless_configured() {
    let backend = MemoryBackend::default();
    let mut service = DealService::new(&backend, EngineConfig::default());

    let past = DealDraft::new(
        "Backfill",
        Decimal::from(1),
        NaiveDate::from_ymd_opt(2029, 12, 31).unwrap(),
    );
    let err = service.create_deal(past.clone(), today()).unwrap_err();
    assert!(matches!(
        err,
        DealServiceError::Validation(DealValidationError::ExpectedCloseInPast { .. })
    ));
    assert!(service.deals().is_empty());

    let config = EngineConfig {
        allow_past_expected_close: true,
        ..EngineConfig::default()
    };
    let mut importer = DealService::new(&backend, config);
    let created = importer.create_deal(past, today()).unwrap();
    assert_eq!(created.stage, Stage::Prospecting);
    assert_eq!(importer.deals().len(), 1);
}

#[test]
fn full_move_cycle_commits_and_records_history() {
    let backend = seeded_backend();
    let mut service = DealService::new(&backend, EngineConfig::default());
    service.refresh(&DealQuery::default()).unwrap();
    let id = backend.deals.borrow()[1].id;
    let closed_at = Utc.with_ymd_and_hms(2030, 3, 3, 10, 0, 0).unwrap();

    service
        .move_deal_at(id, "negotiation", &TransitionOverrides::default(), closed_at)
        .unwrap();
    let committed = service
        .move_deal_at(id, "closed-won", &TransitionOverrides::confirmed(), closed_at)
        .unwrap();
    assert_eq!(committed.change.from_stage, Stage::Negotiation);

    let deal = service.deal(id).unwrap();
    assert_eq!(deal.stage, Stage::ClosedWon);
    assert_eq!(deal.probability, 100);
    assert_eq!(deal.actual_close_date, Some(closed_at));
    assert_eq!(backend.deals.borrow()[1], *deal);
    assert_eq!(service.move_state(id), MoveState::Committed);

    let stages: Vec<Stage> = service.history(id).iter().map(|c| c.to_stage).collect();
    assert_eq!(stages, vec![Stage::Negotiation, Stage::ClosedWon]);

    let stats = service.stats(&DealFilter::default());
    assert_eq!(stats.overall.won_count, 1);
    assert_eq!(stats.overall.won_value, Decimal::from(80_000));
}

#[test]
fn rejected_backend_rolls_back_and_surfaces_error() {
    let backend = seeded_backend();
    let mut service = DealService::new(&backend, EngineConfig::default());
    service.refresh(&DealQuery::default()).unwrap();
    let id = backend.deals.borrow()[0].id;
    let before = service.deal(id).unwrap().clone();
    *backend.reject_puts.borrow_mut() = true;

    let err = service
        .move_deal(id, "closed-lost", &TransitionOverrides::lost("coverage gap"))
        .unwrap_err();
    match err {
        DealServiceError::Move(MoveError::PersistenceFailure(inner)) => {
            assert_eq!(inner.status, Some(500));
            assert_eq!(inner.message, "internal error");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(service.deal(id).unwrap(), &before);
    assert!(service.history(id).is_empty());
}

#[test]
fn async_move_blocks_edits_until_resolved() {
    let backend = seeded_backend();
    let mut service = DealService::new(&backend, EngineConfig::default());
    service.refresh(&DealQuery::default()).unwrap();
    let id = backend.deals.borrow()[2].id;
    let now = Utc.with_ymd_and_hms(2030, 2, 1, 9, 0, 0).unwrap();

    let pending = service
        .begin_move(id, "proposal", &TransitionOverrides::default(), now)
        .unwrap();
    assert_eq!(service.move_state(id), MoveState::Pending);

    let err = service.set_probability(id, 80).unwrap_err();
    assert!(matches!(
        err,
        DealServiceError::Store(StoreError::SnapshotPending(pending_id)) if pending_id == id
    ));
    let err = service
        .begin_move(id, "negotiation", &TransitionOverrides::default(), now)
        .unwrap_err();
    assert!(matches!(
        err,
        DealServiceError::Move(MoveError::MoveInProgress(_))
    ));

    let persisted = backend.put_deal(&pending.patch).unwrap();
    service.resolve_move(pending.ticket, Ok(persisted)).unwrap();

    let updated = service.set_probability(id, 80).unwrap();
    assert_eq!(updated.probability, 80);
    assert!(updated.probability_overridden);
}

#[test]
fn probability_override_is_replaced_by_next_stage_default() {
    let backend = seeded_backend();
    let mut service = DealService::new(&backend, EngineConfig::default());
    service.refresh(&DealQuery::default()).unwrap();
    let id = backend.deals.borrow()[0].id;

    service.set_probability(id, 33).unwrap();
    // Backend mirrors the slider edit so the commit echo matches.
    backend.deals.borrow_mut()[0] = service.deal(id).unwrap().clone();

    service
        .move_deal(id, "qualification", &TransitionOverrides::default())
        .unwrap();
    let deal = service.deal(id).unwrap();
    assert_eq!(deal.probability, 25);
    assert!(!deal.probability_overridden);

    let err = service
        .move_deal(id, "closed-won", &TransitionOverrides::default())
        .unwrap_err();
    assert!(matches!(
        err,
        DealServiceError::Move(MoveError::Rejected(TransitionError::ConfirmationRequired(
            Stage::ClosedWon
        )))
    ));
}

#[test]
fn detail_edits_keep_stage_fields_and_feed_search() {
    let backend = seeded_backend();
    let mut service = DealService::new(&backend, EngineConfig::default());
    service.refresh(&DealQuery::default()).unwrap();
    let id = backend.deals.borrow()[2].id;

    let mut edited = service.deal(id).unwrap().clone();
    edited.notes = Some("Wants static IPv4 block".to_string());
    edited.value = Decimal::from(750);
    service.update_details(edited).unwrap();

    let stats = service.stats(&DealFilter::search("ipv4"));
    assert_eq!(stats.overall.total_count, 1);
    assert_eq!(stats.overall.total_value, Decimal::from(750));

    let board = service.board(&DealFilter::search("ipv4"));
    assert_eq!(board[0].deals.len(), 1);
    assert!(board[1..].iter().all(|column| column.deals.is_empty()));

    let mut negative = service.deal(id).unwrap().clone();
    negative.value = Decimal::from(-5);
    let err = service.update_details(negative).unwrap_err();
    assert!(matches!(
        err,
        DealServiceError::Validation(DealValidationError::NegativeValue(_))
    ));
}
