use chrono::NaiveDate;
use dealflow_core::{
    aggregate, decode_deal_list, Deal, DealDraft, DealValidationError, Stage, MAX_DEAL_VALUE,
};
use rust_decimal::Decimal;
use uuid::Uuid;

fn draft() -> DealDraft {
    let mut draft = DealDraft::new(
        "  Business fiber 500M  ",
        Decimal::from(50_000),
        NaiveDate::from_ymd_opt(2031, 2, 28).unwrap(),
    );
    draft.customer = Some("Northwind Hosting".to_string());
    draft.assigned_to = Some("user-42".to_string());
    draft.tags = vec!["Fiber".to_string(), "enterprise".to_string(), "fiber".to_string()];
    draft
}

#[test]
fn with_id_rejects_nil_id() {
    let err = Deal::with_id(Uuid::nil(), draft()).unwrap_err();
    assert_eq!(err, DealValidationError::NilId);
}

#[test]
fn new_deal_trims_title_and_normalizes_tags() {
    let deal = Deal::new(draft()).unwrap();
    assert_eq!(deal.title, "Business fiber 500M");
    assert_eq!(deal.tags, vec!["enterprise".to_string(), "fiber".to_string()]);
    assert_eq!(deal.assigned_to.as_deref(), Some("user-42"));
}

#[test]
fn expected_close_in_past_is_rejected_at_creation_check() {
    let deal = Deal::new(draft()).unwrap();
    let today = NaiveDate::from_ymd_opt(2031, 3, 1).unwrap();
    let err = deal.ensure_expected_close_not_past(today).unwrap_err();
    assert_eq!(
        err,
        DealValidationError::ExpectedCloseInPast {
            expected: NaiveDate::from_ymd_opt(2031, 2, 28).unwrap(),
            today,
        }
    );
    assert!(deal
        .ensure_expected_close_not_past(NaiveDate::from_ymd_opt(2031, 2, 28).unwrap())
        .is_ok());
}

#[test]
fn serialization_uses_api_field_names() {
    let id = Uuid::parse_str("11111111-2222-4333-8444-555555555555").unwrap();
    let deal = Deal::with_id(id, draft()).unwrap();

    let json = serde_json::to_value(&deal).unwrap();
    assert_eq!(json["id"], id.to_string());
    assert_eq!(json["stage"], "prospecting");
    assert_eq!(json["probability"], 10);
    assert_eq!(json["expectedCloseDate"], "2031-02-28");
    assert!(json["actualCloseDate"].is_null());
    assert!(json["lostReason"].is_null());
    assert_eq!(json["customer"], "Northwind Hosting");
    assert_eq!(json["assignedTo"], "user-42");
    assert_eq!(json["probabilityOverridden"], false);

    let decoded: Deal = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, deal);
}

#[test]
fn decode_tolerates_missing_optional_fields() {
    let value = serde_json::json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "proposal",
        "probability": 50,
        "value": 1200,
        "expectedCloseDate": "2031-01-01"
    });

    let deal: Deal = serde_json::from_value(value).unwrap();
    assert_eq!(deal.stage, Stage::Proposal);
    assert_eq!(deal.value, Decimal::from(1200));
    assert!(deal.tags.is_empty());
    assert!(!deal.probability_overridden);
    assert_eq!(deal.actual_close_date, None);
}

#[test]
fn decode_rejects_probability_drift_without_override() {
    let value = serde_json::json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "negotiation",
        "probability": 60,
        "value": 10,
        "expectedCloseDate": "2031-01-01"
    });

    let err = serde_json::from_value::<Deal>(value).unwrap_err();
    assert!(
        err.to_string()
            .contains("probability 60 does not match 75 required for stage `negotiation`"),
        "unexpected error: {err}"
    );
}

#[test]
fn decode_accepts_recorded_probability_override() {
    let value = serde_json::json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "negotiation",
        "probability": 60,
        "probabilityOverridden": true,
        "value": 10,
        "expectedCloseDate": "2031-01-01"
    });

    let deal: Deal = serde_json::from_value(value).unwrap();
    assert_eq!(deal.probability, 60);
}

#[test]
fn decode_rejects_unknown_stage_and_open_close_date() {
    let unknown = serde_json::json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "won",
        "probability": 100,
        "value": 10,
        "expectedCloseDate": "2031-01-01"
    });
    assert!(serde_json::from_value::<Deal>(unknown).is_err());

    let open_with_date = serde_json::json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "qualification",
        "probability": 25,
        "value": 10,
        "expectedCloseDate": "2031-01-01",
        "actualCloseDate": "2030-12-01T00:00:00Z"
    });
    let err = serde_json::from_value::<Deal>(open_with_date).unwrap_err();
    assert!(err.to_string().contains("must not carry an actual close date"));
}

#[test]
fn won_deal_requires_full_probability() {
    let value = serde_json::json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "closed-won",
        "probability": 90,
        "probabilityOverridden": true,
        "value": 10,
        "expectedCloseDate": "2031-01-01",
        "actualCloseDate": "2030-12-01T00:00:00Z"
    });
    let err = serde_json::from_value::<Deal>(value).unwrap_err();
    assert!(err.to_string().contains("required for stage `closed-won`"));
}

#[test]
fn decode_rejects_values_beyond_limit() {
    let body = r#"[{
        "id": "11111111-2222-4333-8444-555555555555",
        "stage": "closed-won",
        "probability": 100,
        "value": 1e27,
        "expectedCloseDate": "2031-01-01",
        "actualCloseDate": "2030-12-01T00:00:00Z"
    }]"#;
    let err = decode_deal_list(body).unwrap_err();
    assert!(err.to_string().contains("deal value must be <="), "unexpected error: {err}");

    let err = Deal::new(DealDraft::new(
        "Too big",
        Decimal::from(MAX_DEAL_VALUE) + Decimal::ONE,
        NaiveDate::from_ymd_opt(2031, 1, 1).unwrap(),
    ))
    .unwrap_err();
    assert!(matches!(err, DealValidationError::ValueTooLarge(_)));
}

#[test]
fn largest_allowed_values_aggregate_without_overflow() {
    let deals: Vec<Deal> = (0..64)
        .map(|_| {
            Deal::new(DealDraft::new(
                "Backbone IRU",
                Decimal::from(MAX_DEAL_VALUE),
                NaiveDate::from_ymd_opt(2031, 1, 1).unwrap(),
            ))
            .unwrap()
        })
        .collect();

    let stats = aggregate(&deals);
    assert_eq!(stats.overall.total_count, 64);
    assert_eq!(stats.overall.total_value, Decimal::from(MAX_DEAL_VALUE) * Decimal::from(64));
    assert_eq!(stats.overall.open_value, stats.overall.total_value);
}
