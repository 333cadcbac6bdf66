//! Persistence collaborator contract for the deals REST API.
//!
//! # Responsibility
//! - Describe the two calls the engine needs: list deals and persist a patch.
//! - Provide wire helpers so transports share one JSON shape.
//!
//! # Invariants
//! - Transports never mutate the local store; the synchronizer does.
//! - Patches sent upstream already satisfy every stage invariant.

use crate::model::deal::{Deal, DealId};
use crate::model::stage::Stage;
use crate::pipeline::transition::DealPatch;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Backend failure surfaced verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceError {
    /// HTTP status when the server answered; `None` for transport failures.
    pub status: Option<u16>,
    pub message: String,
}

impl PersistenceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "backend returned {status}: {}", self.message),
            None => write!(f, "backend unreachable: {}", self.message),
        }
    }
}

impl Error for PersistenceError {}

/// Query parameters for `GET /deals`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

/// Deals backend as seen by the engine.
pub trait DealBackend {
    /// `GET /deals`.
    fn fetch_deals(&self, query: &DealQuery) -> PersistenceResult<Vec<Deal>>;
    /// `PUT /deals/:id` with a stage-change patch; returns the persisted deal.
    fn put_deal(&self, patch: &DealPatch) -> PersistenceResult<Deal>;
}

impl<B: DealBackend + ?Sized> DealBackend for &B {
    fn fetch_deals(&self, query: &DealQuery) -> PersistenceResult<Vec<Deal>> {
        (**self).fetch_deals(query)
    }

    fn put_deal(&self, patch: &DealPatch) -> PersistenceResult<Deal> {
        (**self).put_deal(patch)
    }
}

/// Collection path for listing deals.
pub const DEALS_PATH: &str = "/deals";

/// Resource path for one deal.
pub fn deal_path(id: DealId) -> String {
    format!("{DEALS_PATH}/{id}")
}

/// Decodes a `GET /deals` response body.
///
/// Invalid records fail the whole decode instead of being skipped.
pub fn decode_deal_list(body: &str) -> PersistenceResult<Vec<Deal>> {
    serde_json::from_str(body)
        .map_err(|err| PersistenceError::transport(format!("invalid deal list payload: {err}")))
}

/// Decodes a `PUT /deals/:id` response body.
pub fn decode_deal(body: &str) -> PersistenceResult<Deal> {
    serde_json::from_str(body)
        .map_err(|err| PersistenceError::transport(format!("invalid deal payload: {err}")))
}

/// Encodes a patch as a `PUT /deals/:id` request body.
pub fn encode_patch(patch: &DealPatch) -> PersistenceResult<String> {
    serde_json::to_string(patch)
        .map_err(|err| PersistenceError::transport(format!("failed to encode patch: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{deal_path, decode_deal_list, encode_patch, PersistenceError};
    use crate::model::stage::Stage;
    use crate::pipeline::transition::DealPatch;
    use uuid::Uuid;

    #[test]
    fn deal_path_embeds_id() {
        let id = Uuid::parse_str("11111111-2222-4333-8444-555555555555").unwrap();
        assert_eq!(deal_path(id), "/deals/11111111-2222-4333-8444-555555555555");
    }

    #[test]
    fn decode_rejects_lost_deal_without_reason() {
        let body = r#"[{
            "id": "11111111-2222-4333-8444-555555555555",
            "stage": "closed-lost",
            "probability": 0,
            "value": 100,
            "expectedCloseDate": "2030-01-01",
            "actualCloseDate": "2030-01-02T10:00:00Z",
            "customer": "Acme"
        }]"#;
        let err = decode_deal_list(body).unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.message.contains("lost reason"), "unexpected: {err}");
    }

    #[test]
    fn encode_patch_uses_camel_case_and_nulls() {
        let patch = DealPatch {
            deal_id: Uuid::parse_str("11111111-2222-4333-8444-555555555555").unwrap(),
            from_stage: Stage::Prospecting,
            stage: Stage::Qualification,
            probability: 25,
            probability_overridden: false,
            actual_close_date: None,
            lost_reason: None,
        };
        let body: serde_json::Value =
            serde_json::from_str(&encode_patch(&patch).unwrap()).unwrap();
        assert_eq!(body["stage"], "qualification");
        assert_eq!(body["fromStage"], "prospecting");
        assert_eq!(body["probability"], 25);
        assert!(body["actualCloseDate"].is_null());
        assert!(body["lostReason"].is_null());
    }

    #[test]
    fn display_distinguishes_http_and_transport() {
        assert_eq!(
            PersistenceError::http(409, "conflict").to_string(),
            "backend returned 409: conflict"
        );
        assert_eq!(
            PersistenceError::transport("timeout").to_string(),
            "backend unreachable: timeout"
        );
    }
}
