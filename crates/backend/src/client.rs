//! REST tool client for the patient-records backend.
//!
//! Every typed operation returns a [`ToolResult`] sum: validation
//! failures, not-found, conflicts, and exhausted transport errors are
//! payloads, not exceptions. Retry is method-aware:
//!
//! * idempotent calls (GET, PUT, DELETE) retry on transport failure and
//!   on 502/503/504,
//! * POST retries only on transport failures that happened before any
//!   response bytes were received (no duplicate-create risk),
//! * at most 2 retries per call, backoff 0.5s then 1.0s, per-attempt
//!   deadline 5s, 15s total including retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use hc_domain::config::Config;
use hc_domain::log::{LogCategory, LogRecord};
use hc_domain::metrics::{Metrics, ToolOutcomeClass};
use hc_domain::types::{Patient, ScanRecord, Slot, SlotMap, ToolResult};
use hc_domain::{Error, Result};

use crate::types::{parse_validation_body, NewPatient};

const MAX_RETRIES: u32 = 2;
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(15);
const BACKOFF: [Duration; 2] = [Duration::from_millis(500), Duration::from_millis(1000)];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The seam between the conversation graph and the REST backend.
/// Tests substitute in-process stubs; production wires
/// [`RestPatientBackend`].
#[async_trait]
pub trait PatientBackend: Send + Sync {
    async fn create_patient(&self, new: &NewPatient) -> ToolResult<Patient>;
    async fn list_patients(&self) -> ToolResult<Vec<Patient>>;
    async fn get_patient(&self, id: i64) -> ToolResult<Patient>;
    async fn update_patient(&self, id: i64, fields: &SlotMap) -> ToolResult<Patient>;
    async fn delete_patient(&self, id: i64) -> ToolResult<()>;
    async fn list_scans(
        &self,
        patient_id: Option<i64>,
        limit: Option<usize>,
    ) -> ToolResult<Vec<ScanRecord>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    fn is_idempotent(&self) -> bool {
        !matches!(self, Verb::Post)
    }
}

/// Status-based retry: only the gateway-flavored 5xx codes, and only for
/// idempotent verbs.
fn retry_on_status(verb: Verb, status: StatusCode) -> bool {
    verb.is_idempotent()
        && matches!(status.as_u16(), 502 | 503 | 504)
}

/// Transport-error retry. For POST, only failures that provably happened
/// before the request reached the server (connect/DNS) are safe.
fn retry_on_transport(verb: Verb, err: &reqwest::Error) -> bool {
    if verb.is_idempotent() {
        return true;
    }
    err.is_connect()
}

/// Intermediate outcome of the retry loop, before payload decoding.
enum SendOutcome {
    Response(reqwest::Response),
    ValidationFailed(BTreeMap<String, Vec<String>>),
    NotFound,
    Conflict,
    Unauthorized,
    Transport { retryable: bool },
    Server { status: u16 },
}

impl SendOutcome {
    fn class(&self) -> ToolOutcomeClass {
        match self {
            SendOutcome::Response(_) => ToolOutcomeClass::Success,
            SendOutcome::ValidationFailed(_)
            | SendOutcome::NotFound
            | SendOutcome::Conflict
            | SendOutcome::Unauthorized => ToolOutcomeClass::Status4xx,
            SendOutcome::Transport { .. } => ToolOutcomeClass::Transport,
            SendOutcome::Server { .. } => ToolOutcomeClass::Status5xx,
        }
    }

    fn into_tool_result<T>(self) -> ToolResult<T> {
        match self {
            SendOutcome::Response(_) => unreachable!("responses are decoded by the caller"),
            SendOutcome::ValidationFailed(map) => ToolResult::ValidationFailed(map),
            SendOutcome::NotFound => ToolResult::NotFound,
            SendOutcome::Conflict => ToolResult::Conflict,
            SendOutcome::Unauthorized => ToolResult::Unauthorized,
            SendOutcome::Transport { retryable } => ToolResult::TransportError { retryable },
            SendOutcome::Server { status } => ToolResult::ServerError { status },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REST client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Created once at bootstrap and shared; the underlying `reqwest::Client`
/// maintains a connection pool.
pub struct RestPatientBackend {
    http: Client,
    base_url: String,
    bearer: Option<String>,
    metrics: Arc<Metrics>,
}

impl RestPatientBackend {
    pub fn new(cfg: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        let http = Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.backend_base_url.trim_end_matches('/').to_owned(),
            bearer: cfg.backend_bearer_token.clone(),
            metrics,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The bearer token is injected here and nowhere else; it never
    /// appears in a log record.
    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.bearer {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Retry loop shared by every operation. Classifies the final
    /// attempt, records metrics, and emits one `tool` log line.
    async fn send_with_retry(
        &self,
        method: &'static str,
        verb: Verb,
        build: impl Fn() -> RequestBuilder,
    ) -> SendOutcome {
        let started = Instant::now();
        let mut retries_used: u64 = 0;
        let mut outcome;

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let backoff = BACKOFF[(attempt - 1) as usize % BACKOFF.len()];
                if started.elapsed() + backoff >= TOTAL_TIMEOUT {
                    outcome = SendOutcome::Transport { retryable: true };
                    break;
                }
                tokio::time::sleep(backoff).await;
                retries_used += 1;
            }

            let result = self.decorate(build()).send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        outcome = SendOutcome::Response(resp);
                        break;
                    }
                    if retry_on_status(verb, status) && attempt < MAX_RETRIES {
                        attempt += 1;
                        continue;
                    }
                    outcome = match status {
                        StatusCode::BAD_REQUEST => {
                            let body = resp.text().await.unwrap_or_default();
                            SendOutcome::ValidationFailed(parse_validation_body(&body))
                        }
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            SendOutcome::Unauthorized
                        }
                        StatusCode::NOT_FOUND => SendOutcome::NotFound,
                        StatusCode::CONFLICT => SendOutcome::Conflict,
                        s => SendOutcome::Server { status: s.as_u16() },
                    };
                    break;
                }
                Err(e) => {
                    if retry_on_transport(verb, &e) && attempt < MAX_RETRIES {
                        attempt += 1;
                        continue;
                    }
                    outcome = SendOutcome::Transport {
                        retryable: retry_on_transport(verb, &e),
                    };
                    break;
                }
            }
        }

        let wall = started.elapsed();
        self.metrics
            .record_tool_call(method, outcome.class(), retries_used, wall);

        LogRecord::new(
            LogCategory::Tool,
            format!("{method} finished in {}ms", wall.as_millis()),
        )
        .extra(serde_json::json!({
            "retries": retries_used,
            "class": match outcome.class() {
                ToolOutcomeClass::Success => "success",
                ToolOutcomeClass::Status4xx => "4xx",
                ToolOutcomeClass::Status5xx => "5xx",
                ToolOutcomeClass::Transport => "transport",
            },
        }))
        .emit();

        outcome
    }

    /// Decode a successful response body, degrading decode failures to a
    /// non-retryable transport error.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> ToolResult<T> {
        match resp.json::<T>().await {
            Ok(v) => ToolResult::Ok(v),
            Err(_) => ToolResult::TransportError { retryable: false },
        }
    }

    /// Overlay caller-supplied fields on a fetched record for the
    /// GET-merge-PUT update. Invalid values are reported as validation
    /// errors without a round-trip.
    fn merge_fields(
        current: &Patient,
        fields: &SlotMap,
    ) -> std::result::Result<Patient, BTreeMap<String, Vec<String>>> {
        let mut merged = current.clone();
        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (slot, value) in fields {
            match slot {
                Slot::FirstName => merged.first_name = value.clone(),
                Slot::LastName => merged.last_name = value.clone(),
                Slot::NationalId => merged.national_id = value.clone(),
                Slot::Contact => {
                    if value.len() > 25 {
                        errors
                            .entry("contact".into())
                            .or_default()
                            .push("must be at most 25 characters".into());
                    } else {
                        merged.contact = Some(value.clone());
                    }
                }
                Slot::DateOfBirth => match value.parse() {
                    Ok(d) => merged.date_of_birth = Some(d),
                    Err(_) => errors
                        .entry("date_of_birth".into())
                        .or_default()
                        .push("not a valid ISO date".into()),
                },
                Slot::Details => merged.details = Some(value.clone()),
                Slot::PatientId => {} // identity, not a writable field
            }
        }

        if errors.is_empty() {
            Ok(merged)
        } else {
            Err(errors)
        }
    }
}

#[async_trait]
impl PatientBackend for RestPatientBackend {
    async fn create_patient(&self, new: &NewPatient) -> ToolResult<Patient> {
        let url = self.url("/patients/");
        match self
            .send_with_retry("create_patient", Verb::Post, || {
                self.http.post(&url).json(new)
            })
            .await
        {
            SendOutcome::Response(resp) => Self::decode(resp).await,
            other => other.into_tool_result(),
        }
    }

    async fn list_patients(&self) -> ToolResult<Vec<Patient>> {
        let url = self.url("/patients/");
        match self
            .send_with_retry("list_patients", Verb::Get, || self.http.get(&url))
            .await
        {
            SendOutcome::Response(resp) => Self::decode(resp).await,
            other => other.into_tool_result(),
        }
    }

    async fn get_patient(&self, id: i64) -> ToolResult<Patient> {
        let url = self.url(&format!("/patients/{id}/"));
        match self
            .send_with_retry("get_patient", Verb::Get, || self.http.get(&url))
            .await
        {
            SendOutcome::Response(resp) => Self::decode(resp).await,
            other => other.into_tool_result(),
        }
    }

    async fn update_patient(&self, id: i64, fields: &SlotMap) -> ToolResult<Patient> {
        // GET-merge-PUT: fetch the current record, overlay the supplied
        // fields, write the merged body back.
        let current = match self.get_patient(id).await {
            ToolResult::Ok(p) => p,
            failure => return failure,
        };

        let merged = match Self::merge_fields(&current, fields) {
            Ok(m) => m,
            Err(errors) => return ToolResult::ValidationFailed(errors),
        };

        let url = self.url(&format!("/patients/{id}/"));
        match self
            .send_with_retry("update_patient", Verb::Put, || {
                self.http.put(&url).json(&merged)
            })
            .await
        {
            SendOutcome::Response(resp) => Self::decode(resp).await,
            other => other.into_tool_result(),
        }
    }

    async fn delete_patient(&self, id: i64) -> ToolResult<()> {
        let url = self.url(&format!("/patients/{id}/"));
        match self
            .send_with_retry("delete_patient", Verb::Delete, || self.http.delete(&url))
            .await
        {
            SendOutcome::Response(_) => ToolResult::Ok(()),
            other => other.into_tool_result(),
        }
    }

    async fn list_scans(
        &self,
        patient_id: Option<i64>,
        limit: Option<usize>,
    ) -> ToolResult<Vec<ScanRecord>> {
        let url = self.url("/scans/");
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(id) = patient_id {
            query.push(("patient", id.to_string()));
        }
        if let Some(n) = limit {
            query.push(("limit", n.to_string()));
        }
        match self
            .send_with_retry("list_scans", Verb::Get, || {
                self.http.get(&url).query(&query)
            })
            .await
        {
            SendOutcome::Response(resp) => Self::decode(resp).await,
            other => other.into_tool_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_verbs_retry_gateway_statuses() {
        for verb in [Verb::Get, Verb::Put, Verb::Delete] {
            assert!(retry_on_status(verb, StatusCode::BAD_GATEWAY));
            assert!(retry_on_status(verb, StatusCode::SERVICE_UNAVAILABLE));
            assert!(retry_on_status(verb, StatusCode::GATEWAY_TIMEOUT));
            assert!(!retry_on_status(verb, StatusCode::INTERNAL_SERVER_ERROR));
            assert!(!retry_on_status(verb, StatusCode::BAD_REQUEST));
        }
    }

    #[test]
    fn post_never_retries_on_status() {
        assert!(!retry_on_status(Verb::Post, StatusCode::BAD_GATEWAY));
        assert!(!retry_on_status(Verb::Post, StatusCode::SERVICE_UNAVAILABLE));
        assert!(!retry_on_status(Verb::Post, StatusCode::GATEWAY_TIMEOUT));
    }

    #[test]
    fn merge_overlays_only_supplied_fields() {
        let current = Patient {
            id: 42,
            first_name: "Jane".into(),
            last_name: "Tan".into(),
            national_id: "S1234567A".into(),
            contact: Some("81234567".into()),
            date_of_birth: None,
            details: Some("left wrist".into()),
        };
        let mut fields = SlotMap::new();
        fields.insert(Slot::Contact, "91234567".into());
        fields.insert(Slot::DateOfBirth, "1985-12-24".into());

        let merged = RestPatientBackend::merge_fields(&current, &fields).unwrap();
        assert_eq!(merged.first_name, "Jane");
        assert_eq!(merged.contact.as_deref(), Some("91234567"));
        assert_eq!(
            merged.date_of_birth,
            Some(chrono::NaiveDate::from_ymd_opt(1985, 12, 24).unwrap())
        );
        assert_eq!(merged.details.as_deref(), Some("left wrist"));
    }

    #[test]
    fn merge_rejects_invalid_values_locally() {
        let current = Patient {
            id: 1,
            first_name: "A".into(),
            last_name: "B".into(),
            national_id: "S1234567A".into(),
            contact: None,
            date_of_birth: None,
            details: None,
        };
        let mut fields = SlotMap::new();
        fields.insert(Slot::DateOfBirth, "not-a-date".into());
        fields.insert(Slot::Contact, "0123456789012345678901234567890".into());

        let errors = RestPatientBackend::merge_fields(&current, &fields).unwrap_err();
        assert!(errors.contains_key("date_of_birth"));
        assert!(errors.contains_key("contact"));
    }

    #[test]
    fn merge_ignores_patient_id_slot() {
        let current = Patient {
            id: 7,
            first_name: "A".into(),
            last_name: "B".into(),
            national_id: "S1234567A".into(),
            contact: None,
            date_of_birth: None,
            details: None,
        };
        let mut fields = SlotMap::new();
        fields.insert(Slot::PatientId, "999".into());
        let merged = RestPatientBackend::merge_fields(&current, &fields).unwrap();
        assert_eq!(merged.id, 7);
    }
}
