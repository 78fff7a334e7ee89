//! Wire payloads for the patient-records REST API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use hc_domain::types::{Slot, SlotMap, ValidationErrors};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Create payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body of `POST /patients/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub national_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl NewPatient {
    /// Assemble a create payload from accumulated slots.
    ///
    /// Returns `Err` with a validation-error map when a mandatory slot is
    /// absent or an optional slot fails local validation; the caller
    /// reflects those straight back into slot-filling.
    pub fn from_slots(slots: &SlotMap) -> Result<NewPatient, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let mandatory = |slot: Slot, errors: &mut ValidationErrors| -> String {
            match slots.get(&slot) {
                Some(v) => v.clone(),
                None => {
                    errors
                        .entry(slot.as_str().to_owned())
                        .or_default()
                        .push("required".into());
                    String::new()
                }
            }
        };

        let first_name = mandatory(Slot::FirstName, &mut errors);
        let last_name = mandatory(Slot::LastName, &mut errors);
        let national_id = mandatory(Slot::NationalId, &mut errors);

        let date_of_birth = match slots.get(&Slot::DateOfBirth) {
            Some(raw) => match raw.parse::<NaiveDate>() {
                Ok(d) => Some(d),
                Err(_) => {
                    errors
                        .entry(Slot::DateOfBirth.as_str().to_owned())
                        .or_default()
                        .push("not a valid ISO date".into());
                    None
                }
            },
            None => None,
        };

        if let Some(contact) = slots.get(&Slot::Contact) {
            if contact.len() > 25 {
                errors
                    .entry(Slot::Contact.as_str().to_owned())
                    .or_default()
                    .push("must be at most 25 characters".into());
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(NewPatient {
            first_name,
            last_name,
            national_id,
            contact: slots.get(&Slot::Contact).cloned(),
            date_of_birth,
            details: slots.get(&Slot::Details).cloned(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation error body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a backend 400 body of shape `{field: [messages]}`. Bodies that
/// do not match produce a single-entry map so the user still sees
/// something actionable.
pub fn parse_validation_body(body: &str) -> ValidationErrors {
    if let Ok(map) = serde_json::from_str::<ValidationErrors>(body) {
        if !map.is_empty() {
            return map;
        }
    }
    let mut fallback = ValidationErrors::new();
    fallback.insert(
        "non_field_errors".into(),
        vec!["the backend rejected the request".into()],
    );
    fallback
}
