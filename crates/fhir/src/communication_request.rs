//! FHIR-aligned outbound message intent.
//!
//! Requests are status-transitioned, never deleted, once persisted.

use crate::codes::{MANUALLY_SENT_MESSAGE, SCHEDULED_MESSAGE};
use crate::datatypes::{Annotation, CodeableConcept, Payload, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Draft,
    #[default]
    Active,
    OnHold,
    Revoked,
    Completed,
    EnteredInError,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub status: RequestStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_date_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Payload>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipient: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medium: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,
}

impl CommunicationRequest {
    /// `CommunicationRequest/<id>`, or `None` while unsaved.
    pub fn reference(&self) -> Option<Reference> {
        self.id
            .as_deref()
            .map(|id| Reference::to("CommunicationRequest", id))
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn text(&self) -> &str {
        self.payload
            .first()
            .and_then(|p| p.content_string.as_deref())
            .unwrap_or_default()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.payload = vec![Payload::text(text)];
    }

    pub fn display_note(&self) -> String {
        self.note
            .iter()
            .map(|n| n.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn set_note(&mut self, text: impl Into<String>) {
        self.note = vec![Annotation {
            text: text.into(),
            time: None,
        }];
    }

    fn first_category_matches(&self, code: &crate::codes::KnownCode) -> bool {
        self.category
            .first()
            .and_then(CodeableConcept::first_coding)
            .is_some_and(|c| code.matches(c))
    }

    pub fn is_scheduled_message(&self) -> bool {
        self.first_category_matches(&SCHEDULED_MESSAGE)
    }

    pub fn is_manual_message(&self) -> bool {
        self.first_category_matches(&MANUALLY_SENT_MESSAGE)
    }
}
