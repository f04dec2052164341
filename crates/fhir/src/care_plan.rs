//! FHIR-aligned care plan record.
//!
//! A care plan is one patient's enrollment in a messaging program. Its activity list
//! references the scheduled CommunicationRequests and any questionnaires the plan
//! instantiates; the communication entries are a projection maintained elsewhere and
//! should not be edited by hand.

use crate::datatypes::{Annotation, Period, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CarePlanStatus {
    #[default]
    Draft,
    Active,
    OnHold,
    Revoked,
    Completed,
    EnteredInError,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlanActivityDetail {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instantiates_canonical: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One entry of the care plan's activity list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlanActivity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<CarePlanActivityDetail>,
}

impl CarePlanActivity {
    pub fn with_reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(Reference::new(reference)),
            detail: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub status: CarePlanStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instantiates_canonical: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<Annotation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity: Vec<CarePlanActivity>,
}

impl CarePlan {
    /// `CarePlan/<id>`; empty id when the record has not been persisted.
    pub fn reference(&self) -> Reference {
        Reference::to("CarePlan", self.id.as_deref().unwrap_or_default())
    }

    pub fn is_based_on(&self, template_ref: &str) -> bool {
        self.based_on.iter().any(|r| r.as_str() == template_ref)
    }

    /// Active, and the period (when present) covers `now`.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == CarePlanStatus::Active && self.period.map_or(true, |p| p.contains(now))
    }

    /// Every `Questionnaire/...` canonical instantiated by an activity.
    pub fn questionnaire_references(&self) -> Vec<&str> {
        self.activity
            .iter()
            .filter_map(|a| a.detail.as_ref())
            .flat_map(|d| d.instantiates_canonical.iter())
            .filter(|c| c.starts_with("Questionnaire"))
            .map(String::as_str)
            .collect()
    }

    pub fn note_text(&self) -> String {
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
}
