//! FHIR-aligned data-sharing consent.
//!
//! A consent states one permission for one content class with one organization from
//! its provision period start onward. Records are immutable: a change of mind is a new
//! record with a later period start.

use crate::codes::{CONSENT_CATEGORY_PATIENT_CONSENT, CONSENT_SCOPE_PATIENT_PRIVACY};
use crate::datatypes::{CodeableConcept, Coding, Period, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionType {
    Permit,
    Deny,
}

impl ProvisionType {
    pub fn from_permit(permit: bool) -> Self {
        if permit {
            Self::Permit
        } else {
            Self::Deny
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provision {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub provision_type: Option<ProvisionType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class: Vec<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organization: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision: Option<Provision>,
}

impl Consent {
    /// A new active patient-privacy consent whose provision starts at `now`.
    pub fn make(
        patient: Reference,
        organization: Reference,
        content_class: Coding,
        permission: ProvisionType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            status: Some("active".into()),
            scope: Some(CONSENT_SCOPE_PATIENT_PRIVACY.concept()),
            category: vec![CONSENT_CATEGORY_PATIENT_CONSENT.concept()],
            patient: Some(patient),
            date_time: None,
            organization: vec![organization],
            provision: Some(Provision {
                provision_type: Some(permission),
                class: vec![content_class],
                period: Some(Period::starting(now)),
            }),
        }
    }

    /// The first organization's literal reference.
    pub fn organization_reference(&self) -> Option<&str> {
        self.organization
            .first()
            .and_then(|r| r.reference.as_deref())
    }

    pub fn content_class(&self) -> Option<&Coding> {
        self.provision.as_ref().and_then(|p| p.class.first())
    }

    pub fn permission(&self) -> Option<ProvisionType> {
        self.provision.as_ref().and_then(|p| p.provision_type)
    }

    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.provision
            .as_ref()
            .and_then(|p| p.period)
            .and_then(|p| p.start)
    }

    /// Whether this consent names `organization` and a class with the same code as `class`.
    pub fn covers(&self, organization: &str, class: &Coding) -> bool {
        self.organization.iter().any(|o| o.as_str() == organization)
            && self
                .provision
                .as_ref()
                .is_some_and(|p| p.class.iter().any(|c| c.same_code(class)))
    }
}
