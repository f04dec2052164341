//! FHIR-aligned patient record and the ISACC-specific accessors on it.
//!
//! Notes:
//! - The record is mutable; edits are written back by the data-access collaborator.
//! - The login user id is carried as an identifier under a configured system.

use crate::codes::{EXT_PRONOUNS, EXT_STUDY_START_DATE, EXT_STUDY_STATUS};
use crate::datatypes::{
    extension_string, set_extension_string, Address, ContactPoint, ContactPointSystem,
    Extension, HumanName, Identifier, NameUse, Period, Reference,
};
use crate::{FhirError, FhirResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Participation state of a patient in the study.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StudyStatus {
    Consented,
    NotConsented,
    Withdrawn,
    Completed,
    /// Any value not known to this build, preserved verbatim.
    Other(String),
}

impl StudyStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "consented" => Self::Consented,
            "not-consented" | "not consented" => Self::NotConsented,
            "withdrawn" => Self::Withdrawn,
            "completed" => Self::Completed,
            _ => Self::Other(s.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Consented => "consented",
            Self::NotConsented => "not-consented",
            Self::Withdrawn => "withdrawn",
            Self::Completed => "completed",
            Self::Other(value) => value,
        }
    }
}

/// An emergency or family contact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<HumanName>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub telecom: Vec<ContactPoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub telecom: Vec<ContactPoint>,

    /// FHIR `date`: `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<PatientContact>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub general_practitioner: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

impl Patient {
    /// A new, unsaved patient carrying only the login identifier.
    pub fn blank(user_id_system: &str, user_id: &str) -> Self {
        let mut patient = Self {
            active: Some(true),
            ..Self::default()
        };
        patient.set_user_id(user_id_system, user_id);
        patient
    }

    /// `Patient/<id>`; empty id when the record has not been persisted.
    pub fn reference(&self) -> Reference {
        Reference::to("Patient", self.id.as_deref().unwrap_or_default())
    }

    pub fn user_id(&self, system: &str) -> Option<&str> {
        self.identifier
            .iter()
            .find(|i| i.system.as_deref() == Some(system))
            .and_then(|i| i.value.as_deref())
    }

    pub fn set_user_id(&mut self, system: &str, user_id: &str) {
        match self
            .identifier
            .iter_mut()
            .find(|i| i.system.as_deref() == Some(system))
        {
            Some(existing) => existing.value = Some(user_id.to_owned()),
            None => self.identifier.push(Identifier {
                system: Some(system.to_owned()),
                value: Some(user_id.to_owned()),
            }),
        }
    }

    pub fn sms_contact_point(&self) -> Option<&str> {
        self.telecom
            .iter()
            .find(|t| t.system == Some(ContactPointSystem::Sms))
            .and_then(|t| t.value.as_deref())
    }

    /// Sets the SMS number and restarts its validity period at `now`.
    pub fn set_sms_contact_point(&mut self, phone: &str, now: DateTime<Utc>) {
        let period = Some(Period::starting(now));
        match self
            .telecom
            .iter_mut()
            .find(|t| t.system == Some(ContactPointSystem::Sms))
        {
            Some(existing) => {
                existing.value = Some(phone.to_owned());
                existing.period = period;
            }
            None => self.telecom.push(ContactPoint {
                system: Some(ContactPointSystem::Sms),
                value: Some(phone.to_owned()),
                period,
            }),
        }
    }

    /// First given name of the `usual` name.
    pub fn preferred_name(&self) -> Option<&str> {
        self.name
            .iter()
            .find(|n| n.use_type == Some(NameUse::Usual))
            .and_then(|n| n.given.first())
            .map(String::as_str)
    }

    fn official_name(&self) -> Option<&HumanName> {
        self.name
            .iter()
            .find(|n| n.use_type == Some(NameUse::Official))
            .or_else(|| self.name.iter().find(|n| n.use_type.is_none()))
    }

    pub fn first_name(&self) -> Option<&str> {
        self.official_name()
            .and_then(|n| n.given.first())
            .map(String::as_str)
    }

    pub fn last_name(&self) -> Option<&str> {
        self.official_name().and_then(|n| n.family.as_deref())
    }

    pub fn full_name_display(&self) -> String {
        [self.first_name(), self.last_name()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The birth date as a calendar date.
    ///
    /// Partial dates (`YYYY` or `YYYY-MM`) carry no day and yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if a full date cannot be parsed.
    pub fn birth_date(&self) -> FhirResult<Option<NaiveDate>> {
        let Some(raw) = self.birth_date.as_deref() else {
            return Ok(None);
        };
        if raw.split('-').count() < 3 {
            return Ok(None);
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| FhirError::InvalidInput(format!("Invalid birthDate '{raw}': {e}")))
    }

    pub fn study_status(&self) -> Option<StudyStatus> {
        extension_string(&self.extension, EXT_STUDY_STATUS).map(StudyStatus::parse)
    }

    pub fn set_study_status(&mut self, status: StudyStatus) {
        set_extension_string(&mut self.extension, EXT_STUDY_STATUS, status.as_str().to_owned());
    }

    pub fn study_start_date(&self) -> Option<&str> {
        extension_string(&self.extension, EXT_STUDY_START_DATE)
    }

    pub fn pronouns(&self) -> Option<&str> {
        extension_string(&self.extension, EXT_PRONOUNS)
    }

    pub fn emergency_contacts(&self) -> &[PatientContact] {
        &self.contact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn blank_patient_carries_user_identifier() {
        let patient = Patient::blank("https://keycloak.example/users", "u1");
        assert_eq!(patient.user_id("https://keycloak.example/users"), Some("u1"));
        assert_eq!(patient.user_id("other"), None);
        assert_eq!(patient.active, Some(true));
    }

    #[test]
    fn set_user_id_replaces_existing_value() {
        let mut patient = Patient::blank("sys", "old");
        patient.set_user_id("sys", "new");
        assert_eq!(patient.identifier.len(), 1);
        assert_eq!(patient.user_id("sys"), Some("new"));
    }

    #[test]
    fn sms_contact_point_round_trips_through_setter() {
        let mut patient = Patient::default();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        patient.set_sms_contact_point("+15555550100", now);
        patient.set_sms_contact_point("+15555550101", now);
        assert_eq!(patient.telecom.len(), 1);
        assert_eq!(patient.sms_contact_point(), Some("+15555550101"));
    }

    #[test]
    fn birth_date_handles_partial_and_invalid_values() {
        let mut patient = Patient {
            birth_date: Some("1990-03-15".into()),
            ..Patient::default()
        };
        assert_eq!(
            patient.birth_date().unwrap(),
            NaiveDate::from_ymd_opt(1990, 3, 15)
        );

        patient.birth_date = Some("1990-03".into());
        assert_eq!(patient.birth_date().unwrap(), None);

        patient.birth_date = Some("1990-13-40".into());
        assert!(matches!(
            patient.birth_date(),
            Err(FhirError::InvalidInput(_))
        ));
    }

    #[test]
    fn names_and_study_status_are_read_from_record() {
        let json = r#"{
            "resourceType": "Patient",
            "id": "p1",
            "name": [
                {"use": "official", "family": "Doe", "given": ["Jane"]},
                {"use": "usual", "given": ["JD"]}
            ],
            "extension": [
                {"url": "http://isacc.app/fhir/StructureDefinition/study-status", "valueString": "consented"}
            ]
        }"#;
        let mut patient: Patient = serde_json::from_str(json).unwrap();
        assert_eq!(patient.full_name_display(), "Jane Doe");
        assert_eq!(patient.preferred_name(), Some("JD"));
        assert_eq!(patient.study_status(), Some(StudyStatus::Consented));
        assert_eq!(patient.reference().as_str(), "Patient/p1");

        patient.set_study_status(StudyStatus::Withdrawn);
        assert_eq!(patient.extension.len(), 1);
        assert_eq!(patient.study_status(), Some(StudyStatus::Withdrawn));
    }
}
