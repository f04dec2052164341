//! FHIR R4 wire models for the ISACC messaging program.
//!
//! This crate provides the **record shapes** exchanged with the remote FHIR store and
//! small **translation helpers** on top of them:
//! - Patient, CarePlan, Consent, Communication and CommunicationRequest records
//! - Questionnaire and QuestionnaireResponse records
//! - PlanDefinition templates, translated into a domain-level [`PlanTemplate`]
//!
//! This crate focuses on:
//! - FHIR JSON serialisation/deserialisation (camelCase, `resourceType` tagging)
//! - accessors for the handful of extensions and identifiers ISACC relies on
//!
//! Transport (HTTP, auth, retries) is not handled here.

pub mod care_plan;
pub mod codes;
pub mod communication;
pub mod communication_request;
pub mod consent;
pub mod datatypes;
pub mod patient;
pub mod plan_definition;
pub mod questionnaire;
pub mod resource;

// Re-export record types
pub use care_plan::{CarePlan, CarePlanActivity, CarePlanActivityDetail, CarePlanStatus};
pub use communication::Communication;
pub use communication_request::{CommunicationRequest, RequestStatus};
pub use consent::{Consent, Provision, ProvisionType};
pub use datatypes::{
    Address, Annotation, CodeableConcept, Coding, ContactPoint, ContactPointSystem, Extension,
    HumanName, Identifier, NameUse, Payload, Period, Reference,
};
pub use patient::{Patient, PatientContact, StudyStatus};
pub use plan_definition::{
    ActivityRule, PlanDefinition, PlanTemplate, Recurrence, TriggerKind, TriggerRule,
};
pub use questionnaire::{
    Answer, Questionnaire, QuestionnaireItem, QuestionnaireResponse, ResponseItem,
};
pub use resource::{parse_resource, Resource};

pub use isacc_types::{NonEmptyText, ResourceRef};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Deserialize JSON text into `T`, reporting the failing field path on schema mismatch.
pub(crate) fn parse_json<T>(json_text: &str, what: &str) -> FhirResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_str(json_text);

    match serde_path_to_error::deserialize::<_, T>(&mut deserializer) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            Err(FhirError::Translation(format!(
                "{what} schema mismatch at {path}: {source}"
            )))
        }
    }
}
