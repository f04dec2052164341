//! A tagged union over the records the data-access collaborator persists.

use crate::{
    CarePlan, Communication, CommunicationRequest, Consent, Patient, Questionnaire,
    QuestionnaireResponse,
};
use serde::{Deserialize, Serialize};

/// Any persistable record, tagged by FHIR `resourceType`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Patient(Patient),
    CarePlan(CarePlan),
    CommunicationRequest(CommunicationRequest),
    Communication(Communication),
    Consent(Consent),
    Questionnaire(Questionnaire),
    QuestionnaireResponse(QuestionnaireResponse),
}

impl Resource {
    pub fn resource_type(&self) -> &'static str {
        match self {
            Self::Patient(_) => "Patient",
            Self::CarePlan(_) => "CarePlan",
            Self::CommunicationRequest(_) => "CommunicationRequest",
            Self::Communication(_) => "Communication",
            Self::Consent(_) => "Consent",
            Self::Questionnaire(_) => "Questionnaire",
            Self::QuestionnaireResponse(_) => "QuestionnaireResponse",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Patient(r) => r.id.as_deref(),
            Self::CarePlan(r) => r.id.as_deref(),
            Self::CommunicationRequest(r) => r.id.as_deref(),
            Self::Communication(r) => r.id.as_deref(),
            Self::Consent(r) => r.id.as_deref(),
            Self::Questionnaire(r) => r.id.as_deref(),
            Self::QuestionnaireResponse(r) => r.id.as_deref(),
        }
    }

    pub fn set_id(&mut self, id: String) {
        let slot = match self {
            Self::Patient(r) => &mut r.id,
            Self::CarePlan(r) => &mut r.id,
            Self::CommunicationRequest(r) => &mut r.id,
            Self::Communication(r) => &mut r.id,
            Self::Consent(r) => &mut r.id,
            Self::Questionnaire(r) => &mut r.id,
            Self::QuestionnaireResponse(r) => &mut r.id,
        };
        *slot = Some(id);
    }

    /// `ResourceType/id` once an id has been assigned.
    pub fn reference(&self) -> Option<String> {
        self.id()
            .map(|id| format!("{}/{}", self.resource_type(), id))
    }
}

/// Parse a single resource from FHIR JSON, dispatching on `resourceType`.
pub fn parse_resource(json_text: &str) -> crate::FhirResult<Resource> {
    crate::parse_json(json_text, "Resource")
}
