//! Code systems, organizations and extension URLs used by ISACC.

use crate::datatypes::{CodeableConcept, Coding, Reference};

/// A `system|code` pair known at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownCode {
    pub system: &'static str,
    pub code: &'static str,
}

impl KnownCode {
    pub const fn new(system: &'static str, code: &'static str) -> Self {
        Self { system, code }
    }

    pub fn coding(&self) -> Coding {
        Coding::new(self.system, self.code)
    }

    pub fn concept(&self) -> CodeableConcept {
        CodeableConcept::from_coding(self.coding())
    }

    pub fn matches(&self, coding: &Coding) -> bool {
        coding.system.as_deref() == Some(self.system) && coding.code.as_deref() == Some(self.code)
    }
}

// ============================================================================
// Message categories and medium
// ============================================================================

pub const SCHEDULED_MESSAGE: KnownCode = KnownCode::new(
    "https://isacc.app/CodeSystem/communication-request-type",
    "isacc-scheduled-message",
);

pub const MANUALLY_SENT_MESSAGE: KnownCode = KnownCode::new(
    "https://isacc.app/CodeSystem/communication-type",
    "isacc-manually-sent-message",
);

pub const SYSTEM_ANNOUNCEMENT: KnownCode = KnownCode::new(
    "https://stayhome.app/CodeSystem/communication-category",
    "system-announcement",
);

pub const MEDIUM_SMS: KnownCode = KnownCode::new(
    "http://terminology.hl7.org/ValueSet/v3-ParticipationMode",
    "SMSWRIT",
);

// ============================================================================
// Consent
// ============================================================================

pub const CONSENT_CONTENT_CLASS_SYSTEM: &str =
    "https://stayhome.app/CodeSystem/consent-content-class";

pub const CONTENT_LOCATION: KnownCode = KnownCode::new(CONSENT_CONTENT_CLASS_SYSTEM, "location");

pub const CONTENT_SYMPTOMS_TESTING_CONDITIONS: KnownCode =
    KnownCode::new(CONSENT_CONTENT_CLASS_SYSTEM, "symptoms-testing-conditions");

pub const CONTENT_CONTACT_INFORMATION: KnownCode =
    KnownCode::new(CONSENT_CONTENT_CLASS_SYSTEM, "contact-information");

pub const CONTENT_ALL: KnownCode = KnownCode::new(
    CONSENT_CONTENT_CLASS_SYSTEM,
    "location_contact-information_symptoms-testing-conditions",
);

pub const CONSENT_SCOPE_PATIENT_PRIVACY: KnownCode = KnownCode::new(
    "http://terminology.hl7.org/CodeSystem/consentscope",
    "patient-privacy",
);

pub const CONSENT_CATEGORY_PATIENT_CONSENT: KnownCode =
    KnownCode::new("http://loinc.org", "59284-0");

/// Organizations a patient may share data with.
pub mod organization {
    pub const SCAN: &str = "Organization/1463";
    pub const FIU_NEIGHBORHOOD_HELP: &str = "Organization/1464";
    pub const FIU: &str = "Organization/1465";
    pub const PUBLIC_HEALTH_AGENCIES: &str = "Organization/1466";
    pub const RESEARCHERS: &str = "Organization/1467";
    pub const SOCIAL_DISTANCING_STUDY: &str = "Organization/1737";
}

pub fn organization_reference(reference: &str) -> Reference {
    Reference::new(reference)
}

// ============================================================================
// Extension URLs and status values
// ============================================================================

pub const EXT_STUDY_STATUS: &str = "http://isacc.app/fhir/StructureDefinition/study-status";

pub const EXT_STUDY_START_DATE: &str =
    "http://isacc.app/fhir/StructureDefinition/study-start-date";

pub const EXT_PRONOUNS: &str = "http://isacc.app/fhir/StructureDefinition/pronouns";

pub const EXT_MESSAGE_THEME: &str = "http://isacc.app/fhir/StructureDefinition/message-theme";

/// Communication status for messages still being worked on.
pub const COMMUNICATION_IN_PROGRESS: &str = "in-progress";
