//! Builders for outgoing CommunicationRequest records.

use crate::schedule::MessageDraft;
use chrono::{DateTime, Utc};
use fhir::codes::{KnownCode, MANUALLY_SENT_MESSAGE, MEDIUM_SMS, SCHEDULED_MESSAGE};
use fhir::{CarePlan, CommunicationRequest, Patient, Payload, Reference, RequestStatus};

/// Namespace for CommunicationRequest construction.
pub struct CommunicationRequestFactory;

impl CommunicationRequestFactory {
    /// A request for a message sent by a person rather than the schedule.
    pub fn manual(
        text: &str,
        patient: &Patient,
        care_plan: Option<&CarePlan>,
        sender: Option<Reference>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> CommunicationRequest {
        let mut request = outgoing(text, patient, care_plan, MANUALLY_SENT_MESSAGE, now);
        request.sender = sender;
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            request.set_note(note);
        }
        request
    }

    /// A request for one scheduled draft.
    pub fn scheduled(
        draft: &MessageDraft,
        patient: &Patient,
        care_plan: Option<&CarePlan>,
    ) -> CommunicationRequest {
        outgoing(
            &draft.text,
            patient,
            care_plan,
            SCHEDULED_MESSAGE,
            draft.scheduled_at.with_timezone(&Utc),
        )
    }

    pub fn from_drafts(
        drafts: &[MessageDraft],
        patient: &Patient,
        care_plan: Option<&CarePlan>,
    ) -> Vec<CommunicationRequest> {
        drafts
            .iter()
            .map(|draft| Self::scheduled(draft, patient, care_plan))
            .collect()
    }
}

fn outgoing(
    text: &str,
    patient: &Patient,
    care_plan: Option<&CarePlan>,
    category: KnownCode,
    occurrence: DateTime<Utc>,
) -> CommunicationRequest {
    // `basedOn` only makes sense once the plan has an id.
    let based_on = care_plan
        .filter(|cp| cp.id.is_some())
        .map(|cp| vec![cp.reference()])
        .unwrap_or_default();

    CommunicationRequest {
        id: None,
        status: RequestStatus::Active,
        occurrence_date_time: Some(occurrence),
        payload: vec![Payload::text(text)],
        recipient: vec![patient.reference()],
        sender: None,
        medium: vec![MEDIUM_SMS.concept()],
        category: vec![category.concept()],
        based_on,
        note: Vec::new(),
    }
}
