//! A care plan together with its outgoing message requests.
//!
//! Responsibilities:
//! - build a new enrollment care plan and its scheduled requests from a template
//! - add, edit and remove requests while keeping the plan's activity list in step
//! - save the plan and its requests through a [`CarePlanStore`]
//!
//! Notes:
//! - Requests are kept in ascending occurrence order.
//! - Removing a saved request revokes it; removing an unsaved one drops it.
//! - The activity list holds non-communication activities first, then one reference per saved,
//!   non-revoked request.

use crate::constants::CARE_PLAN_INTENT;
use crate::requests::CommunicationRequestFactory;
use crate::schedule::{generate_message_drafts, Replacements};
use crate::store::CarePlanStore;
use crate::{CarePlanError, CarePlanResult};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use fhir::{
    CarePlan, CarePlanActivity, CarePlanStatus, CommunicationRequest, Patient, Period,
    PlanTemplate, Reference, RequestStatus, Resource,
};

/// A brand-new active care plan for `patient`, instantiated from `template_ref`.
pub fn enrollment_care_plan(
    patient: &Patient,
    template_ref: &str,
    title: Option<&str>,
    now: DateTime<Utc>,
    duration_days: u32,
) -> CarePlan {
    CarePlan {
        id: None,
        status: CarePlanStatus::Active,
        intent: Some(CARE_PLAN_INTENT.to_owned()),
        title: title.map(str::to_owned),
        subject: Some(patient.reference()),
        period: Some(Period {
            start: Some(now),
            end: Some(now + Duration::days(i64::from(duration_days))),
        }),
        created: Some(now),
        based_on: vec![Reference::new(template_ref)],
        instantiates_canonical: Vec::new(),
        note: Vec::new(),
        activity: Vec::new(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanMessages {
    care_plan: CarePlan,
    requests: Vec<CommunicationRequest>,
}

impl PlanMessages {
    pub fn new(care_plan: CarePlan, requests: Vec<CommunicationRequest>) -> Self {
        let mut messages = Self {
            care_plan,
            requests,
        };
        messages.rebuild();
        messages
    }

    /// Schedule every template message for `patient` against `care_plan`.
    pub fn from_template(
        care_plan: CarePlan,
        patient: &Patient,
        template: &PlanTemplate,
        replacements: &Replacements,
        now: DateTime<FixedOffset>,
    ) -> CarePlanResult<Self> {
        let birth_date = patient
            .birth_date()
            .map_err(|e| CarePlanError::InvalidRecord(e.to_string()))?;
        let drafts = generate_message_drafts(template, birth_date, replacements, now)?;
        let requests = CommunicationRequestFactory::from_drafts(&drafts, patient, Some(&care_plan));

        tracing::debug!(
            template = template.id.as_deref().unwrap_or_default(),
            count = requests.len(),
            "scheduled template messages"
        );
        Ok(Self::new(care_plan, requests))
    }

    pub fn care_plan(&self) -> &CarePlan {
        &self.care_plan
    }

    pub fn requests(&self) -> &[CommunicationRequest] {
        &self.requests
    }

    /// Requests that will still be sent.
    pub fn active_requests(&self) -> impl Iterator<Item = &CommunicationRequest> {
        self.requests
            .iter()
            .filter(|r| r.status != RequestStatus::Revoked)
    }

    pub fn into_parts(self) -> (CarePlan, Vec<CommunicationRequest>) {
        (self.care_plan, self.requests)
    }

    pub fn add(&mut self, request: CommunicationRequest) {
        self.requests.push(request);
        self.rebuild();
    }

    /// Replace the text and send time of the request at `index`.
    pub fn edit(
        &mut self,
        index: usize,
        text: &str,
        occurrence: DateTime<Utc>,
    ) -> CarePlanResult<()> {
        let request = self.request_mut(index)?;
        request.set_text(text);
        request.occurrence_date_time = Some(occurrence);
        self.rebuild();
        Ok(())
    }

    /// Remove the request at `index`: unsaved requests are dropped, saved ones revoked.
    pub fn remove(&mut self, index: usize) -> CarePlanResult<()> {
        if self.request_mut(index)?.is_persisted() {
            self.requests[index].status = RequestStatus::Revoked;
        } else {
            self.requests.remove(index);
        }
        self.rebuild();
        Ok(())
    }

    /// Save new requests, update saved ones, then save the care plan with a fresh activity list.
    ///
    /// New requests reference the care plan, so an unsaved plan is created first.
    pub async fn save(&mut self, store: &dyn CarePlanStore) -> CarePlanResult<()> {
        if self.care_plan.id.is_none() {
            self.care_plan = store
                .create_care_plan(self.care_plan.clone())
                .await
                .map_err(CarePlanError::CarePlanCreation)?;
            let plan_ref = self.care_plan.reference();
            for request in self.requests.iter_mut() {
                request.based_on = vec![plan_ref.clone()];
            }
        }

        for request in self.requests.iter_mut() {
            let resource = Resource::CommunicationRequest(request.clone());
            let saved = if request.is_persisted() {
                store.update(resource).await
            } else {
                store.persist(resource).await
            }
            .map_err(CarePlanError::Persistence)?;

            if let Resource::CommunicationRequest(saved) = saved {
                *request = saved;
            }
        }

        self.rebuild();
        let saved = store
            .update(Resource::CarePlan(self.care_plan.clone()))
            .await
            .map_err(CarePlanError::Persistence)?;
        if let Resource::CarePlan(saved) = saved {
            self.care_plan = saved;
        }

        tracing::info!(
            care_plan = self.care_plan.id.as_deref().unwrap_or_default(),
            requests = self.requests.len(),
            "saved care plan messages"
        );
        Ok(())
    }

    fn request_mut(&mut self, index: usize) -> CarePlanResult<&mut CommunicationRequest> {
        let len = self.requests.len();
        self.requests.get_mut(index).ok_or_else(|| {
            CarePlanError::InvalidRecord(format!("no message at index {index} (have {len})"))
        })
    }

    fn rebuild(&mut self) {
        self.requests.sort_by_key(|r| r.occurrence_date_time);

        let mut activity: Vec<CarePlanActivity> = self
            .care_plan
            .activity
            .drain(..)
            .filter(|a| !references_communication_request(a))
            .collect();
        activity.extend(
            self.requests
                .iter()
                .filter(|r| r.status != RequestStatus::Revoked)
                .filter_map(CommunicationRequest::reference)
                .map(|reference| CarePlanActivity {
                    reference: Some(reference),
                    detail: None,
                }),
        );
        self.care_plan.activity = activity;
    }
}

fn references_communication_request(activity: &CarePlanActivity) -> bool {
    activity
        .reference
        .as_ref()
        .is_some_and(|r| r.as_str().starts_with("CommunicationRequest/"))
}
