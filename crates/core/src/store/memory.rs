//! In-process implementation of [`CarePlanStore`].
//!
//! Records live in a single `RwLock<Vec<Resource>>`. Search semantics follow the queries the
//! remote store is expected to answer: identifier match for patients, template plus
//! current-period match for care plans, recipient match for communications.

use super::CarePlanStore;
use crate::constants::COMMUNICATIONS_PAGE_SIZE;
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use fhir::{
    CarePlan, Communication, Consent, Patient, Questionnaire, QuestionnaireResponse, Resource,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<Resource>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store. Records without an id are given one.
    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let records = resources
            .into_iter()
            .map(|mut r| {
                if r.id().is_none() {
                    r.set_id(new_id());
                }
                r
            })
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// A copy of every stored record.
    pub async fn resources(&self) -> Vec<Resource> {
        self.records.read().await.clone()
    }

    pub async fn communication_requests(&self) -> Vec<fhir::CommunicationRequest> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                Resource::CommunicationRequest(cr) => Some(cr.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn consents(&self) -> Vec<Consent> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                Resource::Consent(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn care_plans(&self) -> Vec<CarePlan> {
        self.records
            .read()
            .await
            .iter()
            .filter_map(|r| match r {
                Resource::CarePlan(cp) => Some(cp.clone()),
                _ => None,
            })
            .collect()
    }

    async fn insert(&self, mut resource: Resource) -> Resource {
        resource.set_id(new_id());
        self.records.write().await.push(resource.clone());
        resource
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl CarePlanStore for InMemoryStore {
    async fn fetch_patient(
        &self,
        system: &str,
        identifier: &str,
    ) -> StoreResult<Option<Patient>> {
        let records = self.records.read().await;
        let mut matches: Vec<&Patient> = records
            .iter()
            .filter_map(|r| match r {
                Resource::Patient(p) if p.user_id(system) == Some(identifier) => Some(p),
                _ => None,
            })
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop().cloned()),
            count => Err(StoreError::AmbiguousMatch {
                identifier: identifier.to_owned(),
                count,
            }),
        }
    }

    async fn create_patient(&self, patient: Patient) -> StoreResult<Patient> {
        match self.insert(Resource::Patient(patient)).await {
            Resource::Patient(p) => Ok(p),
            other => Err(StoreError::Rejected(format!(
                "stored {} in place of Patient",
                other.resource_type()
            ))),
        }
    }

    async fn fetch_care_plan(
        &self,
        patient: &Patient,
        template_ref: &str,
    ) -> StoreResult<Option<CarePlan>> {
        let subject = patient.reference();
        let now = Utc::now();
        let records = self.records.read().await;

        // Latest-created plan wins when several are current.
        Ok(records
            .iter()
            .filter_map(|r| match r {
                Resource::CarePlan(cp)
                    if cp.subject.as_ref() == Some(&subject)
                        && cp.is_based_on(template_ref)
                        && cp.is_current(now) =>
                {
                    Some(cp)
                }
                _ => None,
            })
            .max_by_key(|cp| cp.created)
            .cloned())
    }

    async fn create_care_plan(&self, care_plan: CarePlan) -> StoreResult<CarePlan> {
        match self.insert(Resource::CarePlan(care_plan)).await {
            Resource::CarePlan(cp) => Ok(cp),
            other => Err(StoreError::Rejected(format!(
                "stored {} in place of CarePlan",
                other.resource_type()
            ))),
        }
    }

    async fn fetch_communications(&self, patient: &Patient) -> StoreResult<Vec<Communication>> {
        let recipient = patient.reference();
        let records = self.records.read().await;
        let mut communications: Vec<Communication> = records
            .iter()
            .filter_map(|r| match r {
                Resource::Communication(c)
                    if c.recipient.contains(&recipient) || c.sender.as_ref() == Some(&recipient) =>
                {
                    Some(c.clone())
                }
                _ => None,
            })
            .collect();
        communications.sort_by_key(|c| c.sent);
        communications.truncate(COMMUNICATIONS_PAGE_SIZE);
        Ok(communications)
    }

    async fn fetch_consents(&self, patient: &Patient) -> StoreResult<Vec<Consent>> {
        let subject = patient.reference();
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter_map(|r| match r {
                Resource::Consent(c)
                    if c.patient.as_ref() == Some(&subject)
                        && c.status.as_deref() == Some("active") =>
                {
                    Some(c.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn fetch_questionnaires(
        &self,
        care_plan: &CarePlan,
    ) -> StoreResult<Vec<Questionnaire>> {
        let wanted = care_plan.questionnaire_references();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        wanted
            .into_iter()
            .map(|canonical| {
                records
                    .iter()
                    .find_map(|r| match r {
                        Resource::Questionnaire(q)
                            if q.reference().as_str() == canonical =>
                        {
                            Some(q.clone())
                        }
                        _ => None,
                    })
                    .ok_or_else(|| StoreError::NotFound(canonical.to_owned()))
            })
            .collect()
    }

    async fn fetch_questionnaire_responses(
        &self,
        care_plan: &CarePlan,
    ) -> StoreResult<Vec<QuestionnaireResponse>> {
        let plan = care_plan.reference();
        let records = self.records.read().await;
        let mut responses: Vec<QuestionnaireResponse> = records
            .iter()
            .filter_map(|r| match r {
                Resource::QuestionnaireResponse(qr) if qr.based_on.contains(&plan) => {
                    Some(qr.clone())
                }
                _ => None,
            })
            .collect();
        responses.sort_by(|a, b| b.authored.cmp(&a.authored));
        Ok(responses)
    }

    async fn persist(&self, resource: Resource) -> StoreResult<Resource> {
        Ok(self.insert(resource).await)
    }

    async fn update(&self, resource: Resource) -> StoreResult<Resource> {
        let reference = resource
            .reference()
            .ok_or_else(|| StoreError::Rejected("cannot update a record without an id".into()))?;

        let mut records = self.records.write().await;
        let slot = records
            .iter_mut()
            .find(|r| r.reference().as_deref() == Some(reference.as_str()))
            .ok_or(StoreError::NotFound(reference))?;
        *slot = resource.clone();
        Ok(resource)
    }
}
