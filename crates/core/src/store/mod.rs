//! Data-access contract for the FHIR store.
//!
//! The session depends only on [`CarePlanStore`]. Production wiring supplies an HTTP-backed
//! implementation; [`InMemoryStore`] backs tests and the CLI.

mod memory;

pub use memory::InMemoryStore;

use crate::StoreResult;
use async_trait::async_trait;
use fhir::{
    CarePlan, Communication, Consent, Patient, Questionnaire, QuestionnaireResponse, Resource,
};

/// Remote record operations a care plan session needs.
///
/// Implementations must be safe to call concurrently; the session fans out the working-set
/// fetches in parallel.
#[async_trait]
pub trait CarePlanStore: Send + Sync {
    /// Find the patient carrying `identifier` under `system`.
    ///
    /// Returns `Ok(None)` when nothing matches and [`crate::StoreError::AmbiguousMatch`] when
    /// more than one record does.
    async fn fetch_patient(&self, system: &str, identifier: &str)
        -> StoreResult<Option<Patient>>;

    /// Persist a new patient and return it with its assigned id.
    async fn create_patient(&self, patient: Patient) -> StoreResult<Patient>;

    /// The patient's current care plan instantiated from `template_ref`, if any.
    async fn fetch_care_plan(
        &self,
        patient: &Patient,
        template_ref: &str,
    ) -> StoreResult<Option<CarePlan>>;

    /// Persist a new care plan and return it with its assigned id.
    async fn create_care_plan(&self, care_plan: CarePlan) -> StoreResult<CarePlan>;

    async fn fetch_communications(&self, patient: &Patient) -> StoreResult<Vec<Communication>>;

    async fn fetch_consents(&self, patient: &Patient) -> StoreResult<Vec<Consent>>;

    /// Questionnaires instantiated by the care plan's activities.
    async fn fetch_questionnaires(&self, care_plan: &CarePlan)
        -> StoreResult<Vec<Questionnaire>>;

    /// Responses recorded against the care plan, newest first.
    async fn fetch_questionnaire_responses(
        &self,
        care_plan: &CarePlan,
    ) -> StoreResult<Vec<QuestionnaireResponse>>;

    /// Create a record; any id on the input is replaced by the store's.
    async fn persist(&self, resource: Resource) -> StoreResult<Resource>;

    /// Replace an existing record by id.
    async fn update(&self, resource: Resource) -> StoreResult<Resource>;
}
