//! Care plan session: loads and holds one patient's working set.
//!
//! Responsibilities:
//! - resolve (or create) the patient for a login identity
//! - resolve (or create) the patient's current care plan, welcoming first-time enrollments
//! - fetch communications, questionnaires, responses and consents in parallel
//! - expose the result as a [`SessionSnapshot`] and announce every state transition
//!
//! Notes:
//! - Each `set_user` starts a new generation. Results carrying an older generation are
//!   discarded, so a slow load can never overwrite a newer one.
//! - Patient and care plan are published as soon as they resolve; the fan-out results are
//!   published together, and only when every fetch succeeded.
//! - The state mutex is never held across an await point.

use crate::config::SessionConfig;
use crate::consents::{relevant_consents, DataSharingConsents};
use crate::constants::SESSION_EVENT_CAPACITY;
use crate::error::SubLoad;
use crate::plan_messages::{enrollment_care_plan, PlanMessages};
use crate::questions::QuestionIndex;
use crate::requests::CommunicationRequestFactory;
use crate::schedule::Replacements;
use crate::store::CarePlanStore;
use crate::{CarePlanError, CarePlanResult, StoreError};
use chrono::{DateTime, FixedOffset, Utc};
use fhir::{
    CarePlan, Communication, Consent, Patient, PlanTemplate, Questionnaire, QuestionnaireItem,
    QuestionnaireResponse, Resource,
};
use isacc_types::NonEmptyText;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Sent once per state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionEvent {
    pub generation: u64,
    pub state: LoadState,
}

/// Everything the presentation layer reads about the current session.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub state: LoadState,
    pub user_id: Option<String>,
    pub patient: Option<Patient>,
    pub care_plan: Option<CarePlan>,
    pub consents: Option<DataSharingConsents>,
    pub communications: Vec<Communication>,
    pub questionnaires: Vec<Questionnaire>,
    pub questionnaire_responses: Vec<QuestionnaireResponse>,
    pub questions: QuestionIndex,
    pub is_loading: bool,
    pub error: Option<String>,
    pub is_first_time_user: Option<bool>,
    pub onboarding_error: Option<String>,
}

impl SessionSnapshot {
    /// Communications still in progress.
    pub fn active_communications(&self) -> Vec<&Communication> {
        self.communications
            .iter()
            .filter(|c| c.is_in_progress())
            .collect()
    }

    pub fn non_active_communications(&self) -> Vec<&Communication> {
        self.communications
            .iter()
            .filter(|c| !c.is_in_progress())
            .collect()
    }

    pub fn question_for_link_id(&self, link_id: &str) -> Option<&QuestionnaireItem> {
        self.questions.get(link_id)
    }

    /// The loaded questionnaire a response answers.
    pub fn questionnaire_for_response(
        &self,
        response: &QuestionnaireResponse,
    ) -> Option<&Questionnaire> {
        let id = response.questionnaire_id()?;
        self.questionnaires
            .iter()
            .find(|q| q.id.as_deref() == Some(id))
    }

    /// Hook run after every successful load. Nothing consumes calendar entries, so it
    /// only records that a rebuild point was reached.
    fn rebuild_treatment_calendar(&self) {
        tracing::debug!(
            communications = self.communications.len(),
            "treatment calendar rebuild skipped"
        );
    }
}

struct WorkingSet {
    communications: Vec<Communication>,
    questionnaires: Vec<Questionnaire>,
    questionnaire_responses: Vec<QuestionnaireResponse>,
    consents: DataSharingConsents,
}

/// Loads and holds the care plan working set for one logged-in user at a time.
pub struct CarePlanSession {
    config: Arc<SessionConfig>,
    store: Arc<dyn CarePlanStore>,
    generation: AtomicU64,
    state: Mutex<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl CarePlanSession {
    pub fn new(config: Arc<SessionConfig>, store: Arc<dyn CarePlanStore>) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            config,
            store,
            generation: AtomicU64::new(0),
            state: Mutex::new(SessionSnapshot::default()),
            events,
        }
    }

    /// Receive one [`SessionEvent`] per state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the working set for `user_id`, superseding any load in flight.
    ///
    /// # Errors
    ///
    /// - [`CarePlanError::NoUser`] for a blank id
    /// - [`CarePlanError::AmbiguousPatientMatch`] when the identifier matches several patients
    /// - a creation, lookup or [`CarePlanError::SubLoad`] error for the failing stage
    /// - [`CarePlanError::Superseded`] when a newer `set_user` started before this one finished
    pub async fn set_user(&self, user_id: &str) -> CarePlanResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let Ok(user_id) = NonEmptyText::new(user_id) else {
            let err = CarePlanError::NoUser;
            let message = err.to_string();
            self.transition(generation, LoadState::Failed, |s| {
                *s = SessionSnapshot {
                    error: Some(message),
                    ..SessionSnapshot::default()
                };
            })?;
            return Err(err);
        };

        let user = user_id.to_string();
        self.transition(generation, LoadState::Loading, |s| {
            *s = SessionSnapshot {
                user_id: Some(user),
                ..SessionSnapshot::default()
            };
        })?;
        tracing::info!(generation, "loading care plan session");

        let result = self.load(generation, &user_id).await;
        self.finish(generation, result)
    }

    async fn load(&self, generation: u64, user_id: &NonEmptyText) -> CarePlanResult<WorkingSet> {
        let (patient, first_time) = self.resolve_patient(user_id).await?;
        self.apply(generation, |s| {
            s.patient = Some(patient.clone());
            s.is_first_time_user = Some(first_time);
        })?;

        let (mut care_plan, created) = self.resolve_care_plan(&patient).await?;
        self.apply(generation, |s| s.care_plan = Some(care_plan.clone()))?;

        if created {
            let welcome = self.send_welcome(&patient, &care_plan).await;
            match welcome {
                Ok(updated) => {
                    care_plan = updated;
                    self.apply(generation, |s| s.care_plan = Some(care_plan.clone()))?;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to send onboarding welcome message");
                    let message = err.to_string();
                    self.apply(generation, |s| s.onboarding_error = Some(message))?;
                }
            }
        }

        let (communications, (questionnaires, questionnaire_responses), consents) = tokio::try_join!(
            self.load_communications(&patient),
            self.load_questionnaires(&care_plan),
            self.load_consents(&patient),
        )?;

        tracing::debug!(
            communications = communications.len(),
            questionnaires = questionnaires.len(),
            responses = questionnaire_responses.len(),
            "loaded care plan working set"
        );
        Ok(WorkingSet {
            communications,
            questionnaires,
            questionnaire_responses,
            consents,
        })
    }

    fn finish(&self, generation: u64, result: CarePlanResult<WorkingSet>) -> CarePlanResult<()> {
        match result {
            Ok(working_set) => {
                self.transition(generation, LoadState::Ready, |s| {
                    s.questions = QuestionIndex::build(&working_set.questionnaires);
                    s.communications = working_set.communications;
                    s.questionnaires = working_set.questionnaires;
                    s.questionnaire_responses = working_set.questionnaire_responses;
                    s.consents = Some(working_set.consents);
                    s.rebuild_treatment_calendar();
                })?;
                tracing::info!(generation, "care plan session ready");
                Ok(())
            }
            Err(err @ CarePlanError::Superseded { .. }) => Err(err),
            Err(err) => {
                tracing::warn!(generation, error = %err, "care plan session load failed");
                let message = err.to_string();
                self.transition(generation, LoadState::Failed, |s| s.error = Some(message))?;
                Err(err)
            }
        }
    }

    async fn resolve_patient(&self, user_id: &NonEmptyText) -> CarePlanResult<(Patient, bool)> {
        let system = self.config.user_id_system();
        match self.store.fetch_patient(system, user_id.as_str()).await {
            Ok(Some(patient)) => Ok((patient, false)),
            Ok(None) => {
                let patient = self
                    .store
                    .create_patient(Patient::blank(system, user_id.as_str()))
                    .await
                    .map_err(CarePlanError::PatientCreation)?;
                tracing::info!(
                    patient = patient.id.as_deref().unwrap_or_default(),
                    "created patient record for first-time user"
                );
                Ok((patient, true))
            }
            Err(err @ StoreError::AmbiguousMatch { .. }) => {
                Err(CarePlanError::AmbiguousPatientMatch(err))
            }
            Err(err) => Err(CarePlanError::PatientLookup(err)),
        }
    }

    async fn resolve_care_plan(&self, patient: &Patient) -> CarePlanResult<(CarePlan, bool)> {
        let template_ref = self.config.care_plan_template_ref();
        let existing = self
            .store
            .fetch_care_plan(patient, &template_ref)
            .await
            .map_err(CarePlanError::CarePlanLookup)?;
        if let Some(care_plan) = existing {
            return Ok((care_plan, false));
        }

        let care_plan = enrollment_care_plan(
            patient,
            &template_ref,
            None,
            Utc::now(),
            self.config.care_plan_duration_days(),
        );
        let care_plan = self
            .store
            .create_care_plan(care_plan)
            .await
            .map_err(CarePlanError::CarePlanCreation)?;
        tracing::info!(
            care_plan = care_plan.id.as_deref().unwrap_or_default(),
            "created care plan"
        );
        Ok((care_plan, true))
    }

    /// Send the welcome message and return the care plan with its activity list updated.
    async fn send_welcome(
        &self,
        patient: &Patient,
        care_plan: &CarePlan,
    ) -> CarePlanResult<CarePlan> {
        let request = CommunicationRequestFactory::manual(
            self.config.welcome_message(),
            patient,
            Some(care_plan),
            None,
            None,
            Utc::now(),
        );
        let mut messages = PlanMessages::new(care_plan.clone(), vec![request]);
        messages.save(self.store.as_ref()).await?;
        let (care_plan, _) = messages.into_parts();
        Ok(care_plan)
    }

    async fn load_communications(&self, patient: &Patient) -> CarePlanResult<Vec<Communication>> {
        self.store
            .fetch_communications(patient)
            .await
            .map_err(|source| CarePlanError::SubLoad {
                stage: SubLoad::Communications,
                source,
            })
    }

    async fn load_questionnaires(
        &self,
        care_plan: &CarePlan,
    ) -> CarePlanResult<(Vec<Questionnaire>, Vec<QuestionnaireResponse>)> {
        let questionnaires = async {
            self.store
                .fetch_questionnaires(care_plan)
                .await
                .map_err(|source| CarePlanError::SubLoad {
                    stage: SubLoad::Questionnaires,
                    source,
                })
        };
        let responses = async {
            self.store
                .fetch_questionnaire_responses(care_plan)
                .await
                .map_err(|source| CarePlanError::SubLoad {
                    stage: SubLoad::QuestionnaireResponses,
                    source,
                })
        };
        tokio::try_join!(questionnaires, responses)
    }

    async fn load_consents(&self, patient: &Patient) -> CarePlanResult<DataSharingConsents> {
        let fetched = self
            .store
            .fetch_consents(patient)
            .await
            .map_err(|source| CarePlanError::SubLoad {
                stage: SubLoad::Consents,
                source,
            })?;

        let consents = if self.config.fill_default_consents() {
            relevant_consents(patient, &fetched, Utc::now())
        } else {
            fetched
        };
        Ok(DataSharingConsents::new(consents))
    }

    // ========================================================================
    // Actions on a loaded session
    // ========================================================================

    /// Save a questionnaire response, then reload the session.
    ///
    /// A failed reload is reported on the snapshot; the saved response is still returned.
    pub async fn post_questionnaire_response(
        &self,
        response: QuestionnaireResponse,
    ) -> CarePlanResult<QuestionnaireResponse> {
        let user_id = self.lock().user_id.clone().ok_or(CarePlanError::NotLoaded)?;

        let saved = match self
            .store
            .persist(Resource::QuestionnaireResponse(response))
            .await
            .map_err(CarePlanError::Persistence)?
        {
            Resource::QuestionnaireResponse(saved) => saved,
            other => {
                return Err(CarePlanError::InvalidRecord(format!(
                    "store returned {} for a questionnaire response",
                    other.resource_type()
                )))
            }
        };

        if let Err(err) = self.set_user(&user_id).await {
            tracing::warn!(error = %err, "reload after questionnaire response failed");
        }
        Ok(saved)
    }

    /// Change the consent snapshot in place.
    pub fn edit_consents<F>(&self, edit: F) -> CarePlanResult<()>
    where
        F: FnOnce(&mut DataSharingConsents),
    {
        let mut state = self.lock();
        let consents = state.consents.as_mut().ok_or(CarePlanError::NotLoaded)?;
        edit(consents);
        Ok(())
    }

    /// Persist one new consent record per changed permission and return them.
    pub async fn save_consents(&self) -> CarePlanResult<Vec<Consent>> {
        let generation = self.generation();
        let (patient, pending) = {
            let state = self.lock();
            let patient = state.patient.clone().ok_or(CarePlanError::NotLoaded)?;
            let consents = state.consents.as_ref().ok_or(CarePlanError::NotLoaded)?;
            let pending = consents.generate_new_consents(&patient, Utc::now());
            (patient, pending)
        };

        let mut saved = Vec::with_capacity(pending.len());
        for consent in pending {
            match self
                .store
                .persist(Resource::Consent(consent))
                .await
                .map_err(CarePlanError::Persistence)?
            {
                Resource::Consent(consent) => saved.push(consent),
                other => {
                    return Err(CarePlanError::InvalidRecord(format!(
                        "store returned {} for a consent",
                        other.resource_type()
                    )))
                }
            }
        }

        tracing::info!(
            patient = patient.id.as_deref().unwrap_or_default(),
            count = saved.len(),
            "saved consent changes"
        );
        let accepted = saved.clone();
        if let Err(err) = self.apply(generation, |s| {
            if let Some(consents) = s.consents.as_mut() {
                consents.accept_saved(accepted);
            }
        }) {
            tracing::debug!(error = %err, "session changed while saving; consents not updated");
        }
        Ok(saved)
    }

    /// Schedule the template's messages against the loaded patient and care plan.
    pub fn plan_messages_from_template(
        &self,
        template: &PlanTemplate,
        replacements: &Replacements,
        now: DateTime<FixedOffset>,
    ) -> CarePlanResult<PlanMessages> {
        let (patient, care_plan) = {
            let state = self.lock();
            let patient = state.patient.clone().ok_or(CarePlanError::NotLoaded)?;
            let care_plan = state.care_plan.clone().ok_or(CarePlanError::NotLoaded)?;
            (patient, care_plan)
        };
        PlanMessages::from_template(care_plan, &patient, template, replacements, now)
    }

    /// Save `messages` and publish the updated care plan when the session is unchanged.
    pub async fn save_plan_messages(&self, messages: &mut PlanMessages) -> CarePlanResult<()> {
        let generation = self.generation();
        messages.save(self.store.as_ref()).await?;

        let care_plan = messages.care_plan().clone();
        if let Err(err) = self.apply(generation, |s| s.care_plan = Some(care_plan)) {
            tracing::debug!(error = %err, "session changed while saving; snapshot not updated");
        }
        Ok(())
    }

    // ========================================================================
    // State helpers
    // ========================================================================

    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `update` against the snapshot if `generation` is still current.
    fn apply<F>(&self, generation: u64, update: F) -> CarePlanResult<()>
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        let mut state = self.lock();
        if self.generation() != generation {
            tracing::warn!(generation, "discarding result of superseded load");
            return Err(CarePlanError::Superseded { generation });
        }
        update(&mut state);
        Ok(())
    }

    /// [`Self::apply`], then move to `next` and notify subscribers.
    fn transition<F>(&self, generation: u64, next: LoadState, update: F) -> CarePlanResult<()>
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        self.apply(generation, |s| {
            update(s);
            s.state = next;
            s.is_loading = next == LoadState::Loading;
        })?;
        // No receivers is not an error.
        let _ = self.events.send(SessionEvent {
            generation,
            state: next,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::StoreResult;
    use async_trait::async_trait;
    use chrono::Duration;
    use fhir::codes::{organization, CONTENT_LOCATION};
    use fhir::{
        CarePlanActivity, CarePlanActivityDetail, CarePlanStatus, Period, ProvisionType,
        QuestionnaireItem, Reference,
    };
    use std::collections::HashSet;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::Notify;

    const SYSTEM: &str = "https://isacc.app/user-id";
    const TEMPLATE: &str = "CarePlan/template-1";

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Op {
        FetchPatient,
        CreateCarePlan,
        Communications,
        Consents,
        Persist,
    }

    struct Gate {
        user_id: String,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    /// Pauses a store call until released.
    struct Pause {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    /// An [`InMemoryStore`] with scripted failures and optional pauses in patient lookup
    /// and persist.
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemoryStore,
        failing: Mutex<HashSet<Op>>,
        gate: Option<Gate>,
        persist_pause: Option<Pause>,
    }

    impl ScriptedStore {
        fn seeded(resources: Vec<Resource>) -> Self {
            Self {
                inner: InMemoryStore::with_resources(resources),
                ..Self::default()
            }
        }

        fn fail(self, op: Op) -> Self {
            self.failing.lock().expect("lock").insert(op);
            self
        }

        fn check(&self, op: Op) -> StoreResult<()> {
            if self.failing.lock().expect("lock").contains(&op) {
                return Err(StoreError::Transport(format!("{op:?} unavailable")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CarePlanStore for ScriptedStore {
        async fn fetch_patient(
            &self,
            system: &str,
            identifier: &str,
        ) -> StoreResult<Option<Patient>> {
            if let Some(gate) = self.gate.as_ref().filter(|g| g.user_id == identifier) {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            self.check(Op::FetchPatient)?;
            self.inner.fetch_patient(system, identifier).await
        }

        async fn create_patient(&self, patient: Patient) -> StoreResult<Patient> {
            self.inner.create_patient(patient).await
        }

        async fn fetch_care_plan(
            &self,
            patient: &Patient,
            template_ref: &str,
        ) -> StoreResult<Option<CarePlan>> {
            self.inner.fetch_care_plan(patient, template_ref).await
        }

        async fn create_care_plan(&self, care_plan: CarePlan) -> StoreResult<CarePlan> {
            self.check(Op::CreateCarePlan)?;
            self.inner.create_care_plan(care_plan).await
        }

        async fn fetch_communications(
            &self,
            patient: &Patient,
        ) -> StoreResult<Vec<Communication>> {
            self.check(Op::Communications)?;
            self.inner.fetch_communications(patient).await
        }

        async fn fetch_consents(&self, patient: &Patient) -> StoreResult<Vec<Consent>> {
            self.check(Op::Consents)?;
            self.inner.fetch_consents(patient).await
        }

        async fn fetch_questionnaires(
            &self,
            care_plan: &CarePlan,
        ) -> StoreResult<Vec<Questionnaire>> {
            self.inner.fetch_questionnaires(care_plan).await
        }

        async fn fetch_questionnaire_responses(
            &self,
            care_plan: &CarePlan,
        ) -> StoreResult<Vec<QuestionnaireResponse>> {
            self.inner.fetch_questionnaire_responses(care_plan).await
        }

        async fn persist(&self, resource: Resource) -> StoreResult<Resource> {
            if let Some(pause) = &self.persist_pause {
                pause.entered.notify_one();
                pause.release.notified().await;
            }
            self.check(Op::Persist)?;
            self.inner.persist(resource).await
        }

        async fn update(&self, resource: Resource) -> StoreResult<Resource> {
            self.inner.update(resource).await
        }
    }

    fn config() -> Arc<SessionConfig> {
        let config = SessionConfig::new(
            NonEmptyText::new(SYSTEM).expect("system"),
            TEMPLATE,
            NonEmptyText::new("Welcome aboard").expect("welcome"),
            365,
        )
        .expect("config");
        Arc::new(config)
    }

    fn session(store: Arc<ScriptedStore>) -> CarePlanSession {
        CarePlanSession::new(config(), store)
    }

    fn patient(id: &str, user_id: &str) -> Patient {
        let mut patient = Patient::blank(SYSTEM, user_id);
        patient.id = Some(id.into());
        patient
    }

    fn current_plan(owner: &Patient) -> CarePlan {
        let now = Utc::now();
        CarePlan {
            id: Some("cp1".into()),
            status: CarePlanStatus::Active,
            subject: Some(owner.reference()),
            based_on: vec![Reference::new(TEMPLATE)],
            period: Some(Period {
                start: Some(now - Duration::days(10)),
                end: Some(now + Duration::days(100)),
            }),
            created: Some(now - Duration::days(10)),
            activity: vec![CarePlanActivity {
                reference: None,
                detail: Some(CarePlanActivityDetail {
                    instantiates_canonical: vec!["Questionnaire/q1".into()],
                    description: None,
                }),
            }],
            ..CarePlan::default()
        }
    }

    fn questionnaire() -> Questionnaire {
        Questionnaire {
            id: Some("q1".into()),
            item: vec![QuestionnaireItem {
                link_id: "1".into(),
                item: vec![QuestionnaireItem {
                    link_id: "1.1".into(),
                    text: Some("How are you feeling?".into()),
                    ..QuestionnaireItem::default()
                }],
                ..QuestionnaireItem::default()
            }],
            ..Questionnaire::default()
        }
    }

    fn communication(owner: &Patient, status: &str) -> Communication {
        Communication {
            status: Some(status.into()),
            recipient: vec![owner.reference()],
            sent: Some(Utc::now()),
            ..Communication::default()
        }
    }

    fn returning_user_store() -> ScriptedStore {
        let owner = patient("p1", "u1");
        ScriptedStore::seeded(vec![
            Resource::CarePlan(current_plan(&owner)),
            Resource::Questionnaire(questionnaire()),
            Resource::Communication(communication(&owner, "in-progress")),
            Resource::Communication(communication(&owner, "completed")),
            Resource::Patient(owner),
        ])
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<LoadState> {
        let mut states = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => states.push(event.state),
                Err(TryRecvError::Empty) => return states,
                Err(other) => panic!("unexpected receive error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn first_time_user_goes_idle_loading_ready() {
        let store = Arc::new(ScriptedStore::default());
        let session = session(store.clone());
        let mut rx = session.subscribe();
        assert_eq!(session.snapshot().state, LoadState::Idle);

        session.set_user("u1").await.expect("load");

        assert_eq!(drain(&mut rx), vec![LoadState::Loading, LoadState::Ready]);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, LoadState::Ready);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.is_first_time_user, Some(true));
        assert_eq!(
            snapshot.patient.as_ref().and_then(|p| p.user_id(SYSTEM)),
            Some("u1")
        );
        let care_plan = snapshot.care_plan.expect("care plan");
        assert!(care_plan.is_based_on(TEMPLATE));
        assert!(snapshot.consents.is_some());

        let welcome = store.inner.communication_requests().await;
        assert_eq!(welcome.len(), 1);
        assert_eq!(welcome[0].text(), "Welcome aboard");
        assert_eq!(welcome[0].based_on, vec![care_plan.reference()]);
        assert_eq!(snapshot.onboarding_error, None);

        let welcome_ref = welcome[0].reference().expect("saved request");
        let activity_refs = |plan: &CarePlan| -> Vec<Reference> {
            plan.activity
                .iter()
                .filter_map(|a| a.reference.clone())
                .collect()
        };
        assert_eq!(activity_refs(&care_plan), vec![welcome_ref.clone()]);
        let stored = store.inner.care_plans().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(activity_refs(&stored[0]), vec![welcome_ref]);
    }

    #[tokio::test]
    async fn returning_user_loads_working_set() {
        let store = Arc::new(returning_user_store());
        let session = session(store.clone());

        session.set_user("u1").await.expect("load");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.is_first_time_user, Some(false));
        assert_eq!(
            snapshot.care_plan.as_ref().and_then(|cp| cp.id.as_deref()),
            Some("cp1")
        );
        assert_eq!(snapshot.communications.len(), 2);
        assert_eq!(snapshot.active_communications().len(), 1);
        assert_eq!(snapshot.non_active_communications().len(), 1);
        assert_eq!(
            snapshot
                .question_for_link_id("1.1")
                .and_then(|q| q.text.as_deref()),
            Some("How are you feeling?")
        );
        assert!(store.inner.communication_requests().await.is_empty());
    }

    #[tokio::test]
    async fn consent_failure_fails_whole_load() {
        let store = Arc::new(returning_user_store().fail(Op::Consents));
        let session = session(store);
        let mut rx = session.subscribe();

        let err = session.set_user("u1").await.expect_err("should fail");
        match &err {
            CarePlanError::SubLoad { stage, .. } => assert_eq!(*stage, SubLoad::Consents),
            other => panic!("expected SubLoad error, got {other:?}"),
        }

        assert_eq!(drain(&mut rx), vec![LoadState::Loading, LoadState::Failed]);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, LoadState::Failed);
        assert_eq!(snapshot.error, Some(err.to_string()));
        assert!(snapshot.communications.is_empty());
        assert!(snapshot.consents.is_none());
        assert!(snapshot.questionnaires.is_empty());
    }

    #[tokio::test]
    async fn communications_failure_names_stage() {
        let store = Arc::new(returning_user_store().fail(Op::Communications));
        let err = session(store).set_user("u1").await.expect_err("should fail");
        assert!(err.to_string().starts_with("failed to load communications"));
    }

    #[tokio::test]
    async fn blank_user_id_fails_immediately() {
        let store = Arc::new(ScriptedStore::default());
        let session = session(store);
        let mut rx = session.subscribe();

        let err = session.set_user("   ").await.expect_err("no user");
        assert_eq!(err, CarePlanError::NoUser);
        assert_eq!(drain(&mut rx), vec![LoadState::Failed]);
        assert_eq!(
            session.snapshot().error.as_deref(),
            Some("No user information. Please log in again.")
        );
    }

    #[tokio::test]
    async fn ambiguous_patient_match_propagates() {
        let store = Arc::new(ScriptedStore::seeded(vec![
            Resource::Patient(patient("p1", "u1")),
            Resource::Patient(patient("p2", "u1")),
        ]));
        let err = session(store).set_user("u1").await.expect_err("ambiguous");
        assert_eq!(
            err,
            CarePlanError::AmbiguousPatientMatch(StoreError::AmbiguousMatch {
                identifier: "u1".into(),
                count: 2,
            })
        );
    }

    #[tokio::test]
    async fn patient_lookup_failure_is_wrapped() {
        let store = Arc::new(ScriptedStore::default().fail(Op::FetchPatient));
        let err = session(store).set_user("u1").await.expect_err("lookup");
        assert!(matches!(err, CarePlanError::PatientLookup(_)));
    }

    #[tokio::test]
    async fn care_plan_creation_failure_is_wrapped() {
        let store = Arc::new(ScriptedStore::default().fail(Op::CreateCarePlan));
        let session = session(store);

        let err = session.set_user("u1").await.expect_err("create");
        assert!(matches!(err, CarePlanError::CarePlanCreation(_)));
        assert!(err.to_string().starts_with("failed to create care plan record"));

        let snapshot = session.snapshot();
        assert!(snapshot.patient.is_some());
        assert!(snapshot.care_plan.is_none());
    }

    #[tokio::test]
    async fn welcome_failure_is_not_fatal() {
        let store = Arc::new(ScriptedStore::default().fail(Op::Persist));
        let session = session(store);

        session.set_user("u1").await.expect("load");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, LoadState::Ready);
        assert!(snapshot
            .onboarding_error
            .as_deref()
            .is_some_and(|e| e.contains("Persist unavailable")));
    }

    #[tokio::test]
    async fn superseded_load_is_discarded() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = Arc::new(ScriptedStore {
            gate: Some(Gate {
                user_id: "slow".into(),
                entered: entered.clone(),
                release: release.clone(),
            }),
            ..ScriptedStore::default()
        });
        let session = Arc::new(session(store));

        let slow = {
            let session = session.clone();
            tokio::spawn(async move { session.set_user("slow").await })
        };
        entered.notified().await;

        session.set_user("fast").await.expect("fast load");
        release.notify_one();

        let slow_result = slow.await.expect("task");
        assert_eq!(slow_result, Err(CarePlanError::Superseded { generation: 1 }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, LoadState::Ready);
        assert_eq!(snapshot.user_id.as_deref(), Some("fast"));
        assert_eq!(
            snapshot.patient.as_ref().and_then(|p| p.user_id(SYSTEM)),
            Some("fast")
        );
    }

    #[tokio::test]
    async fn posted_response_appears_after_reload() {
        let store = Arc::new(returning_user_store());
        let session = session(store);
        session.set_user("u1").await.expect("load");
        let mut rx = session.subscribe();

        let response = QuestionnaireResponse {
            questionnaire: Some("Questionnaire/q1".into()),
            based_on: vec![Reference::new("CarePlan/cp1")],
            authored: Some(Utc::now()),
            ..QuestionnaireResponse::default()
        };
        let saved = session
            .post_questionnaire_response(response)
            .await
            .expect("post");
        assert!(saved.id.is_some());

        assert_eq!(drain(&mut rx), vec![LoadState::Loading, LoadState::Ready]);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.questionnaire_responses, vec![saved.clone()]);
        assert_eq!(
            snapshot
                .questionnaire_for_response(&saved)
                .and_then(|q| q.id.as_deref()),
            Some("q1")
        );
    }

    #[tokio::test]
    async fn actions_require_a_loaded_session() {
        let session = session(Arc::new(ScriptedStore::default()));
        let err = session
            .post_questionnaire_response(QuestionnaireResponse::default())
            .await
            .expect_err("not loaded");
        assert_eq!(err, CarePlanError::NotLoaded);
        assert_eq!(session.edit_consents(|_| {}), Err(CarePlanError::NotLoaded));
    }

    #[tokio::test]
    async fn consent_changes_are_saved_once() {
        let store = Arc::new(returning_user_store());
        let session = session(store.clone());
        session.set_user("u1").await.expect("load");

        session
            .edit_consents(|c| c.group_mut(organization::RESEARCHERS).set_share_location(true))
            .expect("edit");
        let saved = session.save_consents().await.expect("save");

        assert_eq!(saved.len(), 1);
        assert!(saved[0].covers(organization::RESEARCHERS, &CONTENT_LOCATION.coding()));
        assert_eq!(saved[0].permission(), Some(ProvisionType::Permit));
        assert_eq!(store.inner.consents().await.len(), 1);

        assert!(session.save_consents().await.expect("second save").is_empty());
    }

    #[tokio::test]
    async fn consents_saved_across_a_reload_are_still_returned() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = Arc::new(ScriptedStore {
            persist_pause: Some(Pause {
                entered: entered.clone(),
                release: release.clone(),
            }),
            ..returning_user_store()
        });
        let session = Arc::new(session(store.clone()));
        session.set_user("u1").await.expect("load");
        session
            .edit_consents(|c| c.group_mut(organization::RESEARCHERS).set_share_location(true))
            .expect("edit");

        let saving = {
            let session = session.clone();
            tokio::spawn(async move { session.save_consents().await })
        };
        entered.notified().await;
        session.set_user("u1").await.expect("reload");
        release.notify_one();

        let saved = saving.await.expect("task").expect("save");
        assert_eq!(saved.len(), 1);
        assert_eq!(store.inner.consents().await.len(), 1);
        assert_eq!(session.snapshot().state, LoadState::Ready);
    }

    #[tokio::test]
    async fn template_messages_are_saved_against_care_plan() {
        let store = Arc::new(returning_user_store());
        let session = session(store.clone());
        session.set_user("u1").await.expect("load");

        let template = fhir::PlanDefinition::default_schedule().expect("template");
        let now = Utc::now().fixed_offset();
        let mut messages = session
            .plan_messages_from_template(&template, &Replacements::new(), now)
            .expect("schedule");
        session
            .save_plan_messages(&mut messages)
            .await
            .expect("save");

        let care_plan = session.snapshot().care_plan.expect("care plan");
        let linked = care_plan
            .activity
            .iter()
            .filter(|a| a.reference.is_some())
            .count();
        assert_eq!(linked, messages.requests().len());
        assert_eq!(care_plan.questionnaire_references(), vec!["Questionnaire/q1"]);
        assert_eq!(
            store.inner.communication_requests().await.len(),
            messages.requests().len()
        );
    }
}
