use std::fmt;

/// The working-set collections fetched in parallel once patient and care plan are known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubLoad {
    Communications,
    Questionnaires,
    QuestionnaireResponses,
    Consents,
}

impl fmt::Display for SubLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Communications => "communications",
            Self::Questionnaires => "questionnaires",
            Self::QuestionnaireResponses => "questionnaire responses",
            Self::Consents => "consents",
        };
        f.write_str(label)
    }
}

/// Failures reported by a [`crate::store::CarePlanStore`] implementation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("identifier {identifier} matches {count} patient records")]
    AmbiguousMatch { identifier: String, count: usize },
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A message template that cannot be turned into a schedule.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("activity '{activity_id}' uses unsupported period unit '{unit}'")]
    UnsupportedPeriodUnit { activity_id: String, unit: String },
    #[error("activity '{activity_id}' has {count} timeOfDay values; only one is supported")]
    MultipleTimesOfDay { activity_id: String, count: usize },
    #[error("anniversary activity '{activity_id}' has no timeOfDay")]
    MissingTimeOfDay { activity_id: String },
    #[error("activity '{activity_id}' has invalid timeOfDay '{value}'")]
    InvalidTimeOfDay { activity_id: String, value: String },
    #[error("activity '{activity_id}' has unusable period {period}")]
    InvalidPeriod { activity_id: String, period: f64 },
}

pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;

/// Errors surfaced by the care plan session and the engines built on it.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CarePlanError {
    #[error("No user information. Please log in again.")]
    NoUser,
    /// The store's ambiguity error, passed through unchanged.
    #[error("{0}")]
    AmbiguousPatientMatch(StoreError),
    #[error("could not look up patient: {0}")]
    PatientLookup(StoreError),
    #[error("failed to create patient record: {0}")]
    PatientCreation(StoreError),
    #[error("could not look up care plan: {0}")]
    CarePlanLookup(StoreError),
    #[error("failed to create care plan record: {0}")]
    CarePlanCreation(StoreError),
    #[error("failed to load {stage}: {source}")]
    SubLoad {
        stage: SubLoad,
        #[source]
        source: StoreError,
    },
    #[error("message schedule configuration error: {0}")]
    Configuration(#[from] ScheduleError),
    #[error("failed to save record: {0}")]
    Persistence(StoreError),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no patient session is loaded")]
    NotLoaded,
    #[error("load for generation {generation} was superseded by a newer session")]
    Superseded { generation: u64 },
}

pub type CarePlanResult<T> = std::result::Result<T, CarePlanError>;
