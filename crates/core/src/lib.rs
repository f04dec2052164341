//! # ISACC Core
//!
//! Care plan messaging logic for the ISACC program.
//!
//! This crate contains:
//! - the care plan session: patient and care plan bootstrap, working-set load, snapshot
//! - the data-sharing consent snapshot and its diff into new consent records
//! - message schedule generation from plan definition templates
//! - construction of outgoing CommunicationRequest records and care plan activity upkeep
//!
//! **No transport concerns**: the remote FHIR store is reached only through the
//! [`CarePlanStore`] trait. HTTP, auth and UI belong to the embedding application.

pub mod config;
pub mod consents;
pub mod constants;
pub mod error;
pub mod plan_messages;
pub mod questions;
pub mod requests;
pub mod schedule;
pub mod session;
pub mod store;

pub use config::SessionConfig;
pub use consents::{ConsentGroup, ContentClassKey, DataSharingConsents};
pub use error::{
    CarePlanError, CarePlanResult, ScheduleError, ScheduleResult, StoreError, StoreResult,
    SubLoad,
};
pub use plan_messages::{enrollment_care_plan, PlanMessages};
pub use questions::QuestionIndex;
pub use requests::CommunicationRequestFactory;
pub use schedule::{generate_message_drafts, MessageDraft, Replacements};
pub use session::{CarePlanSession, LoadState, SessionEvent, SessionSnapshot};
pub use store::{CarePlanStore, InMemoryStore};
