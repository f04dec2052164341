//! Constants used throughout the ISACC core crate.

/// Welcome text sent to a patient the first time their care plan is created.
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Welcome to ISACC! You'll get occasional messages from us. Reply any time to chat.";

/// Length of a newly created care plan's period.
pub const DEFAULT_CARE_PLAN_DURATION_DAYS: u32 = 365;

/// Upper bound on communications fetched for one patient.
pub const COMMUNICATIONS_PAGE_SIZE: usize = 200;

/// Recurrence unit accepted by the schedule engine.
pub const WEEK_UNIT: &str = "wk";

/// Intent carried by care plans this crate creates.
pub const CARE_PLAN_INTENT: &str = "plan";

/// Capacity of the session's change-notification channel.
pub const SESSION_EVENT_CAPACITY: usize = 64;

/// Environment variable names read by binaries when building a [`crate::SessionConfig`].
pub const ENV_USER_ID_SYSTEM: &str = "ISACC_USER_ID_SYSTEM";
pub const ENV_CAREPLAN_TEMPLATE: &str = "ISACC_CAREPLAN_TEMPLATE";
pub const ENV_WELCOME_MESSAGE: &str = "ISACC_WELCOME_MESSAGE";
pub const ENV_CAREPLAN_DURATION_DAYS: &str = "ISACC_CAREPLAN_DURATION_DAYS";
pub const ENV_FILL_DEFAULT_CONSENTS: &str = "ISACC_FILL_DEFAULT_CONSENTS";
