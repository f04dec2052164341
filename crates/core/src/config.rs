//! Session configuration.
//!
//! Configuration is resolved once at process startup and then passed into the session as
//! `Arc<SessionConfig>`. Nothing in this crate reads environment variables during a load;
//! binaries read them and hand the raw values to [`SessionConfig::from_env_values`].

use crate::constants::{DEFAULT_CARE_PLAN_DURATION_DAYS, DEFAULT_WELCOME_MESSAGE};
use crate::{CarePlanError, CarePlanResult};
use isacc_types::{NonEmptyText, ResourceRef};

/// Configuration shared by every load of a [`crate::CarePlanSession`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    user_id_system: NonEmptyText,
    care_plan_template: ResourceRef,
    welcome_message: NonEmptyText,
    care_plan_duration_days: u32,
    fill_default_consents: bool,
}

impl SessionConfig {
    /// Create a new `SessionConfig`.
    ///
    /// `care_plan_template` may be a bare id (`abc`) or a literal reference (`CarePlan/abc`).
    pub fn new(
        user_id_system: NonEmptyText,
        care_plan_template: &str,
        welcome_message: NonEmptyText,
        care_plan_duration_days: u32,
    ) -> CarePlanResult<Self> {
        let care_plan_template = care_plan_template_reference(care_plan_template)?;
        if care_plan_duration_days == 0 {
            return Err(CarePlanError::Config(
                "care plan duration must be at least one day".into(),
            ));
        }

        Ok(Self {
            user_id_system,
            care_plan_template,
            welcome_message,
            care_plan_duration_days,
            fill_default_consents: true,
        })
    }

    /// Build from raw environment values; blank values count as unset.
    ///
    /// The identifier system and template are required. The welcome message, plan duration
    /// and default-consent fill fall back to their defaults.
    pub fn from_env_values(
        user_id_system: Option<String>,
        care_plan_template: Option<String>,
        welcome_message: Option<String>,
        care_plan_duration_days: Option<String>,
        fill_default_consents: Option<String>,
    ) -> CarePlanResult<Self> {
        let user_id_system = non_blank(user_id_system)
            .ok_or_else(|| CarePlanError::Config("user id system is not set".into()))?;
        let care_plan_template = non_blank(care_plan_template)
            .ok_or_else(|| CarePlanError::Config("care plan template is not set".into()))?;
        let welcome_message =
            non_blank(welcome_message).unwrap_or_else(|| DEFAULT_WELCOME_MESSAGE.to_owned());
        let duration = match non_blank(care_plan_duration_days) {
            Some(raw) => raw.parse::<u32>().map_err(|e| {
                CarePlanError::Config(format!("invalid care plan duration '{raw}': {e}"))
            })?,
            None => DEFAULT_CARE_PLAN_DURATION_DAYS,
        };
        let fill = match non_blank(fill_default_consents) {
            Some(raw) => parse_flag(&raw)?,
            None => true,
        };

        let config = Self::new(
            text(user_id_system)?,
            &care_plan_template,
            text(welcome_message)?,
            duration,
        )?;
        Ok(config.with_default_consent_fill(fill))
    }

    /// Toggle filling unrecorded catalogue consents with default denials on load.
    pub fn with_default_consent_fill(mut self, enabled: bool) -> Self {
        self.fill_default_consents = enabled;
        self
    }

    pub fn user_id_system(&self) -> &str {
        self.user_id_system.as_str()
    }

    pub fn care_plan_template(&self) -> &ResourceRef {
        &self.care_plan_template
    }

    /// The template as the literal reference care plans carry in `basedOn`.
    pub fn care_plan_template_ref(&self) -> String {
        self.care_plan_template.to_string()
    }

    pub fn welcome_message(&self) -> &str {
        self.welcome_message.as_str()
    }

    pub fn care_plan_duration_days(&self) -> u32 {
        self.care_plan_duration_days
    }

    pub fn fill_default_consents(&self) -> bool {
        self.fill_default_consents
    }
}

fn care_plan_template_reference(value: &str) -> CarePlanResult<ResourceRef> {
    let value = value.trim();
    let reference = if value.contains('/') {
        ResourceRef::parse(value)
    } else {
        ResourceRef::new("CarePlan", value)
    }
    .map_err(|e| CarePlanError::Config(format!("invalid care plan template: {e}")))?;

    if reference.resource_type() != "CarePlan" {
        return Err(CarePlanError::Config(format!(
            "care plan template must reference a CarePlan, got {reference}"
        )));
    }
    Ok(reference)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn text(value: String) -> CarePlanResult<NonEmptyText> {
    NonEmptyText::new(value).map_err(|e| CarePlanError::Config(e.to_string()))
}

fn parse_flag(raw: &str) -> CarePlanResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CarePlanError::Config(format!(
            "expected a boolean flag, got '{other}'"
        ))),
    }
}
