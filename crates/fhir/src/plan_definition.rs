//! PlanDefinition wire model and its translation into a message-schedule template.
//!
//! Responsibilities:
//! - Define the strict subset of the FHIR PlanDefinition wire format ISACC reads
//! - Resolve each action's `#id` canonical against the contained ActivityDefinitions
//! - Expose a domain-level [`PlanTemplate`] with plain activity and trigger rules
//!
//! Notes:
//! - Time arithmetic and rule validation happen in the schedule generator, not here.
//!   This module only reshapes data.

use crate::{parse_json, FhirError, FhirResult};
use serde::{Deserialize, Serialize};

/// Named events that fire on the patient's birth month/day.
pub const ANNIVERSARY_EVENT_NAMES: [&str; 2] = ["anniversary", "birthday"];

/// `dynamicValue.path` carrying the message text.
const PAYLOAD_PATH: &str = "payload.contentString";

static DEFAULT_SCHEDULE_JSON: &str = include_str!("../templates/default_plan_definition.json");

// ============================================================================
// Public domain-level types
// ============================================================================

/// A reusable message-schedule template.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanTemplate {
    pub id: Option<String>,
    pub title: Option<String>,
    /// Activity rules in action order.
    pub activities: Vec<ActivityRule>,
    pub triggers: Vec<TriggerRule>,
}

/// One message rule inside a template.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityRule {
    pub id: String,
    pub recurrence: Option<Recurrence>,
    /// `HH:MM[:SS]` values as written in the template.
    pub times_of_day: Vec<String>,
    /// Message text; may contain substitution placeholders.
    pub payload_template: String,
}

/// A fixed recurrence period, e.g. `1 wk`.
#[derive(Clone, Debug, PartialEq)]
pub struct Recurrence {
    pub period: f64,
    pub unit: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    NamedEvent(String),
    Periodic,
    Other(String),
}

/// A trigger bound to one activity rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerRule {
    pub activity_id: String,
    pub kind: TriggerKind,
}

impl TriggerRule {
    pub fn is_anniversary(&self) -> bool {
        matches!(&self.kind, TriggerKind::NamedEvent(name)
            if ANNIVERSARY_EVENT_NAMES.contains(&name.as_str()))
    }
}

impl PlanTemplate {
    pub fn is_anniversary_activity(&self, activity_id: &str) -> bool {
        self.triggers
            .iter()
            .any(|t| t.activity_id == activity_id && t.is_anniversary())
    }

    /// The activity bound to the first anniversary trigger, if any.
    pub fn anniversary_activity(&self) -> Option<&ActivityRule> {
        let trigger = self.triggers.iter().find(|t| t.is_anniversary())?;
        self.activities.iter().find(|a| a.id == trigger.activity_id)
    }

    /// `PlanDefinition/<id>` when the template came from a stored resource.
    pub fn reference(&self) -> Option<String> {
        self.id.as_deref().map(|id| format!("PlanDefinition/{id}"))
    }
}

// ============================================================================
// Public PlanDefinition operations
// ============================================================================

/// PlanDefinition operations.
///
/// This is a zero-sized type used for namespacing plan-definition operations.
pub struct PlanDefinition;

impl PlanDefinition {
    /// Parse a PlanDefinition from FHIR JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON does not match the wire schema (the failing field path is reported),
    /// - `resourceType` is not `PlanDefinition`,
    /// - an action's `definitionCanonical` is not a local `#id` reference,
    /// - a referenced ActivityDefinition is not contained in the resource,
    /// - an ActivityDefinition has no `payload.contentString` dynamic value.
    pub fn parse(json_text: &str) -> FhirResult<PlanTemplate> {
        let wire: PlanDefinitionWire = parse_json(json_text, "PlanDefinition")?;

        if wire.resource_type != "PlanDefinition" {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'PlanDefinition', got '{}'",
                wire.resource_type
            )));
        }

        wire_to_domain(wire)
    }

    /// The schedule bundled with this crate.
    pub fn default_schedule() -> FhirResult<PlanTemplate> {
        Self::parse(DEFAULT_SCHEDULE_JSON)
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanDefinitionWire {
    resource_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    contained: Vec<ActivityDefinitionWire>,
    #[serde(default)]
    action: Vec<ActionWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDefinitionWire {
    id: String,
    #[serde(default)]
    timing_timing: Option<TimingWire>,
    #[serde(default)]
    dynamic_value: Vec<DynamicValueWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimingWire {
    #[serde(default)]
    repeat: Option<RepeatWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepeatWire {
    #[serde(default)]
    period: Option<f64>,
    #[serde(default)]
    period_unit: Option<String>,
    #[serde(default)]
    time_of_day: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct DynamicValueWire {
    path: String,
    expression: ExpressionWire,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpressionWire {
    #[serde(default)]
    expression: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionWire {
    definition_canonical: String,
    #[serde(default)]
    trigger: Vec<TriggerWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerWire {
    #[serde(rename = "type")]
    trigger_type: String,
    #[serde(default)]
    name: Option<String>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: PlanDefinitionWire) -> FhirResult<PlanTemplate> {
    let mut activities = Vec::with_capacity(wire.action.len());
    let mut triggers = Vec::new();

    for (idx, action) in wire.action.iter().enumerate() {
        let activity_id = action.definition_canonical.strip_prefix('#').ok_or_else(|| {
            FhirError::Translation(format!(
                "action[{idx}].definitionCanonical must reference a contained resource: {}",
                action.definition_canonical
            ))
        })?;

        let definition = wire
            .contained
            .iter()
            .find(|c| c.id == activity_id)
            .ok_or_else(|| {
                FhirError::Translation(format!(
                    "action[{idx}] references missing ActivityDefinition '{activity_id}'"
                ))
            })?;

        activities.push(activity_to_domain(definition)?);

        for trigger in &action.trigger {
            let kind = match (trigger.trigger_type.as_str(), &trigger.name) {
                ("named-event", Some(name)) => TriggerKind::NamedEvent(name.clone()),
                ("periodic", _) => TriggerKind::Periodic,
                (other, _) => TriggerKind::Other(other.to_owned()),
            };
            triggers.push(TriggerRule {
                activity_id: activity_id.to_owned(),
                kind,
            });
        }
    }

    Ok(PlanTemplate {
        id: wire.id,
        title: wire.title,
        activities,
        triggers,
    })
}

fn activity_to_domain(definition: &ActivityDefinitionWire) -> FhirResult<ActivityRule> {
    let payload_template = definition
        .dynamic_value
        .iter()
        .find(|d| d.path == PAYLOAD_PATH)
        .and_then(|d| d.expression.expression.clone())
        .ok_or_else(|| {
            FhirError::Translation(format!(
                "ActivityDefinition '{}' has no {PAYLOAD_PATH} dynamic value",
                definition.id
            ))
        })?;

    let repeat = definition
        .timing_timing
        .as_ref()
        .and_then(|t| t.repeat.as_ref());

    let recurrence = repeat.and_then(|r| {
        r.period.map(|period| Recurrence {
            period,
            unit: r.period_unit.clone(),
        })
    });

    Ok(ActivityRule {
        id: definition.id.clone(),
        recurrence,
        times_of_day: repeat.map(|r| r.time_of_day.clone()).unwrap_or_default(),
        payload_template,
    })
}
