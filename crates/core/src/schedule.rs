//! Outgoing message schedule generation.
//!
//! Turns a [`PlanTemplate`] into dated message drafts for one patient:
//! - every recurring activity yields one draft at `now + period` weeks, pinned to the
//!   activity's time of day when it has one
//! - the anniversary activity (when the template binds one and the patient has a birth date)
//!   yields one draft per birth anniversary inside the program window
//!
//! The program window runs from the earliest to the latest non-anniversary draft. Drafts are
//! returned in ascending time order; equal times keep template order.

use crate::constants::WEEK_UNIT;
use crate::{ScheduleError, ScheduleResult};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use fhir::{ActivityRule, Patient, PlanTemplate};
use std::collections::BTreeMap;

const MILLIS_PER_WEEK: f64 = 7.0 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Placeholder name to replacement text, e.g. `{name}` -> `Alex`.
pub type Replacements = BTreeMap<String, String>;

/// A message that has text and a send time but is not yet a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageDraft {
    pub activity_id: String,
    pub text: String,
    pub scheduled_at: DateTime<FixedOffset>,
}

/// Build the dated drafts for one patient.
///
/// `now` fixes both the start instant and the offset in which times of day are applied.
pub fn generate_message_drafts(
    template: &PlanTemplate,
    birth_date: Option<NaiveDate>,
    replacements: &Replacements,
    now: DateTime<FixedOffset>,
) -> ScheduleResult<Vec<MessageDraft>> {
    let mut drafts = Vec::new();

    for activity in &template.activities {
        if template.is_anniversary_activity(&activity.id) || activity.recurrence.is_none() {
            continue;
        }
        let occurrence = occurrence_from(now, activity)?;
        let scheduled_at = match time_of_day(activity)? {
            Some(time) => at_time_of_day(occurrence.date_naive(), time, now.offset(), activity)?,
            None => occurrence,
        };
        drafts.push(MessageDraft {
            activity_id: activity.id.clone(),
            text: resolve_placeholders(&activity.payload_template, replacements),
            scheduled_at,
        });
    }

    let window = drafts
        .iter()
        .map(|d| d.scheduled_at)
        .min()
        .zip(drafts.iter().map(|d| d.scheduled_at).max());

    if let (Some(activity), Some(birth_date), Some((start, end))) =
        (template.anniversary_activity(), birth_date, window)
    {
        let time = time_of_day(activity)?.ok_or_else(|| ScheduleError::MissingTimeOfDay {
            activity_id: activity.id.clone(),
        })?;
        let text = resolve_placeholders(&activity.payload_template, replacements);
        for date in anniversaries_between(start.date_naive(), end.date_naive(), birth_date) {
            drafts.push(MessageDraft {
                activity_id: activity.id.clone(),
                text: text.clone(),
                scheduled_at: at_time_of_day(date, time, now.offset(), activity)?,
            });
        }
    }

    drafts.sort_by_key(|d| d.scheduled_at);
    Ok(drafts)
}

/// `now` advanced by the activity's recurrence period.
pub fn occurrence_from(
    now: DateTime<FixedOffset>,
    activity: &ActivityRule,
) -> ScheduleResult<DateTime<FixedOffset>> {
    let Some(recurrence) = &activity.recurrence else {
        return Ok(now);
    };

    match recurrence.unit.as_deref() {
        Some(WEEK_UNIT) => {}
        other => {
            return Err(ScheduleError::UnsupportedPeriodUnit {
                activity_id: activity.id.clone(),
                unit: other.unwrap_or("<none>").to_owned(),
            })
        }
    }

    let invalid = || ScheduleError::InvalidPeriod {
        activity_id: activity.id.clone(),
        period: recurrence.period,
    };
    if !recurrence.period.is_finite() || recurrence.period < 0.0 {
        return Err(invalid());
    }

    let millis = (recurrence.period * MILLIS_PER_WEEK).round();
    if millis > i64::MAX as f64 {
        return Err(invalid());
    }
    let offset = Duration::try_milliseconds(millis as i64).ok_or_else(invalid)?;
    now.checked_add_signed(offset).ok_or_else(invalid)
}

/// The activity's single time of day, if it has one.
fn time_of_day(activity: &ActivityRule) -> ScheduleResult<Option<NaiveTime>> {
    match activity.times_of_day.as_slice() {
        [] => Ok(None),
        [value] => parse_time_of_day(value)
            .map(Some)
            .ok_or_else(|| ScheduleError::InvalidTimeOfDay {
                activity_id: activity.id.clone(),
                value: value.clone(),
            }),
        many => Err(ScheduleError::MultipleTimesOfDay {
            activity_id: activity.id.clone(),
            count: many.len(),
        }),
    }
}

/// FHIR `time`: `HH:MM:SS`, optionally with fractional seconds. `HH:MM` is also accepted.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn at_time_of_day(
    date: NaiveDate,
    time: NaiveTime,
    offset: &FixedOffset,
    activity: &ActivityRule,
) -> ScheduleResult<DateTime<FixedOffset>> {
    // A fixed offset has no gaps or folds, so this is always `Single`.
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .ok_or_else(|| ScheduleError::InvalidTimeOfDay {
            activity_id: activity.id.clone(),
            value: time.to_string(),
        })
}

/// Every birth anniversary from `start` to `end`, both inclusive.
///
/// A 29 February birth date falls on 28 February in non-leap years.
pub fn anniversaries_between(start: NaiveDate, end: NaiveDate, birth: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    if end < start {
        return dates;
    }

    let mut year = start.year();
    while let Some(candidate) = anniversary_in_year(birth, year) {
        if candidate > end {
            break;
        }
        if candidate >= start {
            dates.push(candidate);
        }
        year += 1;
    }
    dates
}

fn anniversary_in_year(birth: NaiveDate, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, birth.month(), 28))
}

/// `{name}` from the patient's preferred or first name, `{userName}` from the sender.
pub fn patient_replacements(patient: &Patient, sender_name: Option<&str>) -> Replacements {
    let mut replacements = Replacements::new();
    if let Some(name) = patient.preferred_name().or_else(|| patient.first_name()) {
        replacements.insert("name".to_owned(), name.to_owned());
    }
    if let Some(sender) = sender_name {
        replacements.insert("userName".to_owned(), sender.to_owned());
    }
    replacements
}

/// Replace every `{key}` token in one left-to-right pass.
///
/// Substituted values are never scanned again, and unknown tokens are kept verbatim.
pub fn resolve_placeholders(text: &str, replacements: &Replacements) -> String {
    let mut resolved = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        resolved.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        // A nested `{` restarts the token at the inner brace.
        match after.find(|c: char| c == '{' || c == '}') {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                match replacements.get(key) {
                    Some(value) => resolved.push_str(value),
                    None => {
                        resolved.push('{');
                        resolved.push_str(key);
                        resolved.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            Some(inner) => {
                resolved.push('{');
                resolved.push_str(&after[..inner]);
                rest = &after[inner..];
            }
            None => {
                resolved.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    resolved.push_str(rest);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::{PlanDefinition, Recurrence, TriggerKind, TriggerRule};

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-01-10T08:15:00-05:00").expect("valid timestamp")
    }

    fn activity(id: &str, weeks: Option<f64>, times: &[&str], text: &str) -> ActivityRule {
        ActivityRule {
            id: id.into(),
            recurrence: weeks.map(|period| Recurrence {
                period,
                unit: Some("wk".into()),
            }),
            times_of_day: times.iter().map(|t| t.to_string()).collect(),
            payload_template: text.into(),
        }
    }

    fn birthday_trigger(id: &str) -> TriggerRule {
        TriggerRule {
            activity_id: id.into(),
            kind: TriggerKind::NamedEvent("birthday".into()),
        }
    }

    fn names() -> Replacements {
        Replacements::from([("name".to_string(), "Alex".to_string())])
    }

    #[test]
    fn recurring_activities_are_offset_and_pinned() {
        let template = PlanTemplate {
            activities: vec![
                activity("later", Some(2.0), &["17:30:00"], "Bye {name}"),
                activity("first", Some(1.0), &["10:00:00"], "Hi {name}, hi {name}"),
            ],
            ..PlanTemplate::default()
        };

        let drafts = generate_message_drafts(&template, None, &names(), now()).expect("drafts");
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].activity_id, "first");
        assert_eq!(drafts[0].text, "Hi Alex, hi Alex");
        assert_eq!(drafts[0].scheduled_at.to_rfc3339(), "2024-01-17T10:00:00-05:00");
        assert_eq!(drafts[1].scheduled_at.to_rfc3339(), "2024-01-24T17:30:00-05:00");
    }

    #[test]
    fn activity_without_time_keeps_clock_time() {
        let template = PlanTemplate {
            activities: vec![activity("plain", Some(1.0), &[], "hello")],
            ..PlanTemplate::default()
        };
        let drafts = generate_message_drafts(&template, None, &names(), now()).expect("drafts");
        assert_eq!(drafts[0].scheduled_at.to_rfc3339(), "2024-01-17T08:15:00-05:00");
    }

    #[test]
    fn anniversaries_inside_window_are_added() {
        let template = PlanTemplate {
            activities: vec![
                activity("start", Some(0.0), &["10:00:00"], "Welcome"),
                activity("end", Some(62.0), &["10:00:00"], "Goodbye"),
                activity("bday", None, &["09:00:00"], "Happy birthday {name}!"),
            ],
            triggers: vec![birthday_trigger("bday")],
            ..PlanTemplate::default()
        };
        let birth = NaiveDate::from_ymd_opt(1990, 3, 15).expect("date");

        let drafts =
            generate_message_drafts(&template, Some(birth), &names(), now()).expect("drafts");
        let birthdays: Vec<_> = drafts
            .iter()
            .filter(|d| d.activity_id == "bday")
            .map(|d| d.scheduled_at.to_rfc3339())
            .collect();
        assert_eq!(
            birthdays,
            vec!["2024-03-15T09:00:00-05:00", "2025-03-15T09:00:00-05:00"]
        );
        assert!(drafts.iter().any(|d| d.text == "Happy birthday Alex!"));
        assert!(drafts
            .windows(2)
            .all(|pair| pair[0].scheduled_at <= pair[1].scheduled_at));
    }

    #[test]
    fn anniversary_skipped_without_birth_date() {
        let template = PlanTemplate {
            activities: vec![
                activity("start", Some(1.0), &["10:00:00"], "Welcome"),
                activity("bday", None, &["09:00:00"], "Happy birthday"),
            ],
            triggers: vec![birthday_trigger("bday")],
            ..PlanTemplate::default()
        };
        let drafts = generate_message_drafts(&template, None, &names(), now()).expect("drafts");
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn no_fixed_period_activities_means_no_anniversaries() {
        let birth = NaiveDate::from_ymd_opt(1990, 3, 15).expect("date");
        let timed = PlanTemplate {
            activities: vec![activity("bday", None, &["09:00:00"], "Happy birthday")],
            triggers: vec![birthday_trigger("bday")],
            ..PlanTemplate::default()
        };
        let drafts =
            generate_message_drafts(&timed, Some(birth), &names(), now()).expect("drafts");
        assert!(drafts.is_empty());

        let untimed = PlanTemplate {
            activities: vec![activity("bday", None, &[], "Happy birthday")],
            triggers: vec![birthday_trigger("bday")],
            ..PlanTemplate::default()
        };
        assert_eq!(
            generate_message_drafts(&untimed, Some(birth), &names(), now()),
            Ok(vec![])
        );
    }

    #[test]
    fn anniversary_without_time_of_day_is_rejected() {
        let template = PlanTemplate {
            activities: vec![
                activity("start", Some(1.0), &[], "Welcome"),
                activity("bday", None, &[], "Happy birthday"),
            ],
            triggers: vec![birthday_trigger("bday")],
            ..PlanTemplate::default()
        };
        let birth = NaiveDate::from_ymd_opt(1990, 1, 20).expect("date");
        let err = generate_message_drafts(&template, Some(birth), &names(), now())
            .expect_err("missing time");
        assert_eq!(
            err,
            ScheduleError::MissingTimeOfDay {
                activity_id: "bday".into()
            }
        );
    }

    #[test]
    fn rejects_unsupported_unit() {
        let mut rule = activity("monthly", Some(1.0), &[], "x");
        rule.recurrence = Some(Recurrence {
            period: 1.0,
            unit: Some("mo".into()),
        });
        let template = PlanTemplate {
            activities: vec![rule],
            ..PlanTemplate::default()
        };
        let err = generate_message_drafts(&template, None, &names(), now()).expect_err("unit");
        match err {
            ScheduleError::UnsupportedPeriodUnit { activity_id, unit } => {
                assert_eq!(activity_id, "monthly");
                assert_eq!(unit, "mo");
            }
            other => panic!("expected UnsupportedPeriodUnit, got {other:?}"),
        }
    }

    #[test]
    fn rejects_multiple_times_of_day() {
        let template = PlanTemplate {
            activities: vec![activity("twice", Some(1.0), &["09:00:00", "18:00:00"], "x")],
            ..PlanTemplate::default()
        };
        let err = generate_message_drafts(&template, None, &names(), now()).expect_err("times");
        assert_eq!(
            err,
            ScheduleError::MultipleTimesOfDay {
                activity_id: "twice".into(),
                count: 2
            }
        );
    }

    #[test]
    fn anniversary_window_is_inclusive() {
        let birth = NaiveDate::from_ymd_opt(1990, 3, 15).expect("date");
        let start = NaiveDate::from_ymd_opt(2024, 3, 15).expect("date");
        let end = NaiveDate::from_ymd_opt(2025, 3, 15).expect("date");
        assert_eq!(anniversaries_between(start, end, birth), vec![start, end]);

        let narrow_end = NaiveDate::from_ymd_opt(2025, 1, 10).expect("date");
        let narrow_start = NaiveDate::from_ymd_opt(2024, 1, 10).expect("date");
        assert_eq!(
            anniversaries_between(narrow_start, narrow_end, birth),
            vec![start]
        );
    }

    #[test]
    fn leap_day_birthday_falls_back_to_28th() {
        let birth = NaiveDate::from_ymd_opt(2000, 2, 29).expect("date");
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).expect("date");
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).expect("date");
        assert_eq!(
            anniversaries_between(start, end, birth),
            vec![
                NaiveDate::from_ymd_opt(2023, 2, 28).expect("date"),
                NaiveDate::from_ymd_opt(2024, 2, 29).expect("date"),
            ]
        );
    }

    #[test]
    fn unresolved_placeholders_are_left_verbatim() {
        assert_eq!(
            resolve_placeholders("Hi {name}, from {userName}", &names()),
            "Hi Alex, from {userName}"
        );
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let replacements = Replacements::from([
            ("name".to_string(), "{userName}".to_string()),
            ("userName".to_string(), "Sam".to_string()),
        ]);
        assert_eq!(
            resolve_placeholders("Hi {name}, from {userName}", &replacements),
            "Hi {userName}, from Sam"
        );
        assert_eq!(
            resolve_placeholders("{{name}} and {name", &names()),
            "{Alex} and {name"
        );
    }

    #[test]
    fn replacements_prefer_usual_name() {
        let patient = Patient {
            name: vec![
                fhir::HumanName {
                    use_type: Some(fhir::NameUse::Official),
                    family: Some("Rivera".into()),
                    given: vec!["Alexandra".into()],
                },
                fhir::HumanName {
                    use_type: Some(fhir::NameUse::Usual),
                    family: None,
                    given: vec!["Alex".into()],
                },
            ],
            ..Patient::default()
        };
        let replacements = patient_replacements(&patient, Some("Sam"));
        assert_eq!(replacements.get("name").map(String::as_str), Some("Alex"));
        assert_eq!(replacements.get("userName").map(String::as_str), Some("Sam"));
    }

    #[test]
    fn time_of_day_formats() {
        assert_eq!(parse_time_of_day("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time_of_day("17:45:10"), NaiveTime::from_hms_opt(17, 45, 10));
        assert_eq!(parse_time_of_day("25:00:00"), None);
    }

    #[test]
    fn default_schedule_generates_drafts() {
        let template = PlanDefinition::default_schedule().expect("bundled template");
        let birth = NaiveDate::from_ymd_opt(1990, 6, 1).expect("date");
        let mut replacements = names();
        replacements.insert("userName".into(), "Sam".into());

        let drafts =
            generate_message_drafts(&template, Some(birth), &replacements, now()).expect("drafts");
        assert!(drafts.iter().any(|d| d.activity_id == "birthday"));
        assert!(drafts.iter().all(|d| !d.text.contains('{')));
        assert_eq!(drafts[0].text, "Hi Alex, this is Sam from ISACC. We're here whenever you want to talk.");
    }
}
