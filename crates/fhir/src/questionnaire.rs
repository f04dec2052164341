//! FHIR-aligned questionnaire and questionnaire response records.

use crate::datatypes::{Coding, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_coding: Option<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

/// A question or group. Groups nest further items to any depth.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireItem {
    pub link_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer_option: Vec<AnswerOption>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

impl Questionnaire {
    pub fn reference(&self) -> Reference {
        Reference::to("Questionnaire", self.id.as_deref().unwrap_or_default())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_coding: Option<Coding>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    pub link_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer: Vec<Answer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ResponseItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Canonical of the answered questionnaire, e.g. `Questionnaire/q1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ResponseItem>,
}

impl QuestionnaireResponse {
    /// The id part of the `questionnaire` canonical.
    pub fn questionnaire_id(&self) -> Option<&str> {
        self.questionnaire
            .as_deref()
            .and_then(|q| q.split('/').nth(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_items() {
        let json = r#"{
            "resourceType": "Questionnaire",
            "id": "q1",
            "item": [
                {"linkId": "1", "type": "group", "item": [
                    {"linkId": "1.1", "type": "boolean", "text": "Feeling ok?"}
                ]}
            ]
        }"#;
        let questionnaire: Questionnaire = serde_json::from_str(json).unwrap();
        assert_eq!(questionnaire.item[0].item[0].link_id, "1.1");
        assert_eq!(questionnaire.item[0].item_type.as_deref(), Some("group"));
        assert_eq!(questionnaire.reference().as_str(), "Questionnaire/q1");
    }

    #[test]
    fn response_exposes_questionnaire_id() {
        let response = QuestionnaireResponse {
            questionnaire: Some("Questionnaire/q1".into()),
            ..QuestionnaireResponse::default()
        };
        assert_eq!(response.questionnaire_id(), Some("q1"));
        assert_eq!(QuestionnaireResponse::default().questionnaire_id(), None);
    }
}
