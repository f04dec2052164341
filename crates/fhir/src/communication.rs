//! FHIR-aligned record of a message that was sent or received. Immutable once created.

use crate::codes::{KnownCode, COMMUNICATION_IN_PROGRESS, EXT_MESSAGE_THEME, SYSTEM_ANNOUNCEMENT};
use crate::datatypes::{CodeableConcept, Extension, Payload, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Payload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipient: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medium: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub part_of: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

impl Communication {
    /// All payload strings joined by newlines.
    pub fn display_text(&self) -> String {
        self.payload
            .iter()
            .filter_map(|p| p.content_string.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_in_progress(&self) -> bool {
        self.status.as_deref() == Some(COMMUNICATION_IN_PROGRESS)
    }

    /// Values of every message-theme extension.
    pub fn themes(&self) -> Vec<&str> {
        self.extension
            .iter()
            .filter(|e| e.url == EXT_MESSAGE_THEME)
            .filter_map(|e| e.value_string.as_deref())
            .collect()
    }

    pub fn has_category(&self, code: &KnownCode) -> bool {
        self.category
            .iter()
            .flat_map(|c| c.coding.iter())
            .any(|c| code.matches(c))
    }

    pub fn is_system_announcement(&self) -> bool {
        self.has_category(&SYSTEM_ANNOUNCEMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_text_themes_and_status() {
        let json = r#"{
            "resourceType": "Communication",
            "id": "c1",
            "status": "in-progress",
            "sent": "2024-02-01T10:00:00Z",
            "payload": [{"contentString": "line one"}, {"contentString": "line two"}],
            "extension": [
                {"url": "http://isacc.app/fhir/StructureDefinition/message-theme", "valueString": "support"},
                {"url": "http://example.org/other", "valueString": "ignored"}
            ]
        }"#;
        let communication: Communication = serde_json::from_str(json).unwrap();
        assert_eq!(communication.display_text(), "line one\nline two");
        assert_eq!(communication.themes(), vec!["support"]);
        assert!(communication.is_in_progress());
        assert!(!communication.is_system_announcement());
    }
}
