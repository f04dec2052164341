//! Lookup of questionnaire items by link id across every loaded questionnaire.

use fhir::{Questionnaire, QuestionnaireItem};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuestionIndex {
    by_link_id: HashMap<String, QuestionnaireItem>,
}

impl QuestionIndex {
    /// Index every item, including items nested in groups. A later duplicate link id
    /// replaces an earlier one.
    pub fn build(questionnaires: &[Questionnaire]) -> Self {
        let mut index = Self::default();
        for questionnaire in questionnaires {
            index.insert_all(&questionnaire.item);
        }
        index
    }

    fn insert_all(&mut self, items: &[QuestionnaireItem]) {
        for item in items {
            self.by_link_id.insert(item.link_id.clone(), item.clone());
            self.insert_all(&item.item);
        }
    }

    pub fn get(&self, link_id: &str) -> Option<&QuestionnaireItem> {
        self.by_link_id.get(link_id)
    }

    pub fn len(&self) -> usize {
        self.by_link_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_link_id.is_empty()
    }
}
