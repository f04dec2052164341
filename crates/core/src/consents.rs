//! Data-sharing consent snapshot and diff.
//!
//! Responsibilities:
//! - group raw consent records into an organization -> content class -> permission snapshot
//! - let callers change permissions on the snapshot
//! - compute the minimal set of new consent records that records those changes
//!
//! Notes:
//! - Grouping replays records in ascending provision start order, so the latest record for
//!   an (organization, class) pair determines its permission.
//! - The diff compares against the same grouping of the baseline records, so an unchanged
//!   snapshot yields no new records.

use chrono::{DateTime, Utc};
use fhir::codes::{
    self, organization, KnownCode, CONTENT_ALL, CONTENT_CONTACT_INFORMATION, CONTENT_LOCATION,
    CONTENT_SYMPTOMS_TESTING_CONDITIONS,
};
use fhir::{Coding, Consent, Patient, ProvisionType};
use std::collections::BTreeMap;

/// Identity of a content class: its `(system, code)` pair. Display text is ignored.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentClassKey {
    system: Option<String>,
    code: Option<String>,
}

impl From<&Coding> for ContentClassKey {
    fn from(coding: &Coding) -> Self {
        Self {
            system: coding.system.clone(),
            code: coding.code.clone(),
        }
    }
}

impl From<&KnownCode> for ContentClassKey {
    fn from(code: &KnownCode) -> Self {
        Self {
            system: Some(code.system.to_owned()),
            code: Some(code.code.to_owned()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ClassPermission {
    class: Coding,
    permission: ProvisionType,
}

/// Permissions one organization holds, keyed by content class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsentGroup {
    permissions: BTreeMap<ContentClassKey, ClassPermission>,
}

impl ConsentGroup {
    pub fn permission(&self, class: &Coding) -> Option<ProvisionType> {
        self.permissions
            .get(&ContentClassKey::from(class))
            .map(|p| p.permission)
    }

    /// Insert or overwrite the permission for `class`.
    pub fn set_permission(&mut self, class: Coding, permission: ProvisionType) {
        self.permissions.insert(
            ContentClassKey::from(&class),
            ClassPermission { class, permission },
        );
    }

    /// Record `permission` only when the class has none yet.
    fn put_if_absent(&mut self, class: Coding, permission: ProvisionType) {
        self.permissions
            .entry(ContentClassKey::from(&class))
            .or_insert(ClassPermission { class, permission });
    }

    /// Content classes and their permissions, ordered by `(system, code)`.
    pub fn iter(&self) -> impl Iterator<Item = (&Coding, ProvisionType)> {
        self.permissions.values().map(|p| (&p.class, p.permission))
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    fn is_permitted(&self, code: &KnownCode) -> bool {
        self.permissions
            .get(&ContentClassKey::from(code))
            .is_some_and(|p| p.permission == ProvisionType::Permit)
    }

    fn set_known(&mut self, code: &KnownCode, permit: bool) {
        self.set_permission(code.coding(), ProvisionType::from_permit(permit));
    }

    pub fn share_location(&self) -> bool {
        self.is_permitted(&CONTENT_LOCATION)
    }

    pub fn set_share_location(&mut self, permit: bool) {
        self.set_known(&CONTENT_LOCATION, permit);
    }

    pub fn share_symptoms(&self) -> bool {
        self.is_permitted(&CONTENT_SYMPTOMS_TESTING_CONDITIONS)
    }

    pub fn set_share_symptoms(&mut self, permit: bool) {
        self.set_known(&CONTENT_SYMPTOMS_TESTING_CONDITIONS, permit);
    }

    pub fn share_contact_info(&self) -> bool {
        self.is_permitted(&CONTENT_CONTACT_INFORMATION)
    }

    pub fn set_share_contact_info(&mut self, permit: bool) {
        self.set_known(&CONTENT_CONTACT_INFORMATION, permit);
    }

    pub fn share_all(&self) -> bool {
        self.is_permitted(&CONTENT_ALL)
    }

    pub fn set_share_all(&mut self, permit: bool) {
        self.set_known(&CONTENT_ALL, permit);
    }
}

/// Working snapshot of a patient's data-sharing consents plus the baseline it came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataSharingConsents {
    baseline: Vec<Consent>,
    baseline_groups: BTreeMap<String, ConsentGroup>,
    groups: BTreeMap<String, ConsentGroup>,
}

impl DataSharingConsents {
    pub fn new(consents: Vec<Consent>) -> Self {
        let baseline_groups = group_consents(&consents);
        Self {
            groups: baseline_groups.clone(),
            baseline: consents,
            baseline_groups,
        }
    }

    /// The records the snapshot was built from.
    pub fn baseline(&self) -> &[Consent] {
        &self.baseline
    }

    /// Discard every change made since construction.
    pub fn reset(&mut self) {
        self.groups = self.baseline_groups.clone();
    }

    pub fn group(&self, organization: &str) -> Option<&ConsentGroup> {
        self.groups.get(organization)
    }

    /// The organization's group, created empty when absent.
    pub fn group_mut(&mut self, organization: &str) -> &mut ConsentGroup {
        self.groups.entry(organization.to_owned()).or_default()
    }

    pub fn set_permission(&mut self, organization: &str, class: Coding, permission: ProvisionType) {
        self.group_mut(organization).set_permission(class, permission);
    }

    pub fn permission(&self, organization: &str, class: &Coding) -> Option<ProvisionType> {
        self.group(organization).and_then(|g| g.permission(class))
    }

    /// Organizations in the snapshot, ordered by reference.
    pub fn organizations(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(ConsentGroup::is_empty)
    }

    /// New consent records for every pair whose permission differs from the baseline.
    ///
    /// Each record references `patient`, has an active status, the patient-privacy scope and
    /// consent category, and a provision period starting at `now`.
    pub fn generate_new_consents(&self, patient: &Patient, now: DateTime<Utc>) -> Vec<Consent> {
        let subject = patient.reference();
        let mut consents = Vec::new();

        for (org, group) in &self.groups {
            let baseline = self.baseline_groups.get(org);
            for (class, permission) in group.iter() {
                let unchanged =
                    baseline.and_then(|g| g.permission(class)) == Some(permission);
                if unchanged {
                    continue;
                }
                consents.push(Consent::make(
                    subject.clone(),
                    codes::organization_reference(org),
                    class.clone(),
                    permission,
                    now,
                ));
            }
        }

        consents
    }

    /// Fold newly saved records into the baseline, leaving current edits in place.
    pub fn accept_saved(&mut self, saved: Vec<Consent>) {
        self.baseline.extend(saved);
        self.baseline_groups = group_consents(&self.baseline);
    }
}

fn group_consents(consents: &[Consent]) -> BTreeMap<String, ConsentGroup> {
    let mut ordered: Vec<&Consent> = consents.iter().collect();
    ordered.sort_by_key(|c| c.period_start());

    // Latest record per pair wins, so replay newest first and keep the first seen.
    let mut groups: BTreeMap<String, ConsentGroup> = BTreeMap::new();
    for consent in ordered.into_iter().rev() {
        let (Some(org), Some(class), Some(permission)) = (
            consent.organization_reference(),
            consent.content_class(),
            consent.permission(),
        ) else {
            tracing::debug!(
                consent_id = consent.id.as_deref().unwrap_or_default(),
                "skipping consent without organization, class or permission"
            );
            continue;
        };
        groups
            .entry(org.to_owned())
            .or_default()
            .put_if_absent(class.clone(), permission);
    }
    groups
}

/// Organization and content-class pairs the sharing preferences screen asks about.
pub fn consent_catalogue() -> Vec<(&'static str, KnownCode)> {
    let mut catalogue = Vec::new();
    for org in [organization::PUBLIC_HEALTH_AGENCIES, organization::RESEARCHERS] {
        for class in [
            CONTENT_LOCATION,
            CONTENT_SYMPTOMS_TESTING_CONDITIONS,
            CONTENT_CONTACT_INFORMATION,
        ] {
            catalogue.push((org, class));
        }
    }
    for org in [
        organization::SCAN,
        organization::FIU,
        organization::FIU_NEIGHBORHOOD_HELP,
        organization::SOCIAL_DISTANCING_STUDY,
    ] {
        catalogue.push((org, CONTENT_ALL));
    }
    catalogue
}

/// The latest recorded consent for each catalogue pair, with an unsaved default denial for
/// pairs that have none. Records outside the catalogue are dropped.
pub fn relevant_consents(patient: &Patient, fetched: &[Consent], now: DateTime<Utc>) -> Vec<Consent> {
    consent_catalogue()
        .into_iter()
        .map(|(org, class)| {
            let coding = class.coding();
            fetched
                .iter()
                .filter(|c| c.covers(org, &coding))
                .max_by_key(|c| c.period_start())
                .cloned()
                .unwrap_or_else(|| {
                    Consent::make(
                        patient.reference(),
                        codes::organization_reference(org),
                        coding,
                        ProvisionType::Deny,
                        now,
                    )
                })
        })
        .collect()
}
