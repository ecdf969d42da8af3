use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use super::status::AddOnStatus;

pub const DEFAULT_LABEL_DOMAIN: &str = "open-cluster-management.io";

// the part of a label key after the `/` is limited to 63 characters
const MAX_LABEL_NAME_LEN: usize = 63;
const ADDON_NAME_PREFIX: &str = "addon-";

/// The reserved `feature.<domain>/addon-<name>` label namespace owned by this operator.
/// Labels outside of it are never read or written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddOnLabels {
    prefix: String,
}

impl Default for AddOnLabels {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_DOMAIN)
    }
}

impl AddOnLabels {
    pub fn new(domain: &str) -> Self {
        Self {
            prefix: format!("feature.{domain}/{ADDON_NAME_PREFIX}"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, addon: &str) -> String {
        format!("{}{addon}", self.prefix)
    }

    /// Whether the label key for `addon` would be accepted by the apiserver. Add-on names
    /// can be up to 253 characters, label names only up to 63.
    pub fn has_valid_key(&self, addon: &str) -> bool {
        !addon.is_empty() && ADDON_NAME_PREFIX.len() + addon.len() <= MAX_LABEL_NAME_LEN
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Diff the reserved subset of `current` against the full desired set. Reserved keys
    /// missing from `desired` are removed.
    pub fn diff(
        &self,
        current: &BTreeMap<String, String>,
        desired: &BTreeMap<String, String>,
    ) -> Option<LabelPatch> {
        let mut patch = LabelPatch::default();

        for (key, value) in desired {
            debug_assert!(self.is_reserved(key), "{key} is not an add-on label");
            if current.get(key) != Some(value) {
                patch.upserts.insert(key.clone(), value.clone());
            }
        }

        patch.removals.extend(
            current
                .keys()
                .filter(|key| self.is_reserved(key) && !desired.contains_key(*key))
                .cloned(),
        );

        (!patch.is_empty()).then_some(patch)
    }

    /// Diff a single add-on's label. `None` means the label should not exist.
    pub fn diff_one(
        &self,
        current: &BTreeMap<String, String>,
        addon: &str,
        desired: Option<AddOnStatus>,
    ) -> Option<LabelPatch> {
        let key = self.key(addon);
        let mut patch = LabelPatch::default();

        match (current.get(&key), desired) {
            (Some(value), Some(status)) if value == status.as_str() => return None,
            (_, Some(status)) => {
                patch.upserts.insert(key, status.to_string());
            }
            (Some(_), None) => {
                patch.removals.insert(key);
            }
            (None, None) => return None,
        }

        Some(patch)
    }
}

/// A set of label changes applied as a single JSON merge patch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelPatch {
    pub upserts: BTreeMap<String, String>,
    pub removals: BTreeSet<String>,
}

impl LabelPatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Render as an RFC 7386 merge patch: upserts carry their value, removals are null
    pub fn to_merge_patch(&self) -> Value {
        let mut labels = Map::new();
        for (key, value) in &self.upserts {
            labels.insert(key.clone(), Value::String(value.clone()));
        }
        for key in &self.removals {
            labels.insert(key.clone(), Value::Null);
        }
        json!({ "metadata": { "labels": labels } })
    }
}
