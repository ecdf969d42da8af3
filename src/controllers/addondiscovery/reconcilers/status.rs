use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

use crate::resources::managedclusteraddons::{ManagedClusterAddOn, ADDON_CONDITION_AVAILABLE};

/// The status of a Kubernetes condition. Anything other than `True` or `False` is `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<&str> for ConditionStatus {
    fn from(status: &str) -> Self {
        match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// The value written to an add-on's feature label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddOnStatus {
    Available,
    Unhealthy,
    Unreachable,
}

impl AddOnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddOnStatus::Available => "available",
            AddOnStatus::Unhealthy => "unhealthy",
            AddOnStatus::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for AddOnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(addon: &ManagedClusterAddOn) -> AddOnStatus {
    classify_conditions(addon.conditions())
}

// only the Available condition is consulted; an add-on that never reported it is unreachable
pub fn classify_conditions(conditions: &[Condition]) -> AddOnStatus {
    let available = conditions
        .iter()
        .find(|c| c.type_ == ADDON_CONDITION_AVAILABLE)
        .map(|c| ConditionStatus::from(c.status.as_str()));

    match available {
        Some(ConditionStatus::True) => AddOnStatus::Available,
        Some(ConditionStatus::False) => AddOnStatus::Unhealthy,
        Some(ConditionStatus::Unknown) | None => AddOnStatus::Unreachable,
    }
}
