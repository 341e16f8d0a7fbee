//! Capability flags
//!
//! Capabilities are dotted strings such as `chat.tools`. The effective set for a
//! run is the union of the environment override, the functional config file and
//! the scenario's feature switches, listed in that precedence order.

use crate::config::Scenario;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scenario feature name to the capability it grants
pub const FEATURE_CAPABILITIES: &[(&str, &str)] = &[
    ("guided_decoding", "chat.response_format.json_schema"),
    ("function_call", "chat.tools"),
    ("reasoning", "chat.reasoning"),
];

/// Capabilities implied by a scenario's enabled features
pub fn capabilities_from_features(scenario: &Scenario) -> Vec<String> {
    scenario
        .enabled_features()
        .filter_map(|feature| {
            FEATURE_CAPABILITIES
                .iter()
                .find(|(name, _)| *name == feature)
                .map(|(_, capability)| capability.to_string())
        })
        .collect()
}

/// Deduplicated, precedence-ordered capability list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    ordered: Vec<String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of sources; earlier sources keep their position
    pub fn merge<'a, S>(sources: S) -> Self
    where
        S: IntoIterator<Item = &'a [String]>,
    {
        let mut set = Self::new();
        for source in sources {
            set.extend(source.iter().map(String::as_str));
        }
        set
    }

    pub fn extend<'a>(&mut self, capabilities: impl IntoIterator<Item = &'a str>) {
        for cap in capabilities {
            let cap = cap.trim();
            if !cap.is_empty() && !self.contains(cap) {
                self.ordered.push(cap.to_string());
            }
        }
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.ordered.iter().any(|c| c == capability)
    }

    /// Required capabilities absent from this set, sorted
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|cap| !self.contains(cap))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
