//! Static label-based muting

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::ConfigError;

/// Set of label values that must all be present on an alert to mute it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MuteRule {
    matchers: BTreeMap<String, String>,
}

impl MuteRule {
    pub fn new<K, V>(matchers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            matchers: matchers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// A rule key missing from `labels` never matches.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.matchers
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl From<HashMap<String, String>> for MuteRule {
    fn from(matchers: HashMap<String, String>) -> Self {
        Self::new(matchers)
    }
}

/// Ordered, immutable list of mute rules
#[derive(Debug, Clone, Default)]
pub struct MuteList {
    rules: Vec<MuteRule>,
}

impl MuteList {
    pub fn new(rules: Vec<MuteRule>) -> Result<Self, ConfigError> {
        if let Some(index) = rules.iter().position(MuteRule::is_empty) {
            return Err(ConfigError::EmptyMuteRule { index });
        }
        Ok(Self { rules })
    }

    /// First rule matching `labels`, with its position in the list
    pub fn matching_rule(&self, labels: &HashMap<String, String>) -> Option<(usize, &MuteRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(labels))
    }

    pub fn is_muted(&self, labels: &HashMap<String, String>) -> bool {
        self.matching_rule(labels).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
