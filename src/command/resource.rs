// src/command/resource.rs

//! Named integer resources (`cores`, `memory`, ...).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CORES: &str = "cores";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceMap(BTreeMap<String, i64>);

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, amount: i64) -> Self {
        self.set(name, amount);
        self
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.0.get(name).copied()
    }

    pub fn set(&mut self, name: &str, amount: i64) {
        self.0.insert(name.to_string(), amount);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Every requirement in `needs` is covered by what this map offers.
    pub fn covers(&self, needs: &ResourceMap) -> bool {
        needs
            .iter()
            .all(|(name, amount)| self.get(name).is_some_and(|have| have >= amount))
    }

    /// Subtract `used` from matching entries, saturating at zero.
    pub fn consume(&mut self, used: &ResourceMap) {
        for (name, amount) in used.iter() {
            if let Some(have) = self.0.get_mut(name) {
                *have = (*have - amount).max(0);
            }
        }
    }
}

impl FromIterator<(String, i64)> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
