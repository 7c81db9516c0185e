// src/command/platform.rs

//! What a worker offers when it asks for work.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::command::Command;
use crate::command::resource::{CORES, ResourceMap};
use crate::command::version::Version;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Platform {
    pub name: String,
    #[serde(default)]
    pub arch: String,
    /// Resource maxima the worker can hand out.
    #[serde(default)]
    pub resources: ResourceMap,
    /// Plugin executables the worker can run, with their versions.
    #[serde(default)]
    pub executables: BTreeMap<String, Version>,
}

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: String::new(),
            resources: ResourceMap::new(),
            executables: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, name: &str, amount: i64) -> Self {
        self.resources.set(name, amount);
        self
    }

    pub fn with_executable(mut self, name: &str, version: Version) -> Self {
        self.executables.insert(name.to_string(), version);
        self
    }
}

/// A worker's request for commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerRequest {
    pub worker_id: String,
    pub server_name: String,
    pub platform: Platform,
}

/// Remaining resources of a worker while one dispatch request is matched.
#[derive(Debug, Clone)]
pub struct ResourceBudget<'a> {
    platform: &'a Platform,
    remaining: ResourceMap,
}

impl<'a> ResourceBudget<'a> {
    pub fn new(platform: &'a Platform) -> Self {
        Self {
            platform,
            remaining: platform.resources.clone(),
        }
    }

    pub fn remaining(&self) -> &ResourceMap {
        &self.remaining
    }

    /// Whether this worker can run `cmd` with what it has left.
    pub fn fits(&self, cmd: &Command) -> bool {
        if !self.remaining.covers(&cmd.min_required) {
            return false;
        }
        match self.platform.executables.get(&cmd.executable) {
            Some(version) => cmd.accepts_version(version),
            None => false,
        }
    }

    /// Fill `cmd.reserved` and charge it against the budget.
    ///
    /// Keys listed in `max_allowed` get as much as is left, up to that
    /// limit; other required keys get exactly their minimum.
    pub fn reserve(&mut self, cmd: &mut Command) {
        let mut reserved = ResourceMap::new();
        for (name, limit) in cmd.max_allowed.iter() {
            if let Some(left) = self.remaining.get(name) {
                reserved.set(name, left.min(limit));
            }
        }
        for (name, need) in cmd.min_required.iter() {
            if reserved.get(name).is_none() {
                reserved.set(name, need);
            }
        }
        self.remaining.consume(&reserved);
        cmd.reserved = reserved;
    }

    pub fn cores_exhausted(&self) -> bool {
        self.remaining.get(CORES).is_some_and(|c| c <= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Platform {
        Platform::new("smp")
            .with_resource(CORES, 8)
            .with_executable("mdrun", "4.6".parse().unwrap())
    }

    #[test]
    fn fits_checks_resources_and_versions() {
        let p = worker();
        let budget = ResourceBudget::new(&p);
        assert!(budget.fits(&Command::new("mdrun").with_min_required(CORES, 4)));
        assert!(!budget.fits(&Command::new("mdrun").with_min_required(CORES, 16)));
        assert!(!budget.fits(&Command::new("grompp")));
        let too_new = Command::new("mdrun").with_versions(Some("5.0".parse().unwrap()), None);
        assert!(!budget.fits(&too_new));
    }

    #[test]
    fn reserve_clamps_by_max_allowed() {
        let p = worker();
        let mut budget = ResourceBudget::new(&p);
        let mut greedy = Command::new("mdrun")
            .with_min_required(CORES, 2)
            .with_max_allowed(CORES, 6);
        budget.reserve(&mut greedy);
        assert_eq!(greedy.reserved.get(CORES), Some(6));
        assert_eq!(budget.remaining().get(CORES), Some(2));

        let mut fixed = Command::new("mdrun").with_min_required(CORES, 2);
        budget.reserve(&mut fixed);
        assert_eq!(fixed.reserved.get(CORES), Some(2));
        assert!(budget.cores_exhausted());
    }
}
