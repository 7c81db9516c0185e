// src/dataflow/network.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataflow::instance::InstanceId;
use crate::dataflow::literal::Literal;

/// Instances and connections of one network, by name. Every active
/// instance owns one for its subnet; the project's top level is the subnet
/// of the root instance.
#[derive(Debug, Default)]
pub struct Network {
    pub instances: BTreeMap<String, InstanceId>,
    pub connections: Vec<Connection>,
}

impl Network {
    pub fn get(&self, name: &str) -> Option<InstanceId> {
        self.instances.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Connections that were declared explicitly, for the state dump.
    pub fn explicit_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| !c.implicit)
    }
}

/// A connection as declared, with paths relative to its network. Exactly
/// one of `src` and `initial` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<Literal>,
    /// Created by a network function body; re-created on load, not saved.
    #[serde(skip)]
    pub implicit: bool,
}
