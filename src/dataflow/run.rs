// src/dataflow/run.rs

//! Controller input and output documents.
//!
//! These are what a controller sees and returns; for external controllers
//! they are written to the plugin's stdin and read back from its stdout as
//! JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::dataflow::literal::Literal;

pub const PROTOCOL_VERSION: u32 = 1;

fn protocol_version() -> u32 {
    PROTOCOL_VERSION
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunEnv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_dir: Option<String>,
    pub base_dir: String,
}

/// Read-only snapshot handed to a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FunctionRunInput {
    #[serde(default = "protocol_version")]
    pub version: u32,
    pub env: RunEnv,
    #[serde(default)]
    pub inputs: Literal,
    #[serde(default)]
    pub subnet_inputs: Literal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_outputs: Option<Literal>,
    /// Finished commands this run is a follow-up to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Command>,
}

impl FunctionRunInput {
    pub fn new(env: RunEnv, inputs: Literal) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            env,
            inputs,
            subnet_inputs: Literal::Null,
            outputs: None,
            subnet_outputs: None,
            commands: Vec::new(),
        }
    }

    /// Top-level input field `name`.
    pub fn input(&self, name: &str) -> Option<&Literal> {
        record_field(&self.inputs, name)
    }

    pub fn subnet_input(&self, name: &str) -> Option<&Literal> {
        record_field(&self.subnet_inputs, name)
    }

    /// Input fields as a map, for simple controllers.
    pub fn input_map(&self) -> BTreeMap<String, Literal> {
        match &self.inputs {
            Literal::Record(map) => map.clone(),
            _ => BTreeMap::new(),
        }
    }
}

fn record_field<'a>(lit: &'a Literal, name: &str) -> Option<&'a Literal> {
    match lit {
        Literal::Record(map) => map.get(name),
        _ => None,
    }
}

/// One output value, addressed by an item list relative to the IO record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub id: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    pub id: String,
    pub function: String,
}

/// A connection to add; `src` is absent for an initial-value connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Literal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandsOut {
    #[serde(default)]
    pub cancel_prev: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Command>,
}

/// Effects produced by one controller run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FunctionRunOutput {
    #[serde(default = "protocol_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_outputs: Vec<OutputValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_instances: Vec<NewInstance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_connections: Vec<NewConnection>,
    #[serde(default)]
    pub commands: CommandsOut,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Default for FunctionRunOutput {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            outputs: Vec::new(),
            subnet_outputs: Vec::new(),
            new_instances: Vec::new(),
            new_connections: Vec::new(),
            commands: CommandsOut::default(),
            warning: None,
        }
    }
}

impl FunctionRunOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, id: impl Into<String>, value: Literal) -> Self {
        self.outputs.push(OutputValue {
            id: id.into(),
            value,
        });
        self
    }

    pub fn subnet_output(mut self, id: impl Into<String>, value: Literal) -> Self {
        self.subnet_outputs.push(OutputValue {
            id: id.into(),
            value,
        });
        self
    }

    pub fn instance(mut self, id: impl Into<String>, function: impl Into<String>) -> Self {
        self.new_instances.push(NewInstance {
            id: id.into(),
            function: function.into(),
        });
        self
    }

    pub fn connect(mut self, src: impl Into<String>, dst: impl Into<String>) -> Self {
        self.new_connections.push(NewConnection {
            src: Some(src.into()),
            dst: dst.into(),
            value: None,
        });
        self
    }

    pub fn connect_value(mut self, dst: impl Into<String>, value: Literal) -> Self {
        self.new_connections.push(NewConnection {
            src: None,
            dst: dst.into(),
            value: Some(value),
        });
        self
    }

    pub fn command(mut self, cmd: Command) -> Self {
        self.commands.items.push(cmd);
        self
    }

    pub fn cancel_prev(mut self) -> Self {
        self.commands.cancel_prev = true;
        self
    }

    pub fn warning(mut self, text: impl Into<String>) -> Self {
        self.warning = Some(text.into());
        self
    }

    pub fn has_outputs(&self) -> bool {
        !self.outputs.is_empty() || !self.subnet_outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_document_uses_protocol_names() {
        let out = FunctionRunOutput::new()
            .output("x", Literal::Int(1))
            .instance("b", "builtin:add")
            .connect("b:out.c", "self:ext_out.y")
            .cancel_prev();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["version"], 1);
        assert!(json.get("new-instances").is_some());
        assert!(json.get("new-connections").is_some());
        assert_eq!(json["commands"]["cancel_prev"], true);
        assert!(json.get("subnet-outputs").is_none());
    }

    #[test]
    fn minimal_plugin_output_parses() {
        let out: FunctionRunOutput =
            serde_json::from_str(r#"{"outputs":[{"id":"c","value":{"float":2.5}}]}"#).unwrap();
        assert_eq!(out.version, 1);
        assert_eq!(out.outputs[0].value, Literal::Float(2.5));
        assert!(!out.commands.cancel_prev);
        assert!(out.has_outputs());
    }

    #[test]
    fn input_fields_are_reachable_by_name() {
        let inputs = Literal::Record(BTreeMap::from([("a".to_string(), Literal::Int(2))]));
        let fri = FunctionRunInput::new(RunEnv::default(), inputs);
        assert_eq!(fri.input("a"), Some(&Literal::Int(2)));
        assert_eq!(fri.input("b"), None);
        assert_eq!(fri.input_map().len(), 1);
    }
}
