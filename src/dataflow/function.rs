// src/dataflow/function.rs

//! Function schemas, controllers and the library registry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::dataflow::literal::Literal;
use crate::dataflow::run::{FunctionRunInput, FunctionRunOutput, NewConnection, NewInstance};
use crate::dataflow::vtype::{Field, Type};
use crate::errors::{CpcError, Result};

/// Name of the implicit output record carrying error and warning text.
pub const MSG_FIELD: &str = "msg";

/// Library holding functions and types a project declares itself.
pub const LOCAL_LIBRARY: &str = "local";

pub type SimpleFn =
    Arc<dyn Fn(&BTreeMap<String, Literal>) -> std::result::Result<BTreeMap<String, Literal>, String> + Send + Sync>;

pub type ExtendedFn =
    Arc<dyn Fn(&FunctionRunInput) -> std::result::Result<FunctionRunOutput, String> + Send + Sync>;

/// Body of a network function: instances and connections instantiated in
/// the subnet of every instance of the function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkDef {
    #[serde(default)]
    pub instances: Vec<NewInstance>,
    #[serde(default)]
    pub connections: Vec<NewConnection>,
}

#[derive(Clone)]
pub enum Controller {
    Network(NetworkDef),
    Simple(SimpleFn),
    Extended(ExtendedFn),
    External { executable: PathBuf },
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Controller::Network(def) => f.debug_tuple("Network").field(def).finish(),
            Controller::Simple(_) => f.write_str("Simple(..)"),
            Controller::Extended(_) => f.write_str("Extended(..)"),
            Controller::External { executable } => f
                .debug_struct("External")
                .field("executable", executable)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FunctionFlags {
    pub needs_output_dir: bool,
    pub needs_persistent_dir: bool,
    pub logs: bool,
    pub reads_current_outputs: bool,
}

#[derive(Debug)]
pub struct Function {
    full_name: String,
    library: String,
    name: String,
    description: Option<String>,
    inputs: Arc<Type>,
    outputs: Arc<Type>,
    sub_inputs: Arc<Type>,
    sub_outputs: Arc<Type>,
    flags: FunctionFlags,
    controller: Controller,
}

impl Function {
    pub fn builder(library: impl Into<String>, name: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder::new(library.into(), name.into())
    }

    /// The function of a project's top-level network: no IO, no body.
    pub fn root() -> Arc<Function> {
        Function::builder("", "top")
            .network(NetworkDef::default())
            .build()
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn inputs(&self) -> &Arc<Type> {
        &self.inputs
    }

    pub fn outputs(&self) -> &Arc<Type> {
        &self.outputs
    }

    pub fn sub_inputs(&self) -> &Arc<Type> {
        &self.sub_inputs
    }

    pub fn sub_outputs(&self) -> &Arc<Type> {
        &self.sub_outputs
    }

    pub fn flags(&self) -> FunctionFlags {
        self.flags
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Network functions never run; their subnet does the work.
    pub fn generates_tasks(&self) -> bool {
        !matches!(self.controller, Controller::Network(_))
    }

    pub fn network_def(&self) -> Option<&NetworkDef> {
        match &self.controller {
            Controller::Network(def) => Some(def),
            _ => None,
        }
    }
}

pub struct FunctionBuilder {
    library: String,
    name: String,
    description: Option<String>,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
    sub_inputs: Vec<Field>,
    sub_outputs: Vec<Field>,
    flags: FunctionFlags,
    controller: Option<Controller>,
}

impl FunctionBuilder {
    fn new(library: String, name: String) -> Self {
        Self {
            library,
            name,
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            sub_inputs: Vec::new(),
            sub_outputs: Vec::new(),
            flags: FunctionFlags::default(),
            controller: None,
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn input(mut self, field: Field) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn output(mut self, field: Field) -> Self {
        self.outputs.push(field);
        self
    }

    pub fn sub_input(mut self, field: Field) -> Self {
        self.sub_inputs.push(field);
        self
    }

    pub fn sub_output(mut self, field: Field) -> Self {
        self.sub_outputs.push(field);
        self
    }

    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn simple<F>(mut self, f: F) -> Self
    where
        F: Fn(&BTreeMap<String, Literal>) -> std::result::Result<BTreeMap<String, Literal>, String>
            + Send
            + Sync
            + 'static,
    {
        self.controller = Some(Controller::Simple(Arc::new(f)));
        self
    }

    pub fn extended<F>(mut self, f: F) -> Self
    where
        F: Fn(&FunctionRunInput) -> std::result::Result<FunctionRunOutput, String>
            + Send
            + Sync
            + 'static,
    {
        self.controller = Some(Controller::Extended(Arc::new(f)));
        self
    }

    pub fn external(mut self, executable: impl Into<PathBuf>) -> Self {
        self.controller = Some(Controller::External {
            executable: executable.into(),
        });
        self
    }

    pub fn network(mut self, def: NetworkDef) -> Self {
        self.controller = Some(Controller::Network(def));
        self
    }

    pub fn build(self) -> Arc<Function> {
        let full_name = if self.library.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.library, self.name)
        };
        let mut outputs = self.outputs;
        if !outputs.iter().any(|f| f.name == MSG_FIELD) {
            outputs.push(Field::new(MSG_FIELD, Type::msg_record()).optional());
        }
        let io = |suffix: &str, fields: Vec<Field>| Type::record(format!("{full_name}:{suffix}"), fields);
        Arc::new(Function {
            inputs: io("in", self.inputs),
            outputs: io("out", outputs),
            sub_inputs: io("sub_in", self.sub_inputs),
            sub_outputs: io("sub_out", self.sub_outputs),
            controller: self
                .controller
                .unwrap_or(Controller::Network(NetworkDef::default())),
            full_name,
            library: self.library,
            name: self.name,
            description: self.description,
            flags: self.flags,
        })
    }
}

/// A named collection of types and functions.
#[derive(Debug, Default)]
pub struct Library {
    name: String,
    types: BTreeMap<String, Arc<Type>>,
    functions: BTreeMap<String, Arc<Function>>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, ty: Arc<Type>) -> Self {
        self.types.insert(ty.name().to_string(), ty);
        self
    }

    pub fn with_function(mut self, func: Arc<Function>) -> Self {
        self.functions.insert(func.name().to_string(), func);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name)
    }

    pub fn type_named(&self, name: &str) -> Option<&Arc<Type>> {
        self.types.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<Function>> {
        self.functions.values()
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<Type>> {
        self.types.values()
    }
}

/// Split `lib:name` into its two parts.
pub fn split_full_name(full: &str) -> Result<(&str, &str)> {
    full.split_once(':')
        .filter(|(lib, name)| !lib.is_empty() && !name.is_empty())
        .ok_or_else(|| CpcError::domain(format!("'{full}' is not of the form library:name")))
}

/// Name lookup used while building and mutating networks.
pub trait Resolver {
    fn function(&self, full_name: &str) -> Result<Arc<Function>>;
    fn type_named(&self, name: &str) -> Result<Arc<Type>>;
}

/// Built-in scalar types by base name.
pub fn scalar_type(name: &str) -> Option<Arc<Type>> {
    match name {
        "bool" => Some(Type::bool()),
        "int" => Some(Type::int()),
        "float" => Some(Type::float()),
        "string" => Some(Type::string()),
        "file" => Some(Type::file()),
        _ => None,
    }
}

/// Process-wide set of importable libraries.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    libs: RwLock<BTreeMap<String, Arc<Library>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in library registered.
    pub fn with_builtins() -> Self {
        let reg = Self::new();
        reg.register(crate::builtin::library());
        reg
    }

    pub fn register(&self, lib: Library) {
        let mut libs = self.libs.write().unwrap_or_else(PoisonError::into_inner);
        libs.insert(lib.name().to_string(), Arc::new(lib));
    }

    pub fn library(&self, name: &str) -> Option<Arc<Library>> {
        let libs = self.libs.read().unwrap_or_else(PoisonError::into_inner);
        libs.get(name).cloned()
    }

    pub fn library_names(&self) -> Vec<String> {
        let libs = self.libs.read().unwrap_or_else(PoisonError::into_inner);
        libs.keys().cloned().collect()
    }
}

/// Resolves against every registered library, without import checks.
impl Resolver for FunctionRegistry {
    fn function(&self, full_name: &str) -> Result<Arc<Function>> {
        let (lib, name) = split_full_name(full_name)?;
        self.library(lib)
            .and_then(|l| l.function(name).cloned())
            .ok_or_else(|| CpcError::domain(format!("unknown function '{full_name}'")))
    }

    fn type_named(&self, name: &str) -> Result<Arc<Type>> {
        if let Some(ty) = scalar_type(name) {
            return Ok(ty);
        }
        let (lib, ty) = split_full_name(name)?;
        self.library(lib)
            .and_then(|l| l.type_named(ty).cloned())
            .ok_or_else(|| CpcError::domain(format!("unknown type '{name}'")))
    }
}
