// src/dataflow/mod.rs

//! The typed dataflow graph: types, values, functions, active instances,
//! connections and transactions.

pub mod acp;
pub mod file_list;
pub mod function;
pub mod graph;
pub mod instance;
pub mod item_path;
pub mod literal;
pub mod network;
pub mod propagation;
pub mod run;
pub mod task;
pub mod transaction;
pub mod value;
pub mod vtype;

pub use function::{Controller, Function, FunctionRegistry, Library, Resolver};
pub use graph::{Effects, Endpoint, ProjectGraph, TaskSeed};
pub use instance::{ActiveInstance, InstanceId, InstanceState};
pub use item_path::{IoSlot, ItemKey, ItemPath};
pub use literal::Literal;
pub use run::{FunctionRunInput, FunctionRunOutput, RunEnv};
pub use task::{Task, TaskItem, TaskQueue};
pub use transaction::Op;
pub use vtype::{Field, Type};
