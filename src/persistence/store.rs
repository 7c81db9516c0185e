// src/persistence/store.rs

//! Saving and loading `_state.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{Command, CommandOwner};
use crate::dataflow::file_list::{FileHandle, FileList};
use crate::dataflow::function::Resolver;
use crate::dataflow::graph::{ProjectGraph, slot_type};
use crate::dataflow::instance::{ActiveInstance, InstanceId, PendingTask};
use crate::dataflow::item_path::{IoSlot, ItemKey};
use crate::dataflow::literal::Literal;
use crate::dataflow::network::Connection;
use crate::dataflow::value::{Value, ValueData};
use crate::dataflow::vtype::Type;
use crate::errors::{CpcError, Result};
use crate::persistence::doc::{
    CommandDoc, DataDoc, InstanceDoc, PendingDoc, ProjectDoc, STATE_FILE, STATE_VERSION, ValueDoc,
};
use crate::project::project::{ImportResolver, Project, ProjectContext, ProjectState};

pub fn state_path(base_dir: &Path) -> PathBuf {
    base_dir.join(STATE_FILE)
}

fn corrupt(msg: impl std::fmt::Display) -> CpcError {
    CpcError::Persistence(msg.to_string())
}

/// Capture the project as a document. Commands come from the shared queue
/// and running list, sorted by id.
pub fn snapshot(project: &Project) -> ProjectDoc {
    let st = project.read();
    let graph = &st.graph;
    let ctx = project.context();

    let mut commands: Vec<CommandDoc> = ctx
        .queue
        .list()
        .into_iter()
        .chain(ctx.running.list())
        .filter(|c| c.project() == Some(project.name()))
        .filter_map(|c| command_doc(&c))
        .collect();
    commands.sort_by(|a, b| a.command.id.cmp(&b.command.id));

    ProjectDoc {
        version: STATE_VERSION,
        name: project.name().to_string(),
        imports: st.imports.iter().cloned().collect(),
        seq: graph.current_seq(),
        input_counter: graph.input_counter(),
        connections: graph
            .instance(InstanceId::ROOT)
            .subnet
            .explicit_connections()
            .cloned()
            .collect(),
        instances: graph.instances().map(|i| instance_doc(graph, i)).collect(),
        commands,
        transactions: st.txn.clone(),
    }
}

pub fn to_json(doc: &ProjectDoc) -> Result<String> {
    let mut text = serde_json::to_string_pretty(doc)?;
    text.push('\n');
    Ok(text)
}

/// Parse a state document, refusing versions newer than this build writes.
pub fn parse(text: &str) -> Result<ProjectDoc> {
    #[derive(Deserialize)]
    struct VersionProbe {
        version: u32,
    }
    let probe: VersionProbe = serde_json::from_str(text).map_err(corrupt)?;
    if probe.version > STATE_VERSION {
        return Err(corrupt(format!(
            "state version {} is newer than supported version {STATE_VERSION}",
            probe.version
        )));
    }
    serde_json::from_str(text).map_err(corrupt)
}

/// Write `_state.json` through `_state.json.new`.
pub fn save(project: &Project) -> Result<()> {
    let text = to_json(&snapshot(project))?;
    let path = state_path(project.base_dir());
    project.context().fs.replace(&path, text.as_bytes())?;
    debug!(project = %project.name(), bytes = text.len(), "project saved");
    Ok(())
}

/// Bring a project back from `base_dir`. Tasks that were in flight are
/// queued again, and so are all its commands, including running ones.
pub fn load(base_dir: &Path, ctx: ProjectContext) -> Result<Arc<Project>> {
    let path = state_path(base_dir);
    let text = ctx
        .fs
        .read_to_string(&path)
        .map_err(|e| corrupt(format!("{e:#}")))?;
    let doc = parse(&text)?;
    let (project, commands) = restore(doc, base_dir, ctx)?;
    let queued = commands.len();
    for cmd in commands {
        project.context().queue.add(cmd);
    }
    let tasks = project.requeue_in_flight();
    info!(project = %project.name(), instances = project.instances().len(), commands = queued, tasks, "project loaded");
    Ok(project)
}

fn restore(doc: ProjectDoc, base_dir: &Path, ctx: ProjectContext) -> Result<(Arc<Project>, Vec<Command>)> {
    let files = FileList::new(base_dir, Arc::clone(&ctx.fs));
    let mut graph = ProjectGraph::new(&doc.name, base_dir, Arc::clone(&ctx.fs), Arc::clone(&files));
    let imports: BTreeSet<String> = doc.imports.into_iter().collect();
    if let Some(missing) = imports.iter().find(|lib| ctx.registry.library(lib).is_none()) {
        return Err(corrupt(format!("imported library '{missing}' is not available")));
    }
    let resolver = ImportResolver {
        registry: &ctx.registry,
        imports: &imports,
    };

    // structure first: instances bring their network bodies with them
    for idoc in &doc.instances {
        if idoc.implicit {
            if graph.find(&idoc.path).is_none() {
                return Err(corrupt(format!("'{}' is not part of its parent's body", idoc.path)));
            }
            continue;
        }
        let (parent_path, name) = idoc.path.rsplit_once(':').unwrap_or(("", &idoc.path));
        let parent = graph
            .find(parent_path)
            .ok_or_else(|| corrupt(format!("'{}' appears before its parent", idoc.path)))?;
        let function = resolver.function(&idoc.function).map_err(corrupt)?;
        graph
            .create_instance(parent, name, function, &resolver)
            .map_err(corrupt)?;
    }
    restore_connections(&mut graph, InstanceId::ROOT, doc.connections)?;

    for mut idoc in doc.instances {
        let id = graph
            .find(&idoc.path)
            .ok_or_else(|| corrupt(format!("no instance '{}'", idoc.path)))?;
        let connections = std::mem::take(&mut idoc.connections);
        restore_connections(&mut graph, id, connections)?;
        restore_instance(&mut graph, id, idoc, &doc.name)?;
    }
    graph.restore_counters(doc.seq, doc.input_counter);

    let commands = doc
        .commands
        .into_iter()
        .map(|c| command_from_doc(c, &doc.name))
        .collect();
    let state = ProjectState {
        graph,
        imports,
        txn: doc.transactions,
    };
    let project = Project::from_state(doc.name, base_dir.to_path_buf(), ctx, state);
    Ok((project, commands))
}

fn restore_connections(graph: &mut ProjectGraph, scope: InstanceId, conns: Vec<Connection>) -> Result<()> {
    for conn in conns {
        if let Some(src) = &conn.src {
            let src = graph.resolve_str(scope, src).map_err(corrupt)?;
            let dst = graph.resolve_str(scope, &conn.dst).map_err(corrupt)?;
            graph.acps.connect(src.acp_key(), dst.acp_key());
        }
        graph.instance_mut(scope).subnet.connections.push(conn);
    }
    Ok(())
}

fn restore_instance(graph: &mut ProjectGraph, id: InstanceId, doc: InstanceDoc, project: &str) -> Result<()> {
    let files = Arc::clone(graph.files());
    let inst = graph.instance_mut(id);
    if inst.function.full_name() != doc.function {
        return Err(corrupt(format!(
            "'{}' is an instance of '{}', not '{}'",
            doc.path,
            inst.function.full_name(),
            doc.function
        )));
    }
    let function = Arc::clone(&inst.function);
    inst.state = doc.state;
    inst.seq_nr = doc.seq_nr;
    inst.priority = doc.priority;
    inst.error = doc.error;
    inst.warning = doc.warning;
    inst.cpu_time = doc.cpu_time;
    inst.tasks_started = doc.tasks_started;
    inst.run_counter = doc.run_counter;
    inst.rerun_requested = doc.rerun_requested;
    inst.inputs = restore_value(slot_type(&function, IoSlot::In), doc.inputs, &files)?;
    inst.outputs = restore_value(slot_type(&function, IoSlot::Out), doc.outputs, &files)?;
    inst.sub_inputs = restore_value(slot_type(&function, IoSlot::SubIn), doc.sub_inputs, &files)?;
    inst.sub_outputs = restore_value(slot_type(&function, IoSlot::SubOut), doc.sub_outputs, &files)?;
    inst.pending = doc.pending.map(|p| restore_pending(p, &files, project));
    Ok(())
}

fn restore_pending(doc: PendingDoc, files: &Arc<FileList>, project: &str) -> PendingTask {
    let mut pins = Vec::new();
    pin_files(&doc.input.inputs, files, &mut pins);
    pin_files(&doc.input.subnet_inputs, files, &mut pins);
    for lit in doc.input.outputs.iter().chain(&doc.input.subnet_outputs) {
        pin_files(lit, files, &mut pins);
    }
    PendingTask {
        seq_nr: doc.seq_nr,
        priority: doc.priority,
        input: doc.input,
        pins,
        commands: doc.commands,
        finished: doc
            .finished
            .into_iter()
            .map(|c| command_from_doc(c, project))
            .collect(),
        in_flight: doc.in_flight,
        run_dir: doc.run_dir,
    }
}

fn pin_files(lit: &Literal, files: &Arc<FileList>, pins: &mut Vec<FileHandle>) {
    match lit {
        Literal::File(path) => pins.push(files.acquire(path)),
        Literal::Record(map) | Literal::Dict(map) => map.values().for_each(|l| pin_files(l, files, pins)),
        Literal::Array(items) => items.iter().for_each(|l| pin_files(l, files, pins)),
        _ => {}
    }
}

fn restore_value(ty: &Arc<Type>, doc: ValueDoc, files: &Arc<FileList>) -> Result<Value> {
    let member = |key: ItemKey| {
        ty.member(&key)
            .ok_or_else(|| corrupt(format!("type '{ty}' has no member {key}")))
    };
    let data = match doc.data {
        DataDoc::Null => ValueData::Null,
        DataDoc::Bool(b) => ValueData::Bool(b),
        DataDoc::Int(i) => ValueData::Int(i),
        DataDoc::Float(f) => ValueData::Float(f),
        DataDoc::String(s) => ValueData::String(s),
        DataDoc::File(path) => ValueData::File(files.acquire(&path)),
        DataDoc::Record(map) => {
            let mut out = BTreeMap::new();
            for (name, child) in map {
                let cty = member(ItemKey::Field(name.clone()))?;
                out.insert(name, restore_value(&cty, child, files)?);
            }
            ValueData::Record(out)
        }
        DataDoc::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, child) in items.into_iter().enumerate() {
                let cty = member(ItemKey::Index(i))?;
                out.push(restore_value(&cty, child, files)?);
            }
            ValueData::Array(out)
        }
        DataDoc::Dict(map) => {
            let mut out = BTreeMap::new();
            for (key, child) in map {
                let cty = member(ItemKey::Key(key.clone()))?;
                out.insert(key, restore_value(&cty, child, files)?);
            }
            ValueData::Dict(out)
        }
    };
    Ok(Value::from_parts(Arc::clone(ty), data, doc.seq, doc.updated))
}

fn value_doc(value: &Value) -> ValueDoc {
    let map_doc = |map: &BTreeMap<String, Value>| map.iter().map(|(k, v)| (k.clone(), value_doc(v))).collect();
    let data = match value.data() {
        ValueData::Null => DataDoc::Null,
        ValueData::Bool(b) => DataDoc::Bool(*b),
        ValueData::Int(i) => DataDoc::Int(*i),
        ValueData::Float(f) => DataDoc::Float(*f),
        ValueData::String(s) => DataDoc::String(s.clone()),
        ValueData::File(h) => DataDoc::File(h.path()),
        ValueData::Record(map) => DataDoc::Record(map_doc(map)),
        ValueData::Array(items) => DataDoc::Array(items.iter().map(value_doc).collect()),
        ValueData::Dict(map) => DataDoc::Dict(map_doc(map)),
    };
    ValueDoc {
        seq: value.seq_nr(),
        updated: value.is_updated(),
        data,
    }
}

fn instance_doc(graph: &ProjectGraph, inst: &ActiveInstance) -> InstanceDoc {
    let implicit = inst
        .parent
        .and_then(|p| graph.instance(p).function.network_def())
        .is_some_and(|def| def.instances.iter().any(|c| c.id == inst.name));
    InstanceDoc {
        path: inst.path.clone(),
        function: inst.function.full_name().to_string(),
        implicit,
        state: inst.state,
        seq_nr: inst.seq_nr,
        priority: inst.priority,
        error: inst.error.clone(),
        warning: inst.warning.clone(),
        cpu_time: inst.cpu_time,
        tasks_started: inst.tasks_started,
        run_counter: inst.run_counter,
        rerun_requested: inst.rerun_requested,
        inputs: value_doc(&inst.inputs),
        outputs: value_doc(&inst.outputs),
        sub_inputs: value_doc(&inst.sub_inputs),
        sub_outputs: value_doc(&inst.sub_outputs),
        connections: inst.subnet.explicit_connections().cloned().collect(),
        pending: inst.pending.as_ref().map(|p| PendingDoc {
            seq_nr: p.seq_nr,
            priority: p.priority,
            input: p.input.clone(),
            commands: p.commands.clone(),
            finished: p.finished.iter().filter_map(command_doc).collect(),
            in_flight: p.in_flight,
            run_dir: p.run_dir.clone(),
        }),
    }
}

fn command_doc(cmd: &Command) -> Option<CommandDoc> {
    let owner = cmd.owner.as_ref()?;
    Some(CommandDoc {
        instance_path: owner.instance_path.clone(),
        task_seq: owner.task_seq,
        task_priority: owner.task_priority,
        command: cmd.clone(),
    })
}

fn command_from_doc(doc: CommandDoc, project: &str) -> Command {
    doc.command.with_owner(CommandOwner {
        project: project.to_string(),
        instance_path: doc.instance_path,
        task_seq: doc.task_seq,
        task_priority: doc.task_priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::acp::AcpKey;
    use crate::dataflow::function::FunctionRegistry;
    use crate::fs::FileSystem;
    use crate::fs::mock::MockFileSystem;

    fn ctx(fs: &MockFileSystem) -> ProjectContext {
        ProjectContext::new(Arc::new(FunctionRegistry::with_builtins()), Arc::new(fs.clone()))
    }

    fn sample(ctx: ProjectContext) -> Arc<Project> {
        let project = Project::new("p1", "/projects/p1", ctx);
        project.import("builtin").unwrap();
        project.begin();
        project.add_instance("a", "builtin:add").unwrap();
        project.add_instance("b", "builtin:mul").unwrap();
        project.connect("a:out.c", "b:in.a").unwrap();
        project.set("a:in.a", Literal::Float(1.5)).unwrap();
        project.set("b:in.b", Literal::Float(2.0)).unwrap();
        project.commit().unwrap();
        project
    }

    #[test]
    fn save_then_load_then_save_is_byte_identical() {
        let fs = MockFileSystem::new();
        let project = sample(ctx(&fs));
        project.save().unwrap();
        let first = fs.contents("/projects/p1/_state.json").unwrap();
        assert!(!fs.exists(Path::new("/projects/p1/_state.json.new")));

        let loaded = load(Path::new("/projects/p1"), ctx(&fs)).unwrap();
        assert_eq!(loaded.value("a:in.a").unwrap().0, Literal::Float(1.5));
        assert_eq!(loaded.instances().len(), 2);
        loaded.save().unwrap();
        let second = fs.contents("/projects/p1/_state.json").unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), String::from_utf8(second).unwrap());
    }

    #[test]
    fn loaded_connections_are_rewired() {
        let fs = MockFileSystem::new();
        sample(ctx(&fs)).save().unwrap();
        let loaded = load(Path::new("/projects/p1"), ctx(&fs)).unwrap();
        let st = loaded.read();
        let a = st.graph.find_or_err("a").unwrap();
        let b = st.graph.find_or_err("b").unwrap();
        let dst = st
            .graph
            .acps
            .lookup(&AcpKey::new(b, IoSlot::In, vec![ItemKey::Field("a".into())]))
            .expect("destination point restored");
        let src = st.graph.acps.direct_source(dst).expect("edge restored");
        assert_eq!(st.graph.acps.key(src).instance, a);
        assert_eq!(st.graph.acps.key(src).slot, IoSlot::Out);
    }

    #[test]
    fn newer_versions_are_refused() {
        let err = parse(r#"{"version": 2, "name": "p", "seq": 0}"#).unwrap_err();
        assert!(matches!(err, CpcError::Persistence(msg) if msg.contains("newer")));
    }

    #[test]
    fn unknown_fields_are_refused() {
        let err = parse(r#"{"version": 1, "name": "p", "seq": 0, "topology": []}"#).unwrap_err();
        assert!(matches!(err, CpcError::Persistence(_)));
    }

    #[test]
    fn missing_library_fails_the_load() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/projects/x/_state.json",
            r#"{"version": 1, "name": "x", "imports": ["gromacs"], "seq": 0}"#,
        );
        let err = load(Path::new("/projects/x"), ctx(&fs)).unwrap_err();
        assert!(matches!(err, CpcError::Persistence(msg) if msg.contains("gromacs")));
    }
}
