//! Pipeline construction and the run driver.
//!
//! A [`Pipeline`] is the container for the operator graph. It is cheaply
//! cloneable; all clones share the same inner state, so a handle on another
//! thread can [`stop`](Pipeline::stop) a run. Construction registers root
//! inputs and operators; [`run`](Pipeline::run) validates the frozen plan
//! and executes operators in registration order, wiring each operator's
//! produced shard files in as the input of its consumers.

use crate::exec::{self, ExecEnv};
use crate::io::{FileBackend, LocalFs};
use crate::plan::{Compression, FileSpec, InputDef, OperatorDef, OperatorKind, WireFormat};
use crate::shard::ShardId;
use crate::stats::PipelineStats;
use crate::table::{PTable, TableNode};
use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Execution knobs for one run.
///
/// This is the library face of the usual driver flags: `data_dir` is
/// `--dest_dir`, `io_workers` the worker pool size (hardware threads by
/// default), `disk_threads`/`disk_queue_depth` size the blocking-I/O pool.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Root directory; each operator writes under `<data_dir>/<output_name>/`.
    pub data_dir: PathBuf,
    /// I/O worker count; each worker runs one reader and one map task.
    pub io_workers: usize,
    /// OS threads reserved for blocking file-system calls.
    pub disk_threads: usize,
    /// Pending jobs per disk thread before producers block.
    pub disk_queue_depth: usize,
    /// Where input files live; the local file system unless a remote store
    /// is plugged in.
    pub backend: Arc<dyn FileBackend>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("mr_output"),
            io_workers: num_cpus::get().max(2),
            disk_threads: 16,
            disk_queue_depth: 128,
            backend: Arc::new(LocalFs),
        }
    }
}

impl PipelineOptions {
    /// Default options rooted at `data_dir`.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

/// The pipeline graph: root inputs plus operators in registration order.
pub struct Pipeline {
    inner: Arc<Mutex<PipelineInner>>,
    stop: Arc<AtomicBool>,
}

struct PipelineInner {
    inputs: Vec<InputDef>,
    tables: Vec<Arc<dyn TableNode>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PipelineInner {
                inputs: Vec::new(),
                tables: Vec::new(),
            })),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stop: Arc::clone(&self.stop),
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root input of newline-delimited text files matching `glob`
    /// and return its read table.
    pub fn read_text(&self, name: &str, glob: &str) -> PTable<String> {
        self.read_specs(
            name,
            WireFormat::Text,
            vec![FileSpec::Glob(glob.to_string())],
        )
    }

    /// Register a root input of list files matching `glob`.
    pub fn read_list(&self, name: &str, glob: &str) -> PTable<String> {
        self.read_specs(
            name,
            WireFormat::List,
            vec![FileSpec::Glob(glob.to_string())],
        )
    }

    /// Register a root input from explicit file specs; sharded specs make
    /// the input consumable by group operators.
    pub fn read_specs(
        &self,
        name: &str,
        format: WireFormat,
        file_specs: Vec<FileSpec>,
    ) -> PTable<String> {
        let mut input = InputDef::new(name, format);
        input.file_specs = file_specs;
        self.inner.lock().unwrap().inputs.push(input);

        let op = OperatorDef {
            name: name.to_string(),
            kind: OperatorKind::Read,
            inputs: vec![name.to_string()],
            output: None,
        };
        PTable::new(self.clone(), op)
    }

    /// Discard the first `n` records of every file of root input `name`.
    pub fn set_skip_header(&self, name: &str, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        for input in &mut inner.inputs {
            if input.name == name {
                input.skip_header = n;
                return;
            }
        }
        panic!("no root input named '{name}'");
    }

    /// Build a group operator joining several pre-sharded streams through
    /// one grouper. `make` builds one grouper per worker per shard.
    pub fn join<H, F>(
        &self,
        name: &str,
        inputs: Vec<crate::handler::JoinInput<H, H::To>>,
        make: F,
    ) -> PTable<H::To>
    where
        H: crate::handler::Grouper,
        F: Fn() -> H + Send + Sync + 'static,
    {
        assert!(
            !inputs.is_empty(),
            "join '{name}' requires at least one input"
        );
        let input_names: Vec<String> = inputs.iter().map(|ji| ji.input.clone()).collect();
        let binds: Vec<_> = inputs.into_iter().map(|ji| ji.bind).collect();
        let op = OperatorDef {
            name: name.to_string(),
            kind: OperatorKind::Group,
            inputs: input_names,
            output: None,
        };
        let table = PTable::new(self.clone(), op);
        table
            .state
            .set_factory(move |out| crate::handler::grouper_wrapper(make(), out, &binds));
        table
    }

    pub(crate) fn register_table(&self, table: Arc<dyn TableNode>) {
        self.inner.lock().unwrap().tables.push(table);
    }

    /// Cooperatively cancel the current run. Readers break at their next
    /// check point, queues drain, destination files still close; the run
    /// returns success with [`PipelineStats::cancelled`] set.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run with default options.
    pub fn run(&self) -> Result<PipelineStats> {
        self.run_with(PipelineOptions::default())
    }

    /// Validate the plan, then execute every written operator in
    /// registration order.
    pub fn run_with(&self, opts: PipelineOptions) -> Result<PipelineStats> {
        let (root_inputs, tables) = {
            let inner = self.inner.lock().unwrap();
            (inner.inputs.clone(), inner.tables.clone())
        };
        let mut registry = validate(&root_inputs, &tables)?;

        let env = ExecEnv {
            data_dir: opts.data_dir.clone(),
            backend: Arc::clone(&opts.backend),
            pool: Arc::new(crate::disk_pool::DiskPool::new(
                opts.disk_threads,
                opts.disk_queue_depth,
            )),
            stop: Arc::clone(&self.stop),
            io_workers: opts.io_workers.max(1),
        };

        let mut stats = PipelineStats::default();
        for table in &tables {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let op = table.op();
            tracing::info!("running operator {}", op.name);
            let inputs: Vec<InputDef> = op
                .inputs
                .iter()
                .map(|n| registry.get(n).expect("validated input").clone())
                .collect();
            let produced = match op.kind {
                OperatorKind::Read | OperatorKind::Map => {
                    exec::mapper::run(&env, table.as_ref(), &inputs, &mut stats)?
                }
                OperatorKind::Group => {
                    exec::joiner::run(&env, table.as_ref(), &inputs, &mut stats)?
                }
            };
            // Wire the produced shards in as the downstream input.
            let out_name = op.output.expect("executed operator has an output").name;
            let entry = registry.get_mut(&out_name).expect("output registered");
            for (shard, path) in produced {
                entry.file_specs.push(FileSpec::Sharded { path, shard });
            }
        }
        stats.cancelled = self.stop.load(Ordering::SeqCst);
        Ok(stats)
    }
}

/// Plan validation: duplicate names, dangling inputs, format conflicts.
/// Returns the combined input registry (roots plus one implicit entry per
/// operator output).
fn validate(
    roots: &[InputDef],
    tables: &[Arc<dyn TableNode>],
) -> Result<HashMap<String, InputDef>> {
    let mut registry: HashMap<String, InputDef> = HashMap::new();
    for input in roots {
        if registry.insert(input.name.clone(), input.clone()).is_some() {
            bail!("duplicate input name '{}'", input.name);
        }
    }
    for table in tables {
        let op = table.op();
        let Some(out) = &op.output else {
            bail!("operator '{}' is registered without an output", op.name);
        };
        if op.inputs.is_empty() {
            bail!("operator '{}' has no inputs", op.name);
        }
        if out.format == WireFormat::List
            && matches!(out.compression, Some(Compression::Gzip { .. }))
        {
            bail!(
                "output '{}': list format compresses per block and cannot be gzipped",
                out.name
            );
        }
        #[cfg(not(feature = "compression-gzip"))]
        if out.compression.is_some() {
            bail!(
                "output '{}' requests gzip but the compression-gzip feature is disabled",
                out.name
            );
        }
        if registry
            .insert(out.name.clone(), InputDef::new(&out.name, out.format))
            .is_some()
        {
            bail!("duplicate output name '{}'", out.name);
        }
    }
    // Inputs must be produced before they are consumed: roots are always
    // available, outputs only after their operator ran.
    let mut available: HashSet<String> = roots.iter().map(|i| i.name.clone()).collect();
    for table in tables {
        let op = table.op();
        for input in &op.inputs {
            if !available.contains(input) {
                bail!(
                    "operator '{}' reads '{input}' before it is produced",
                    op.name
                );
            }
        }
        if let Some(out) = &op.output {
            available.insert(out.name.clone());
        }
    }
    Ok(registry)
}

/// A shard file produced by an operator, as reported back to the driver.
pub type ShardFile = (ShardId, PathBuf);
