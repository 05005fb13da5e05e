//! Typed planning surface.
//!
//! A [`PTable<T>`] is a handle to one operator of the pipeline graph with
//! record type `T`. Tables are cheap to clone and only describe computation;
//! nothing runs until [`Pipeline::run`](crate::Pipeline::run). At run time
//! the typed layer collapses into plain [`OperatorDef`] data plus an erased
//! handler-wrapper factory per operator.

use crate::handler::{HandlerWrapper, Mapper, identity_wrapper, mapper_wrapper};
use crate::output::{Output, OutputBuilder, ShardOp};
use crate::pipeline::Pipeline;
use crate::plan::{OperatorDef, OperatorKind, OutputDef, ShardKind, WireFormat};
use crate::record::Record;
use crate::shard::ShardId;
use std::sync::{Arc, Mutex};

type WrapperFactory<T> = Box<dyn Fn(Output<T>) -> HandlerWrapper + Send + Sync>;

/// Shared state of one typed table: the plan record, the sharding function,
/// and the erased handler factory. Frozen once the pipeline runs.
pub(crate) struct TableState<T: Record> {
    pub(crate) op: Mutex<OperatorDef>,
    shard_op: Mutex<ShardOp<T>>,
    factory: Mutex<Option<WrapperFactory<T>>>,
}

impl<T: Record> TableState<T> {
    pub(crate) fn new(op: OperatorDef) -> Self {
        Self {
            op: Mutex::new(op),
            shard_op: Mutex::new(ShardOp::Constant(ShardId::Index(0))),
            factory: Mutex::new(None),
        }
    }

    /// Identity tables re-emit parsed records; anything with a handler
    /// factory is a real transform.
    fn is_identity(&self) -> bool {
        self.factory.lock().unwrap().is_none()
    }

    pub(crate) fn set_factory(
        &self,
        f: impl Fn(Output<T>) -> HandlerWrapper + Send + Sync + 'static,
    ) {
        *self.factory.lock().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn with_output(&self, f: impl FnOnce(&mut OutputDef)) {
        let mut op = self.op.lock().unwrap();
        let out = op.output.as_mut().expect("output not set");
        f(out);
    }

    pub(crate) fn set_shard_op(&self, kind: ShardKind, sop: ShardOp<T>) {
        {
            let mut op = self.op.lock().unwrap();
            let out = op.output.as_mut().expect("output not set");
            assert!(
                matches!(out.shard, ShardKind::Constant),
                "sharding for '{}' must be defined only once",
                out.name
            );
            out.shard = kind;
        }
        *self.shard_op.lock().unwrap() = sop;
    }
}

/// Erased view the executors drive: plan data plus a per-worker wrapper
/// factory.
pub(crate) trait TableNode: Send + Sync {
    fn op(&self) -> OperatorDef;
    fn make_wrapper(&self) -> HandlerWrapper;
}

impl<T: Record> TableNode for TableState<T> {
    fn op(&self) -> OperatorDef {
        self.op.lock().unwrap().clone()
    }

    fn make_wrapper(&self) -> HandlerWrapper {
        let def = self
            .op
            .lock()
            .unwrap()
            .output
            .clone()
            .expect("executed operator has an output");
        let out = Output::new(def, self.shard_op.lock().unwrap().clone());
        match &*self.factory.lock().unwrap() {
            Some(f) => f(out),
            None => identity_wrapper(out),
        }
    }
}

/// A typed table of records flowing through the pipeline.
pub struct PTable<T: Record> {
    pub(crate) pipeline: Pipeline,
    pub(crate) state: Arc<TableState<T>>,
}

impl<T: Record> Clone for PTable<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Record> PTable<T> {
    pub(crate) fn new(pipeline: Pipeline, op: OperatorDef) -> Self {
        Self {
            pipeline,
            state: Arc::new(TableState::new(op)),
        }
    }

    /// Materialize this table under `name`. Registers the operator for
    /// execution and opens the builder for compression/sharding options.
    ///
    /// # Panics
    /// Panics if the table already has an output.
    pub fn write(&self, name: &str, format: WireFormat) -> OutputBuilder<T> {
        {
            let mut op = self.state.op.lock().unwrap();
            assert!(
                op.output.is_none(),
                "operator '{}' already has an output",
                op.name
            );
            op.output = Some(OutputDef::new(name, format));
        }
        self.pipeline
            .register_table(Arc::clone(&self.state) as Arc<dyn TableNode>);
        OutputBuilder {
            state: Arc::clone(&self.state),
        }
    }

    /// Derive a map operator from this table. `make` builds one handler
    /// instance per worker.
    pub fn map<M, F>(&self, name: &str, make: F) -> PTable<M::To>
    where
        M: Mapper<From = T>,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let op = self.dependee_op(name, OperatorKind::Map);
        let table = PTable::new(self.pipeline.clone(), op);
        table
            .state
            .set_factory(move |out| mapper_wrapper(make(), out));
        table
    }

    /// Reinterpret an unmapped read table with a different record type;
    /// records are re-parsed at the handler boundary.
    ///
    /// # Panics
    /// Panics when called on a mapped table.
    pub fn as_type<U: Record>(&self) -> PTable<U> {
        let op = self.state.op.lock().unwrap();
        assert!(
            self.state.is_identity(),
            "as_type requires an unmapped read table, '{}' has a handler",
            op.name
        );
        let new_op = OperatorDef {
            name: op.name.clone(),
            kind: op.kind,
            inputs: op.inputs.clone(),
            output: None,
        };
        PTable::new(self.pipeline.clone(), new_op)
    }

    /// Shorthand for [`as_type::<serde_json::Value>`](Self::as_type).
    pub fn as_json(&self) -> PTable<serde_json::Value> {
        self.as_type()
    }

    /// The input name a downstream operator consumes this table under:
    /// the materialized output when written, the root input for bare read
    /// tables.
    pub(crate) fn dependee_input(&self) -> String {
        let op = self.state.op.lock().unwrap();
        match &op.output {
            Some(out) => out.name.clone(),
            None if self.state.is_identity() => op.inputs[0].clone(),
            None => panic!(
                "operator '{}' must be written before another stage can consume it",
                op.name
            ),
        }
    }

    fn dependee_op(&self, name: &str, kind: OperatorKind) -> OperatorDef {
        let op = self.state.op.lock().unwrap();
        let inputs = if self.state.is_identity() {
            // Mapping an identity table re-reads its raw input.
            op.inputs.clone()
        } else {
            let out = op.output.as_ref().unwrap_or_else(|| {
                panic!(
                    "operator '{}' must be written before another stage can consume it",
                    op.name
                )
            });
            vec![out.name.clone()]
        };
        OperatorDef {
            name: name.to_string(),
            kind,
            inputs,
            output: None,
        }
    }
}
