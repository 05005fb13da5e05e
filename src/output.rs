//! Typed output specs and the planning-time output builder.

use crate::plan::{Compression, OutputDef, ShardKind};
use crate::record::Record;
use crate::shard::ShardId;
use crate::table::TableState;
use std::sync::Arc;

/// The sharding operation attached to a typed output.
pub(crate) enum ShardOp<T> {
    Constant(ShardId),
    ModN(u32, Arc<dyn Fn(&T) -> u32 + Send + Sync>),
    Custom(Arc<dyn Fn(&T) -> String + Send + Sync>),
}

impl<T> Clone for ShardOp<T> {
    fn clone(&self) -> Self {
        match self {
            ShardOp::Constant(sid) => ShardOp::Constant(sid.clone()),
            ShardOp::ModN(n, f) => ShardOp::ModN(*n, Arc::clone(f)),
            ShardOp::Custom(f) => ShardOp::Custom(Arc::clone(f)),
        }
    }
}

/// A frozen, typed output: the plain [`OutputDef`] plus the sharding
/// function. One clone lives inside every handler wrapper.
pub struct Output<T> {
    pub(crate) def: OutputDef,
    pub(crate) shard_op: ShardOp<T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            shard_op: self.shard_op.clone(),
        }
    }
}

impl<T> Output<T> {
    pub(crate) fn new(def: OutputDef, shard_op: ShardOp<T>) -> Self {
        Self { def, shard_op }
    }

    /// Route a record to its shard.
    pub fn shard(&self, t: &T) -> ShardId {
        match &self.shard_op {
            ShardOp::Constant(sid) => sid.clone(),
            ShardOp::ModN(n, f) => ShardId::Index(f(t) % n),
            ShardOp::Custom(f) => ShardId::Named(f(t)),
        }
    }

    pub fn def(&self) -> &OutputDef {
        &self.def
    }
}

/// Builder returned by [`PTable::write`](crate::PTable::write); mutates the
/// table's output spec in place until the plan freezes at run start.
pub struct OutputBuilder<T: Record> {
    pub(crate) state: Arc<TableState<T>>,
}

impl<T: Record> OutputBuilder<T> {
    /// Compress the output stream with gzip at the given level
    /// (0 for the codec default).
    pub fn and_compress(self, level: u32) -> Self {
        self.state.with_output(|out| {
            out.compression = Some(Compression::Gzip { level });
        });
        self
    }

    /// Shard by `f(record) mod n`, producing index shards in `0..n`.
    ///
    /// # Panics
    /// Panics if a sharding function was already set, or if `n` is zero.
    pub fn with_mod_n_sharding(
        self,
        n: u32,
        f: impl Fn(&T) -> u32 + Send + Sync + 'static,
    ) -> Self {
        assert!(n > 0, "modN sharding requires n > 0");
        self.state.set_shard_op(ShardKind::ModN(n), ShardOp::ModN(n, Arc::new(f)));
        self
    }

    /// Shard by a custom naming function, producing named shards.
    ///
    /// # Panics
    /// Panics if a sharding function was already set.
    pub fn with_custom_sharding(
        self,
        f: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Self {
        self.state
            .set_shard_op(ShardKind::UserDefined, ShardOp::Custom(Arc::new(f)));
        self
    }

    /// Roll each shard file over to a new `-NNN` sub-shard once it has
    /// received `bytes` raw bytes. Records are atomic: a record never spans
    /// two sub-shard files.
    pub fn with_max_raw_size(self, bytes: u64) -> Self {
        self.state.with_output(|out| {
            out.max_raw_size = Some(bytes);
        });
        self
    }
}
