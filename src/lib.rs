//! # Millrace
//!
//! A **single-node, multi-threaded MapReduce engine** for Rust. A user
//! program declares a directed acyclic graph of tables - reads over globbed
//! files, record-to-record maps, and multi-stream group/joins - and the
//! engine executes it operator by operator, parallelizing file I/O and map
//! work across a worker pool, routing every output record through the
//! output's sharding function, and funneling all file appends through a
//! dedicated disk-bound thread pool.
//!
//! ## Key pieces
//!
//! - **Declarative planning** - [`Pipeline::read_text`] / [`PTable::map`] /
//!   [`PTable::write`] / [`Pipeline::join`] build plain plan data; nothing
//!   runs until [`Pipeline::run`].
//! - **Sharded outputs** - constant, modulo-N, or custom-named sharding,
//!   with optional gzip and size-based sub-shard rollover.
//! - **Two wire formats** - newline-delimited text and a framed,
//!   block-compressed list container ([`io::list_file`]).
//! - **Cooperative cancellation** - [`Pipeline::stop`] drains the run and
//!   still closes every output file.
//! - **Counters** - handlers bump named counters; parse failures are counted
//!   per record and never abort a run ([`PipelineStats`]).
//!
//! ## Quick start
//!
//! ```no_run
//! use millrace::*;
//! # use anyhow::Result;
//!
//! struct SuffixMapper;
//!
//! impl Mapper for SuffixMapper {
//!     type From = String;
//!     type To = String;
//!
//!     fn map(&mut self, rec: String, cx: &mut DoContext<'_, String>) {
//!         cx.write(format!("{rec}a"));
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let p = Pipeline::new();
//! let lines = p.read_text("logs", "logs/*.txt");
//! lines
//!     .map("suffix", || SuffixMapper)
//!     .write("suffixed", WireFormat::Text)
//!     .and_compress(1)
//!     .with_mod_n_sharding(8, |rec: &String| rec.len() as u32);
//!
//! let stats = p.run_with(PipelineOptions::at("/tmp/mr_output"))?;
//! println!("{} records, {} parse errors", stats.map_calls, stats.parse_errors);
//! # Ok(())
//! # }
//! ```
//!
//! ## Joins
//!
//! A group operator consumes streams that are already sharded (normally the
//! modN-sharded output of earlier operators). For each shard, a fresh
//! [`Grouper`] sees every record of every input, then its
//! [`on_shard_finish`](Grouper::on_shard_finish) hook fires; everything it
//! emits lands in the matching output shard.
//!
//! ```no_run
//! use millrace::*;
//! use std::collections::HashMap;
//! # use anyhow::Result;
//!
//! #[derive(Default)]
//! struct CountJoiner {
//!     counts: HashMap<String, u64>,
//! }
//!
//! impl Grouper for CountJoiner {
//!     type To = String;
//!
//!     fn on_shard_finish(&mut self, cx: &mut DoContext<'_, String>) {
//!         for (key, n) in self.counts.drain() {
//!             cx.write(format!("{key}={n}"));
//!         }
//!     }
//! }
//!
//! impl CountJoiner {
//!     fn on_left(&mut self, rec: String, _cx: &mut DoContext<'_, String>) {
//!         *self.counts.entry(rec).or_insert(0) += 1;
//!     }
//!     fn on_right(&mut self, rec: String, _cx: &mut DoContext<'_, String>) {
//!         *self.counts.entry(rec).or_insert(0) += 1;
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let p = Pipeline::new();
//! let left = p.read_text("left_lines", "left/*.txt");
//! let right = p.read_text("right_lines", "right/*.txt");
//! left.write("left_sharded", WireFormat::Text)
//!     .with_mod_n_sharding(4, |r: &String| r.len() as u32);
//! right.write("right_sharded", WireFormat::Text)
//!     .with_mod_n_sharding(4, |r: &String| r.len() as u32);
//!
//! let joined = p.join(
//!     "join_sides",
//!     vec![
//!         join_input(&left, CountJoiner::on_left),
//!         join_input(&right, CountJoiner::on_right),
//!     ],
//!     CountJoiner::default,
//! );
//! joined.write("joined", WireFormat::Text);
//! p.run_with(PipelineOptions::at("/tmp/mr_output"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution model
//!
//! Two thread layers. Each **I/O worker** pairs a reader task (pops file
//! paths from a small bounded queue, streams records into the worker's
//! bounded record queue) with a map task (pops records, drives the handler).
//! The **disk pool** serves every blocking file call; appends for one file
//! always hash to the same pool thread, whose FIFO queue serializes them
//! without per-file locks. Bounded queues give backpressure end to end.
//!
//! Ordering guarantees: records of one input file reach handlers in file
//! order; appends to one shard file are globally ordered; nothing else.
//!
//! ## Feature flags
//!
//! - `compression-gzip` *(default)* - gzip output compression and `.gz`
//!   input transparency via `flate2`
//! - `list-lz4` *(default)* - LZ4 block compression in the list format
//! - `proto` - protobuf record codec (`record::Pb`) via `prost`

pub mod context;
pub mod dest;
pub mod disk_pool;
pub(crate) mod exec;
pub mod handler;
pub mod io;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod record;
pub mod shard;
pub mod stats;
pub mod table;
pub mod testing;

// General re-exports
pub use context::{DoContext, RawContext};
pub use handler::{Grouper, JoinInput, Mapper, join_input};
pub use output::{Output, OutputBuilder};
pub use pipeline::{Pipeline, PipelineOptions, ShardFile};
pub use plan::{Compression, FileSpec, OperatorKind, ShardKind, WireFormat};
pub use record::{RawRecord, Record};
pub use shard::ShardId;
pub use stats::PipelineStats;
pub use table::PTable;

#[cfg(feature = "proto")]
pub use record::Pb;
