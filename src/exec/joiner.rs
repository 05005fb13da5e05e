//! Joiner executor: runs group operators over pre-sharded inputs.
//!
//! A group operator processes one shard at a time: a fresh grouper instance
//! sees every record of that shard across all input streams, then its
//! per-shard finish hook runs, then the grouper is retired. The constant
//! output shard is pinned to the shard being drained, so emissions from
//! shard `k` land only in output shard `k` - the reducer contract.
//!
//! Shards are distributed across workers through a channel; cross-input
//! ordering within one shard is the input registration order, which callers
//! must not rely on.

use crate::context::RawContext;
use crate::dest::DestFileSet;
use crate::exec::ExecEnv;
use crate::io::reader::{maybe_decompress, process_list, process_text};
use crate::plan::{FileSpec, InputDef};
use crate::shard::ShardId;
use crate::stats::PipelineStats;
use crate::table::TableNode;
use anyhow::{Result, bail};
use crossbeam_channel::bounded;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// All files of one shard, grouped per input stream.
struct ShardWork {
    sid: ShardId,
    per_input: Vec<Vec<String>>,
}

pub(crate) fn run(
    env: &ExecEnv,
    node: &dyn TableNode,
    inputs: &[InputDef],
    stats: &mut PipelineStats,
) -> Result<Vec<(ShardId, PathBuf)>> {
    let op = node.op();
    let out = op.output.clone().expect("executed operator has an output");

    // Group every input file by shard identity, preserving first-seen order
    // so shard scheduling stays deterministic.
    let mut order: Vec<ShardId> = Vec::new();
    let mut by_shard: HashMap<ShardId, Vec<Vec<String>>> = HashMap::new();
    for (index, input) in inputs.iter().enumerate() {
        for spec in &input.file_specs {
            match spec {
                FileSpec::Sharded { path, shard } => {
                    let entry = by_shard.entry(shard.clone()).or_insert_with(|| {
                        order.push(shard.clone());
                        vec![Vec::new(); inputs.len()]
                    });
                    entry[index].push(path.to_string_lossy().into_owned());
                }
                FileSpec::Glob(pattern) => bail!(
                    "group operator '{}' requires pre-sharded inputs, '{}' has glob {pattern}",
                    op.name,
                    input.name
                ),
            }
        }
    }

    let dest = Arc::new(DestFileSet::new(
        env.data_dir.join(&out.name),
        out.clone(),
        Arc::clone(&env.pool),
        Arc::clone(&env.stop),
    )?);
    let out_binary = out.format.is_binary();
    let input_meta: Vec<(bool, u32)> = inputs
        .iter()
        .map(|i| (i.format.is_binary(), i.skip_header))
        .collect();

    let (shard_tx, shard_rx) = bounded::<ShardWork>(order.len().max(1));
    for sid in order {
        let per_input = by_shard.remove(&sid).expect("shard registered above");
        shard_tx
            .send(ShardWork { sid, per_input })
            .expect("shard queue sized to fit");
    }
    drop(shard_tx);

    let contexts = std::thread::scope(|s| -> Vec<(RawContext, u64)> {
        let mut workers = Vec::with_capacity(env.io_workers);
        for _ in 0..env.io_workers {
            let shard_rx = shard_rx.clone();
            let dest = Arc::clone(&dest);
            let backend = Arc::clone(&env.backend);
            let stop = Arc::clone(&env.stop);
            let input_meta = &input_meta;
            workers.push(s.spawn(move || {
                let mut cx = RawContext::new(dest, out_binary);
                let mut calls: u64 = 0;
                while let Ok(work) = shard_rx.recv() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    tracing::debug!("grouping shard {}", work.sid);
                    let mut wrapper = node.make_wrapper();
                    wrapper.set_output_shard(work.sid.clone());
                    for (index, files) in work.per_input.iter().enumerate() {
                        let (binary, skip_header) = input_meta[index];
                        for path in files {
                            if stop.load(Ordering::Relaxed) {
                                break;
                            }
                            let reader = match backend.open(path) {
                                Ok(r) => r,
                                Err(err) => {
                                    tracing::warn!("skipping {path}: {err}");
                                    continue;
                                }
                            };
                            let sink = |rec| {
                                wrapper.dispatch(index, binary, rec, &mut cx);
                                calls += 1;
                                true
                            };
                            let read = if binary {
                                let path = path.clone();
                                let reporter = Box::new(move |bytes: u64, reason: &str| {
                                    tracing::warn!("lost {bytes} bytes in {path}: {reason}");
                                });
                                process_list(reader, skip_header, &stop, Some(reporter), sink)
                            } else {
                                let reader = maybe_decompress(reader, path);
                                process_text(reader, skip_header, &stop, sink)
                            };
                            if let Err(err) = read {
                                tracing::warn!("abandoning {path}: {err}");
                            }
                        }
                    }
                    wrapper.on_shard_finish(&mut cx);
                }
                cx.flush();
                (cx, calls)
            }));
        }
        workers
            .into_iter()
            .map(|w| w.join().expect("join worker panicked"))
            .collect()
    });

    for (cx, calls) in contexts {
        stats.absorb(cx, calls);
    }
    dest.close_all();
    Ok(dest.shard_files())
}
