//! Mapper executor: runs read and map operators.
//!
//! Per worker, two tasks ride dedicated threads: a **reader** that pops file
//! paths from the shared bounded file queue and streams their records into
//! the worker's bounded record queue, and a **map task** that pops records
//! and drives the handler wrapper. The driver expands the input globs and
//! pushes paths; closing the file queue propagates to the record queues and
//! drains the whole ladder.
//!
//! Ordering: records of one file reach the handler in file order (one reader
//! owns the whole file); writes to one output shard are serialized by the
//! disk pool's per-bucket FIFO; nothing else is ordered.

use crate::context::RawContext;
use crate::dest::DestFileSet;
use crate::exec::{ExecEnv, FILE_QUEUE_DEPTH, RECORD_QUEUE_DEPTH};
use crate::io::FileBackend;
use crate::io::reader::{maybe_decompress, process_list, process_text};
use crate::plan::{FileSpec, InputDef};
use crate::record::RawRecord;
use crate::shard::ShardId;
use crate::stats::PipelineStats;
use crate::table::TableNode;
use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, SendTimeoutError, bounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub(crate) struct FileTask {
    pub path: String,
    pub binary: bool,
    pub skip_header: u32,
}

pub(crate) fn run(
    env: &ExecEnv,
    node: &dyn TableNode,
    inputs: &[InputDef],
    stats: &mut PipelineStats,
) -> Result<Vec<(ShardId, PathBuf)>> {
    let op = node.op();
    let out = op.output.clone().expect("executed operator has an output");
    let dest = Arc::new(DestFileSet::new(
        env.data_dir.join(&out.name),
        out.clone(),
        Arc::clone(&env.pool),
        Arc::clone(&env.stop),
    )?);
    let out_binary = out.format.is_binary();

    let (file_tx, file_rx) = bounded::<FileTask>(FILE_QUEUE_DEPTH);

    let contexts = std::thread::scope(|s| -> Result<Vec<(RawContext, u64)>> {
        let mut readers = Vec::with_capacity(env.io_workers);
        let mut mappers = Vec::with_capacity(env.io_workers);
        for _ in 0..env.io_workers {
            let (rec_tx, rec_rx) = bounded::<(bool, RawRecord)>(RECORD_QUEUE_DEPTH);
            let file_rx = file_rx.clone();
            let backend = Arc::clone(&env.backend);
            let stop = Arc::clone(&env.stop);
            readers.push(s.spawn(move || reader_task(file_rx, rec_tx, backend, stop)));

            let dest = Arc::clone(&dest);
            mappers.push(s.spawn(move || {
                let mut wrapper = node.make_wrapper();
                let mut cx = RawContext::new(dest, out_binary);
                let mut calls: u64 = 0;
                while let Ok((binary, rec)) = rec_rx.recv() {
                    wrapper.dispatch(0, binary, rec, &mut cx);
                    calls += 1;
                }
                cx.flush();
                (cx, calls)
            }));
        }
        drop(file_rx);

        push_inputs(env, inputs, &file_tx);
        drop(file_tx);

        for r in readers {
            r.join().expect("reader task panicked");
        }
        let mut out = Vec::with_capacity(mappers.len());
        for m in mappers {
            out.push(m.join().expect("map task panicked"));
        }
        Ok(out)
    })?;

    for (cx, calls) in contexts {
        stats.absorb(cx, calls);
    }
    dest.close_all();
    Ok(dest.shard_files())
}

/// Expand every input and feed the file queue; returns early once the run is
/// stopped or every reader has exited.
fn push_inputs(env: &ExecEnv, inputs: &[InputDef], file_tx: &Sender<FileTask>) {
    for input in inputs {
        let binary = input.format.is_binary();
        for spec in &input.file_specs {
            if env.stop.load(Ordering::Relaxed) {
                return;
            }
            let paths: Vec<String> = match spec {
                FileSpec::Sharded { path, .. } => vec![path.to_string_lossy().into_owned()],
                FileSpec::Glob(pattern) => match env.backend.expand(pattern) {
                    Ok(found) => {
                        tracing::debug!("glob {pattern} matched {} files", found.len());
                        found.into_iter().map(|(_, p)| p).collect()
                    }
                    Err(err) => {
                        tracing::warn!("skipping input pattern {pattern}: {err}");
                        continue;
                    }
                },
            };
            for path in paths {
                let mut task = FileTask {
                    path,
                    binary,
                    skip_header: input.skip_header,
                };
                loop {
                    match file_tx.send_timeout(task, Duration::from_millis(50)) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(t)) => {
                            if env.stop.load(Ordering::Relaxed) {
                                return;
                            }
                            task = t;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return,
                    }
                }
            }
        }
    }
}

fn reader_task(
    file_rx: Receiver<FileTask>,
    rec_tx: Sender<(bool, RawRecord)>,
    backend: Arc<dyn FileBackend>,
    stop: Arc<AtomicBool>,
) {
    while let Ok(task) = file_rx.recv() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let reader = match backend.open(&task.path) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!("skipping {}: {err}", task.path);
                continue;
            }
        };
        tracing::info!("processing file {}", task.path);
        let binary = task.binary;
        let sink = |rec: RawRecord| rec_tx.send((binary, rec)).is_ok();
        let read = if binary {
            let path = task.path.clone();
            let reporter = Box::new(move |bytes: u64, reason: &str| {
                tracing::warn!("lost {bytes} bytes in {path}: {reason}");
            });
            process_list(reader, task.skip_header, &stop, Some(reporter), sink)
        } else {
            let reader = maybe_decompress(reader, &task.path);
            process_text(reader, task.skip_header, &stop, sink)
        };
        match read {
            Ok(cnt) => tracing::debug!("read {cnt} records from {}", task.path),
            Err(err) => tracing::warn!("abandoning {}: {err}", task.path),
        }
    }
    // Dropping rec_tx here closes the record queue; the map task drains and
    // exits.
}
