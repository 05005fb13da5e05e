//! Destination file handle: one open output writer per (operator, shard).
//!
//! All appends for a handle ride the disk pool keyed by a stable hash of the
//! shard's file path, so the pool's per-bucket FIFO serializes writes to the
//! underlying file without a per-file lock. The handle itself keeps its
//! mutable state (current writer, sub-shard counter, raw-byte tally) under
//! one mutex because map tasks on different workers may write the same shard.

use crate::disk_pool::DiskPool;
use crate::io::list_file::{ListWriter, ListWriterOptions};
use crate::plan::{Compression, OutputDef, WireFormat};
use crate::record::RawRecord;
use crate::shard::ShardId;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(feature = "compression-gzip")]
use flate2::write::GzEncoder;
#[cfg(feature = "compression-gzip")]
use rand::Rng;

/// Gzip staging buffer target. The first flush of each handle triggers at a
/// random point below this so handles with similar write rates do not flush
/// in lockstep.
#[cfg(feature = "compression-gzip")]
const GZ_BUF_LIMIT: usize = 1 << 16;

/// Output writes are fire-and-forget from the caller's perspective; a failed
/// append is unrecoverable. Under cancellation the close path becomes
/// best-effort instead.
fn append(
    pool: &DiskPool,
    bucket: u64,
    file: &Arc<Mutex<File>>,
    path: &Arc<PathBuf>,
    stop: &Arc<AtomicBool>,
    buf: Vec<u8>,
) {
    let file = Arc::clone(file);
    let path = Arc::clone(path);
    let stop = Arc::clone(stop);
    pool.submit(bucket, move || {
        if let Err(err) = file.lock().unwrap().write_all(&buf) {
            if stop.load(Ordering::Relaxed) {
                tracing::warn!("dropping write to {} during shutdown: {err}", path.display());
            } else {
                tracing::error!("write failed on {}: {err}", path.display());
                std::process::abort();
            }
        }
    });
}

/// `io::Write` adapter that turns borrowed writes into owned pool appends;
/// the list writer emits whole blocks through this.
struct PoolSink {
    pool: Arc<DiskPool>,
    bucket: u64,
    file: Arc<Mutex<File>>,
    path: Arc<PathBuf>,
    stop: Arc<AtomicBool>,
}

impl Write for PoolSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        append(
            &self.pool,
            self.bucket,
            &self.file,
            &self.path,
            &self.stop,
            buf.to_vec(),
        );
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum ShardWriter {
    Plain {
        file: Arc<Mutex<File>>,
        path: Arc<PathBuf>,
    },
    #[cfg(feature = "compression-gzip")]
    Gzip {
        enc: GzEncoder<Vec<u8>>,
        file: Arc<Mutex<File>>,
        path: Arc<PathBuf>,
        flush_at: usize,
    },
    List {
        writer: ListWriter<PoolSink>,
    },
}

struct HandleState {
    writer: Option<ShardWriter>,
    sub_shard: u32,
    raw_bytes: u64,
    produced: Vec<PathBuf>,
    closed: bool,
}

pub struct DestHandle {
    sid: ShardId,
    out: OutputDef,
    dir: PathBuf,
    /// Canonical `<op>-shard-<sid>` file title.
    title: String,
    bucket: u64,
    pool: Arc<DiskPool>,
    stop: Arc<AtomicBool>,
    state: Mutex<HandleState>,
}

impl DestHandle {
    pub(crate) fn new(
        sid: ShardId,
        out: OutputDef,
        dir: PathBuf,
        pool: Arc<DiskPool>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let title = sid.title(&format!("{}-shard", out.name));
        // The bucket is derived from the first file path and reused for every
        // sub-shard, so one handle never straddles two pool workers.
        let bucket = pool.bucket_for(&file_path(&dir, &title, &out, 0));
        Self {
            sid,
            out,
            dir,
            title,
            bucket,
            pool,
            stop,
            state: Mutex::new(HandleState {
                writer: None,
                sub_shard: 0,
                raw_bytes: 0,
                produced: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.sid
    }

    /// Blocking: create the shard file on the disk pool and set up the
    /// writer. Failing to create an output file is unrecoverable.
    pub(crate) fn open(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.writer.is_none(), "handle already open");
        self.open_writer(&mut state);
    }

    fn open_writer(&self, state: &mut HandleState) {
        let path = file_path(&self.dir, &self.title, &self.out, state.sub_shard);
        let created = {
            let p = path.clone();
            self.pool.run(self.bucket, move || File::create(p))
        };
        let file = match created {
            Ok(f) => Arc::new(Mutex::new(f)),
            Err(err) => {
                tracing::error!("cannot create {}: {err}", path.display());
                std::process::abort();
            }
        };
        state.produced.push(path.clone());
        let path = Arc::new(path);

        let writer = match (self.out.format, self.out.compression) {
            (WireFormat::List, _) => ShardWriter::List {
                writer: ListWriter::with_options(
                    PoolSink {
                        pool: Arc::clone(&self.pool),
                        bucket: self.bucket,
                        file,
                        path,
                        stop: Arc::clone(&self.stop),
                    },
                    ListWriterOptions::default(),
                ),
            },
            #[cfg(feature = "compression-gzip")]
            (WireFormat::Text, Some(Compression::Gzip { level })) => {
                let level = if level == 0 {
                    flate2::Compression::default()
                } else {
                    flate2::Compression::new(level)
                };
                // Stagger the first flush per handle.
                let start_delta = rand::thread_rng().gen_range(0..GZ_BUF_LIMIT - 1);
                ShardWriter::Gzip {
                    enc: GzEncoder::new(Vec::new(), level),
                    file,
                    path,
                    flush_at: GZ_BUF_LIMIT - start_delta,
                }
            }
            #[cfg(not(feature = "compression-gzip"))]
            (WireFormat::Text, Some(Compression::Gzip { .. })) => {
                unreachable!("gzip output rejected at plan validation")
            }
            (WireFormat::Text, None) => ShardWriter::Plain { file, path },
        };
        state.writer = Some(writer);
    }

    /// Non-blocking append of one record (text formats gain a trailing
    /// newline). Rolls over to the next sub-shard once `max_raw_size` raw
    /// bytes have accumulated; records are atomic across the boundary.
    pub fn write(&self, rec: RawRecord) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.closed, "write after close on shard {}", self.sid);
        if let Some(max) = self.out.max_raw_size
            && state.raw_bytes >= max
        {
            self.close_writer(&mut state);
            state.sub_shard += 1;
            state.raw_bytes = 0;
            self.open_writer(&mut state);
        }

        let st = &mut *state;
        match st.writer.as_mut().expect("handle not open") {
            ShardWriter::Plain { file, path } => {
                let mut buf = rec;
                buf.push(b'\n');
                st.raw_bytes += buf.len() as u64;
                append(&self.pool, self.bucket, file, path, &self.stop, buf);
            }
            #[cfg(feature = "compression-gzip")]
            ShardWriter::Gzip {
                enc,
                file,
                path,
                flush_at,
            } => {
                let ok = enc.write_all(&rec).and_then(|_| enc.write_all(b"\n"));
                if let Err(err) = ok {
                    tracing::error!("deflate failed on {}: {err}", path.display());
                    std::process::abort();
                }
                st.raw_bytes += rec.len() as u64 + 1;
                if enc.get_ref().len() >= *flush_at {
                    let staged = std::mem::take(enc.get_mut());
                    append(&self.pool, self.bucket, file, path, &self.stop, staged);
                    *flush_at = GZ_BUF_LIMIT;
                }
            }
            ShardWriter::List { writer } => {
                st.raw_bytes += rec.len() as u64;
                if let Err(err) = writer.add_record(&rec) {
                    tracing::error!("list append failed on shard {}: {err}", self.sid);
                    std::process::abort();
                }
            }
        }
    }

    fn close_writer(&self, state: &mut HandleState) {
        match state.writer.take() {
            Some(ShardWriter::Plain { .. }) | None => {}
            #[cfg(feature = "compression-gzip")]
            Some(ShardWriter::Gzip {
                enc, file, path, ..
            }) => match enc.finish() {
                Ok(tail) => {
                    if !tail.is_empty() {
                        append(&self.pool, self.bucket, &file, &path, &self.stop, tail);
                    }
                }
                Err(err) => {
                    tracing::error!("finishing gzip stream for {} failed: {err}", path.display());
                    if !self.stop.load(Ordering::Relaxed) {
                        std::process::abort();
                    }
                }
            },
            Some(ShardWriter::List { mut writer }) => {
                if let Err(err) = writer.flush() {
                    tracing::error!("list flush failed on shard {}: {err}", self.sid);
                    if !self.stop.load(Ordering::Relaxed) {
                        std::process::abort();
                    }
                }
            }
        }
    }

    /// Blocking: flush compression state, drain pending appends, close the
    /// file. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        self.close_writer(&mut state);
        state.closed = true;
        // FIFO barrier: everything submitted for this bucket has hit the file.
        self.pool.run(self.bucket, || ());
    }

    /// Paths produced by this handle, one per sub-shard.
    pub fn produced_files(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().produced.clone()
    }
}

fn file_path(dir: &Path, title: &str, out: &OutputDef, sub_shard: u32) -> PathBuf {
    let ext = out.format.extension(out.compression.is_some());
    if out.max_raw_size.is_some() {
        dir.join(format!("{title}-{sub_shard:03}{ext}"))
    } else {
        dir.join(format!("{title}{ext}"))
    }
}
