//! Framed, block-oriented record container ("list" format).
//!
//! A list file is a fixed header followed by a sequence of blocks of
//! `64 KiB x multiplier`. Inside a block, each record is a frame:
//!
//! ```text
//! crc32 (u32 LE, over type + payload) | length (u32 LE) | type (u8) | payload
//! ```
//!
//! Records larger than the space left in a block fragment across block
//! boundaries with `FIRST`/`MIDDLE`/`LAST` frames; small records can be
//! packed together into one `ARRAY` frame. Space at the end of a block too
//! small for a frame header is zero-padded (type `0` marks padding).
//!
//! With compression enabled (LZ4 when the `list-lz4` feature is on, the
//! default), each assembled block is compressed as a whole and written as a
//! single self-delimiting `COMPRESSED` envelope frame instead of a fixed-size
//! physical block.
//!
//! The reader verifies every CRC. A corrupt frame drops the rest of its
//! block: the reporter callback is invoked with the bytes lost and reading
//! continues at the next block, so one bad sector does not poison the file.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Read, Write};

/// File magic, followed by the format version byte.
pub const MAGIC: &[u8; 4] = b"LST1";
pub const VERSION: u8 = 1;

/// Base block size; the header's multiplier scales it.
pub const BLOCK_SIZE_UNIT: usize = 64 * 1024;

const FRAME_HEADER: usize = 4 + 4 + 1;

const TYPE_PADDING: u8 = 0;
const TYPE_FULL: u8 = 1;
const TYPE_FIRST: u8 = 2;
const TYPE_MIDDLE: u8 = 3;
const TYPE_LAST: u8 = 4;
const TYPE_ARRAY: u8 = 5;
const TYPE_COMPRESSED: u8 = 6;

const COMPRESS_NONE: u8 = 0;
const COMPRESS_LZ4: u8 = 1;

fn frame_crc(ty: u8, payload: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(&[ty]);
    h.update(payload);
    h.finalize()
}

/// Writer options. Defaults: multiplier 1, compression on when the
/// `list-lz4` feature is enabled.
#[derive(Clone, Debug)]
pub struct ListWriterOptions {
    pub block_size_multiplier: u8,
    pub compress: bool,
}

impl Default for ListWriterOptions {
    fn default() -> Self {
        Self {
            block_size_multiplier: 1,
            compress: cfg!(feature = "list-lz4"),
        }
    }
}

/// Streaming list-file writer over any byte sink.
pub struct ListWriter<W: Write> {
    dest: W,
    opts: ListWriterOptions,
    meta: BTreeMap<String, String>,
    block: Vec<u8>,
    block_size: usize,
    init_done: bool,
    records_added: u64,
    bytes_added: u64,
    compression_savings: u64,
}

impl<W: Write> ListWriter<W> {
    pub fn new(dest: W) -> Self {
        Self::with_options(dest, ListWriterOptions::default())
    }

    pub fn with_options(dest: W, opts: ListWriterOptions) -> Self {
        let block_size = BLOCK_SIZE_UNIT * opts.block_size_multiplier.max(1) as usize;
        Self {
            dest,
            opts,
            meta: BTreeMap::new(),
            block: Vec::with_capacity(block_size),
            block_size,
            init_done: false,
            records_added: 0,
            bytes_added: 0,
            compression_savings: 0,
        }
    }

    /// Attach a key/value pair to the file header. Must be called before the
    /// first record is added.
    pub fn add_meta(&mut self, key: &str, value: &str) -> io::Result<()> {
        if self.init_done {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "meta must be added before the first record",
            ));
        }
        self.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn records_added(&self) -> u64 {
        self.records_added
    }

    pub fn bytes_added(&self) -> u64 {
        self.bytes_added
    }

    pub fn compression_savings(&self) -> u64 {
        self.compression_savings
    }

    fn ensure_init(&mut self) -> io::Result<()> {
        if self.init_done {
            return Ok(());
        }
        let compress_method = if self.opts.compress {
            if cfg!(feature = "list-lz4") {
                COMPRESS_LZ4
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "list compression requires the list-lz4 feature",
                ));
            }
        } else {
            COMPRESS_NONE
        };
        self.dest.write_all(MAGIC)?;
        self.dest.write_all(&[
            VERSION,
            self.opts.block_size_multiplier.max(1),
            compress_method,
        ])?;
        self.dest
            .write_all(&(self.meta.len() as u32).to_le_bytes())?;
        for (k, v) in &self.meta {
            self.dest.write_all(&(k.len() as u32).to_le_bytes())?;
            self.dest.write_all(k.as_bytes())?;
            self.dest.write_all(&(v.len() as u32).to_le_bytes())?;
            self.dest.write_all(v.as_bytes())?;
        }
        self.init_done = true;
        Ok(())
    }

    fn push_frame(&mut self, ty: u8, payload: &[u8]) {
        let crc = frame_crc(ty, payload);
        self.block.extend_from_slice(&crc.to_le_bytes());
        self.block
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.block.push(ty);
        self.block.extend_from_slice(payload);
    }

    /// Space left for a frame payload in the current block, if a header fits.
    fn payload_space(&self) -> Option<usize> {
        let free = self.block_size - self.block.len();
        if free <= FRAME_HEADER {
            None
        } else {
            Some(free - FRAME_HEADER)
        }
    }

    /// Emit the current block. Intermediate uncompressed blocks are padded to
    /// the full block size so readers can locate block boundaries; the final
    /// block written by [`flush`](Self::flush) may be short.
    fn finish_block(&mut self, pad: bool) -> io::Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        if self.opts.compress {
            #[cfg(feature = "list-lz4")]
            {
                let compressed = lz4_flex::block::compress_prepend_size(&self.block);
                self.compression_savings +=
                    self.block.len().saturating_sub(compressed.len()) as u64;
                let crc = frame_crc(TYPE_COMPRESSED, &compressed);
                self.dest.write_all(&crc.to_le_bytes())?;
                self.dest
                    .write_all(&(compressed.len() as u32).to_le_bytes())?;
                self.dest.write_all(&[TYPE_COMPRESSED])?;
                self.dest.write_all(&compressed)?;
            }
            #[cfg(not(feature = "list-lz4"))]
            unreachable!("compression rejected at init");
        } else {
            if pad {
                self.block.resize(self.block_size, 0);
            }
            self.dest.write_all(&self.block)?;
        }
        self.block.clear();
        Ok(())
    }

    /// Append one record, fragmenting across blocks as needed.
    pub fn add_record(&mut self, rec: &[u8]) -> io::Result<()> {
        self.ensure_init()?;
        self.records_added += 1;
        self.bytes_added += rec.len() as u64;

        let mut rest = rec;
        let mut first = true;
        loop {
            let Some(avail) = self.payload_space() else {
                self.finish_block(true)?;
                continue;
            };
            if rest.len() <= avail {
                self.push_frame(if first { TYPE_FULL } else { TYPE_LAST }, rest);
                break;
            }
            let ty = if first { TYPE_FIRST } else { TYPE_MIDDLE };
            self.push_frame(ty, &rest[..avail]);
            rest = &rest[avail..];
            first = false;
            self.finish_block(false)?;
        }
        if self.block.len() >= self.block_size {
            self.finish_block(false)?;
        }
        Ok(())
    }

    /// Append a batch of records packed into `ARRAY` frames.
    ///
    /// Packing amortizes the frame header over many small records. Records
    /// too large to pack fall back to the regular fragmenting path, so the
    /// batch always lands whole and in order.
    pub fn add_record_batch<'a>(
        &mut self,
        recs: impl IntoIterator<Item = &'a [u8]>,
    ) -> io::Result<()> {
        self.ensure_init()?;
        let mut group: Vec<&[u8]> = Vec::new();
        let mut group_bytes = 4usize; // count field

        for rec in recs {
            let entry = 4 + rec.len();
            if FRAME_HEADER + 4 + entry > self.block_size {
                self.emit_array(&mut group, &mut group_bytes)?;
                self.add_record(rec)?;
                continue;
            }
            let fits_now = self
                .payload_space()
                .is_some_and(|avail| group_bytes + entry <= avail);
            if !fits_now {
                self.emit_array(&mut group, &mut group_bytes)?;
                let fits_fresh = self
                    .payload_space()
                    .is_some_and(|avail| 4 + entry <= avail);
                if !fits_fresh {
                    self.finish_block(true)?;
                }
            }
            group.push(rec);
            group_bytes += entry;
        }
        self.emit_array(&mut group, &mut group_bytes)
    }

    fn emit_array(&mut self, group: &mut Vec<&[u8]>, group_bytes: &mut usize) -> io::Result<()> {
        if group.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(*group_bytes);
        payload.extend_from_slice(&(group.len() as u32).to_le_bytes());
        for rec in group.iter() {
            payload.extend_from_slice(&(rec.len() as u32).to_le_bytes());
            payload.extend_from_slice(rec);
            self.records_added += 1;
            self.bytes_added += rec.len() as u64;
        }
        self.push_frame(TYPE_ARRAY, &payload);
        if self.block.len() >= self.block_size {
            self.finish_block(false)?;
        }
        group.clear();
        *group_bytes = 4;
        Ok(())
    }

    /// Write out the current partial block and flush the sink. The writer
    /// stays usable; closing a destination file calls this last.
    pub fn flush(&mut self) -> io::Result<()> {
        self.ensure_init()?;
        self.finish_block(false)?;
        self.dest.flush()
    }
}

/// Invoked with `(bytes_lost, reason)` whenever corrupt data is skipped.
pub type CorruptionReporter = Box<dyn FnMut(u64, &str) + Send>;

/// Streaming list-file reader.
pub struct ListReader<R: Read> {
    src: R,
    block_size: usize,
    compressed: bool,
    meta: HashMap<String, String>,
    reporter: Option<CorruptionReporter>,
    block: Vec<u8>,
    pos: usize,
    fragment: Option<Vec<u8>>,
    array: VecDeque<Vec<u8>>,
    eof: bool,
    read_data_bytes: u64,
}

impl<R: Read> ListReader<R> {
    pub fn new(src: R) -> io::Result<Self> {
        Self::with_reporter(src, None)
    }

    pub fn with_reporter(mut src: R, reporter: Option<CorruptionReporter>) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        src.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad list magic"));
        }
        let mut fixed = [0u8; 3];
        src.read_exact(&mut fixed)?;
        let [version, multiplier, compress] = fixed;
        if version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported list version {version}"),
            ));
        }
        if compress > COMPRESS_LZ4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown compression method {compress}"),
            ));
        }
        if compress == COMPRESS_LZ4 && !cfg!(feature = "list-lz4") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file uses lz4 blocks but the list-lz4 feature is disabled",
            ));
        }
        let mut count_buf = [0u8; 4];
        src.read_exact(&mut count_buf)?;
        let mut meta = HashMap::new();
        for _ in 0..u32::from_le_bytes(count_buf) {
            let k = read_len_prefixed(&mut src)?;
            let v = read_len_prefixed(&mut src)?;
            meta.insert(
                String::from_utf8_lossy(&k).into_owned(),
                String::from_utf8_lossy(&v).into_owned(),
            );
        }
        Ok(Self {
            src,
            block_size: BLOCK_SIZE_UNIT * multiplier.max(1) as usize,
            compressed: compress == COMPRESS_LZ4,
            meta,
            reporter,
            block: Vec::new(),
            pos: 0,
            fragment: None,
            array: VecDeque::new(),
            eof: false,
            read_data_bytes: 0,
        })
    }

    /// Key/value metadata from the file header.
    pub fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }

    /// Payload bytes returned so far.
    pub fn read_data_bytes(&self) -> u64 {
        self.read_data_bytes
    }

    fn report(&mut self, bytes: u64, reason: &str) {
        if let Some(cb) = &mut self.reporter {
            cb(bytes, reason);
        }
    }

    /// Drop the rest of the current block after corruption.
    fn skip_block(&mut self, reason: &str) {
        let lost = (self.block.len() - self.pos) as u64;
        self.report(lost, reason);
        self.pos = self.block.len();
        self.fragment = None;
    }

    fn next_block(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.compressed {
            self.next_compressed_block()
        } else {
            self.block.resize(self.block_size, 0);
            let n = read_up_to(&mut self.src, &mut self.block)?;
            self.block.truncate(n);
            self.pos = 0;
            if n == 0 {
                self.eof = true;
            }
            Ok(n > 0)
        }
    }

    fn next_compressed_block(&mut self) -> io::Result<bool> {
        loop {
            let mut header = [0u8; FRAME_HEADER];
            let n = read_up_to(&mut self.src, &mut header)?;
            if n == 0 {
                self.eof = true;
                return Ok(false);
            }
            if n < FRAME_HEADER {
                self.report(n as u64, "truncated block envelope");
                self.eof = true;
                return Ok(false);
            }
            let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
            let ty = header[8];
            // An implausible envelope means we cannot resync; give up on the file.
            if ty != TYPE_COMPRESSED || len > 4 * self.block_size + 1024 {
                self.report(len as u64, "corrupt block envelope");
                self.eof = true;
                return Ok(false);
            }
            let mut payload = vec![0u8; len];
            self.src.read_exact(&mut payload)?;
            if frame_crc(ty, &payload) != crc {
                self.report(len as u64, "block checksum mismatch");
                self.fragment = None;
                continue;
            }
            #[cfg(feature = "list-lz4")]
            match lz4_flex::block::decompress_size_prepended(&payload) {
                Ok(raw) => {
                    self.block = raw;
                    self.pos = 0;
                    return Ok(true);
                }
                Err(_) => {
                    self.report(len as u64, "block decompression failed");
                    self.fragment = None;
                    continue;
                }
            }
            #[cfg(not(feature = "list-lz4"))]
            unreachable!("lz4 file rejected in header check");
        }
    }

    /// Read the next record, or `None` at end of file.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(rec) = self.array.pop_front() {
                self.read_data_bytes += rec.len() as u64;
                return Ok(Some(rec));
            }
            if self.pos >= self.block.len() {
                if !self.next_block()? {
                    return Ok(None);
                }
                continue;
            }
            if self.block.len() - self.pos < FRAME_HEADER {
                // Padding tail too small for a header.
                self.pos = self.block.len();
                continue;
            }
            let crc = u32::from_le_bytes(self.block[self.pos..self.pos + 4].try_into().unwrap());
            let len =
                u32::from_le_bytes(self.block[self.pos + 4..self.pos + 8].try_into().unwrap())
                    as usize;
            let ty = self.block[self.pos + 8];
            if ty == TYPE_PADDING {
                self.pos = self.block.len();
                continue;
            }
            if len > self.block.len() - self.pos - FRAME_HEADER {
                self.skip_block("frame length exceeds block");
                continue;
            }
            let start = self.pos + FRAME_HEADER;
            let payload = &self.block[start..start + len];
            if frame_crc(ty, payload) != crc {
                self.skip_block("frame checksum mismatch");
                continue;
            }
            let payload = payload.to_vec();
            self.pos = start + len;

            match ty {
                TYPE_FULL => {
                    if self.fragment.take().is_some() {
                        self.report(0, "unterminated fragment");
                    }
                    self.read_data_bytes += payload.len() as u64;
                    return Ok(Some(payload));
                }
                TYPE_FIRST => {
                    if self.fragment.replace(payload).is_some() {
                        self.report(0, "unterminated fragment");
                    }
                }
                TYPE_MIDDLE => match &mut self.fragment {
                    Some(buf) => buf.extend_from_slice(&payload),
                    None => self.report(payload.len() as u64, "orphan middle fragment"),
                },
                TYPE_LAST => match self.fragment.take() {
                    Some(mut buf) => {
                        buf.extend_from_slice(&payload);
                        self.read_data_bytes += buf.len() as u64;
                        return Ok(Some(buf));
                    }
                    None => self.report(payload.len() as u64, "orphan last fragment"),
                },
                TYPE_ARRAY => {
                    if !self.unpack_array(&payload) {
                        self.skip_block("malformed array frame");
                    }
                }
                _ => self.skip_block("unknown frame type"),
            }
        }
    }

    fn unpack_array(&mut self, payload: &[u8]) -> bool {
        if payload.len() < 4 {
            return false;
        }
        let count = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        let mut at = 4usize;
        let mut recs = VecDeque::with_capacity(count as usize);
        for _ in 0..count {
            if payload.len() - at < 4 {
                return false;
            }
            let len = u32::from_le_bytes(payload[at..at + 4].try_into().unwrap()) as usize;
            at += 4;
            if payload.len() - at < len {
                return false;
            }
            recs.push_back(payload[at..at + len].to_vec());
            at += len;
        }
        self.array = recs;
        true
    }
}

fn read_len_prefixed(src: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    src.read_exact(&mut len_buf)?;
    let mut buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read until `buf` is full or EOF; returns the bytes read.
fn read_up_to(src: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
