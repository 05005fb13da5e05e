//! Input record streaming.
//!
//! Turns an opened input file into a stream of raw records, checking the
//! cancellation flag and yielding the thread every ~1,000 records so a
//! stopped pipeline winds down promptly. The sink returns `false` to stop
//! early (its queue was closed).

use crate::io::list_file::{CorruptionReporter, ListReader};
use crate::record::RawRecord;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const YIELD_EVERY: u64 = 1000;

/// Wrap the reader with gzip decompression when the path says so.
pub fn maybe_decompress(reader: Box<dyn Read + Send>, path: &str) -> Box<dyn Read + Send> {
    #[cfg(feature = "compression-gzip")]
    if path.to_lowercase().ends_with(".gz") {
        return Box::new(flate2::read::MultiGzDecoder::new(reader));
    }
    let _ = path;
    reader
}

/// Stream newline-delimited records into `sink`, returning the record count.
///
/// The trailing empty line of a newline-terminated file is elided. The first
/// `skip_header` records of the file are discarded.
pub fn process_text(
    reader: impl Read,
    skip_header: u32,
    stop: &Arc<AtomicBool>,
    mut sink: impl FnMut(RawRecord) -> bool,
) -> std::io::Result<u64> {
    let mut lines = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut cnt: u64 = 0;
    let mut skipped: u32 = 0;
    loop {
        buf.clear();
        let n = lines.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if skipped < skip_header {
            skipped += 1;
            continue;
        }
        cnt += 1;
        if !sink(std::mem::take(&mut buf)) {
            break;
        }
        if cnt % YIELD_EVERY == 0 {
            std::thread::yield_now();
            if stop.load(Ordering::Relaxed) {
                break;
            }
        }
    }
    Ok(cnt)
}

/// Stream framed records from a list file into `sink`.
///
/// Corrupt blocks are skipped and reported through `reporter`; the rest of
/// the file still streams.
pub fn process_list(
    reader: impl Read,
    skip_header: u32,
    stop: &Arc<AtomicBool>,
    reporter: Option<CorruptionReporter>,
    mut sink: impl FnMut(RawRecord) -> bool,
) -> std::io::Result<u64> {
    let mut list = ListReader::with_reporter(reader, reporter)?;
    let mut cnt: u64 = 0;
    let mut skipped: u32 = 0;
    while let Some(rec) = list.read_record()? {
        if skipped < skip_header {
            skipped += 1;
            continue;
        }
        cnt += 1;
        if !sink(rec) {
            break;
        }
        if cnt % YIELD_EVERY == 0 {
            std::thread::yield_now();
            if stop.load(Ordering::Relaxed) {
                break;
            }
        }
    }
    Ok(cnt)
}
