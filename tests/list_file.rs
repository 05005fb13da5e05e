use millrace::io::{ListReader, ListWriter, ListWriterOptions};
use std::io::Cursor;

fn write_list(records: &[Vec<u8>], opts: ListWriterOptions) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = ListWriter::with_options(&mut buf, opts);
    for rec in records {
        w.add_record(rec).unwrap();
    }
    w.flush().unwrap();
    drop(w);
    buf
}

fn read_all(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut r = ListReader::new(Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    while let Some(rec) = r.read_record().unwrap() {
        out.push(rec);
    }
    out
}

#[test]
fn round_trip_small_records() {
    for compress in [false, cfg!(feature = "list-lz4")] {
        let records: Vec<Vec<u8>> = (0..1000).map(|i| format!("rec-{i}").into_bytes()).collect();
        let bytes = write_list(
            &records,
            ListWriterOptions {
                block_size_multiplier: 1,
                compress,
            },
        );
        assert_eq!(read_all(&bytes), records);
    }
}

#[test]
fn records_fragment_across_blocks() {
    // 200 KiB records must span several 64 KiB blocks.
    for compress in [false, cfg!(feature = "list-lz4")] {
        let records: Vec<Vec<u8>> = (0..4u8)
            .map(|i| {
                let mut v = vec![i; 200 * 1024];
                v[0] = 0xAB;
                v
            })
            .collect();
        let bytes = write_list(
            &records,
            ListWriterOptions {
                block_size_multiplier: 1,
                compress,
            },
        );
        assert_eq!(read_all(&bytes), records);
    }
}

#[test]
fn mixed_sizes_round_trip() {
    let mut records: Vec<Vec<u8>> = Vec::new();
    for i in 0..200usize {
        let len = (i * 977) % (3 * 64 * 1024);
        records.push(vec![(i % 251) as u8; len]);
    }
    let bytes = write_list(
        &records,
        ListWriterOptions {
            block_size_multiplier: 1,
            compress: false,
        },
    );
    assert_eq!(read_all(&bytes), records);
}

#[test]
fn array_packing_round_trips_in_order() {
    let records: Vec<Vec<u8>> = (0..5000).map(|i| format!("{i}").into_bytes()).collect();
    let mut buf = Vec::new();
    let mut w = ListWriter::with_options(
        &mut buf,
        ListWriterOptions {
            block_size_multiplier: 1,
            compress: false,
        },
    );
    w.add_record_batch(records.iter().map(|r| r.as_slice()))
        .unwrap();
    assert_eq!(w.records_added(), 5000);
    w.flush().unwrap();
    drop(w);
    assert_eq!(read_all(&buf), records);
}

#[test]
fn meta_round_trips() {
    let mut buf = Vec::new();
    let mut w = ListWriter::new(&mut buf);
    w.add_meta("generator", "unit-test").unwrap();
    w.add_meta("schema", "v2").unwrap();
    w.add_record(b"payload").unwrap();
    // Too late once records exist.
    assert!(w.add_meta("late", "no").is_err());
    w.flush().unwrap();
    drop(w);

    let r = ListReader::new(Cursor::new(&buf)).unwrap();
    assert_eq!(r.meta().get("generator").map(String::as_str), Some("unit-test"));
    assert_eq!(r.meta().get("schema").map(String::as_str), Some("v2"));
}

#[test]
fn writer_reports_stats() {
    let records: Vec<Vec<u8>> = (0..100).map(|_| vec![b'x'; 1024]).collect();
    let mut buf = Vec::new();
    let mut w = ListWriter::with_options(
        &mut buf,
        ListWriterOptions {
            block_size_multiplier: 1,
            compress: cfg!(feature = "list-lz4"),
        },
    );
    for rec in &records {
        w.add_record(rec).unwrap();
    }
    w.flush().unwrap();
    assert_eq!(w.records_added(), 100);
    assert_eq!(w.bytes_added(), 100 * 1024);
    #[cfg(feature = "list-lz4")]
    assert!(w.compression_savings() > 0, "all-x payload must compress");
}

#[test]
fn corrupt_block_is_skipped_and_reported() {
    // Several blocks of uncompressed records; clobber the middle one.
    let pad = "x".repeat(48);
    let records: Vec<Vec<u8>> = (0..3000)
        .map(|i| format!("record-{i:05}-{pad}").into_bytes())
        .collect();
    let mut bytes = write_list(
        &records,
        ListWriterOptions {
            block_size_multiplier: 1,
            compress: false,
        },
    );
    let mid = bytes.len() / 2;
    for b in &mut bytes[mid..mid + 32] {
        *b ^= 0xFF;
    }

    let reported = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let seen = std::sync::Arc::clone(&reported);
    let mut r = ListReader::with_reporter(
        Cursor::new(&bytes),
        Some(Box::new(move |bytes, _reason| {
            seen.fetch_add(bytes, std::sync::atomic::Ordering::SeqCst);
        })),
    )
    .unwrap();

    let mut recovered = 0usize;
    while let Some(rec) = r.read_record().unwrap() {
        // Whatever survives must be an intact record, not a splice.
        assert!(rec.starts_with(b"record-"), "corrupt record leaked");
        recovered += 1;
    }
    assert!(recovered < records.len(), "corruption must drop records");
    assert!(
        recovered > records.len() / 2,
        "only the bad block should be lost, kept {recovered}"
    );
    assert!(reported.load(std::sync::atomic::Ordering::SeqCst) > 0);
}
