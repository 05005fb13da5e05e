use millrace::io::MemFs;
use millrace::testing::*;
use millrace::*;
use std::sync::Arc;

/// A whole run against the in-memory backend: inputs expand and stream from
/// the fake object store, outputs still land on local disk.
#[test]
fn pipeline_reads_through_custom_backend() -> anyhow::Result<()> {
    let fs = MemFs::new();
    fs.add_lines("bucket/part-0.txt", &["1", "2"]);
    fs.add_lines("bucket/part-1.txt", &["3", "4"]);
    fs.add_lines("bucket/archive/old.txt", &["99"]);

    let p = Pipeline::new();
    // Flat listing: the archived object must not be picked up.
    p.read_text("read_bucket", "bucket/*")
        .write("copied", WireFormat::Text)
        .with_custom_sharding(|_: &String| "all".to_string());

    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions {
        backend: Arc::new(fs),
        ..PipelineOptions::at(&data_dir)
    })?;
    assert_eq!(stats.map_calls, 4);

    let records = read_records(data_dir.join("copied/copied-shard-all.txt"))?;
    assert_unordered_equal(
        &records,
        &[
            "1".to_string(),
            "2".to_string(),
            "3".to_string(),
            "4".to_string(),
        ],
    );
    Ok(())
}

#[test]
fn recursive_listing_includes_nested_objects() -> anyhow::Result<()> {
    let fs = MemFs::new();
    fs.add_lines("bucket/part-0.txt", &["1"]);
    fs.add_lines("bucket/archive/old.txt", &["2"]);

    let p = Pipeline::new();
    p.read_text("read_bucket", "bucket/**")
        .write("all", WireFormat::Text);

    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("out");
    p.run_with(PipelineOptions {
        backend: Arc::new(fs),
        ..PipelineOptions::at(&data_dir)
    })?;

    let records = read_records(data_dir.join("all/all-shard-0000.txt"))?;
    assert_unordered_equal(&records, &["1".to_string(), "2".to_string()]);
    Ok(())
}
