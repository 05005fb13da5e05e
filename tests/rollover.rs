use millrace::testing::*;
use millrace::*;

/// Each record is 1023 digits plus the newline: 1 KiB of raw output.
fn fat_record(i: usize) -> String {
    format!("{i:0>1023}")
}

#[test]
fn max_raw_size_rolls_sub_shards() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("big.txt");
    let total = 224usize;
    let elements: Vec<String> = (0..total).map(fat_record).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    let p = Pipeline::new();
    p.read_text("read_big", input.to_str().unwrap())
        .write("big", WireFormat::Text)
        .with_max_raw_size(64 * 1024);

    let data_dir = tmp.path().join("out");
    p.run_with(PipelineOptions::at(&data_dir))?;

    // 224 KiB into a single shard with a 64 KiB cap: sub-shards -000..-003,
    // a contiguous prefix.
    let files = output_files(&data_dir, "big")?;
    assert_eq!(
        files,
        vec![
            "big-shard-0000-000.txt".to_string(),
            "big-shard-0000-001.txt".to_string(),
            "big-shard-0000-002.txt".to_string(),
            "big-shard-0000-003.txt".to_string(),
        ]
    );

    // Record conservation, and no record torn across a boundary.
    let mut all = Vec::new();
    for name in &files {
        let records = read_records(data_dir.join("big").join(name))?;
        for rec in &records {
            assert_eq!(rec.len(), 1023, "torn record in {name}");
        }
        all.extend(records);
    }
    assert_unordered_equal(&all, &elements);
    Ok(())
}

#[test]
fn no_rollover_means_one_file_per_shard() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in.txt");
    let elements: Vec<String> = (0..1000).map(|i| i.to_string()).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    let p = Pipeline::new();
    p.read_text("read_in", input.to_str().unwrap())
        .write("flat", WireFormat::Text)
        .with_mod_n_sharding(4, |rec: &String| rec.parse::<u32>().unwrap());

    let data_dir = tmp.path().join("out");
    p.run_with(PipelineOptions::at(&data_dir))?;

    let files = output_files(&data_dir, "flat")?;
    assert_eq!(
        files,
        vec![
            "flat-shard-0000.txt".to_string(),
            "flat-shard-0001.txt".to_string(),
            "flat-shard-0002.txt".to_string(),
            "flat-shard-0003.txt".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn gzip_rollover_produces_valid_members() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("big.txt");
    let elements: Vec<String> = (0..96).map(fat_record).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    let p = Pipeline::new();
    p.read_text("read_big", input.to_str().unwrap())
        .write("bigz", WireFormat::Text)
        .and_compress(1)
        .with_max_raw_size(64 * 1024);

    let data_dir = tmp.path().join("out");
    p.run_with(PipelineOptions::at(&data_dir))?;

    let files = output_files(&data_dir, "bigz")?;
    assert_eq!(
        files,
        vec![
            "bigz-shard-0000-000.txt.gz".to_string(),
            "bigz-shard-0000-001.txt.gz".to_string(),
        ]
    );
    let mut all = Vec::new();
    for name in &files {
        all.extend(read_records(data_dir.join("bigz").join(name))?);
    }
    assert_unordered_equal(&all, &elements);
    Ok(())
}
