use millrace::testing::*;
use millrace::*;

#[derive(Clone, Debug, PartialEq)]
struct StrVal {
    val: String,
}

impl Record for StrVal {
    fn serialize(self, _binary: bool) -> RawRecord {
        self.val.into_bytes()
    }

    fn parse(_binary: bool, raw: RawRecord) -> Option<Self> {
        String::from_utf8(raw).ok().map(|val| StrVal { val })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct IntVal {
    val: i32,
}

impl Record for IntVal {
    fn serialize(self, _binary: bool) -> RawRecord {
        self.val.to_string().into_bytes()
    }

    fn parse(_binary: bool, raw: RawRecord) -> Option<Self> {
        String::from_utf8(raw)
            .ok()?
            .parse()
            .ok()
            .map(|val| IntVal { val })
    }
}

/// Appends "a" to each record.
struct StrValMapper;

impl Mapper for StrValMapper {
    type From = IntVal;
    type To = StrVal;

    fn map(&mut self, rec: IntVal, cx: &mut DoContext<'_, StrVal>) {
        cx.write(StrVal {
            val: format!("{}a", rec.val),
        });
    }
}

/// Strips the trailing "a" back off.
struct IntMapper;

impl Mapper for IntMapper {
    type From = StrVal;
    type To = IntVal;

    fn map(&mut self, mut rec: StrVal, cx: &mut DoContext<'_, IntVal>) {
        assert!(rec.val.len() > 1);
        rec.val.pop();
        let val = rec.val.parse().expect("numeric payload");
        cx.write(IntVal { val });
    }
}

#[test]
fn shard_id_identity() {
    assert_eq!(ShardId::Index(1), ShardId::Index(1));
    assert_ne!(ShardId::Index(1), ShardId::Named("foo".into()));
    assert_eq!(ShardId::Index(7).title("t-shard"), "t-shard-0007");
    assert_eq!(ShardId::Named("s1".into()).title("t-shard"), "t-shard-s1");
}

#[test]
fn identity_write_custom_sharding_gzip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("bar.txt");
    let elements = ["1", "2", "3", "4"];
    write_lines(&input, &elements)?;

    let p = Pipeline::new();
    let table = p.read_text("read_bar", input.to_str().unwrap());
    table
        .write("new_table", WireFormat::Text)
        .and_compress(1)
        .with_custom_sharding(|_rec: &String| "shard1".to_string());

    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions::at(&data_dir))?;
    assert_eq!(stats.parse_errors, 0);
    assert!(!stats.cancelled);

    let files = output_files(&data_dir, "new_table")?;
    assert_eq!(files, vec!["new_table-shard-shard1.txt.gz".to_string()]);
    let records = read_records(data_dir.join("new_table").join(&files[0]))?;
    let expected: Vec<String> = elements.iter().map(|s| s.to_string()).collect();
    assert_unordered_equal(&records, &expected);
    Ok(())
}

#[test]
fn json_routing_by_member() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("bar.txt");
    let json1 = r#"{"foo":"bar"}"#;
    let json2 = r#"{"id":1}"#;
    let json3 = r#"{"foo":null}"#;
    write_lines(&input, &[json2, json1, json3])?;

    let p = Pipeline::new();
    let json_table = p.read_text("read_bar", input.to_str().unwrap()).as_json();
    json_table
        .write("json_table", WireFormat::Text)
        .and_compress(1)
        .with_custom_sharding(|doc: &serde_json::Value| {
            if doc.get("foo").is_some() {
                "shard0".to_string()
            } else {
                "shard1".to_string()
            }
        });

    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions::at(&data_dir))?;
    assert_eq!(stats.parse_errors, 0);

    let shard0 = read_records(data_dir.join("json_table/json_table-shard-shard0.txt.gz"))?;
    let shard1 = read_records(data_dir.join("json_table/json_table-shard-shard1.txt.gz"))?;
    assert_unordered_equal(&shard0, &[json1.to_string(), json3.to_string()]);
    assert_unordered_equal(&shard1, &[json2.to_string()]);
    Ok(())
}

#[test]
fn map_with_mod_n_sharding() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("bar.txt");
    write_lines(&input, &["1", "2", "3", "4"])?;

    let p = Pipeline::new();
    let ints = p
        .read_text("read_bar", input.to_str().unwrap())
        .as_type::<IntVal>();
    ints.map("Map1", || StrValMapper)
        .write("table", WireFormat::Text)
        .with_mod_n_sharding(10, |_: &StrVal| 11);

    let data_dir = tmp.path().join("out");
    p.run_with(PipelineOptions::at(&data_dir))?;

    // 11 mod 10 = 1.
    let files = output_files(&data_dir, "table")?;
    assert_eq!(files, vec!["table-shard-0001.txt".to_string()]);
    let records = read_records(data_dir.join("table").join(&files[0]))?;
    assert_unordered_equal(
        &records,
        &["1a".to_string(), "2a".to_string(), "3a".to_string(), "4a".to_string()],
    );
    Ok(())
}

#[test]
fn chained_maps_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("bar.txt");
    let elements = ["1", "2", "3", "4"];
    write_lines(&input, &elements)?;

    let p = Pipeline::new();
    let ints = p
        .read_text("read_bar", input.to_str().unwrap())
        .as_type::<IntVal>();
    let strs = ints.map("Map1", || StrValMapper);
    strs.write("table", WireFormat::Text)
        .with_mod_n_sharding(10, |_: &StrVal| 11);
    let back = strs.map("IntMap", || IntMapper);
    back.write("final_table", WireFormat::Text)
        .with_mod_n_sharding(7, |_: &IntVal| 10);

    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions::at(&data_dir))?;
    assert_eq!(stats.parse_errors, 0);

    let mid = read_records(data_dir.join("table/table-shard-0001.txt"))?;
    assert_unordered_equal(
        &mid,
        &["1a".to_string(), "2a".to_string(), "3a".to_string(), "4a".to_string()],
    );

    // 10 mod 7 = 3.
    let files = output_files(&data_dir, "final_table")?;
    assert_eq!(files, vec!["final_table-shard-0003.txt".to_string()]);
    let records = read_records(data_dir.join("final_table").join(&files[0]))?;
    let expected: Vec<String> = elements.iter().map(|s| s.to_string()).collect();
    assert_unordered_equal(&records, &expected);
    Ok(())
}

#[test]
fn unparseable_record_is_counted_and_dropped() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("bar.txt");
    write_lines(&input, &["1", "2", "abc", "3", "4"])?;

    let p = Pipeline::new();
    let ints = p
        .read_text("read_bar", input.to_str().unwrap())
        .as_type::<IntVal>();
    let strs = ints.map("Map1", || StrValMapper);
    strs.write("table", WireFormat::Text)
        .with_mod_n_sharding(10, |_: &StrVal| 11);
    strs.map("IntMap", || IntMapper)
        .write("final_table", WireFormat::Text)
        .with_mod_n_sharding(7, |_: &IntVal| 10);

    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions::at(&data_dir))?;
    assert_eq!(stats.parse_errors, 1);

    let records = read_records(data_dir.join("final_table/final_table-shard-0003.txt"))?;
    let expected: Vec<String> = ["1", "2", "3", "4"].iter().map(|s| s.to_string()).collect();
    assert_unordered_equal(&records, &expected);
    Ok(())
}

#[test]
fn record_conservation_through_identity() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("many.txt");
    let elements: Vec<String> = (0..5000).map(|i| format!("row-{i}")).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    let p = Pipeline::new();
    p.read_text("read_many", input.to_str().unwrap())
        .write("copied", WireFormat::Text)
        .with_mod_n_sharding(5, |rec: &String| rec.len() as u32);

    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions::at(&data_dir))?;
    assert_eq!(stats.parse_errors, 0);
    assert_eq!(stats.map_calls, 5000);

    // The multiset of output records equals the input; every shard id is in
    // 0..5.
    let mut all = Vec::new();
    for name in output_files(&data_dir, "copied")? {
        let idx: u32 = name
            .strip_prefix("copied-shard-")
            .and_then(|s| s.strip_suffix(".txt"))
            .expect("shard file name")
            .parse()?;
        assert!(idx < 5);
        all.extend(read_records(data_dir.join("copied").join(&name))?);
    }
    assert_unordered_equal(&all, &elements);
    Ok(())
}

#[test]
fn user_counters_merge_across_workers() -> anyhow::Result<()> {
    struct CountingMapper;

    impl Mapper for CountingMapper {
        type From = String;
        type To = String;

        fn map(&mut self, rec: String, cx: &mut DoContext<'_, String>) {
            cx.raw().inc_counter("seen", 1);
            cx.write(rec);
        }
    }

    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in.txt");
    let elements: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    let p = Pipeline::new();
    p.read_text("read_in", input.to_str().unwrap())
        .map("count", || CountingMapper)
        .write("counted", WireFormat::Text);

    let stats = p.run_with(PipelineOptions::at(tmp.path().join("out")))?;
    assert_eq!(stats.counter("seen"), 200);
    assert_eq!(stats.to_json()["counters"]["seen"], 200);
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzipped_text_inputs_are_transparent() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in.txt");
    let elements: Vec<String> = (0..100).map(|i| format!("line-{i}")).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    // First pipeline produces a gzipped shard; the second consumes the .gz
    // file as a plain text input.
    let stage_dir = tmp.path().join("stage");
    let p1 = Pipeline::new();
    p1.read_text("read_in", input.to_str().unwrap())
        .write("packed_gz", WireFormat::Text)
        .and_compress(1);
    p1.run_with(PipelineOptions::at(&stage_dir))?;

    let gz = stage_dir.join("packed_gz/packed_gz-shard-0000.txt.gz");
    let p2 = Pipeline::new();
    p2.read_text("read_gz", gz.to_str().unwrap())
        .write("copy", WireFormat::Text);
    let out_dir = tmp.path().join("out");
    let stats = p2.run_with(PipelineOptions::at(&out_dir))?;
    assert_eq!(stats.parse_errors, 0);

    let records = read_records(out_dir.join("copy/copy-shard-0000.txt"))?;
    assert_unordered_equal(&records, &elements);
    Ok(())
}

#[test]
fn skip_header_drops_leading_records() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("with_header.txt");
    write_lines(&input, &["# header", "# units", "1", "2"])?;

    let p = Pipeline::new();
    let table = p.read_text("read_hdr", input.to_str().unwrap());
    p.set_skip_header("read_hdr", 2);
    table.write("body", WireFormat::Text);

    let data_dir = tmp.path().join("out");
    p.run_with(PipelineOptions::at(&data_dir))?;

    let records = read_records(data_dir.join("body/body-shard-0000.txt"))?;
    assert_unordered_equal(&records, &["1".to_string(), "2".to_string()]);
    Ok(())
}
