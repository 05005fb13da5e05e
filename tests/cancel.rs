use mark_flaky_tests::flaky;
use millrace::testing::*;
use millrace::*;
use std::time::{Duration, Instant};

#[test]
fn stop_before_run_short_circuits() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in.txt");
    write_lines(&input, &["1", "2"])?;

    let p = Pipeline::new();
    p.read_text("read_in", input.to_str().unwrap())
        .write("never", WireFormat::Text);

    p.stop();
    let stats = p.run_with(PipelineOptions::at(tmp.path().join("out")))?;
    assert!(stats.cancelled);
    assert_eq!(stats.map_calls, 0);
    Ok(())
}

/// Stopping mid-run drains in bounded time and still closes every handle;
/// the partial gzip output must decompress cleanly.
#[flaky]
#[test]
fn stop_mid_run_drains_and_closes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = tmp.path().join("in.txt");
    let elements: Vec<String> = (0..400_000).map(|i| format!("row-{i}")).collect();
    let refs: Vec<&str> = elements.iter().map(|s| s.as_str()).collect();
    write_lines(&input, &refs)?;

    let p = Pipeline::new();
    p.read_text("read_in", input.to_str().unwrap())
        .write("partial", WireFormat::Text)
        .and_compress(1)
        .with_mod_n_sharding(4, |rec: &String| rec.len() as u32);

    let stopper = p.clone();
    let h = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        stopper.stop();
    });

    let started = Instant::now();
    let data_dir = tmp.path().join("out");
    let stats = p.run_with(PipelineOptions::at(&data_dir))?;
    h.join().unwrap();

    assert!(stats.cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "cancellation must complete in bounded time"
    );

    // Whatever shards were opened must have been closed into readable files.
    let mut seen = 0usize;
    for name in output_files(&data_dir, "partial")? {
        seen += read_records(data_dir.join("partial").join(&name))?.len();
    }
    assert!(seen <= elements.len());
    Ok(())
}
