//! Test support utilities.
//!
//! Fixture helpers for pipeline tests: write input files, read shard files
//! back (transparently gunzipping by extension), and compare record
//! multisets. Tests run against real temp-dir pipelines, so these helpers
//! are deliberately thin wrappers over the file system.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

/// Write `lines` as a newline-terminated text file, creating parent dirs.
pub fn write_lines(path: impl AsRef<Path>, lines: &[&str]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let mut f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    for line in lines {
        writeln!(f, "{line}")?;
    }
    Ok(())
}

/// Read a text shard file back into lines, gunzipping `.gz` paths.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let is_gz = path.to_string_lossy().ends_with(".gz");
    #[cfg(not(feature = "compression-gzip"))]
    anyhow::ensure!(!is_gz, "gzip file but the compression-gzip feature is disabled");
    #[cfg(feature = "compression-gzip")]
    let reader: Box<dyn Read> = if is_gz {
        Box::new(flate2::read::MultiGzDecoder::new(f))
    } else {
        Box::new(f)
    };
    #[cfg(not(feature = "compression-gzip"))]
    let reader: Box<dyn Read> = Box::new(f);
    let mut out = Vec::new();
    for line in BufReader::new(reader).lines() {
        out.push(line?);
    }
    Ok(out)
}

/// Read every record of a list file.
pub fn read_list_records(path: impl AsRef<Path>) -> Result<Vec<Vec<u8>>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = crate::io::ListReader::new(BufReader::new(f))?;
    let mut out = Vec::new();
    while let Some(rec) = reader.read_record()? {
        out.push(rec);
    }
    Ok(out)
}

/// File names (sorted) inside one operator's output directory.
pub fn output_files(data_dir: impl AsRef<Path>, table: &str) -> Result<Vec<String>> {
    let dir = data_dir.as_ref().join(table);
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Assert two record collections are equal as multisets.
pub fn assert_unordered_equal<T: Ord + std::fmt::Debug + Clone>(actual: &[T], expected: &[T]) {
    let mut a: Vec<T> = actual.to_vec();
    let mut e: Vec<T> = expected.to_vec();
    a.sort();
    e.sort();
    assert_eq!(a, e, "collections differ as multisets");
}
