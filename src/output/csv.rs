//! CSV result writer
//!
//! The portal delivers a zip archive holding the data CSV (plus a small
//! contents/readme file). The writer pulls the data CSV out, orders rows by
//! segment and timestamp when those columns exist, and writes the table
//! atomically to its deterministic path.

use super::{result_path, OutputError, OutputResult, ResultKey, ResultWriter, StoredResult};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::cmp::Ordering;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/// Segment id column in portal exports
pub const SEGMENT_COLUMN: &str = "xd_id";

/// Timestamp column in portal exports
pub const TIMESTAMP_COLUMN: &str = "measurement_tstamp";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Writes one CSV file per key into a directory
#[derive(Debug, Clone)]
pub struct CsvResultWriter {
    output_dir: PathBuf,
}

impl CsvResultWriter {
    /// Create a writer for `output_dir`; the directory is created on first store
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Target directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ResultWriter for CsvResultWriter {
    fn store(&self, key: &ResultKey, payload: &[u8]) -> OutputResult<StoredResult> {
        if payload.is_empty() {
            return Err(OutputError::EmptyPayload(key.to_string()));
        }

        let csv_bytes = if payload.starts_with(ZIP_MAGIC) {
            extract_csv(payload, key)?
        } else {
            payload.to_vec()
        };

        let (headers, mut records) = read_table(&csv_bytes)?;
        sort_records(&headers, &mut records);

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        let path = result_path(&self.output_dir, key);
        write_atomic(&self.output_dir, &path, &headers, &records)?;

        let rows = records.len() as u64;
        info!(
            key = %key,
            path = %path.display(),
            rows = rows,
            "Result stored"
        );
        Ok(StoredResult {
            key: key.clone(),
            path,
            rows,
        })
    }
}

/// Pick the data CSV out of a portal archive.
///
/// Prefers the entry named after the key, then any other `.csv` entry.
fn extract_csv(payload: &[u8], key: &ResultKey) -> OutputResult<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(payload))
        .map_err(|e| OutputError::ArchiveError(format!("Failed to open ZIP: {e}")))?;

    let preferred = format!("{}.csv", key.file_stem());
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let entry = names
        .iter()
        .find(|name| name.rsplit('/').next() == Some(preferred.as_str()))
        .or_else(|| {
            names
                .iter()
                .find(|name| name.to_ascii_lowercase().ends_with(".csv"))
        })
        .ok_or_else(|| OutputError::MissingCsv(key.to_string()))?;

    debug!(entry = %entry, entries = names.len(), "Extracting CSV from archive");
    let mut file = archive
        .by_name(entry)
        .map_err(|e| OutputError::ArchiveError(format!("Failed to read ZIP entry: {e}")))?;
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents)
        .map_err(|e| OutputError::ArchiveError(format!("Failed to extract {entry}: {e}")))?;
    Ok(contents)
}

fn read_table(bytes: &[u8]) -> OutputResult<(StringRecord, Vec<StringRecord>)> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| OutputError::CsvError(format!("Failed to read header: {e}")))?
        .clone();
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OutputError::CsvError(format!("Failed to read record: {e}")))?;
    Ok((headers, records))
}

/// Order by segment then timestamp when both columns are present
fn sort_records(headers: &StringRecord, records: &mut [StringRecord]) {
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (Some(segment), Some(timestamp)) = (column(SEGMENT_COLUMN), column(TIMESTAMP_COLUMN)) else {
        return;
    };

    records.sort_by(|a, b| {
        compare_ids(a.get(segment), b.get(segment))
            .then_with(|| a.get(timestamp).cmp(&b.get(timestamp)))
    });
}

/// Numeric ids compare numerically, anything else as text
fn compare_ids(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        },
        _ => a.cmp(&b),
    }
}

fn write_atomic(
    dir: &Path,
    path: &Path,
    headers: &StringRecord,
    records: &[StringRecord],
) -> OutputResult<()> {
    let temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;

    let mut writer = WriterBuilder::new().from_writer(temp_file);
    writer
        .write_record(headers)
        .map_err(|e| OutputError::CsvError(format!("Failed to write header: {e}")))?;
    for record in records {
        writer
            .write_record(record)
            .map_err(|e| OutputError::CsvError(format!("Failed to write record: {e}")))?;
    }

    let mut temp_file = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| OutputError::IoError(format!("Failed to flush: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| OutputError::IoError(format!("Failed to persist {}: {e}", path.display())))?;
    Ok(())
}
