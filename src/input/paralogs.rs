//! Reading and writing of the paralog list intermediate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::io::{open_read_maybe_gz, open_write_maybe_gz};

/// The paralogs of one gene: three columns, no header.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Record {
    /// query pid
    pub pid: String,
    /// number of paralogs
    pub n: i64,
    /// rendered list, `subj1 (id%), subj2 (id%), ...`
    pub subjects: String,
}

/// Read paralog lists from `path` (tab-separated, no header).
pub fn read_paralogs<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_reader(open_read_maybe_gz(path.as_ref())?);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: Record =
            result.map_err(|e| anyhow::anyhow!("paralog lists {:?}: {}", path.as_ref(), e))?;
        records.push(record);
    }

    Ok(records)
}

/// Write paralog lists to `path` (tab-separated, no header).
pub fn write_paralogs<P: AsRef<Path>>(path: P, records: &[Record]) -> Result<(), anyhow::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(open_write_maybe_gz(path.as_ref())?);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}
