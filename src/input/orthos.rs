//! Reading and writing of the ortholog pair intermediate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::io::{open_read_maybe_gz, open_write_maybe_gz};

/// One ortholog pair.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Record {
    /// 1-based pair identifier
    pub oid: i64,
    /// pid in the first genome
    pub pid1: String,
    /// pid in the second genome
    pub pid2: String,
    /// percent identity of the supporting hit, 0 for synteny-rescued pairs
    pub o_ident: f64,
    /// alignment length of the supporting hit, 0 for synteny-rescued pairs
    pub o_alen: i64,
}

/// Read ortholog pairs from `path` (tab-separated, with header line).
pub fn read_orthos<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_reader(open_read_maybe_gz(path.as_ref())?);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: Record =
            result.map_err(|e| anyhow::anyhow!("ortholog pairs {:?}: {}", path.as_ref(), e))?;
        records.push(record);
    }

    Ok(records)
}

/// Write ortholog pairs to `path` (tab-separated, with header line).
pub fn write_orthos<P: AsRef<Path>>(path: P, records: &[Record]) -> Result<(), anyhow::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(open_write_maybe_gz(path.as_ref())?);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}
