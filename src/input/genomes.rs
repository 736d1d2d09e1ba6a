//! Reading of the optional genome metadata file.

use std::path::Path;

use serde::Deserialize;

use crate::common::io::open_read_maybe_gz;

/// One genome of the metadata file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Record {
    /// species abbreviation, matching `sp` of the gene catalog
    pub abbr: String,
    /// species name
    pub species: String,
    /// strain name
    pub strain: String,
    /// taxonomy string
    pub taxonomy: String,
    /// genome GC content
    #[serde(rename = "GC")]
    pub gc: f64,
}

/// Read the genome metadata from `path` (tab-separated, with header line).
pub fn read_genomes<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_reader(open_read_maybe_gz(path.as_ref())?);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: Record =
            result.map_err(|e| anyhow::anyhow!("genome metadata {:?}: {}", path.as_ref(), e))?;
        records.push(record);
    }

    Ok(records)
}
