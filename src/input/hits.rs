//! Reading of the all-vs-all protein similarity hits.

use std::path::Path;

use serde::Deserialize;

use crate::common::io::open_read_maybe_gz;

/// One similarity hit, in the usual tabular 12-column layout.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Record {
    /// query pid
    pub query: String,
    /// subject pid
    pub subject: String,
    /// percent identity, 0..100
    pub pct_identity: f64,
    /// alignment length in amino acids
    pub alignment_length: i64,
    /// number of mismatches
    pub mismatches: i64,
    /// number of gap openings
    pub gap_openings: i64,
    /// alignment start in query
    pub qstart: i64,
    /// alignment end in query
    pub qend: i64,
    /// alignment start in subject
    pub sstart: i64,
    /// alignment end in subject
    pub send: i64,
    /// hit e-value
    pub e_value: f64,
    /// hit bit score
    pub bit_score: f64,
}

/// Read all hits from `path`; `#`-prefixed comment lines are tolerated, as
/// are extra trailing columns.  A data line with fewer than 12 columns is a
/// contract error.
pub fn read_hits<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(open_read_maybe_gz(path.as_ref())?);

    let mut hits = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let mut record = result?;
        if record.len() < 12 {
            anyhow::bail!(
                "hits file {:?}, line {}: expected 12 columns, found {}",
                path.as_ref(),
                i + 1,
                record.len()
            );
        }
        record.truncate(12);
        let hit: Record = record.deserialize(None).map_err(|e| {
            anyhow::anyhow!("hits file {:?}, line {}: {}", path.as_ref(), i + 1, e)
        })?;
        hits.push(hit);
    }

    Ok(hits)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    fn write_tmp(contents: &str) -> Result<tempfile::NamedTempFile, anyhow::Error> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(contents.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn read_hits_with_comments_and_extra_columns() -> Result<(), anyhow::Error> {
        let file = write_tmp(
            "# produced by the similarity search\n\
             a1\tb1\t98.5\t240\t3\t0\t1\t240\t1\t240\t1e-120\t650.0\textra\n\
             a2\tb2\t55.0\t100\t45\t2\t1\t100\t5\t104\t1e-30\t120.0\n",
        )?;

        let hits = super::read_hits(file.path())?;
        assert_eq!(2, hits.len());
        assert_eq!("a1", hits[0].query);
        assert_eq!("b1", hits[0].subject);
        assert_eq!(98.5, hits[0].pct_identity);
        assert_eq!(240, hits[0].alignment_length);
        assert_eq!(1e-30, hits[1].e_value);

        Ok(())
    }

    #[test]
    fn read_hits_rejects_short_line() -> Result<(), anyhow::Error> {
        let file = write_tmp("a1\tb1\t98.5\n")?;

        let res = super::read_hits(file.path());
        assert!(res.is_err());
        assert!(format!("{}", res.unwrap_err()).contains("line 1"));

        Ok(())
    }
}
