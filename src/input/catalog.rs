//! Reading of the parsed gene catalog.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;

use crate::common::io::open_read_maybe_gz;

/// One gene (or other feature) of the catalog.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Record {
    /// species abbreviation
    pub sp: String,
    /// genome part (chromosome, plasmid or contig)
    pub gpart: String,
    /// stable feature identifier
    pub pid: String,
    /// 1-based rank among CDS within the part, -1 for non-CDS features
    #[serde(rename = "pnum_CDS")]
    pub pnum_cds: i64,
    /// 1-based rank among all features within the part
    pub pnum_all: i64,
    /// feature type (CDS, pseudo, tRNA, rRNA, ...)
    pub feat: String,
    /// feature start, 1-based
    pub loc_start: i64,
    /// feature end, 1-based
    pub loc_end: i64,
    /// strand, -1 or +1
    pub strand: i64,
    /// feature length in nucleotides
    pub length: i64,
    /// nucleotide sequence
    pub sequence: String,
    /// product description
    pub product: String,
    /// feature GC content
    #[serde(rename = "GC")]
    pub gc: f64,
    /// GC deviation from the genome mean
    #[serde(rename = "delta_GC")]
    pub delta_gc: f64,
}

/// Read the gene catalog from `path` (tab-separated, with header line).
pub fn read_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_reader(open_read_maybe_gz(path.as_ref())?);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: Record =
            result.map_err(|e| anyhow::anyhow!("gene catalog {:?}: {}", path.as_ref(), e))?;
        if record.loc_start > record.loc_end {
            anyhow::bail!(
                "gene catalog {:?}: gene {} has loc_start > loc_end",
                path.as_ref(),
                record.pid
            );
        }
        records.push(record);
    }

    Ok(records)
}

/// Gene catalog indexed for pid and CDS-neighbor lookups.
#[derive(Debug, Default)]
pub struct Catalog {
    /// All records, keyed by pid.
    by_pid: HashMap<String, Record>,
    /// CDS ranks, keyed by `(sp, gpart, pnum_CDS)`.
    by_cds_rank: HashMap<(String, String, i64), String>,
}

impl Catalog {
    /// Index the given records.
    pub fn new(records: Vec<Record>) -> Self {
        let mut by_pid = HashMap::with_capacity(records.len());
        let mut by_cds_rank = HashMap::new();
        for record in records {
            if record.pnum_cds > 0 {
                by_cds_rank.insert(
                    (record.sp.clone(), record.gpart.clone(), record.pnum_cds),
                    record.pid.clone(),
                );
            }
            by_pid.insert(record.pid.clone(), record);
        }
        Self {
            by_pid,
            by_cds_rank,
        }
    }

    /// Load and index the catalog at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        Ok(Self::new(read_catalog(path)?))
    }

    /// Look up a gene by pid.
    pub fn get(&self, pid: &str) -> Option<&Record> {
        self.by_pid.get(pid)
    }

    /// Look up a gene by pid, failing with a contract error when absent.
    pub fn require(&self, pid: &str) -> Result<&Record, super::ContractError> {
        self.by_pid
            .get(pid)
            .ok_or_else(|| super::ContractError::UnknownHitGene(pid.to_string()))
    }

    /// The CDS neighbor of `pid` at CDS-rank offset `delta` within the same
    /// `(sp, gpart)`, if any.
    pub fn cds_neighbor(&self, pid: &str, delta: i64) -> Option<&str> {
        let gene = self.by_pid.get(pid)?;
        if gene.pnum_cds <= 0 {
            return None;
        }
        self.by_cds_rank
            .get(&(gene.sp.clone(), gene.gpart.clone(), gene.pnum_cds + delta))
            .map(String::as_str)
    }

    /// Number of indexed genes.
    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_record(sp: &str, pid: &str, pnum_cds: i64, pnum_all: i64) -> Record {
    Record {
        sp: sp.to_string(),
        gpart: "chr".to_string(),
        pid: pid.to_string(),
        pnum_cds,
        pnum_all,
        feat: if pnum_cds > 0 { "CDS" } else { "tRNA" }.to_string(),
        loc_start: pnum_all * 1000,
        loc_end: pnum_all * 1000 + 899,
        strand: 1,
        length: 900,
        sequence: String::new(),
        product: "hypothetical protein".to_string(),
        gc: 0.5,
        delta_gc: 0.0,
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    #[test]
    fn read_catalog_parses_header_and_rows() -> Result<(), anyhow::Error> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(
            b"sp\tgpart\tpid\tpnum_CDS\tpnum_all\tfeat\tloc_start\tloc_end\tstrand\tlength\tsequence\tproduct\tGC\tdelta_GC\n\
              A\tchr\tA_001\t1\t1\tCDS\t100\t999\t1\t900\tATG\tDNA polymerase\t0.55\t0.01\n\
              A\tchr\tA_002\t-1\t2\ttRNA\t1100\t1175\t-1\t76\tGCA\ttRNA-Ala\t0.50\t-0.04\n",
        )?;

        let records = super::read_catalog(file.path())?;
        assert_eq!(2, records.len());
        assert_eq!("A_001", records[0].pid);
        assert_eq!(1, records[0].pnum_cds);
        assert_eq!(-1, records[1].pnum_cds);
        assert_eq!(-1, records[1].strand);
        assert_eq!(0.55, records[0].gc);

        Ok(())
    }

    #[test]
    fn catalog_neighbor_lookup_stays_within_part() {
        let mut records = vec![
            super::test_record("A", "A_001", 1, 1),
            super::test_record("A", "A_002", 2, 2),
        ];
        let mut other = super::test_record("A", "A_003", 3, 1);
        other.gpart = "plasmid".to_string();
        records.push(other);

        let catalog = super::Catalog::new(records);
        assert_eq!(Some("A_002"), catalog.cds_neighbor("A_001", 1));
        assert_eq!(None, catalog.cds_neighbor("A_001", -1));
        // A_003 sits on another part, so it is nobody's neighbor on chr.
        assert_eq!(None, catalog.cds_neighbor("A_002", 1));
    }
}
