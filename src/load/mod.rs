//! Implementation of the `load` subcommand.
//!
//! Writes the gene catalog, genome metadata and ortholog pairs into the
//! store, merges the paralog annotations, and computes the per-genome-pair
//! orderings of the ortholog pairs.

use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use thousands::Separable;

use crate::{
    common,
    db::Store,
    input::{
        catalog::{self, Record as GeneRecord},
        genomes::{self, Record as GenomeRecord},
        orthos::{self, Record as OrthoRecord},
        paralogs::{self, Record as ParalogRecord},
    },
};

/// Command line arguments for the `load` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Load the gene catalog and ortholog pairs into the store", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
    /// Path to the gene catalog file.
    #[arg(short = 'g', long = "genes")]
    pub path_genes: String,
    /// Path to the ortholog pairs file.
    #[arg(short = 'o', long = "orthologs")]
    pub path_orthologs: String,
    /// Path to the genome metadata file; optional.
    #[arg(short = 'G', long = "genomes")]
    pub path_genomes: Option<String>,
    /// Path to the paralog list file; optional.
    #[arg(short = 'p', long = "paralogs")]
    pub path_paralogs: Option<String>,
}

/// Load parsed inputs into the store.
pub fn load_into_store(
    store: &mut Store,
    genes: &[GeneRecord],
    genome_meta: &[GenomeRecord],
    ortho_pairs: &[OrthoRecord],
    paralog_lists: &[ParalogRecord],
) -> Result<(), anyhow::Error> {
    store.create_catalog_tables()?;

    let paralogs_by_pid: HashMap<&str, &ParalogRecord> = paralog_lists
        .iter()
        .map(|record| (record.pid.as_str(), record))
        .collect();
    let meta_by_abbr: HashMap<&str, &GenomeRecord> = genome_meta
        .iter()
        .map(|record| (record.abbr.as_str(), record))
        .collect();

    let tx = store.conn_mut().transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO genes (pid, sp, gpart, pnum_all, pnum_CDS, pnum_display,
                                feat, loc_start, loc_end, strand, length, sequence,
                                product, GC, delta_GC, paralogs_n, paralogs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17)",
        )?;
        for gene in genes {
            let paralogs = paralogs_by_pid.get(gene.pid.as_str());
            stmt.execute(rusqlite::params![
                gene.pid,
                gene.sp,
                gene.gpart,
                gene.pnum_all,
                gene.pnum_cds,
                // The display order starts out as the annotation order; the
                // reorder stage may reassign it.
                gene.pnum_all,
                gene.feat,
                gene.loc_start,
                gene.loc_end,
                gene.strand,
                gene.length,
                gene.sequence,
                gene.product,
                gene.gc,
                gene.delta_gc,
                paralogs.map(|p| p.n).unwrap_or(0),
                paralogs.map(|p| p.subjects.as_str()),
            ])?;
        }

        // Genome rows are derived from the catalog and enriched from the
        // metadata file where present.
        let mut species: BTreeMap<&str, i64> = BTreeMap::new();
        for gene in genes {
            let max = species.entry(gene.sp.as_str()).or_default();
            *max = (*max).max(gene.pnum_all);
        }
        let mut stmt = tx.prepare(
            "INSERT INTO genomes (sp, name, strain, taxonomy, GC, max_pnum_display)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (sp, max_pnum_display) in &species {
            let meta = meta_by_abbr.get(sp);
            stmt.execute(rusqlite::params![
                sp,
                meta.map(|m| m.species.as_str()).unwrap_or(sp),
                meta.map(|m| m.strain.as_str()),
                meta.map(|m| m.taxonomy.as_str()),
                meta.map(|m| m.gc),
                max_pnum_display,
            ])?;
        }

        let mut parts: BTreeMap<(&str, &str), (i64, i64)> = BTreeMap::new();
        for gene in genes {
            let range = parts
                .entry((gene.sp.as_str(), gene.gpart.as_str()))
                .or_insert((gene.pnum_all, gene.pnum_all));
            range.0 = range.0.min(gene.pnum_all);
            range.1 = range.1.max(gene.pnum_all);
        }
        let mut stmt = tx.prepare(
            "INSERT INTO genome_parts (sp, gpart, min_pnum_display, max_pnum_display)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for ((sp, gpart), (min, max)) in &parts {
            stmt.execute(rusqlite::params![sp, gpart, min, max])?;
        }

        let orders = pair_orders(genes, ortho_pairs)?;
        let mut stmt = tx.prepare(
            "INSERT INTO orthos (oid, pid1, pid2, sp1, sp2, o_ident, o_alen,
                                 pnum_order1, pnum_order2, noblock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
        )?;
        for pair in ortho_pairs {
            let (sp1, sp2, order1, order2) = &orders[&pair.oid];
            stmt.execute(rusqlite::params![
                pair.oid,
                pair.pid1,
                pair.pid2,
                sp1,
                sp2,
                pair.o_ident,
                pair.o_alen,
                order1,
                order2,
            ])?;
        }
    }
    tx.commit()?;

    store.materialize_orthos_all()?;

    Ok(())
}

/// Compute, per genome pair, the 1-based rank of every ortholog pair along
/// each of the two genomes, ordered by `(gpart, pnum_CDS, pid)`.
fn pair_orders(
    genes: &[GeneRecord],
    ortho_pairs: &[OrthoRecord],
) -> Result<HashMap<i64, (String, String, i64, i64)>, anyhow::Error> {
    let by_pid: HashMap<&str, &GeneRecord> =
        genes.iter().map(|gene| (gene.pid.as_str(), gene)).collect();

    // Bucket pairs by genome pair.
    let mut buckets: BTreeMap<(String, String), Vec<&OrthoRecord>> = BTreeMap::new();
    for pair in ortho_pairs {
        let gene1 = require_gene(&by_pid, &pair.pid1)?;
        let gene2 = require_gene(&by_pid, &pair.pid2)?;
        if gene1.sp == gene2.sp {
            anyhow::bail!(
                "ortholog pair {} pairs two genes of the same genome ({})",
                pair.oid,
                gene1.sp
            );
        }
        buckets
            .entry((gene1.sp.clone(), gene2.sp.clone()))
            .or_default()
            .push(pair);
    }

    let mut orders = HashMap::new();
    for ((sp1, sp2), pairs) in &buckets {
        let mut along1 = pairs.clone();
        along1.sort_by_key(|pair| {
            let gene = by_pid[pair.pid1.as_str()];
            (gene.gpart.clone(), gene.pnum_cds, gene.pid.clone())
        });
        let mut along2 = pairs.clone();
        along2.sort_by_key(|pair| {
            let gene = by_pid[pair.pid2.as_str()];
            (gene.gpart.clone(), gene.pnum_cds, gene.pid.clone())
        });

        let order2_by_oid: HashMap<i64, i64> = along2
            .iter()
            .enumerate()
            .map(|(i, pair)| (pair.oid, i as i64 + 1))
            .collect();
        for (i, pair) in along1.iter().enumerate() {
            orders.insert(
                pair.oid,
                (
                    sp1.clone(),
                    sp2.clone(),
                    i as i64 + 1,
                    order2_by_oid[&pair.oid],
                ),
            );
        }
    }

    Ok(orders)
}

fn require_gene<'a>(
    by_pid: &HashMap<&str, &'a GeneRecord>,
    pid: &str,
) -> Result<&'a GeneRecord, crate::input::ContractError> {
    by_pid
        .get(pid)
        .copied()
        .ok_or_else(|| crate::input::ContractError::UnknownOrthoGene(pid.to_string()))
}

/// Main entry point for the `load` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `load`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let genes = catalog::read_catalog(&args.path_genes)?;
    let genome_meta = match &args.path_genomes {
        Some(path) => genomes::read_genomes(path)?,
        None => Vec::new(),
    };
    let ortho_pairs = orthos::read_orthos(&args.path_orthologs)?;
    let paralog_lists = match &args.path_paralogs {
        Some(path) => paralogs::read_paralogs(path)?,
        None => Vec::new(),
    };
    tracing::info!(
        "read {} genes, {} ortholog pairs, {} paralog lists",
        genes.len().separate_with_commas(),
        ortho_pairs.len().separate_with_commas(),
        paralog_lists.len().separate_with_commas()
    );

    let mut store = Store::open(&args.path_db)?;
    load_into_store(&mut store, &genes, &genome_meta, &ortho_pairs, &paralog_lists)?;
    store.record_stage(
        "load",
        &[
            ("genes", args.path_genes.clone()),
            ("orthologs", args.path_orthologs.clone()),
        ],
    )?;
    tracing::info!("Done with `load`");

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{
        db::Store,
        input::{catalog::test_record, orthos::Record as OrthoRecord, paralogs::Record as ParalogRecord},
    };

    fn ortho(oid: i64, pid1: &str, pid2: &str) -> OrthoRecord {
        OrthoRecord {
            oid,
            pid1: pid1.to_string(),
            pid2: pid2.to_string(),
            o_ident: 90.0,
            o_alen: 200,
        }
    }

    #[test]
    fn load_computes_pair_orders_and_part_ranges() -> Result<(), anyhow::Error> {
        let genes = vec![
            test_record("A", "A_001", 1, 1),
            test_record("A", "A_002", 2, 2),
            test_record("A", "A_003", 3, 3),
            test_record("B", "B_001", 1, 1),
            test_record("B", "B_002", 2, 2),
            test_record("B", "B_003", 3, 3),
        ];
        // Pairs listed out of genome order; B-side order differs from A-side.
        let pairs = vec![
            ortho(1, "A_002", "B_003"),
            ortho(2, "A_001", "B_001"),
            ortho(3, "A_003", "B_002"),
        ];

        let mut store = Store::open_in_memory()?;
        super::load_into_store(&mut store, &genes, &[], &pairs, &[])?;

        let rows: Vec<(i64, i64, i64)> = store
            .conn()
            .prepare("SELECT oid, pnum_order1, pnum_order2 FROM orthos ORDER BY oid")?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<_, _>>()?;
        assert_eq!(vec![(1, 2, 3), (2, 1, 1), (3, 3, 2)], rows);

        let parts: Vec<(String, String, i64, i64)> = store
            .conn()
            .prepare(
                "SELECT sp, gpart, min_pnum_display, max_pnum_display
                 FROM genome_parts ORDER BY sp, gpart",
            )?
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;
        assert_eq!(
            vec![
                ("A".to_string(), "chr".to_string(), 1, 3),
                ("B".to_string(), "chr".to_string(), 1, 3),
            ],
            parts
        );

        // The projection joins both gene records onto each pair.
        let (pnum_cds1, pnum_cds2): (i64, i64) = store.conn().query_row(
            "SELECT pnum_CDS1, pnum_CDS2 FROM orthos_all WHERE oid = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!((2, 3), (pnum_cds1, pnum_cds2));

        Ok(())
    }

    #[test]
    fn load_merges_paralog_annotations() -> Result<(), anyhow::Error> {
        let genes = vec![
            test_record("A", "A_001", 1, 1),
            test_record("B", "B_001", 1, 1),
        ];
        let paralogs = vec![ParalogRecord {
            pid: "A_001".to_string(),
            n: 2,
            subjects: "A_019 (63.2%), A_044 (41%)".to_string(),
        }];

        let mut store = Store::open_in_memory()?;
        super::load_into_store(
            &mut store,
            &genes,
            &[],
            &[ortho(1, "A_001", "B_001")],
            &paralogs,
        )?;

        let (n, subjects): (i64, Option<String>) = store.conn().query_row(
            "SELECT paralogs_n, paralogs FROM genes WHERE pid = 'A_001'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(2, n);
        assert_eq!(Some("A_019 (63.2%), A_044 (41%)".to_string()), subjects);

        Ok(())
    }

    #[test]
    fn load_enriches_genomes_from_metadata() -> Result<(), anyhow::Error> {
        let genes = vec![
            test_record("A", "A_001", 1, 1),
            test_record("B", "B_001", 1, 1),
        ];
        let meta = vec![crate::input::genomes::Record {
            abbr: "A".to_string(),
            species: "Streptomyces ambofaciens".to_string(),
            strain: "ATCC 23877".to_string(),
            taxonomy: "Bacteria; Actinomycetota".to_string(),
            gc: 72.1,
        }];

        let mut store = Store::open_in_memory()?;
        super::load_into_store(&mut store, &genes, &meta, &[ortho(1, "A_001", "B_001")], &[])?;

        let rows: Vec<(String, String, Option<f64>, i64)> = store
            .conn()
            .prepare("SELECT sp, name, GC, max_pnum_display FROM genomes ORDER BY sp")?
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;
        assert_eq!(
            vec![
                (
                    "A".to_string(),
                    "Streptomyces ambofaciens".to_string(),
                    Some(72.1),
                    1,
                ),
                // No metadata for B: the abbreviation stands in for the name.
                ("B".to_string(), "B".to_string(), None, 1),
            ],
            rows
        );

        Ok(())
    }

    #[test]
    fn load_rejects_pair_with_unknown_gene() {
        let genes = vec![test_record("A", "A_001", 1, 1)];
        let mut store = Store::open_in_memory().unwrap();
        let res =
            super::load_into_store(&mut store, &genes, &[], &[ortho(1, "A_001", "B_404")], &[]);
        assert!(res.is_err());
        assert!(format!("{}", res.unwrap_err()).contains("B_404"));
    }
}
