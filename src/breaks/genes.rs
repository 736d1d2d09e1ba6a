//! Implementation of the `break-genes` subcommand.
//!
//! Materializes, for each break, the genes lying strictly between the
//! flanking genes on each side, with their ortholog partner and whether that
//! partner sits inside the same break on the other side.

use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use thousands::Separable;

use crate::{
    common,
    db::{Gene, Store},
};

/// Command line arguments for the `break-genes` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Materialize the gene contents of each break side", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
}

/// One gene membership row.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakGene {
    pub breakid: i64,
    pub pid: String,
    pub side: i64,
    pub ortho: Option<String>,
    pub ortho_in: bool,
}

/// The flanks of one break, as needed for content extraction.
#[derive(Debug, Clone)]
struct BreakFlanks {
    breakid: i64,
    sp1: String,
    sp2: String,
    gpart1: String,
    gpart2: String,
    left1: String,
    right1: String,
    left2: String,
    right2: String,
}

/// Collect the member genes of every break.
pub fn collect_break_genes(store: &Store) -> Result<Vec<BreakGene>, anyhow::Error> {
    let genes = store.load_genes()?;
    let by_pid: HashMap<&str, &Gene> = genes.iter().map(|gene| (gene.pid.as_str(), gene)).collect();
    let mut by_part: BTreeMap<(&str, &str), Vec<&Gene>> = BTreeMap::new();
    for gene in &genes {
        by_part
            .entry((gene.sp.as_str(), gene.gpart.as_str()))
            .or_default()
            .push(gene);
    }

    // Ortholog partner of a pid toward a given species.
    let mut partner: HashMap<(String, String), String> = HashMap::new();
    for ortho in store.load_orthos()? {
        partner.insert((ortho.pid1.clone(), ortho.sp2.clone()), ortho.pid2.clone());
        partner.insert((ortho.pid2, ortho.sp1), ortho.pid1);
    }

    let mut stmt = store.conn().prepare(
        "SELECT breakid, sp1, sp2, gpart1, gpart2, left1, right1, left2, right2
         FROM breaks ORDER BY breakid",
    )?;
    let all_breaks = stmt
        .query_map([], |row| {
            Ok(BreakFlanks {
                breakid: row.get(0)?,
                sp1: row.get(1)?,
                sp2: row.get(2)?,
                gpart1: row.get(3)?,
                gpart2: row.get(4)?,
                left1: row.get(5)?,
                right1: row.get(6)?,
                left2: row.get(7)?,
                right2: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut result = Vec::new();
    for brk in &all_breaks {
        let side1 = genes_between(&by_pid, &by_part, &brk.sp1, &brk.gpart1, &brk.left1, &brk.right1)?;
        let side2 = genes_between(&by_pid, &by_part, &brk.sp2, &brk.gpart2, &brk.left2, &brk.right2)?;

        let side1_pids = side1.iter().map(|g| g.pid.as_str()).collect::<Vec<_>>();
        let side2_pids = side2.iter().map(|g| g.pid.as_str()).collect::<Vec<_>>();

        for (side, members, partner_sp, other_side) in [
            (1i64, &side1, &brk.sp2, &side2_pids),
            (2i64, &side2, &brk.sp1, &side1_pids),
        ] {
            for gene in members {
                let ortho = partner
                    .get(&(gene.pid.clone(), partner_sp.to_string()))
                    .cloned();
                let ortho_in = ortho
                    .as_deref()
                    .map(|pid| other_side.contains(&pid))
                    .unwrap_or(false);
                result.push(BreakGene {
                    breakid: brk.breakid,
                    pid: gene.pid.clone(),
                    side,
                    ortho,
                    ortho_in,
                });
            }
        }
    }

    Ok(result)
}

/// The genes of `(sp, gpart)` strictly between the two flanks; the interval
/// is ordered min..max regardless of direction.
fn genes_between<'a>(
    by_pid: &HashMap<&str, &'a Gene>,
    by_part: &BTreeMap<(&str, &str), Vec<&'a Gene>>,
    sp: &str,
    gpart: &str,
    left: &str,
    right: &str,
) -> Result<Vec<&'a Gene>, anyhow::Error> {
    let left = by_pid
        .get(left)
        .ok_or_else(|| anyhow::anyhow!("break flank {} is not in the store", left))?;
    let right = by_pid
        .get(right)
        .ok_or_else(|| anyhow::anyhow!("break flank {} is not in the store", right))?;
    let lo = left.pnum_all.min(right.pnum_all);
    let hi = left.pnum_all.max(right.pnum_all);
    let members = by_part
        .get(&(sp, gpart))
        .map(|part| {
            part.iter()
                .filter(|gene| gene.pnum_all > lo && gene.pnum_all < hi)
                .copied()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(members)
}

/// Run the break-gene extractor against an open store.
pub fn run_with_store(store: &mut Store) -> Result<(), anyhow::Error> {
    let members = collect_break_genes(store)?;

    store.create_break_gene_table()?;
    let tx = store.conn_mut().transaction()?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO breaks_genes (breakid, pid, side, ortho, ortho_in)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for member in &members {
            insert.execute(rusqlite::params![
                member.breakid,
                member.pid,
                member.side,
                member.ortho,
                member.ortho_in as i64,
            ])?;
        }
    }
    tx.commit()?;

    tracing::info!(
        "stored {} break gene memberships",
        members.len().separate_with_commas()
    );

    Ok(())
}

/// Main entry point for the `break-genes` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `break-genes`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let mut store = Store::open(&args.path_db)?;
    run_with_store(&mut store)?;
    store.record_stage("break_genes", &[])?;
    tracing::info!("Done with `break-genes`");

    Ok(())
}
