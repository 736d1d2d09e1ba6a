//! Implementation of the `reorder` subcommand.
//!
//! Reorders the parts of fragmented assemblies along a complete reference
//! genome: parts sort by the median reference position of their orthologs,
//! reverse when their ortholog positions run downhill, and the display
//! numbering is rewritten densely in the new order.

use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use itertools::Itertools;
use thousands::Separable;

use crate::{
    common::{self, median, sign},
    db::{Gene, Store},
};

/// Command line arguments for the `reorder` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Reorder fragmented assemblies against a complete reference", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
    /// Reorder every fragmented genome against its closest complete one.
    #[arg(short = 'a', long = "auto", conflicts_with_all = ["model", "sample"])]
    pub auto: bool,
    /// Reference genome to order against.
    #[arg(short = 'm', long = "model", requires = "sample")]
    pub model: Option<String>,
    /// Fragmented genome to reorder.
    #[arg(short = 's', long = "sample", requires = "model")]
    pub sample: Option<String>,

    /// Reference position range above which a part counts as scattered.
    #[arg(long, default_value_t = 200)]
    pub scatter_range: i64,
    /// Ortholog count below which a scattered part counts as ambiguous.
    #[arg(long, default_value_t = 50)]
    pub scatter_max_count: i64,
    /// Absolute cumul below which a scattered part counts as ambiguous.
    #[arg(long, default_value_t = 20)]
    pub scatter_max_cumul: i64,
}

/// The ambiguity thresholds of the scattered-part rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterLimits {
    pub range: i64,
    pub max_count: i64,
    pub max_cumul: i64,
}

impl Default for ScatterLimits {
    fn default() -> Self {
        Self {
            range: 200,
            max_count: 50,
            max_cumul: 20,
        }
    }
}

/// Placement of one part along the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct PartPlacement {
    pub gpart: String,
    /// Median reference position; `None` sorts last.
    pub median: Option<f64>,
    /// Sum of the signs of consecutive reference position differences.
    pub cumul: i64,
}

impl PartPlacement {
    /// Compute the placement of one part from the reference positions of its
    /// orthologs, in part order.
    pub fn new(gpart: &str, positions: &[i64], limits: &ScatterLimits) -> Self {
        let cumul: i64 = positions
            .windows(2)
            .map(|pair| sign(pair[1] - pair[0]))
            .sum();
        let mut median = median(positions);

        // A small part whose orthologs are scattered over a wide range gives
        // no trustworthy placement; it goes to the end instead of displacing
        // well-localized parts.
        if positions.len() > 2 && (positions.len() as i64) < limits.max_count {
            let range = positions.iter().max().unwrap() - positions.iter().min().unwrap();
            if range > limits.range && cumul.abs() <= limits.max_cumul {
                median = None;
            }
        }

        Self {
            gpart: gpart.to_string(),
            median,
            cumul,
        }
    }
}

/// Sort placements: medians ascending, placeless parts last, ties by name.
pub fn sort_placements(placements: &mut [PartPlacement]) {
    placements.sort_by(|a, b| match (a.median, b.median) {
        (Some(ma), Some(mb)) => ma
            .partial_cmp(&mb)
            .expect("medians are finite")
            .then_with(|| a.gpart.cmp(&b.gpart)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.gpart.cmp(&b.gpart),
    });
}

/// Pick, for every fragmented genome, the complete genome sharing the most
/// ortholog pairs with it.
pub fn auto_pairings(store: &Store) -> Result<Vec<(String, String)>, anyhow::Error> {
    let mut part_counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut stmt = store
        .conn()
        .prepare("SELECT sp, COUNT(*) FROM genome_parts GROUP BY sp")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);
    for (sp, count) in rows {
        part_counts.insert(sp, count);
    }

    let mut shared: BTreeMap<(String, String), i64> = BTreeMap::new();
    let mut stmt = store
        .conn()
        .prepare("SELECT sp1, sp2, COUNT(*) FROM orthos GROUP BY sp1, sp2")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);
    for (sp1, sp2, count) in rows {
        *shared.entry((sp1.clone(), sp2.clone())).or_default() += count;
        *shared.entry((sp2, sp1)).or_default() += count;
    }

    let mut pairings = Vec::new();
    for (sample, parts) in &part_counts {
        if *parts < 2 {
            continue;
        }
        // Highest shared-ortholog count wins; ties go to the first name.
        let mut best: Option<(i64, &String)> = None;
        for (model, count) in &part_counts {
            if model == sample || *count != 1 {
                continue;
            }
            let n = shared
                .get(&(sample.clone(), model.clone()))
                .copied()
                .unwrap_or(0);
            if best.map(|(best_n, _)| n > best_n).unwrap_or(true) {
                best = Some((n, model));
            }
        }
        match best {
            Some((count, model)) if count > 0 => {
                pairings.push((model.clone(), sample.clone()));
            }
            _ => {
                tracing::warn!("no complete reference genome for {}, skipping", sample);
            }
        }
    }

    Ok(pairings)
}

/// Reorder one sample against one model; returns the new display numbering.
pub fn reorder_sample(
    store: &Store,
    model: &str,
    sample: &str,
    limits: &ScatterLimits,
) -> Result<Vec<(String, i64)>, anyhow::Error> {
    let genes = store.load_genes()?;
    let reference_pos: HashMap<&str, i64> = genes
        .iter()
        .filter(|gene| gene.sp == model)
        .map(|gene| (gene.pid.as_str(), gene.pnum_all))
        .collect();
    if reference_pos.is_empty() {
        anyhow::bail!("model genome {} has no genes in the store", model);
    }

    // Ortholog partner positions in the reference.
    let mut partner_pos: HashMap<&str, i64> = HashMap::new();
    let orthos = store.load_orthos()?;
    for ortho in &orthos {
        if ortho.sp1 == sample && ortho.sp2 == model {
            if let Some(pos) = reference_pos.get(ortho.pid2.as_str()) {
                partner_pos.insert(ortho.pid1.as_str(), *pos);
            }
        } else if ortho.sp2 == sample && ortho.sp1 == model {
            if let Some(pos) = reference_pos.get(ortho.pid1.as_str()) {
                partner_pos.insert(ortho.pid2.as_str(), *pos);
            }
        }
    }

    let mut parts: BTreeMap<&str, Vec<&Gene>> = BTreeMap::new();
    for gene in genes.iter().filter(|gene| gene.sp == sample) {
        parts.entry(gene.gpart.as_str()).or_default().push(gene);
    }
    if parts.is_empty() {
        anyhow::bail!("sample genome {} has no genes in the store", sample);
    }

    let mut placements = Vec::new();
    for (gpart, part_genes) in &parts {
        let positions = part_genes
            .iter()
            .filter_map(|gene| partner_pos.get(gene.pid.as_str()))
            .copied()
            .collect::<Vec<_>>();
        placements.push(PartPlacement::new(gpart, &positions, limits));
    }
    sort_placements(&mut placements);
    tracing::debug!(
        "part order for {}: {}",
        sample,
        placements.iter().map(|p| p.gpart.as_str()).join(", ")
    );

    let mut numbering = Vec::new();
    let mut next = 0i64;
    for placement in &placements {
        let part_genes = &parts[placement.gpart.as_str()];
        let ordered: Box<dyn Iterator<Item = &&Gene>> = if placement.cumul < 0 {
            Box::new(part_genes.iter().rev())
        } else {
            Box::new(part_genes.iter())
        };
        for gene in ordered {
            next += 1;
            numbering.push((gene.pid.clone(), next));
        }
    }

    Ok(numbering)
}

/// Apply a new display numbering for one genome and refresh the part ranges.
fn apply_numbering(
    store: &mut Store,
    sample: &str,
    numbering: &[(String, i64)],
) -> Result<(), anyhow::Error> {
    let tx = store.conn_mut().transaction()?;
    {
        let mut update = tx.prepare("UPDATE genes SET pnum_display = ?2 WHERE pid = ?1")?;
        for (pid, pnum_display) in numbering {
            update.execute(rusqlite::params![pid, pnum_display])?;
        }
        tx.execute(
            "UPDATE genome_parts SET
                 min_pnum_display = (SELECT MIN(pnum_display) FROM genes
                                     WHERE genes.sp = genome_parts.sp
                                       AND genes.gpart = genome_parts.gpart),
                 max_pnum_display = (SELECT MAX(pnum_display) FROM genes
                                     WHERE genes.sp = genome_parts.sp
                                       AND genes.gpart = genome_parts.gpart)
             WHERE sp = ?1",
            [sample],
        )?;
        tx.execute(
            "UPDATE genomes SET max_pnum_display =
                 (SELECT MAX(pnum_display) FROM genes WHERE genes.sp = genomes.sp)
             WHERE sp = ?1",
            [sample],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Run the reorderer against an open store.
pub fn run_with_store(
    store: &mut Store,
    pairings: &[(String, String)],
    limits: &ScatterLimits,
) -> Result<(), anyhow::Error> {
    for (model, sample) in pairings {
        tracing::info!("reordering {} against {}", sample, model);
        let numbering = reorder_sample(store, model, sample, limits)?;
        apply_numbering(store, sample, &numbering)?;
        tracing::info!(
            "renumbered {} genes of {}",
            numbering.len().separate_with_commas(),
            sample
        );
    }

    // Display ranks feed the projections.
    if store.has_table("blocks")? {
        store.materialize_blocks_all()?;
    }
    if store.has_table("breaks")? {
        store.materialize_breaks_all()?;
    }

    Ok(())
}

/// Main entry point for the `reorder` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `reorder`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let mut store = Store::open(&args.path_db)?;
    let pairings = match (&args.model, &args.sample) {
        (Some(model), Some(sample)) => vec![(model.clone(), sample.clone())],
        _ if args.auto => auto_pairings(&store)?,
        _ => anyhow::bail!("either --auto or both --model and --sample are required"),
    };
    let limits = ScatterLimits {
        range: args.scatter_range,
        max_count: args.scatter_max_count,
        max_cumul: args.scatter_max_cumul,
    };
    run_with_store(&mut store, &pairings, &limits)?;
    store.record_stage(
        "reorder",
        &[(
            "pairings",
            pairings
                .iter()
                .map(|(model, sample)| format!("{}<-{}", model, sample))
                .join(","),
        )],
    )?;
    tracing::info!("Done with `reorder`");

    Ok(())
}
