//! Implementation of the `rank` subcommand.
//!
//! Scores the gene content of each break side (tRNA, mobile elements, GC
//! deviation, paralogs, real non-ortholog size) and writes one ranking row
//! per break.  With `--clean`, low-quality breaks are deleted first.

pub mod classify;

use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use thousands::Separable;

use crate::{
    common,
    db::{Gene, Store},
    rank::classify::{Classifier, Counts},
};

/// Command line arguments for the `rank` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Score break contents and optionally prune bad breaks", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
    /// Delete low-quality breaks before ranking.
    #[arg(short = 'C', long = "clean")]
    pub clean: bool,
}

/// The scores of one break side.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SideScore {
    pub counts: Counts,
    pub trna_ext: i64,
    pub paralogs: i64,
    pub real_size: i64,
    pub delta_gc: f64,
}

/// One member gene of a break side, with its ortholog partner if any.
#[derive(Debug, Clone)]
pub struct Member<'a> {
    pub gene: &'a Gene,
    pub ortho: Option<String>,
}

/// Score one break side; `members` must be in position order.
pub fn score_side(members: &[Member<'_>], classifier: &Classifier) -> SideScore {
    let mut score = SideScore::default();
    let n = members.len();

    let mut gc_weighted = 0.0;
    let mut gc_length = 0i64;
    for (i, member) in members.iter().enumerate() {
        let gene = member.gene;
        if let Some(product) = &gene.product {
            classifier.classify(product, &mut score.counts);
        }
        if gene.feat == "tRNA" {
            score.counts.trna += 1;
            if i == 0 || i + 1 == n {
                score.trna_ext += 1;
            }
            if n > 10 && (i < 3 || i + 3 >= n) {
                score.trna_ext += 1;
            }
        }
        if gene.feat == "CDS" {
            if gene.paralogs_n > 0 {
                score.paralogs += 1;
            }
            if member.ortho.is_none() {
                score.real_size += 1;
            }
            if let Some(delta_gc) = gene.delta_gc {
                gc_weighted += delta_gc * gene.length as f64;
                gc_length += gene.length;
            }
        }
    }
    if gc_length > 0 {
        score.delta_gc = gc_weighted / gc_length as f64;
    }

    score
}

/// `2` when both sides count, `1` when exactly one does, `0` otherwise.
fn both_sides(side1: i64, side2: i64) -> i64 {
    (side1 > 0) as i64 + (side2 > 0) as i64
}

/// Whether a break fails the quality rules and should be pruned.
///
/// The suffix-1 quantities describe the genome-2 side and vice versa, so
/// `real_size` and `break_size` with the same suffix always describe the same
/// physical side.
pub fn is_bad_break(real_size1: i64, real_size2: i64, break_size1: i64, break_size2: i64) -> bool {
    if real_size1 == 0 && real_size2 == 0 {
        return true;
    }
    if real_size1 <= 2
        && 2 * real_size1 <= break_size1
        && real_size2 <= 2
        && 2 * real_size2 <= break_size2
    {
        return true;
    }
    for (real, raw) in [(real_size1, break_size1), (real_size2, break_size2)] {
        if raw > 4 && (real as f64) / (raw as f64) <= 0.25 {
            return true;
        }
    }
    false
}

/// The ranking row of one break.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub breakid: i64,
    pub real_size1: i64,
    pub real_size2: i64,
    pub trna_both: i64,
    pub trna_both_ext: i64,
    pub content1: String,
    pub content2: String,
    pub paralogs1: i64,
    pub paralogs2: i64,
    pub delta_gc1: f64,
    pub delta_gc2: f64,
}

/// Score every break in the store.
pub fn score_breaks(store: &Store) -> Result<Vec<(Ranking, i64, i64)>, anyhow::Error> {
    let genes = store.load_genes()?;
    let by_pid: HashMap<&str, &Gene> = genes.iter().map(|gene| (gene.pid.as_str(), gene)).collect();
    let classifier = Classifier::new();

    let mut members: BTreeMap<i64, (Vec<Member<'_>>, Vec<Member<'_>>)> = BTreeMap::new();
    let mut stmt = store.conn().prepare(
        "SELECT breakid, pid, side, ortho FROM breaks_genes ORDER BY breakid, side",
    )?;
    let membership_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);
    for (breakid, pid, side, ortho) in &membership_rows {
        let gene = by_pid.get(pid.as_str()).copied().ok_or_else(|| {
            anyhow::anyhow!("break gene {} is not in the store", pid)
        })?;
        let entry = members.entry(*breakid).or_default();
        let side_members = if *side == 1 { &mut entry.0 } else { &mut entry.1 };
        side_members.push(Member {
            gene,
            ortho: ortho.clone(),
        });
    }
    for (side1, side2) in members.values_mut() {
        side1.sort_by_key(|member| member.gene.pnum_all);
        side2.sort_by_key(|member| member.gene.pnum_all);
    }

    let mut stmt = store
        .conn()
        .prepare("SELECT breakid, break_size1, break_size2 FROM breaks ORDER BY breakid")?;
    let sizes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let empty = (Vec::new(), Vec::new());
    let mut rankings = Vec::new();
    for (breakid, break_size1, break_size2) in sizes {
        let (side1, side2) = members.get(&breakid).unwrap_or(&empty);
        let score1 = score_side(side1, &classifier);
        let score2 = score_side(side2, &classifier);
        rankings.push((
            Ranking {
                breakid,
                // Real sizes are attributed to the partner side, matching the
                // suffix convention of the break sizes.
                real_size1: score2.real_size,
                real_size2: score1.real_size,
                trna_both: both_sides(score1.counts.trna, score2.counts.trna),
                trna_both_ext: both_sides(score1.trna_ext, score2.trna_ext),
                content1: score1.counts.render(),
                content2: score2.counts.render(),
                paralogs1: score1.paralogs,
                paralogs2: score2.paralogs,
                delta_gc1: score1.delta_gc,
                delta_gc2: score2.delta_gc,
            },
            break_size1,
            break_size2,
        ));
    }

    Ok(rankings)
}

/// Run the ranker against an open store.
pub fn run_with_store(store: &mut Store, clean: bool) -> Result<(), anyhow::Error> {
    let scored = score_breaks(store)?;

    let mut bad = Vec::new();
    if clean {
        for (ranking, break_size1, break_size2) in &scored {
            if is_bad_break(
                ranking.real_size1,
                ranking.real_size2,
                *break_size1,
                *break_size2,
            ) {
                bad.push(ranking.breakid);
            }
        }
    }

    store.create_ranking_table()?;
    let tx = store.conn_mut().transaction()?;
    {
        // Deleting a bad break cascades its gene contents and its mirror row.
        let mut delete = tx.prepare("DELETE FROM breaks WHERE breakid = ?1")?;
        for breakid in &bad {
            delete.execute([breakid])?;
        }

        let mut remaining = tx.prepare("SELECT 1 FROM breaks WHERE breakid = ?1")?;
        let mut insert = tx.prepare(
            "INSERT INTO breaks_ranking (breakid, real_size1, real_size2, tRNA_both,
                                         tRNA_both_ext, content1, content2,
                                         paralogs1, paralogs2, delta_GC1, delta_GC2,
                                         cycle, graphid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, NULL)",
        )?;
        for (ranking, _, _) in &scored {
            // Skip pruned breaks and mirrors cascaded away by a pruned one.
            if !remaining.exists([ranking.breakid])? {
                continue;
            }
            insert.execute(rusqlite::params![
                ranking.breakid,
                ranking.real_size1,
                ranking.real_size2,
                ranking.trna_both,
                ranking.trna_both_ext,
                ranking.content1,
                ranking.content2,
                ranking.paralogs1,
                ranking.paralogs2,
                ranking.delta_gc1,
                ranking.delta_gc2,
            ])?;
        }
    }
    tx.commit()?;

    if clean {
        tracing::info!("pruned {} bad breaks", bad.len().separate_with_commas());
    }

    store.materialize_breaks_all()?;

    Ok(())
}

/// Main entry point for the `rank` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `rank`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let mut store = Store::open(&args.path_db)?;
    run_with_store(&mut store, args.clean)?;
    store.record_stage("rank", &[("clean", args.clean.to_string())])?;
    tracing::info!("Done with `rank`");

    Ok(())
}
