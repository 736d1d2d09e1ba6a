//! Implementation of the `breaks` subcommand.
//!
//! Derives break candidates between near-consecutive synteny blocks, keeps
//! the shortest candidate per shared endpoint, links every break to its
//! mirror in the reciprocal genome-pair orientation, and fingerprints the
//! flanking genes.

pub mod genes;

use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use sha1::{Digest, Sha1};
use thousands::Separable;

use crate::{common, db::Store};

/// Command line arguments for the `breaks` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Derive breaks between near-consecutive blocks", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
    /// Maximal number of intervening blocks tolerated inside a break.
    #[arg(short = 'b', long = "max-included-blocks", default_value_t = 0)]
    pub max_included_blocks: i64,
}

/// One synteny block as seen from one orientation of its genome pair.
///
/// The stored row carries both genomes' coordinates, so the reciprocal
/// orientation is the same row with the two coordinate sets exchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockView {
    pub blockid: i64,
    pub gpart1: String,
    pub gpart2: String,
    pub direction: i64,
    pub order1: i64,
    pub order2: i64,
    pub cds_start1: i64,
    pub cds_end1: i64,
    pub cds_start2: i64,
    pub cds_end2: i64,
    pub pid_start1: String,
    pub pid_end1: String,
    pub pid_start2: String,
    pub pid_end2: String,
}

impl BlockView {
    /// The same block, seen from the reciprocal orientation.
    ///
    /// The chain runs along genome 1; on a direction -1 block its end gene is
    /// the first one along genome 2, so the reciprocal view exchanges the
    /// chain ends as well as the two coordinate sets.
    pub fn swapped(&self) -> Self {
        let mut view = Self {
            blockid: self.blockid,
            gpart1: self.gpart2.clone(),
            gpart2: self.gpart1.clone(),
            direction: self.direction,
            order1: self.order2,
            order2: self.order1,
            cds_start1: self.cds_start2,
            cds_end1: self.cds_end2,
            cds_start2: self.cds_start1,
            cds_end2: self.cds_end1,
            pid_start1: self.pid_start2.clone(),
            pid_end1: self.pid_end2.clone(),
            pid_start2: self.pid_start1.clone(),
            pid_end2: self.pid_end1.clone(),
        };
        if self.direction < 0 {
            std::mem::swap(&mut view.cds_start1, &mut view.cds_end1);
            std::mem::swap(&mut view.cds_start2, &mut view.cds_end2);
            std::mem::swap(&mut view.pid_start1, &mut view.pid_end1);
            std::mem::swap(&mut view.pid_start2, &mut view.pid_end2);
        }
        view
    }
}

/// A break candidate between two blocks of one orientation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub gpart1: String,
    pub gpart2: String,
    pub left_block: i64,
    pub right_block: i64,
    pub direction: i64,
    pub break_size1: i64,
    pub break_size2: i64,
    pub inblocks1: i64,
    pub inblocks2: i64,
    pub left1: String,
    pub right1: String,
    pub left2: String,
    pub right2: String,
}

/// Species-agnostic fingerprint of a break, from its four flanking pids.
pub fn break_sum(left1: &str, right1: &str, left2: &str, right2: &str) -> String {
    let joined = [left1, right1, left2, right2].join("|");
    format!("{:x}", Sha1::digest(joined.as_bytes()))
}

/// Enumerate break candidates between blocks of one orientation.
///
/// Blocks are bucketed by `(gpart1, gpart2, direction)`; within a bucket any
/// ordered pair close enough along both genomes is a candidate.
pub fn find_candidates(views: &[BlockView], max_included_blocks: i64) -> Vec<Candidate> {
    let mut buckets: BTreeMap<(String, String, i64), Vec<&BlockView>> = BTreeMap::new();
    for view in views {
        buckets
            .entry((view.gpart1.clone(), view.gpart2.clone(), view.direction))
            .or_default()
            .push(view);
    }

    let window = 2 + max_included_blocks;
    let mut candidates = Vec::new();
    for bucket in buckets.values_mut() {
        bucket.sort_by_key(|view| view.order1);
        for (i, a) in bucket.iter().enumerate() {
            for b in bucket[i + 1..].iter() {
                if b.order1 <= a.order1 || b.order1 >= a.order1 + window {
                    break;
                }
                let along2 = match a.direction {
                    1 => b.order2 > a.order2 && b.order2 < a.order2 + window,
                    _ => b.order2 < a.order2 && b.order2 > a.order2 - window,
                };
                if !along2 {
                    continue;
                }
                candidates.push(Candidate {
                    gpart1: a.gpart1.clone(),
                    gpart2: a.gpart2.clone(),
                    left_block: a.blockid,
                    right_block: b.blockid,
                    direction: a.direction,
                    break_size1: (b.cds_start2 - a.cds_end2).abs() - 1,
                    break_size2: (b.cds_start1 - a.cds_end1).abs() - 1,
                    inblocks1: (b.order1 - a.order1).abs() - 1,
                    inblocks2: (b.order2 - a.order2).abs() - 1,
                    left1: a.pid_end1.clone(),
                    right1: b.pid_start1.clone(),
                    left2: a.pid_end2.clone(),
                    right2: b.pid_start2.clone(),
                });
            }
        }
    }
    candidates
}

/// Endpoint used for the shortest-at-endpoint cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Left,
    Right,
}

/// Keep, per shared endpoint, only the candidate with the smallest summed
/// break size; ties go to the first encountered.
///
/// Groups are visited ascending for the left endpoint and descending for the
/// right one, keeping the policy symmetric under orientation reversal.
pub fn shortest_at_endpoint(candidates: Vec<Candidate>, endpoint: Endpoint) -> Vec<Candidate> {
    let mut groups: BTreeMap<i64, Candidate> = BTreeMap::new();
    for candidate in candidates {
        let key = match endpoint {
            Endpoint::Left => candidate.left_block,
            Endpoint::Right => candidate.right_block,
        };
        let replace = match groups.get(&key) {
            None => true,
            Some(best) => {
                candidate.break_size1 + candidate.break_size2
                    < best.break_size1 + best.break_size2
            }
        };
        if replace {
            groups.insert(key, candidate);
        }
    }
    match endpoint {
        Endpoint::Left => groups.into_values().collect(),
        Endpoint::Right => groups.into_values().rev().collect(),
    }
}

/// A break row about to be stored.
#[derive(Debug, Clone)]
struct BreakRow {
    breakid: i64,
    sp1: String,
    sp2: String,
    candidate: Candidate,
}

/// Run the break finder against an open store.
pub fn run_with_store(store: &mut Store, max_included_blocks: i64) -> Result<(), anyhow::Error> {
    store.create_break_tables()?;

    let mut stmt = store.conn().prepare(
        "SELECT blockid, sp1, sp2, gpart1, gpart2, direction,
                block_order1, block_order2,
                pnum_CDS_start1, pnum_CDS_end1, pnum_CDS_start2, pnum_CDS_end2,
                pid_start1, pid_end1, pid_start2, pid_end2
         FROM blocks_all ORDER BY blockid",
    )?;
    let stored = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                BlockView {
                    blockid: row.get(0)?,
                    gpart1: row.get(3)?,
                    gpart2: row.get(4)?,
                    direction: row.get(5)?,
                    order1: row.get(6)?,
                    order2: row.get(7)?,
                    cds_start1: row.get(8)?,
                    cds_end1: row.get(9)?,
                    cds_start2: row.get(10)?,
                    cds_end2: row.get(11)?,
                    pid_start1: row.get(12)?,
                    pid_end1: row.get(13)?,
                    pid_start2: row.get(14)?,
                    pid_end2: row.get(15)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    // Each genome pair is analyzed in both orientations; the mirror rows are
    // what the opposite matching links together.
    let mut orientations: BTreeMap<(String, String), Vec<BlockView>> = BTreeMap::new();
    for (sp1, sp2, view) in &stored {
        orientations
            .entry((sp1.clone(), sp2.clone()))
            .or_default()
            .push(view.clone());
        orientations
            .entry((sp2.clone(), sp1.clone()))
            .or_default()
            .push(view.swapped());
    }

    let mut rows = Vec::new();
    let mut next_breakid = 0i64;
    for ((sp1, sp2), views) in &orientations {
        let candidates = find_candidates(views, max_included_blocks);
        let kept = shortest_at_endpoint(candidates, Endpoint::Left);
        let kept = shortest_at_endpoint(kept, Endpoint::Right);
        for candidate in kept {
            next_breakid += 1;
            rows.push(BreakRow {
                breakid: next_breakid,
                sp1: sp1.clone(),
                sp2: sp2.clone(),
                candidate,
            });
        }
    }

    // Opposite matching on the genome-2 flank pair, also reversed for the
    // inverted case.  Breaks lacking any opposite are orphans.
    let mut flank_index: HashMap<(String, String, String), i64> = HashMap::new();
    for row in &rows {
        flank_index.insert(
            (
                row.sp1.clone(),
                row.candidate.left1.clone(),
                row.candidate.right1.clone(),
            ),
            row.breakid,
        );
    }
    let mut opposites: HashMap<i64, i64> = HashMap::new();
    let mut orphans = Vec::new();
    for row in &rows {
        let direct = flank_index.get(&(
            row.sp2.clone(),
            row.candidate.left2.clone(),
            row.candidate.right2.clone(),
        ));
        let reversed = flank_index.get(&(
            row.sp2.clone(),
            row.candidate.right2.clone(),
            row.candidate.left2.clone(),
        ));
        match direct.or(reversed) {
            Some(&opposite) => {
                opposites.insert(row.breakid, opposite);
            }
            None => {
                tracing::warn!(
                    "break {} ({} {} .. {} {}) has no opposite, deleting",
                    row.breakid,
                    row.sp1,
                    row.candidate.left1,
                    row.sp2,
                    row.candidate.left2
                );
                orphans.push(row.breakid);
            }
        }
    }
    rows.retain(|row| !orphans.contains(&row.breakid));

    let n_breaks = rows.len();
    let tx = store.conn_mut().transaction()?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO breaks (breakid, sp1, sp2, gpart1, gpart2, left_block,
                                 right_block, direction, break_size1, break_size2,
                                 inblocks1, inblocks2, left1, right1, left2,
                                 right2, opposite, break_sum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                     ?14, ?15, ?16, NULL, ?17)",
        )?;
        for row in &rows {
            let c = &row.candidate;
            insert.execute(rusqlite::params![
                row.breakid,
                row.sp1,
                row.sp2,
                c.gpart1,
                c.gpart2,
                c.left_block,
                c.right_block,
                c.direction,
                c.break_size1,
                c.break_size2,
                c.inblocks1,
                c.inblocks2,
                c.left1,
                c.right1,
                c.left2,
                c.right2,
                break_sum(&c.left1, &c.right1, &c.left2, &c.right2),
            ])?;
        }
        let mut update = tx.prepare("UPDATE breaks SET opposite = ?2 WHERE breakid = ?1")?;
        for row in &rows {
            if let Some(opposite) = opposites.get(&row.breakid) {
                update.execute(rusqlite::params![row.breakid, opposite])?;
            }
        }
    }
    tx.commit()?;

    tracing::info!(
        "stored {} breaks ({} orphans deleted)",
        n_breaks.separate_with_commas(),
        orphans.len().separate_with_commas()
    );

    store.materialize_breaks_all()?;

    Ok(())
}

/// Main entry point for the `breaks` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `breaks`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let mut store = Store::open(&args.path_db)?;
    run_with_store(&mut store, args.max_included_blocks)?;
    store.record_stage(
        "breaks",
        &[(
            "max_included_blocks",
            args.max_included_blocks.to_string(),
        )],
    )?;
    tracing::info!("Done with `breaks`");

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{
        blocks,
        db::Store,
        input::{catalog::test_record, orthos::Record as OrthoRecord},
        load,
    };

    fn ortho(oid: i64, pid1: &str, pid2: &str) -> OrthoRecord {
        OrthoRecord {
            oid,
            pid1: pid1.to_string(),
            pid2: pid2.to_string(),
            o_ident: 95.0,
            o_alen: 250,
        }
    }

    #[test]
    fn perfect_colinearity_gives_one_block_and_no_breaks() -> Result<(), anyhow::Error> {
        let mut genes = Vec::new();
        let mut pairs = Vec::new();
        for i in 1..=5 {
            genes.push(test_record("A", &format!("A_{:03}", i), i, i));
            genes.push(test_record("B", &format!("B_{:03}", i), i, i));
            pairs.push(ortho(i, &format!("A_{:03}", i), &format!("B_{:03}", i)));
        }

        let mut store = Store::open_in_memory()?;
        load::load_into_store(&mut store, &genes, &[], &pairs, &[])?;
        blocks::run_with_store(&mut store, 2)?;
        super::run_with_store(&mut store, 0)?;

        let blocks_found: Vec<(i64, i64)> = store
            .conn()
            .prepare("SELECT block_size, direction FROM blocks")?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        assert_eq!(vec![(5, 1)], blocks_found);

        let noblock: i64 = store.conn().query_row(
            "SELECT COUNT(*) FROM orthos WHERE noblock = 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(0, noblock);

        let breaks_found: i64 =
            store
                .conn()
                .query_row("SELECT COUNT(*) FROM breaks", [], |row| row.get(0))?;
        assert_eq!(0, breaks_found);

        Ok(())
    }

    #[test]
    fn inversion_yields_three_blocks_and_a_straddling_break() -> Result<(), anyhow::Error> {
        // B carries genes 3..6 in inverted order.
        let mut genes = Vec::new();
        let mut pairs = Vec::new();
        for i in 1..=8 {
            genes.push(test_record("A", &format!("A_{:03}", i), i, i));
            pairs.push(ortho(i, &format!("A_{:03}", i), &format!("B_{:03}", i)));
        }
        for (position, b) in [1, 2, 6, 5, 4, 3, 7, 8].iter().enumerate() {
            genes.push(test_record(
                "B",
                &format!("B_{:03}", b),
                position as i64 + 1,
                position as i64 + 1,
            ));
        }

        let mut store = Store::open_in_memory()?;
        load::load_into_store(&mut store, &genes, &[], &pairs, &[])?;
        blocks::run_with_store(&mut store, 0)?;

        let blocks_found: Vec<(i64, i64)> = store
            .conn()
            .prepare("SELECT block_size, direction FROM blocks ORDER BY blockid")?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        assert_eq!(vec![(2, 1), (4, -1), (2, 1)], blocks_found);

        // One intervening block tolerated: the break straddles the inversion.
        super::run_with_store(&mut store, 1)?;
        let rows: Vec<(String, String, String, String, String, i64, i64, Option<i64>)> = store
            .conn()
            .prepare(
                "SELECT sp1, left1, right1, left2, right2, inblocks1, inblocks2,
                        opposite
                 FROM breaks ORDER BY breakid",
            )?
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<_, _>>()?;
        assert_eq!(2, rows.len());
        assert_eq!(
            (
                "A".to_string(),
                "A_002".to_string(),
                "A_007".to_string(),
                "B_002".to_string(),
                "B_007".to_string(),
                1,
                1,
                Some(2),
            ),
            rows[0]
        );
        assert_eq!(Some(1), rows[1].7);

        Ok(())
    }

    #[test]
    fn gap_inside_inverted_region_matches_opposite_by_reversed_key(
    ) -> Result<(), anyhow::Error> {
        // Two inverted blocks with one unmatched gene between them on each
        // genome; the mirror break sees the genome-2 flanks in reverse order.
        let mut genes = Vec::new();
        for i in 1..=7 {
            genes.push(test_record("A", &format!("A_{:03}", i), i, i));
        }
        for (position, b) in [101, 102, 107, 106, 100, 104, 103].iter().enumerate() {
            genes.push(test_record(
                "B",
                &format!("B_{:03}", b),
                position as i64 + 1,
                position as i64 + 1,
            ));
        }
        let pairs = vec![
            ortho(1, "A_001", "B_101"),
            ortho(2, "A_002", "B_102"),
            ortho(3, "A_003", "B_103"),
            ortho(4, "A_004", "B_104"),
            ortho(5, "A_006", "B_106"),
            ortho(6, "A_007", "B_107"),
        ];

        let mut store = Store::open_in_memory()?;
        load::load_into_store(&mut store, &genes, &[], &pairs, &[])?;
        blocks::run_with_store(&mut store, 0)?;
        super::run_with_store(&mut store, 0)?;

        let rows: Vec<(String, String, String, String, String, i64, i64, Option<i64>)> = store
            .conn()
            .prepare(
                "SELECT sp1, left1, right1, left2, right2, break_size1,
                        break_size2, opposite
                 FROM breaks ORDER BY breakid",
            )?
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<_, _>>()?;
        assert_eq!(2, rows.len());
        assert_eq!(
            (
                "A".to_string(),
                "A_004".to_string(),
                "A_006".to_string(),
                "B_104".to_string(),
                "B_106".to_string(),
                1,
                1,
                Some(2),
            ),
            rows[0]
        );
        // The mirror lists the same flanks, reversed.
        assert_eq!(
            (
                "B".to_string(),
                "B_106".to_string(),
                "B_104".to_string(),
                "A_006".to_string(),
                "A_004".to_string(),
                1,
                1,
                Some(1),
            ),
            rows[1]
        );

        Ok(())
    }

    fn view(
        blockid: i64,
        direction: i64,
        order1: i64,
        order2: i64,
        cds1: (i64, i64),
        cds2: (i64, i64),
    ) -> super::BlockView {
        super::BlockView {
            blockid,
            gpart1: "chr".to_string(),
            gpart2: "chr".to_string(),
            direction,
            order1,
            order2,
            cds_start1: cds1.0,
            cds_end1: cds1.1,
            cds_start2: cds2.0,
            cds_end2: cds2.1,
            pid_start1: format!("A_{:03}", cds1.0),
            pid_end1: format!("A_{:03}", cds1.1),
            pid_start2: format!("B_{:03}", cds2.0),
            pid_end2: format!("B_{:03}", cds2.1),
        }
    }

    #[test]
    fn break_sum_is_deterministic_and_species_free() {
        let sum = super::break_sum("A_003", "A_005", "B_003", "B_004");
        assert_eq!(sum, super::break_sum("A_003", "A_005", "B_003", "B_004"));
        assert_eq!(40, sum.len());
        // Renaming a species leaves pids untouched, hence the fingerprint.
        assert_ne!(sum, super::break_sum("A_003", "A_005", "B_003", "B_005"));
    }

    #[test]
    fn candidates_respect_both_windows() {
        let views = vec![
            view(1, 1, 1, 1, (1, 3), (1, 3)),
            view(2, 1, 2, 2, (5, 6), (4, 5)),
            // Too far along genome 2.
            view(3, 1, 3, 9, (8, 9), (20, 21)),
        ];
        let candidates = super::find_candidates(&views, 0);
        assert_eq!(1, candidates.len());
        let candidate = &candidates[0];
        assert_eq!((1, 2), (candidate.left_block, candidate.right_block));
        assert_eq!(0, candidate.break_size1);
        assert_eq!(1, candidate.break_size2);
        assert_eq!("A_003", candidate.left1);
        assert_eq!("A_005", candidate.right1);
        assert_eq!("B_003", candidate.left2);
        assert_eq!("B_004", candidate.right2);
    }

    #[test]
    fn candidates_follow_reverse_direction_window() {
        // Direction -1: the right neighbor along genome 1 sits lower along
        // genome 2.
        let views = vec![
            view(1, -1, 1, 2, (1, 3), (9, 7)),
            view(2, -1, 2, 1, (5, 6), (6, 5)),
        ];
        let candidates = super::find_candidates(&views, 0);
        assert_eq!(1, candidates.len());
        assert_eq!((1, 2), (candidates[0].left_block, candidates[0].right_block));
        // Gap along genome 2 between cds 7 and 6 is empty.
        assert_eq!(0, candidates[0].break_size1);
    }

    #[test]
    fn shortest_candidate_wins_each_endpoint() {
        let views = vec![
            view(1, 1, 1, 1, (1, 3), (1, 3)),
            view(2, 1, 2, 2, (5, 6), (5, 6)),
            view(3, 1, 3, 3, (8, 9), (7, 8)),
        ];
        // max_included_blocks = 1 lets block 1 pair with both 2 and 3.
        let candidates = super::find_candidates(&views, 1);
        assert_eq!(3, candidates.len());

        let kept = super::shortest_at_endpoint(candidates, super::Endpoint::Left);
        let kept = super::shortest_at_endpoint(kept, super::Endpoint::Right);
        // Block 1 keeps its shorter break (to block 2), block 2 keeps its own.
        assert_eq!(2, kept.len());
        assert!(kept
            .iter()
            .any(|c| c.left_block == 2 && c.right_block == 3));
        assert!(kept
            .iter()
            .any(|c| c.left_block == 1 && c.right_block == 2));
    }
}
