//! Implementation of the `blocks` subcommand.
//!
//! Links ortholog pairs that are consecutive along genome 1 and
//! near-consecutive along genome 2 (in either direction) within a CDS gap
//! tolerance, then aggregates the links into maximal synteny blocks.

use std::collections::{BTreeMap, HashMap};

use clap::Parser;
use indexmap::IndexMap;
use thousands::Separable;

use crate::{common, db::Store};

/// Command line arguments for the `blocks` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Aggregate consecutive ortholog pairs into synteny blocks", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
    /// Maximal number of non-ortholog CDS tolerated between linked pairs.
    #[arg(short = 't', long = "tolerance", default_value_t = 2)]
    pub tolerance: i64,
}

/// The projection fields of one ortholog pair needed for linking.
#[derive(Debug, Clone, PartialEq)]
pub struct OrthoView {
    pub oid: i64,
    pub sp1: String,
    pub sp2: String,
    pub gpart1: String,
    pub gpart2: String,
    pub pnum_cds1: i64,
    pub pnum_cds2: i64,
    pub pnum_order1: i64,
    pub pnum_order2: i64,
}

/// A link between two ortholog pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub oid_start: i64,
    pub oid_end: i64,
    /// Signed `pnum_order2` difference between end and start.
    pub direction: i64,
    /// Non-ortholog CDS between the linked pairs along genome 1.
    pub inblocks1: i64,
    /// Non-ortholog CDS between the linked pairs along genome 2.
    pub inblocks2: i64,
}

/// A maximal chain of links.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub oid_start: i64,
    pub oid_end: i64,
    pub direction: i64,
    pub block_size: i64,
}

/// Compute the pair links of one genome pair.
///
/// `rows` must be sorted by `pnum_order1`.
pub fn compute_links(rows: &[OrthoView], tolerance: i64) -> Vec<Link> {
    let mut links = Vec::new();
    for window in rows.windows(2) {
        let (start, end) = (&window[0], &window[1]);
        if end.pnum_order1 != start.pnum_order1 + 1 {
            continue;
        }
        if start.gpart1 != end.gpart1 || start.gpart2 != end.gpart2 {
            continue;
        }
        if end.pnum_cds1 <= start.pnum_cds1 || end.pnum_cds1 >= start.pnum_cds1 + 2 + tolerance {
            continue;
        }
        let forward =
            end.pnum_cds2 > start.pnum_cds2 && end.pnum_cds2 < start.pnum_cds2 + 2 + tolerance;
        let reverse =
            end.pnum_cds2 < start.pnum_cds2 && end.pnum_cds2 > start.pnum_cds2 - 2 - tolerance;
        if !forward && !reverse {
            continue;
        }
        links.push(Link {
            oid_start: start.oid,
            oid_end: end.oid,
            direction: end.pnum_order2 - start.pnum_order2,
            inblocks1: end.pnum_cds1 - start.pnum_cds1 - 1,
            inblocks2: (end.pnum_cds2 - start.pnum_cds2).abs() - 1,
        });
    }
    links
}

/// Chain the links of one genome pair into maximal blocks.
///
/// Links are bucketed by `(gpart1, gpart2, direction sign)`; within a bucket
/// the directionally consistent links form a disjoint union of paths and the
/// greedy two-sided extension yields exactly those paths.
pub fn build_blocks(links: &[Link], rows_by_oid: &HashMap<i64, &OrthoView>) -> Vec<Block> {
    let mut buckets: IndexMap<(String, String, i64), Vec<&Link>> = IndexMap::new();
    for link in links {
        let row = rows_by_oid[&link.oid_start];
        let key = (
            row.gpart1.clone(),
            row.gpart2.clone(),
            crate::common::sign(link.direction),
        );
        buckets.entry(key).or_default().push(link);
    }

    let mut blocks = Vec::new();
    for ((_, _, direction), bucket) in &buckets {
        let mut by_start: HashMap<i64, usize> = HashMap::new();
        let mut by_end: HashMap<i64, usize> = HashMap::new();
        for (i, link) in bucket.iter().enumerate() {
            by_start.insert(link.oid_start, i);
            by_end.insert(link.oid_end, i);
        }
        let mut consumed = vec![false; bucket.len()];

        for i in 0..bucket.len() {
            if consumed[i] {
                continue;
            }
            consumed[i] = true;
            by_start.remove(&bucket[i].oid_start);
            by_end.remove(&bucket[i].oid_end);
            let mut block = Block {
                oid_start: bucket[i].oid_start,
                oid_end: bucket[i].oid_end,
                direction: *direction,
                block_size: 2,
            };

            // Absorb predecessor links.
            while let Some(&j) = by_end.get(&block.oid_start) {
                consumed[j] = true;
                by_start.remove(&bucket[j].oid_start);
                by_end.remove(&bucket[j].oid_end);
                block.oid_start = bucket[j].oid_start;
                block.block_size += 1;
            }
            // Adopt successor links.
            while let Some(&j) = by_start.get(&block.oid_end) {
                consumed[j] = true;
                by_start.remove(&bucket[j].oid_start);
                by_end.remove(&bucket[j].oid_end);
                block.oid_end = bucket[j].oid_end;
                block.block_size += 1;
            }

            blocks.push(block);
        }
    }
    blocks
}

/// Run the block finder against an open store.
pub fn run_with_store(store: &mut Store, tolerance: i64) -> Result<(), anyhow::Error> {
    store.create_block_tables()?;

    let mut stmt = store.conn().prepare(
        "SELECT oid, sp1, sp2, gpart1, gpart2, pnum_CDS1, pnum_CDS2,
                pnum_order1, pnum_order2
         FROM orthos_all ORDER BY sp1, sp2, pnum_order1",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(OrthoView {
                oid: row.get(0)?,
                sp1: row.get(1)?,
                sp2: row.get(2)?,
                gpart1: row.get(3)?,
                gpart2: row.get(4)?,
                pnum_cds1: row.get(5)?,
                pnum_cds2: row.get(6)?,
                pnum_order1: row.get(7)?,
                pnum_order2: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let mut by_pair: BTreeMap<(String, String), Vec<&OrthoView>> = BTreeMap::new();
    for row in &rows {
        by_pair
            .entry((row.sp1.clone(), row.sp2.clone()))
            .or_default()
            .push(row);
    }

    let mut n_links = 0usize;
    let mut n_blocks = 0usize;
    let tx = store.conn_mut().transaction()?;
    {
        let mut insert_pair = tx.prepare(
            "INSERT INTO pairs (pairid, sp1, sp2, oid_start, oid_end, direction,
                                inblocks1, inblocks2)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        let mut insert_block = tx.prepare(
            "INSERT INTO blocks (blockid, sp1, sp2, gpart1, gpart2, oid_start,
                                 oid_end, direction, block_size, block_order1,
                                 block_order2)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;

        for ((sp1, sp2), pair_rows) in &by_pair {
            let rows_by_oid: HashMap<i64, &OrthoView> =
                pair_rows.iter().map(|row| (row.oid, *row)).collect();

            let links = compute_links(
                &pair_rows.iter().map(|row| (*row).clone()).collect::<Vec<_>>(),
                tolerance,
            );
            for link in &links {
                n_links += 1;
                insert_pair.execute(rusqlite::params![
                    n_links as i64,
                    sp1,
                    sp2,
                    link.oid_start,
                    link.oid_end,
                    link.direction,
                    link.inblocks1,
                    link.inblocks2,
                ])?;
            }

            let drafts = build_blocks(&links, &rows_by_oid);

            // Order blocks along each genome by their first CDS rank there.
            let mut order1 = (0..drafts.len()).collect::<Vec<_>>();
            order1.sort_by_key(|&i| {
                let start = rows_by_oid[&drafts[i].oid_start];
                (start.gpart1.clone(), start.pnum_cds1)
            });
            let mut order2 = (0..drafts.len()).collect::<Vec<_>>();
            order2.sort_by_key(|&i| {
                let start = rows_by_oid[&drafts[i].oid_start];
                let end = rows_by_oid[&drafts[i].oid_end];
                (start.gpart2.clone(), start.pnum_cds2.min(end.pnum_cds2))
            });
            let mut block_order1 = vec![0i64; drafts.len()];
            for (rank, &i) in order1.iter().enumerate() {
                block_order1[i] = rank as i64 + 1;
            }
            let mut block_order2 = vec![0i64; drafts.len()];
            for (rank, &i) in order2.iter().enumerate() {
                block_order2[i] = rank as i64 + 1;
            }

            // Assign ids along genome 1.
            let mut by_order1 = (0..drafts.len()).collect::<Vec<_>>();
            by_order1.sort_by_key(|&i| block_order1[i]);
            for &i in &by_order1 {
                n_blocks += 1;
                let draft = &drafts[i];
                let start = rows_by_oid[&draft.oid_start];
                insert_block.execute(rusqlite::params![
                    n_blocks as i64,
                    sp1,
                    sp2,
                    start.gpart1,
                    start.gpart2,
                    draft.oid_start,
                    draft.oid_end,
                    draft.direction,
                    draft.block_size,
                    block_order1[i],
                    block_order2[i],
                ])?;
            }
        }

        // Orthos that made it into no link carry no block signal.
        tx.execute(
            "UPDATE orthos SET noblock = CASE WHEN oid IN
                 (SELECT oid_start FROM pairs UNION SELECT oid_end FROM pairs)
             THEN 0 ELSE 1 END",
            [],
        )?;
    }
    tx.commit()?;

    tracing::info!(
        "stored {} pair links in {} blocks",
        n_links.separate_with_commas(),
        n_blocks.separate_with_commas()
    );

    store.materialize_blocks_all()?;

    Ok(())
}

/// Main entry point for the `blocks` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `blocks`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let mut store = Store::open(&args.path_db)?;
    run_with_store(&mut store, args.tolerance)?;
    store.record_stage("blocks", &[("tolerance", args.tolerance.to_string())])?;
    tracing::info!("Done with `blocks`");

    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    fn row(oid: i64, cds1: i64, cds2: i64, order1: i64, order2: i64) -> super::OrthoView {
        super::OrthoView {
            oid,
            sp1: "A".to_string(),
            sp2: "B".to_string(),
            gpart1: "chr".to_string(),
            gpart2: "chr".to_string(),
            pnum_cds1: cds1,
            pnum_cds2: cds2,
            pnum_order1: order1,
            pnum_order2: order2,
        }
    }

    #[test]
    fn links_require_adjacency_within_tolerance() {
        let rows = vec![
            row(1, 1, 1, 1, 1),
            row(2, 2, 2, 2, 2),
            // CDS gap of 4 on genome 1 exceeds the default tolerance window.
            row(3, 7, 3, 3, 3),
            row(4, 8, 4, 4, 4),
        ];
        let links = super::compute_links(&rows, 2);
        assert_eq!(
            vec![
                super::Link {
                    oid_start: 1,
                    oid_end: 2,
                    direction: 1,
                    inblocks1: 0,
                    inblocks2: 0,
                },
                super::Link {
                    oid_start: 3,
                    oid_end: 4,
                    direction: 1,
                    inblocks1: 0,
                    inblocks2: 0,
                },
            ],
            links
        );
    }

    #[test]
    fn links_accept_reverse_direction() {
        // Genome 2 runs backwards: an inverted segment.
        let rows = vec![row(1, 1, 9, 1, 3), row(2, 2, 8, 2, 2), row(3, 3, 7, 3, 1)];
        let links = super::compute_links(&rows, 2);
        assert_eq!(2, links.len());
        assert_eq!(-1, links[0].direction);
        assert_eq!(-1, links[1].direction);
    }

    #[test]
    fn blocks_are_maximal_chains() {
        let rows = vec![
            row(1, 1, 1, 1, 1),
            row(2, 2, 2, 2, 2),
            row(3, 3, 3, 3, 3),
            row(4, 4, 4, 4, 4),
            row(5, 5, 5, 5, 5),
        ];
        let links = super::compute_links(&rows, 2);
        let rows_by_oid: HashMap<i64, &super::OrthoView> =
            rows.iter().map(|r| (r.oid, r)).collect();
        let blocks = super::build_blocks(&links, &rows_by_oid);
        assert_eq!(
            vec![super::Block {
                oid_start: 1,
                oid_end: 5,
                direction: 1,
                block_size: 5
            }],
            blocks
        );
    }

    #[test]
    fn chains_do_not_cross_direction_buckets() {
        // Two colinear pairs, then two inverted ones.
        let rows = vec![
            row(1, 1, 1, 1, 1),
            row(2, 2, 2, 2, 2),
            row(3, 3, 9, 3, 4),
            row(4, 4, 8, 4, 3),
        ];
        let links = super::compute_links(&rows, 2);
        let rows_by_oid: HashMap<i64, &super::OrthoView> =
            rows.iter().map(|r| (r.oid, r)).collect();
        let blocks = super::build_blocks(&links, &rows_by_oid);
        assert_eq!(2, blocks.len());
        assert_eq!((1, 2, 1), (blocks[0].oid_start, blocks[0].oid_end, blocks[0].direction));
        assert_eq!((3, 4, -1), (blocks[1].oid_start, blocks[1].oid_end, blocks[1].direction));
    }

    #[test]
    fn extension_absorbs_out_of_order_links() {
        // Present the middle link last: the chain still reassembles.
        let links = vec![
            super::Link {
                oid_start: 1,
                oid_end: 2,
                direction: 1,
                inblocks1: 0,
                inblocks2: 0,
            },
            super::Link {
                oid_start: 3,
                oid_end: 4,
                direction: 1,
                inblocks1: 0,
                inblocks2: 0,
            },
            super::Link {
                oid_start: 2,
                oid_end: 3,
                direction: 1,
                inblocks1: 0,
                inblocks2: 0,
            },
        ];
        let rows = vec![
            row(1, 1, 1, 1, 1),
            row(2, 2, 2, 2, 2),
            row(3, 3, 3, 3, 3),
            row(4, 4, 4, 4, 4),
        ];
        let rows_by_oid: HashMap<i64, &super::OrthoView> =
            rows.iter().map(|r| (r.oid, r)).collect();
        let blocks = super::build_blocks(&links, &rows_by_oid);
        assert_eq!(
            vec![super::Block {
                oid_start: 1,
                oid_end: 4,
                direction: 1,
                block_size: 4
            }],
            blocks
        );
    }
}
