//! Implementation of the `graph` subcommand.
//!
//! Groups homologous breaks across genome pairs into graphs (transitive
//! closure over shared flank keys and opposite links), collapses species with
//! identical relationships into composite nodes, and measures the cycle core
//! left after iterative leaf pruning.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use clap::Parser;
use thousands::Separable;

use crate::{common, db::Store};

/// Command line arguments for the `graph` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Group similar breaks across genome pairs and detect cycles", long_about = None)]
pub struct Args {
    /// Path to the store.
    #[arg(short = 'd', long = "db")]
    pub path_db: String,
}

/// The association carried by one break.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakAssoc {
    pub breakid: i64,
    pub sp1: String,
    pub sp2: String,
    pub left1: String,
    pub right1: String,
    pub opposite: Option<i64>,
}

/// One analyzed graph of breaks.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakGraph {
    pub graphid: i64,
    /// Member breakids, ascending.
    pub members: Vec<i64>,
    /// Edges between composite node names, deduplicated, `from < to`.
    pub edges: Vec<(String, String)>,
    /// Nodes left after iterative leaf pruning.
    pub cycle: i64,
}

/// Minimal union-find over breakids.
#[derive(Debug, Default)]
struct DisjointSets {
    parent: HashMap<i64, i64>,
}

impl DisjointSets {
    fn find(&mut self, id: i64) -> i64 {
        let parent = *self.parent.entry(id).or_insert(id);
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.parent.insert(id, root);
        root
    }

    fn union(&mut self, a: i64, b: i64) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Lower id wins, keeping group numbering stable.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(merge, keep);
        }
    }
}

/// Group breaks into graphs and analyze each.
pub fn analyze(breaks: &[BreakAssoc]) -> Vec<BreakGraph> {
    let mut sets = DisjointSets::default();

    // Breaks sharing the same genome-1 flank pair describe the same locus.
    let mut by_flanks: BTreeMap<(&str, &str, &str), Vec<i64>> = BTreeMap::new();
    for brk in breaks {
        by_flanks
            .entry((brk.sp1.as_str(), brk.left1.as_str(), brk.right1.as_str()))
            .or_default()
            .push(brk.breakid);
    }
    for ids in by_flanks.values() {
        for window in ids.windows(2) {
            sets.union(window[0], window[1]);
        }
    }
    for brk in breaks {
        if let Some(opposite) = brk.opposite {
            sets.union(brk.breakid, opposite);
        }
    }

    let mut components: BTreeMap<i64, Vec<&BreakAssoc>> = BTreeMap::new();
    for brk in breaks {
        components.entry(sets.find(brk.breakid)).or_default().push(brk);
    }

    let mut graphs = Vec::new();
    for (i, group) in components.values().enumerate() {
        let graphid = i as i64 + 1;

        // Species node -> set of species seen on the other side.
        let mut neighbors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for brk in group {
            neighbors
                .entry(brk.sp1.as_str())
                .or_default()
                .insert(brk.sp2.as_str());
            neighbors
                .entry(brk.sp2.as_str())
                .or_default()
                .insert(brk.sp1.as_str());
        }

        // Species with identical relationships collapse into one node.
        let mut by_neighborhood: BTreeMap<&BTreeSet<&str>, Vec<&str>> = BTreeMap::new();
        for (sp, neighborhood) in &neighbors {
            by_neighborhood.entry(neighborhood).or_default().push(*sp);
        }
        let mut composite: HashMap<&str, String> = HashMap::new();
        for species in by_neighborhood.values() {
            let name = species.join(" ");
            for sp in species {
                composite.insert(*sp, name.clone());
            }
        }

        let mut edges = BTreeSet::new();
        for brk in group {
            let from = composite[brk.sp1.as_str()].clone();
            let to = composite[brk.sp2.as_str()].clone();
            if from != to {
                let (from, to) = if from < to { (from, to) } else { (to, from) };
                edges.insert((from, to));
            }
        }

        let cycle = prune_leaves(&edges);

        let mut members = group.iter().map(|brk| brk.breakid).collect::<Vec<_>>();
        members.sort_unstable();
        graphs.push(BreakGraph {
            graphid,
            members,
            edges: edges.into_iter().collect(),
            cycle,
        });
    }

    graphs
}

/// Iteratively remove nodes of degree < 2; the remainder is the cycle core.
fn prune_leaves(edges: &BTreeSet<(String, String)>) -> i64 {
    let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (from, to) in edges {
        adjacency.entry(from).or_default().insert(to);
        adjacency.entry(to).or_default().insert(from);
    }
    let mut deleted: BTreeSet<&str> = BTreeSet::new();

    loop {
        let leaves = adjacency
            .iter()
            .filter(|(node, neighbors)| {
                !deleted.contains(*node)
                    && neighbors.iter().filter(|n| !deleted.contains(*n)).count() < 2
            })
            .map(|(node, _)| *node)
            .collect::<Vec<_>>();
        if leaves.is_empty() {
            break;
        }
        deleted.extend(leaves);
    }

    (adjacency.len() - deleted.len()) as i64
}

/// Run the break-graph analyzer against an open store.
pub fn run_with_store(store: &mut Store) -> Result<(), anyhow::Error> {
    let mut stmt = store.conn().prepare(
        "SELECT breakid, sp1, sp2, left1, right1, opposite
         FROM breaks ORDER BY breakid",
    )?;
    let breaks = stmt
        .query_map([], |row| {
            Ok(BreakAssoc {
                breakid: row.get(0)?,
                sp1: row.get(1)?,
                sp2: row.get(2)?,
                left1: row.get(3)?,
                right1: row.get(4)?,
                opposite: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let graphs = analyze(&breaks);

    store.create_graph_table()?;
    let tx = store.conn_mut().transaction()?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO breaks_graph (graphid, from_name, to_name) VALUES (?1, ?2, ?3)",
        )?;
        let mut update = tx.prepare(
            "UPDATE breaks_ranking SET cycle = ?2, graphid = ?3 WHERE breakid = ?1",
        )?;
        for graph in &graphs {
            for (from, to) in &graph.edges {
                insert.execute(rusqlite::params![graph.graphid, from, to])?;
            }
            for breakid in &graph.members {
                update.execute(rusqlite::params![breakid, graph.cycle, graph.graphid])?;
            }
        }
    }
    tx.commit()?;

    tracing::info!(
        "analyzed {} graphs over {} breaks",
        graphs.len().separate_with_commas(),
        breaks.len().separate_with_commas()
    );

    Ok(())
}

/// Main entry point for the `graph` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `graph`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let mut store = Store::open(&args.path_db)?;
    run_with_store(&mut store)?;
    store.record_stage("graph", &[])?;
    tracing::info!("Done with `graph`");

    Ok(())
}
