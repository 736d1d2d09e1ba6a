//! Implementation of the `orthologs` subcommand.
//!
//! Consumes the all-vs-all similarity hits and the gene catalog, reduces the
//! hits to per-query best-match sets, resolves best reciprocal hits, and
//! rescues ambiguous candidates through the synteny of their already-paired
//! CDS neighbors.

pub mod solver;

use std::collections::BTreeMap;

use clap::Parser;
use thousands::Separable;

use crate::{
    common,
    input::{
        catalog::Catalog,
        hits,
        orthos::{self, Record as OrthoRecord},
    },
};

use self::solver::Groups;

/// Command line arguments for the `orthologs` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Build ortholog pairs from similarity hits", long_about = None)]
pub struct Args {
    /// Path to the similarity hits file.
    #[arg(short = 'i', long = "hits")]
    pub path_hits: String,
    /// Path to the gene catalog file.
    #[arg(short = 'g', long = "genes")]
    pub path_genes: String,
    /// Path to the output ortholog pairs file.
    #[arg(short = 'o', long = "output")]
    pub path_output: String,

    /// Minimal alignment length, as a fraction of the shorter protein.
    #[arg(long, default_value_t = 0.40)]
    pub min_length_ratio: f64,
    /// Minimal percent identity of a hit.
    #[arg(long, default_value_t = 40.0)]
    pub min_identity: f64,
    /// Maximal e-value of a hit.
    #[arg(long, default_value_t = 1e-10)]
    pub max_evalue: f64,
    /// Factor within which two e-values are considered equal.
    #[arg(long, default_value_t = 1.0)]
    pub evalue_tolerance: f64,
}

/// The best matches of one query against one target species.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// e-value of the best hit
    pub e_value: f64,
    /// percent identity of the best hit
    pub identity: f64,
    /// alignment length of the best hit
    pub length: i64,
    /// tied subjects, in first-encounter order
    pub matches: Vec<String>,
}

/// Best matches per ordered species pair, per query.
pub type BestMatches = BTreeMap<(String, String), BTreeMap<String, BestMatch>>;

/// Reduce the surviving hits to per-`(species, species)` best-match maps.
///
/// A hit referencing a pid absent from the catalog breaks the data contract
/// and is fatal.
pub fn best_matches(
    all_hits: &[hits::Record],
    catalog: &Catalog,
    args: &Args,
) -> Result<BestMatches, anyhow::Error> {
    let mut best: BestMatches = BTreeMap::new();

    for hit in all_hits {
        let query = catalog.require(&hit.query)?;
        let subject = catalog.require(&hit.subject)?;
        if query.sp == subject.sp {
            continue;
        }

        // Gate on the shorter protein: catalog lengths are nucleotides.
        let shorter = query.length.min(subject.length) as f64 / 3.0;
        if (hit.alignment_length as f64) < args.min_length_ratio * shorter {
            continue;
        }
        if hit.pct_identity < args.min_identity {
            continue;
        }
        if hit.e_value > args.max_evalue {
            continue;
        }

        let per_query = best
            .entry((query.sp.clone(), subject.sp.clone()))
            .or_default();
        match per_query.get_mut(&hit.query) {
            None => {
                per_query.insert(
                    hit.query.clone(),
                    BestMatch {
                        e_value: hit.e_value,
                        identity: hit.pct_identity,
                        length: hit.alignment_length,
                        matches: vec![hit.subject.clone()],
                    },
                );
            }
            Some(current) => {
                if hit.e_value < current.e_value / args.evalue_tolerance {
                    // Better beyond the tolerance: reset.
                    *current = BestMatch {
                        e_value: hit.e_value,
                        identity: hit.pct_identity,
                        length: hit.alignment_length,
                        matches: vec![hit.subject.clone()],
                    };
                } else if hit.e_value <= current.e_value * args.evalue_tolerance {
                    if hit.pct_identity > current.identity {
                        *current = BestMatch {
                            e_value: hit.e_value,
                            identity: hit.pct_identity,
                            length: hit.alignment_length,
                            matches: vec![hit.subject.clone()],
                        };
                    } else if hit.pct_identity == current.identity
                        && !current.matches.contains(&hit.subject)
                    {
                        current.matches.push(hit.subject.clone());
                    }
                }
            }
        }
    }

    Ok(best)
}

/// A resolved pair before oid assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub pid1: String,
    pub pid2: String,
    pub o_ident: f64,
    pub o_alen: i64,
}

/// Resolve pairs for one genome pair: best reciprocal hits first, then the
/// synteny-rescue loop over the deferred candidate groups.
pub fn resolve_genome_pair(
    forward: &BTreeMap<String, BestMatch>,
    backward: &BTreeMap<String, BestMatch>,
    catalog: &Catalog,
) -> Vec<Pair> {
    let mut pairs = Vec::new();
    let mut paired_forward: BTreeMap<String, String> = BTreeMap::new();
    let mut paired_backward: BTreeMap<String, String> = BTreeMap::new();
    let mut groups = Groups::default();

    for (query, fm) in forward {
        if fm.matches.len() == 1 {
            let target = &fm.matches[0];
            let Some(bm) = backward.get(target) else {
                continue;
            };
            if bm.matches.len() == 1 {
                if &bm.matches[0] == query {
                    // Reciprocal one-to-one best hit.
                    pairs.push(Pair {
                        pid1: query.clone(),
                        pid2: target.clone(),
                        o_ident: fm.identity,
                        o_alen: fm.length,
                    });
                    paired_forward.insert(query.clone(), target.clone());
                    paired_backward.insert(target.clone(), query.clone());
                }
            } else if bm.matches.iter().any(|m| m == query) {
                groups.add(query, &[target.as_str()]);
            }
        } else {
            let candidates = fm
                .matches
                .iter()
                .filter(|t| {
                    backward
                        .get(*t)
                        .map(|bm| bm.matches.iter().any(|m| m == query))
                        .unwrap_or(false)
                })
                .map(String::as_str)
                .collect::<Vec<_>>();
            if !candidates.is_empty() {
                groups.add(query, &candidates);
            }
        }
    }

    let rescued = solver::solve(&groups, catalog, &mut paired_forward, &mut paired_backward);
    pairs.extend(rescued.into_iter().map(|(pid1, pid2)| Pair {
        pid1,
        pid2,
        o_ident: 0.0,
        o_alen: 0,
    }));

    pairs
}

/// Resolve all genome pairs and emit sorted, 1-based oid-numbered records.
pub fn resolve_all(best: &BestMatches, catalog: &Catalog) -> Vec<OrthoRecord> {
    let mut genome_pairs = best
        .keys()
        .map(|(a, b)| {
            if a < b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            }
        })
        .collect::<Vec<_>>();
    genome_pairs.sort();
    genome_pairs.dedup();

    let empty = BTreeMap::new();
    let mut pairs = Vec::new();
    for (sp1, sp2) in genome_pairs {
        let forward = best.get(&(sp1.clone(), sp2.clone())).unwrap_or(&empty);
        let backward = best.get(&(sp2.clone(), sp1.clone())).unwrap_or(&empty);
        let resolved = resolve_genome_pair(forward, backward, catalog);
        tracing::debug!(
            "{} <-> {}: {} pairs",
            sp1,
            sp2,
            resolved.len().separate_with_commas()
        );
        pairs.extend(resolved.into_iter().map(|pair| (sp1.clone(), sp2.clone(), pair)));
    }

    pairs.sort_by(|a, b| {
        (&a.0, &a.1, &a.2.pid1, &a.2.pid2).cmp(&(&b.0, &b.1, &b.2.pid1, &b.2.pid2))
    });
    pairs
        .into_iter()
        .enumerate()
        .map(|(i, (_, _, pair))| OrthoRecord {
            oid: i as i64 + 1,
            pid1: pair.pid1,
            pid2: pair.pid2,
            o_ident: pair.o_ident,
            o_alen: pair.o_alen,
        })
        .collect()
}

/// Main entry point for the `orthologs` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `orthologs`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let catalog = Catalog::load(&args.path_genes)?;
    tracing::info!(
        "read {} genes from {}",
        catalog.len().separate_with_commas(),
        &args.path_genes
    );

    let all_hits = hits::read_hits(&args.path_hits)?;
    tracing::info!(
        "read {} hits from {}",
        all_hits.len().separate_with_commas(),
        &args.path_hits
    );

    let best = best_matches(&all_hits, &catalog, args)?;
    let records = resolve_all(&best, &catalog);
    tracing::info!(
        "emitting {} ortholog pairs",
        records.len().separate_with_commas()
    );

    orthos::write_orthos(&args.path_output, &records)?;
    tracing::info!("Done with `orthologs`");

    Ok(())
}
