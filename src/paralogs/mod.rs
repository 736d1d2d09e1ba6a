//! Implementation of the `paralogs` subcommand.
//!
//! Collects within-genome similarity hits and emits, per gene, the list of
//! its paralogs with the best observed identity for each.

use std::collections::BTreeMap;

use clap::Parser;
use thousands::Separable;

use crate::{
    common,
    input::{
        catalog::Catalog,
        hits,
        paralogs::{self, Record as ParalogRecord},
    },
};

/// Maximal e-value of a paralog hit.
const MAX_EVALUE: f64 = 1e-20;
/// Minimal alignment length, as a fraction of the shorter protein.
const MIN_LENGTH_RATIO: f64 = 0.5;
/// Unknown-pid warnings tolerated before the input is considered broken.
const MAX_UNKNOWN_PIDS: usize = 10;

/// Command line arguments for the `paralogs` subcommand.
#[derive(Parser, Debug)]
#[command(about = "Build within-genome paralog lists from similarity hits", long_about = None)]
pub struct Args {
    /// Path to the similarity hits file.
    #[arg(short = 'i', long = "hits")]
    pub path_hits: String,
    /// Path to the gene catalog file.
    #[arg(short = 'g', long = "genes")]
    pub path_genes: String,
    /// Path to the output paralog list file.
    #[arg(short = 'o', long = "output")]
    pub path_output: String,

    /// Minimal percent identity of a paralog hit.
    #[arg(short = 's', long = "min-identity", default_value_t = 40.0)]
    pub min_identity: f64,
}

/// Reduce same-species hits to the best identity per `(query, subject)`.
pub fn best_identities(
    all_hits: &[hits::Record],
    catalog: &Catalog,
    min_identity: f64,
) -> Result<BTreeMap<(String, String), f64>, anyhow::Error> {
    let mut best: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut unknown = 0usize;

    for hit in all_hits {
        if hit.query == hit.subject {
            continue;
        }
        let (query, subject) = match (catalog.get(&hit.query), catalog.get(&hit.subject)) {
            (Some(query), Some(subject)) => (query, subject),
            _ => {
                let pid = if catalog.get(&hit.query).is_none() {
                    &hit.query
                } else {
                    &hit.subject
                };
                if unknown >= MAX_UNKNOWN_PIDS {
                    anyhow::bail!(
                        "too many hits referencing pids not in the catalog (last: {})",
                        pid
                    );
                }
                unknown += 1;
                tracing::warn!("hit references pid {} not in the catalog, skipping", pid);
                continue;
            }
        };
        if query.sp != subject.sp {
            continue;
        }

        let shorter = query.length.min(subject.length) as f64 / 3.0;
        if (hit.alignment_length as f64) < MIN_LENGTH_RATIO * shorter {
            continue;
        }
        if hit.pct_identity < min_identity {
            continue;
        }
        if hit.e_value > MAX_EVALUE {
            continue;
        }

        let entry = best
            .entry((hit.query.clone(), hit.subject.clone()))
            .or_insert(hit.pct_identity);
        if hit.pct_identity > *entry {
            *entry = hit.pct_identity;
        }
    }

    Ok(best)
}

/// Render per-query records, subjects ordered by descending identity then pid.
pub fn collect_records(best: &BTreeMap<(String, String), f64>) -> Vec<ParalogRecord> {
    let mut by_query: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for ((query, subject), identity) in best {
        by_query
            .entry(query)
            .or_default()
            .push((subject, *identity));
    }

    by_query
        .into_iter()
        .map(|(query, mut subjects)| {
            subjects.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .expect("identities are finite")
                    .then_with(|| a.0.cmp(b.0))
            });
            let rendered = subjects
                .iter()
                .map(|(subject, identity)| format!("{} ({}%)", subject, identity))
                .collect::<Vec<_>>()
                .join(", ");
            ParalogRecord {
                pid: query.to_string(),
                n: subjects.len() as i64,
                subjects: rendered,
            }
        })
        .collect()
}

/// Main entry point for the `paralogs` subcommand.
pub fn run(common_args: &common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("Starting `paralogs`");
    tracing::info!("  common_args = {:?}", &common_args);
    tracing::info!("  args = {:?}", &args);

    let catalog = Catalog::load(&args.path_genes)?;
    let all_hits = hits::read_hits(&args.path_hits)?;
    tracing::info!(
        "read {} genes, {} hits",
        catalog.len().separate_with_commas(),
        all_hits.len().separate_with_commas()
    );

    let best = best_identities(&all_hits, &catalog, args.min_identity)?;
    let records = collect_records(&best);
    tracing::info!(
        "emitting paralog lists for {} genes",
        records.len().separate_with_commas()
    );

    paralogs::write_paralogs(&args.path_output, &records)?;
    tracing::info!("Done with `paralogs`");

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::input::{
        catalog::{test_record, Catalog},
        hits,
    };

    fn hit(query: &str, subject: &str, identity: f64, alen: i64, e_value: f64) -> hits::Record {
        hits::Record {
            query: query.to_string(),
            subject: subject.to_string(),
            pct_identity: identity,
            alignment_length: alen,
            mismatches: 0,
            gap_openings: 0,
            qstart: 1,
            qend: alen,
            sstart: 1,
            send: alen,
            e_value,
            bit_score: 100.0,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            test_record("A", "A_001", 1, 1),
            test_record("A", "A_002", 2, 2),
            test_record("A", "A_003", 3, 3),
            test_record("B", "B_001", 1, 1),
        ])
    }

    #[test]
    fn keeps_best_identity_per_pair() -> Result<(), anyhow::Error> {
        let all_hits = vec![
            hit("A_001", "A_002", 55.0, 250, 1e-30),
            hit("A_001", "A_002", 63.2, 180, 1e-40),
            hit("A_001", "A_003", 41.0, 250, 1e-25),
            // Cross-species hits do not make paralogs.
            hit("A_001", "B_001", 90.0, 250, 1e-80),
            // Self hits are ignored.
            hit("A_001", "A_001", 100.0, 300, 0.0),
            // E-value too permissive for a paralog call.
            hit("A_002", "A_003", 80.0, 250, 1e-12),
        ];

        let best = super::best_identities(&all_hits, &catalog(), 40.0)?;
        let records = super::collect_records(&best);
        assert_eq!(1, records.len());
        assert_eq!("A_001", records[0].pid);
        assert_eq!(2, records[0].n);
        assert_eq!("A_002 (63.2%), A_003 (41%)", records[0].subjects);

        Ok(())
    }

    #[test]
    fn unknown_pids_warn_then_become_fatal() {
        let all_hits = (0..11)
            .map(|i| hit(&format!("X_{:03}", i), "A_001", 80.0, 250, 1e-30))
            .collect::<Vec<_>>();

        let res = super::best_identities(&all_hits, &catalog(), 40.0);
        assert!(res.is_err());
        assert!(format!("{}", res.unwrap_err()).contains("X_010"));
    }
}
