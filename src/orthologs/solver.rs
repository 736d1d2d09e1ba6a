//! Candidate groups and the synteny-rescue loop.
//!
//! Ambiguous best-hit candidates are deferred into bipartite groups; two
//! candidate sets sharing any endpoint share a group.  The solver then pairs
//! group members round by round, using already-paired CDS neighbors as
//! positional evidence, until a round commits nothing new.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::input::catalog::Catalog;

/// One bipartite candidate group.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Group {
    /// Member pids on the query side.
    pub from: BTreeSet<String>,
    /// Member pids on the subject side.
    pub to: BTreeSet<String>,
}

/// The set of candidate groups of one genome pair.
#[derive(Debug, Default)]
pub struct Groups {
    groups: Vec<Option<Group>>,
    from_index: HashMap<String, usize>,
    to_index: HashMap<String, usize>,
}

impl Groups {
    /// Defer the candidate set `from x to_candidates` into a group, merging
    /// every group already holding one of the endpoints.
    pub fn add(&mut self, from: &str, to_candidates: &[&str]) {
        let mut touched = BTreeSet::new();
        if let Some(gid) = self.from_index.get(from) {
            touched.insert(*gid);
        }
        for to in to_candidates {
            if let Some(gid) = self.to_index.get(*to) {
                touched.insert(*gid);
            }
        }

        let target = match touched.iter().next() {
            Some(gid) => *gid,
            None => {
                self.groups.push(Some(Group::default()));
                self.groups.len() - 1
            }
        };

        // Merge every other touched group into the lowest one.
        for gid in touched.iter().skip(1) {
            let absorbed = self.groups[*gid].take().expect("group is indexed");
            let target_group = self.groups[target].as_mut().expect("group is indexed");
            for pid in absorbed.from {
                self.from_index.insert(pid.clone(), target);
                target_group.from.insert(pid);
            }
            for pid in absorbed.to {
                self.to_index.insert(pid.clone(), target);
                target_group.to.insert(pid);
            }
        }

        let group = self.groups[target].as_mut().expect("group is indexed");
        group.from.insert(from.to_string());
        self.from_index.insert(from.to_string(), target);
        for to in to_candidates {
            group.to.insert(to.to_string());
            self.to_index.insert(to.to_string(), target);
        }
    }

    /// The live groups, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter_map(Option::as_ref)
    }
}

/// Pair up group members; returns the committed pairs in commit order.
///
/// `paired_forward`/`paired_backward` hold the pairs committed so far in both
/// directions and are extended with every new commitment, so that later
/// rounds can lean on pairs made in earlier ones.
pub fn solve(
    groups: &Groups,
    catalog: &Catalog,
    paired_forward: &mut BTreeMap<String, String>,
    paired_backward: &mut BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut committed = Vec::new();

    loop {
        let mut round = Vec::new();

        for group in groups.iter() {
            let remaining_from = group
                .from
                .iter()
                .filter(|pid| !paired_forward.contains_key(*pid))
                .collect::<Vec<_>>();
            let remaining_to = group
                .to
                .iter()
                .filter(|pid| !paired_backward.contains_key(*pid))
                .collect::<Vec<_>>();
            if remaining_from.is_empty() || remaining_to.is_empty() {
                continue;
            }

            if remaining_from.len() == 1 && remaining_to.len() == 1 {
                round.push((remaining_from[0].clone(), remaining_to[0].clone()));
                continue;
            }

            // Candidates supported by an already-paired CDS neighbor.
            let mut potential = Vec::new();
            for from in &remaining_from {
                for delta in [-1i64, 1] {
                    let Some(neighbor) = catalog.cds_neighbor(from, delta) else {
                        continue;
                    };
                    let Some(partner) = paired_forward.get(neighbor) else {
                        continue;
                    };
                    for to in &remaining_to {
                        let adjacent = [-1i64, 1].iter().any(|d| {
                            catalog.cds_neighbor(to, *d) == Some(partner.as_str())
                        });
                        if adjacent {
                            potential.push(((*from).clone(), (*to).clone()));
                        }
                    }
                }
            }
            potential.sort();
            potential.dedup();

            // Only pairs whose pids occur exactly once in the potential set
            // survive the round.
            let mut from_uses: BTreeMap<&str, usize> = BTreeMap::new();
            let mut to_uses: BTreeMap<&str, usize> = BTreeMap::new();
            for (from, to) in &potential {
                *from_uses.entry(from).or_default() += 1;
                *to_uses.entry(to).or_default() += 1;
            }
            for (from, to) in &potential {
                if from_uses[from.as_str()] == 1 && to_uses[to.as_str()] == 1 {
                    round.push((from.clone(), to.clone()));
                }
            }
        }

        if round.is_empty() {
            break;
        }
        for (from, to) in round {
            paired_forward.insert(from.clone(), to.clone());
            paired_backward.insert(to.clone(), from.clone());
            committed.push((from, to));
        }
    }

    committed
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use crate::input::catalog::{test_record, Catalog};

    fn catalog(n: usize) -> Catalog {
        let mut records = Vec::new();
        for i in 1..=n {
            records.push(test_record("A", &format!("A_{:03}", i), i as i64, i as i64));
            records.push(test_record("B", &format!("B_{:03}", i), i as i64, i as i64));
        }
        Catalog::new(records)
    }

    #[test]
    fn groups_merge_on_shared_endpoint() {
        let mut groups = super::Groups::default();
        groups.add("A_001", &["B_001", "B_002"]);
        groups.add("A_002", &["B_003"]);
        groups.add("A_003", &["B_002", "B_003"]);

        // The third set bridges the first two into one group.
        let merged = groups.iter().collect::<Vec<_>>();
        assert_eq!(1, merged.len());
        assert_eq!(3, merged[0].from.len());
        assert_eq!(3, merged[0].to.len());
    }

    #[test]
    fn lone_members_pair_without_synteny() {
        let catalog = catalog(2);
        let mut groups = super::Groups::default();
        groups.add("A_001", &["B_002"]);

        let mut fwd = BTreeMap::new();
        let mut bwd = BTreeMap::new();
        let committed = super::solve(&groups, &catalog, &mut fwd, &mut bwd);
        assert_eq!(vec![("A_001".to_string(), "B_002".to_string())], committed);
    }

    #[test]
    fn ambiguous_candidates_drop_when_not_unique() {
        // A_001 and A_003 flank the paired A_002 <-> B_002 symmetrically, as
        // do B_001 and B_003: every potential pair is used twice, so nothing
        // can be committed.
        let catalog = catalog(4);
        let mut groups = super::Groups::default();
        groups.add("A_001", &["B_001", "B_003"]);
        groups.add("A_003", &["B_001", "B_003"]);

        let mut fwd = BTreeMap::new();
        let mut bwd = BTreeMap::new();
        fwd.insert("A_002".to_string(), "B_002".to_string());
        bwd.insert("B_002".to_string(), "A_002".to_string());

        let committed = super::solve(&groups, &catalog, &mut fwd, &mut bwd);
        assert_eq!(Vec::<(String, String)>::new(), committed);
    }

    #[test]
    fn rescue_cascades_across_rounds() {
        // Round 1 pins A_002 onto B_002 next to the seed pair; round 2 then
        // pins A_003 onto B_003 next to the new pair.
        let catalog = catalog(4);
        let mut groups = super::Groups::default();
        groups.add("A_002", &["B_002", "B_004"]);
        groups.add("A_003", &["B_003", "B_004"]);

        let mut fwd = BTreeMap::new();
        let mut bwd = BTreeMap::new();
        fwd.insert("A_001".to_string(), "B_001".to_string());
        bwd.insert("B_001".to_string(), "A_001".to_string());

        let committed = super::solve(&groups, &catalog, &mut fwd, &mut bwd);
        assert_eq!(
            vec![
                ("A_002".to_string(), "B_002".to_string()),
                ("A_003".to_string(), "B_003".to_string()),
            ],
            committed
        );
    }
}
