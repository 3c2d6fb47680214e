//! Cohort partitioning of ready beads

use ralph_core::Bead;
use std::collections::BTreeMap;

/// Beads sharing a team, recomputed every poll round
#[derive(Debug, Clone, PartialEq)]
pub struct Cohort {
    pub key: String,
    /// In the order the tracker returned them
    pub beads: Vec<Bead>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.beads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beads.is_empty()
    }
}

/// Group beads by team name
///
/// Beads without a team share the `default-team` cohort. Cohorts come back
/// sorted by key, so the grouping does not depend on input order; within a
/// cohort the input order is kept.
pub fn group_by_cohort(beads: Vec<Bead>) -> Vec<Cohort> {
    let mut groups: BTreeMap<String, Vec<Bead>> = BTreeMap::new();
    for bead in beads {
        groups.entry(bead.team().to_string()).or_default().push(bead);
    }

    groups
        .into_iter()
        .map(|(key, beads)| Cohort { key, beads })
        .collect()
}

pub fn cohort_names(cohorts: &[Cohort]) -> Vec<&str> {
    cohorts.iter().map(|c| c.key.as_str()).collect()
}
