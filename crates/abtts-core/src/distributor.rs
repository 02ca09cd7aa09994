//! Round-robin distribution of work units across worker sessions.
//!
//! Round-robin scatters a failed worker's losses thinly across the whole
//! index range instead of leaving a contiguous gap, bounding the damage from
//! any single worker to roughly `1/N` of the total. The partition is a pure
//! function of its inputs, which is what lets a resume run re-partition the
//! missing subset identically.

use crate::unit::WorkUnit;

/// Worker identifier, 1-based like the operator-facing dashboard.
pub type WorkerId = usize;

/// Ordered subset of units owned by one worker. Computed once per run and
/// immutable while the run executes.
#[derive(Debug, Clone)]
pub struct WorkerAssignment {
    pub worker_id: WorkerId,
    pub units: Vec<WorkUnit>,
}

/// Partition `units` across `worker_count` workers: the unit at position `i`
/// goes to worker `(i mod worker_count) + 1`.
///
/// Every input unit appears in exactly one assignment and relative order is
/// preserved within each assignment.
pub fn round_robin(units: &[WorkUnit], worker_count: usize) -> Vec<WorkerAssignment> {
    let worker_count = worker_count.max(1);
    let mut assignments: Vec<WorkerAssignment> = (1..=worker_count)
        .map(|worker_id| WorkerAssignment {
            worker_id,
            units: Vec::with_capacity(units.len() / worker_count + 1),
        })
        .collect();

    for (pos, unit) in units.iter().enumerate() {
        assignments[pos % worker_count].units.push(unit.clone());
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn units(n: usize) -> Vec<WorkUnit> {
        (0..n)
            .map(|i| WorkUnit {
                index: i,
                group_id: "g".into(),
                text: format!("unit {}", i),
            })
            .collect()
    }

    fn assigned_indices(a: &WorkerAssignment) -> Vec<usize> {
        a.units.iter().map(|u| u.index).collect()
    }

    #[test]
    fn twelve_units_three_workers() {
        let parts = round_robin(&units(12), 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(assigned_indices(&parts[0]), vec![0, 3, 6, 9]);
        assert_eq!(assigned_indices(&parts[1]), vec![1, 4, 7, 10]);
        assert_eq!(assigned_indices(&parts[2]), vec![2, 5, 8, 11]);
    }

    #[test]
    fn partition_is_a_bijection() {
        for total in [0usize, 1, 5, 12, 97, 636] {
            for workers in [1usize, 2, 3, 7, 12, 20] {
                let input = units(total);
                let parts = round_robin(&input, workers);
                let mut seen = BTreeSet::new();
                let mut count = 0usize;
                for p in &parts {
                    for u in &p.units {
                        assert!(seen.insert(u.index), "index {} assigned twice", u.index);
                        count += 1;
                    }
                }
                assert_eq!(count, total);
                assert_eq!(seen.len(), total);
                if total > 0 {
                    assert_eq!(*seen.iter().next().unwrap(), 0);
                    assert_eq!(*seen.iter().next_back().unwrap(), total - 1);
                }
            }
        }
    }

    #[test]
    fn resume_subset_repartitions_cleanly() {
        // 636-unit book with the first 120 already completed: the 516
        // remaining units across 12 workers must again cover exactly the
        // missing set.
        let input: Vec<WorkUnit> = units(636).into_iter().skip(120).collect();
        assert_eq!(input.len(), 516);
        let parts = round_robin(&input, 12);
        let mut seen = BTreeSet::new();
        for p in &parts {
            for u in &p.units {
                assert!(seen.insert(u.index));
            }
        }
        assert_eq!(seen.len(), 516);
        assert_eq!(*seen.iter().next().unwrap(), 120);
        assert_eq!(*seen.iter().next_back().unwrap(), 635);
    }

    #[test]
    fn zero_workers_clamped_to_one() {
        let parts = round_robin(&units(4), 0);
        assert_eq!(parts.len(), 1);
        assert_eq!(assigned_indices(&parts[0]), vec![0, 1, 2, 3]);
    }
}
