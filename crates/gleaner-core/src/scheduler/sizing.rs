//! Worker pool sizing from the job-size mix and current machine load.

use crate::engine::ResourceSnapshot;
use crate::registry::{Job, SizeClass};

/// Worker cap whenever a batch contains a large job.
pub const LARGE_JOB_CAP: usize = 2;
/// Utilisation (percent) above which the pool shrinks.
pub const HIGH_LOAD_THRESHOLD: f32 = 80.0;
/// Utilisation (percent) below which the pool grows.
pub const LOW_LOAD_THRESHOLD: f32 = 50.0;
pub const HIGH_LOAD_PENALTY: usize = 2;
pub const LOW_LOAD_BONUS: usize = 1;

/// Inclusive worker bounds; `min <= max`, both at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBounds {
    pub min: usize,
    pub max: usize,
}

impl WorkerBounds {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }
}

impl Default for WorkerBounds {
    fn default() -> Self {
        Self::new(2, 8)
    }
}

/// Number of workers for `jobs` under `load`.
///
/// Base size comes from the size mix (any large job caps it, a mostly-small
/// batch gets the maximum, anything else the midpoint). Load then shifts it
/// down or up; an unknown load leaves it alone. The result is clamped to
/// `bounds`, then to `cap` when given (never below `bounds.min`).
pub fn optimal_workers(
    jobs: &[Job],
    load: Option<ResourceSnapshot>,
    bounds: WorkerBounds,
    cap: Option<usize>,
) -> usize {
    let small = jobs.iter().filter(|j| j.size == SizeClass::Small).count();
    let base = if jobs.iter().any(|j| j.size == SizeClass::Large) {
        LARGE_JOB_CAP
    } else if small * 2 > jobs.len() {
        bounds.max
    } else {
        (bounds.min + bounds.max + 1) / 2
    };

    let adjusted = match load.map(|l| l.utilization()) {
        Some(u) if u > HIGH_LOAD_THRESHOLD => base.saturating_sub(HIGH_LOAD_PENALTY),
        Some(u) if u < LOW_LOAD_THRESHOLD => base + LOW_LOAD_BONUS,
        _ => base,
    };

    let clamped = adjusted.clamp(bounds.min, bounds.max);
    match cap {
        Some(cap) => clamped.min(cap).max(bounds.min),
        None => clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, size: SizeClass) -> Job {
        let mut j = Job::new(id, "cap");
        j.size = size;
        j
    }

    fn load(cpu: f32, mem: f32) -> Option<ResourceSnapshot> {
        Some(ResourceSnapshot {
            cpu_percent: cpu,
            memory_percent: mem,
        })
    }

    #[test]
    fn mixed_batch_with_large_job_under_light_load() {
        let jobs = vec![
            job("s1", SizeClass::Small),
            job("s2", SizeClass::Small),
            job("s3", SizeClass::Small),
            job("l1", SizeClass::Large),
        ];
        let n = optimal_workers(&jobs, load(30.0, 40.0), WorkerBounds::new(2, 8), None);
        assert_eq!(n, 3);
    }

    #[test]
    fn mostly_small_gets_max_then_penalty() {
        let jobs = vec![
            job("s1", SizeClass::Small),
            job("s2", SizeClass::Small),
            job("m1", SizeClass::Medium),
        ];
        let bounds = WorkerBounds::new(2, 8);
        assert_eq!(optimal_workers(&jobs, None, bounds, None), 8);
        assert_eq!(optimal_workers(&jobs, load(90.0, 10.0), bounds, None), 6);
        // Bonus is clamped back to max.
        assert_eq!(optimal_workers(&jobs, load(10.0, 10.0), bounds, None), 8);
    }

    #[test]
    fn medium_batch_uses_midpoint() {
        let jobs = vec![job("m1", SizeClass::Medium), job("s1", SizeClass::Small)];
        assert_eq!(
            optimal_workers(&jobs, load(60.0, 60.0), WorkerBounds::new(2, 8), None),
            5
        );
    }

    #[test]
    fn never_below_min_even_under_heavy_load() {
        let jobs = vec![job("l1", SizeClass::Large)];
        let bounds = WorkerBounds::new(2, 8);
        assert_eq!(optimal_workers(&jobs, load(99.0, 99.0), bounds, None), 2);
        assert_eq!(optimal_workers(&jobs, load(99.0, 99.0), bounds, Some(1)), 2);
    }

    #[test]
    fn cap_override_lowers_result() {
        let jobs = vec![job("s1", SizeClass::Small)];
        assert_eq!(
            optimal_workers(&jobs, None, WorkerBounds::new(1, 8), Some(3)),
            3
        );
    }

    #[test]
    fn all_combinations_stay_in_bounds() {
        let sizes = [SizeClass::Small, SizeClass::Medium, SizeClass::Large];
        let loads = [None, load(10.0, 10.0), load(65.0, 20.0), load(95.0, 20.0)];
        for (min, max) in [(1, 1), (1, 4), (2, 8), (3, 16)] {
            let bounds = WorkerBounds::new(min, max);
            for a in sizes {
                for b in sizes {
                    let jobs = vec![job("a", a), job("b", b)];
                    for l in loads {
                        let n = optimal_workers(&jobs, l, bounds, None);
                        assert!(n >= min && n <= max, "{n} not in [{min}, {max}]");
                    }
                }
            }
        }
    }
}
