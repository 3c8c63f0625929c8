//! Capacity and utilization arithmetic over process descriptors
//!
//! A ratio is not computable when a process reports zero concurrency. Such
//! processes are left out of averages instead of dragging them towards zero.

use crate::stats::ProcessDescriptor;

/// Busy fraction of a single process; `None` when concurrency is zero
pub fn ratio(process: &ProcessDescriptor) -> Option<f64> {
    if process.concurrency == 0 {
        return None;
    }
    Some(process.busy as f64 / process.concurrency as f64)
}

/// Mean busy fraction over the processes whose ratio is computable
pub fn mean<'a, I>(processes: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a ProcessDescriptor>,
{
    let (sum, count) = processes
        .into_iter()
        .filter_map(ratio)
        .fold((0.0, 0usize), |(sum, count), r| (sum + r, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Total configured concurrency
pub fn capacity<'a, I>(processes: I) -> u64
where
    I: IntoIterator<Item = &'a ProcessDescriptor>,
{
    processes.into_iter().map(|p| p.concurrency).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_of_idle_process_is_not_computable() {
        assert_eq!(ratio(&ProcessDescriptor::new("a", 0, 0)), None);
        assert_eq!(ratio(&ProcessDescriptor::new("a", 5, 10)), Some(0.5));
    }

    #[test]
    fn mean_skips_zero_concurrency() {
        let processes = vec![
            ProcessDescriptor::new("a", 0, 10),
            ProcessDescriptor::new("b", 5, 10),
            ProcessDescriptor::new("c", 0, 0),
        ];
        assert_eq!(mean(&processes), Some(0.25));
    }

    #[test]
    fn mean_of_nothing_is_not_computable() {
        let none: Vec<ProcessDescriptor> = Vec::new();
        assert_eq!(mean(&none), None);
        assert_eq!(mean(&[ProcessDescriptor::new("a", 0, 0)]), None);
    }

    #[test]
    fn capacity_sums_concurrency() {
        let processes = vec![
            ProcessDescriptor::new("a", 3, 10),
            ProcessDescriptor::new("b", 0, 0),
            ProcessDescriptor::new("c", 1, 25),
        ];
        assert_eq!(capacity(&processes), 35);
    }
}
