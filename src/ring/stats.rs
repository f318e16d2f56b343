//! Ring statistics

/// Counters kept by a ring context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Entries accepted into the submission queue
    pub submitted: u64,
    /// Completions consumed by callers, successful or not
    pub completed: u64,
    /// Completions that carried a negative result
    pub failed: u64,
    /// Submissions rejected because the queue was full
    pub queue_full_rejections: u64,
    /// Buffers handed to the kernel by provide calls
    pub provided_buffers: u64,
    /// Selecting reads that came back with a buffer
    pub selections: u64,
    /// Buffers handed back through `recycle`
    pub recycled: u64,
    /// Short reads observed
    pub short_reads: u64,
    /// Peak number of undrained operations
    pub peak_in_flight: usize,
}

impl RingStats {
    /// Create new statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of consumed completions that succeeded (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            return 1.0;
        }
        (self.completed - self.failed) as f64 / self.completed as f64
    }

    pub(crate) fn record_in_flight(&mut self, in_flight: usize) {
        if in_flight > self.peak_in_flight {
            self.peak_in_flight = in_flight;
        }
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "RingStats {{ submitted: {}, completed: {}, failed: {}, queue_full: {}, \
             provided: {}, selections: {}, recycled: {}, short_reads: {}, peak_in_flight: {} }}",
            self.submitted,
            self.completed,
            self.failed,
            self.queue_full_rejections,
            self.provided_buffers,
            self.selections,
            self.recycled,
            self.short_reads,
            self.peak_in_flight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut stats = RingStats::new();
        assert_eq!(stats.success_rate(), 1.0);

        stats.completed = 4;
        stats.failed = 1;
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);

        stats.record_in_flight(3);
        stats.record_in_flight(2);
        assert_eq!(stats.peak_in_flight, 3);
        assert!(stats.summary().contains("peak_in_flight: 3"));
    }
}
