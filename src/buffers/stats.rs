//! Buffer group statistics tracking

/// Statistics for one buffer group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Buffers registered through provisioning calls
    pub registered: usize,
    /// Buffers handed to the kernel, including hand-backs
    pub total_provided: u64,
    /// Completions that selected a buffer from this group
    pub selections: u64,
    /// Explicit hand-backs of selected or free buffers
    pub hand_backs: u64,
    /// Selected buffers retired to `Free`
    pub releases: u64,
    /// Buffers returned to `Free` because their provide failed
    pub rollbacks: u64,
    /// Selections that did not pick the most recently provided buffer
    pub lifo_violations: u64,
    /// Peak number of buffers selected at the same time
    pub peak_selected: usize,
}

impl GroupStats {
    /// Create new statistics instance
    pub fn new() -> Self {
        Default::default()
    }

    /// Fraction of selections that honoured LIFO order (0.0 to 1.0)
    pub fn lifo_conformance(&self) -> f64 {
        if self.selections == 0 {
            return 1.0;
        }
        1.0 - (self.lifo_violations as f64 / self.selections as f64)
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "GroupStats {{ registered: {}, provided: {}, selections: {}, hand_backs: {}, \
             releases: {}, rollbacks: {}, peak_selected: {}, lifo: {:.2}% }}",
            self.registered,
            self.total_provided,
            self.selections,
            self.hand_backs,
            self.releases,
            self.rollbacks,
            self.peak_selected,
            self.lifo_conformance() * 100.0
        )
    }
}
