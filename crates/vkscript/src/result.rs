//! Per-script test results and result aggregation

/// Outcome of running a single test script
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestResult {
    /// The script could not run on this device (missing feature,
    /// unsupported framebuffer format, external device mismatch)
    Skip,
    /// Every command executed and every probe matched
    Pass,
    /// A command failed or a probe mismatched
    Fail,
}

impl TestResult {
    /// Combine the results of two scripts; failure dominates and a skip
    /// never hides a pass
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }

    /// Lower-case name used in the final report line
    pub fn name(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_failure_dominates() {
        assert_eq!(TestResult::Pass.merge(TestResult::Fail), TestResult::Fail);
        assert_eq!(TestResult::Fail.merge(TestResult::Skip), TestResult::Fail);
        assert_eq!(TestResult::Fail.merge(TestResult::Fail), TestResult::Fail);
    }

    #[test]
    fn test_merge_pass_beats_skip() {
        assert_eq!(TestResult::Skip.merge(TestResult::Pass), TestResult::Pass);
        assert_eq!(TestResult::Pass.merge(TestResult::Skip), TestResult::Pass);
        assert_eq!(TestResult::Skip.merge(TestResult::Skip), TestResult::Skip);
    }
}
