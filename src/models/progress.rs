use std::time::Duration;

/// A `(processed, total)` pair reported while a conversion runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub processed: Duration,
    pub total: Duration,
}

impl ProgressSnapshot {
    pub fn new(processed: Duration, total: Duration) -> Self {
        Self { processed, total }
    }

    /// Fraction in `0.0..=1.0`, or `None` when the total is unknown.
    pub fn ratio(&self) -> Option<f64> {
        if self.total.is_zero() {
            return None;
        }
        Some((self.processed.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0))
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_clamped() {
        let snapshot = ProgressSnapshot::new(Duration::from_secs(15), Duration::from_secs(10));
        assert_eq!(snapshot.ratio(), Some(1.0));
        assert!(snapshot.is_complete());
    }

    #[test]
    fn ratio_without_total() {
        let snapshot = ProgressSnapshot::new(Duration::from_secs(3), Duration::ZERO);
        assert_eq!(snapshot.ratio(), None);
    }
}
