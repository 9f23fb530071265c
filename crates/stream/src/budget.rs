use std::time::Duration;

/// Per-frame pipeline statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Whether the LOD walk ran this frame.
    pub walked: bool,
    pub dispatched: usize,
    pub completed: usize,
    pub baked: usize,
    /// Sample requests serviced (0 or 1).
    pub samples_serviced: usize,
    pub backlog: usize,
    pub in_flight: usize,
    pub pending_bakes: usize,
    pub chunks: usize,
    pub frame_time: Duration,
}

/// Rolling frame time history with a target budget.
#[derive(Debug)]
pub struct FrameBudget {
    target: Duration,
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
    over_budget: u64,
}

impl FrameBudget {
    pub fn new(capacity: usize, target: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            target,
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
            over_budget: 0,
        }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    pub fn record(&mut self, dt: Duration) {
        if dt > self.target {
            self.over_budget += 1;
            tracing::trace!(?dt, target = ?self.target, "frame over budget");
        }
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn recent(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let recent = self.recent();
        if recent.is_empty() {
            return Duration::ZERO;
        }
        recent.iter().sum::<Duration>() / recent.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.recent().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.recent().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled { self.capacity } else { self.index }
    }

    /// Frames over the target since construction, including ones no longer in the window.
    pub fn over_budget(&self) -> u64 {
        self.over_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_budget_tracks_history() {
        let mut budget = FrameBudget::new(3, Duration::from_millis(16));
        budget.record(Duration::from_millis(10));
        budget.record(Duration::from_millis(20));
        budget.record(Duration::from_millis(30));

        assert_eq!(budget.count(), 3);
        assert_eq!(budget.average(), Duration::from_millis(20));
        assert_eq!(budget.max(), Duration::from_millis(30));
        assert_eq!(budget.min(), Duration::from_millis(10));
        assert_eq!(budget.over_budget(), 2);
    }

    #[test]
    fn frame_budget_wraps_around() {
        let mut budget = FrameBudget::new(2, Duration::from_millis(100));
        budget.record(Duration::from_millis(10));
        budget.record(Duration::from_millis(20));
        budget.record(Duration::from_millis(30));

        assert_eq!(budget.count(), 2);
        assert_eq!(budget.average(), Duration::from_millis(25));
        assert_eq!(budget.over_budget(), 0);
    }

    #[test]
    fn empty_budget_reports_zero() {
        let budget = FrameBudget::new(0, Duration::from_millis(16));
        assert_eq!(budget.count(), 0);
        assert_eq!(budget.average(), Duration::ZERO);
        assert_eq!(budget.max(), Duration::ZERO);
    }
}
